//! End-to-end pipeline tests over in-memory repositories and fake
//! provider clients: identity creation, idempotent redelivery, amount
//! normalization, and membership transitions.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use time::macros::datetime;
use uuid::Uuid;

use crate::clients::futureticketing::{FtEntry, FtOrder};
use crate::clients::gocardless::{
    GcCustomer, GcMandate, GcMandateLinks, GcPayment, GcPaymentLinks, GcSubscription,
    GcSubscriptionLinks,
};
use crate::clients::stripe::StripeCustomer;
use crate::model::{
    BillingMethod, Cadence, EventType, MembershipStatus, MembershipUpsert, SourceSystem,
};
use crate::processor::EventProcessor;
use crate::queue::QueueMessage;
use crate::repo::{MembershipRepository, Repositories};
use crate::testutil::{
    FakeFutureTicketing, FakeGoCardless, FakeStripe, InMemoryEventRepository,
    InMemoryMembershipRepository, InMemorySupporterRepository,
};
use crate::ticketing::TicketingSync;

struct Pipeline {
    supporters: Arc<InMemorySupporterRepository>,
    events: Arc<InMemoryEventRepository>,
    memberships: Arc<InMemoryMembershipRepository>,
    gocardless: Arc<FakeGoCardless>,
    stripe: Arc<FakeStripe>,
    processor: EventProcessor,
}

fn pipeline() -> Pipeline {
    let supporters = Arc::new(InMemorySupporterRepository::default());
    let events = Arc::new(InMemoryEventRepository::default());
    let memberships = Arc::new(InMemoryMembershipRepository::default());
    let gocardless = Arc::new(FakeGoCardless::default());
    let stripe = Arc::new(FakeStripe::default());

    let repos = Repositories {
        supporters: supporters.clone(),
        events: events.clone(),
        memberships: memberships.clone(),
    };
    let processor = EventProcessor::new(repos, gocardless.clone(), stripe.clone());

    Pipeline {
        supporters,
        events,
        memberships,
        gocardless,
        stripe,
        processor,
    }
}

fn msg(event: serde_json::Value) -> QueueMessage {
    QueueMessage {
        event,
        raw_payload_ref: "test/2026-01-05/payload.json".to_string(),
        correlation_id: Uuid::new_v4(),
    }
}

/// Seed the GoCardless fake with the payment -> mandate -> customer chain
/// the confirmed-payment handler walks.
fn seed_gc_payment_chain(p: &Pipeline) {
    p.gocardless.add_payment(GcPayment {
        id: "PM001".into(),
        amount: 1000,
        currency: "GBP".into(),
        status: Some("confirmed".into()),
        links: GcPaymentLinks {
            mandate: Some("MD001".into()),
            subscription: None,
        },
    });
    p.gocardless.add_mandate(GcMandate {
        id: "MD001".into(),
        status: Some("active".into()),
        links: GcMandateLinks {
            customer: Some("CU001".into()),
        },
    });
    p.gocardless.add_customer(GcCustomer {
        id: "CU001".into(),
        email: Some("new@example.com".into()),
        given_name: Some("Ada".into()),
        family_name: Some("Lovelace".into()),
        phone_number: None,
    });
}

fn gc_confirmed_msg() -> QueueMessage {
    msg(json!({
        "id": "EV1",
        "resource_type": "payments",
        "action": "confirmed",
        "created_at": "2026-01-05T10:00:00Z",
        "links": {"payment": "PM001"}
    }))
}

#[tokio::test]
async fn gocardless_confirmed_payment_for_new_customer() {
    let p = pipeline();
    seed_gc_payment_chain(&p);

    p.processor
        .process_message(SourceSystem::Gocardless, &gc_confirmed_msg())
        .await
        .unwrap();

    // Supporter created with the GoCardless linkage.
    let supporters = p.supporters.all();
    assert_eq!(supporters.len(), 1);
    let supporter = &supporters[0];
    assert_eq!(supporter.primary_email.as_deref(), Some("new@example.com"));
    assert_eq!(
        supporter.linked_ids.get(SourceSystem::Gocardless),
        Some("CU001")
    );
    assert_eq!(supporter.name.as_deref(), Some("Ada Lovelace"));

    // One MembershipEvent with the minor units divided by 100.
    let events = p.events.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.external_id, "gocardless-payment-PM001");
    assert_eq!(event.event_type, EventType::MembershipEvent);
    assert_eq!(event.amount, Some(Decimal::new(1000, 2)));
    assert_eq!(event.currency.as_deref(), Some("GBP"));
    assert_eq!(event.event_time, datetime!(2026-01-05 10:00 UTC));

    // Membership upserted Active with the payment stamped.
    let membership = p.memberships.get(supporter.supporter_id).unwrap();
    assert_eq!(membership.status, MembershipStatus::Active);
    assert_eq!(membership.billing_method, Some(BillingMethod::Gocardless));
    assert_eq!(
        membership.last_payment_date,
        Some(datetime!(2026-01-05 10:00 UTC))
    );
}

#[tokio::test]
async fn redelivered_gocardless_message_is_a_noop() {
    let p = pipeline();
    seed_gc_payment_chain(&p);

    p.processor
        .process_message(SourceSystem::Gocardless, &gc_confirmed_msg())
        .await
        .unwrap();
    let create_calls_after_first = p.events.create_calls();

    p.processor
        .process_message(SourceSystem::Gocardless, &gc_confirmed_msg())
        .await
        .unwrap();

    // The guard short-circuits: no second create call, still one event,
    // one supporter, unchanged membership.
    assert_eq!(p.events.create_calls(), create_calls_after_first);
    assert_eq!(p.events.events().len(), 1);
    assert_eq!(p.supporters.all().len(), 1);
}

#[tokio::test]
async fn gocardless_failed_payment_is_payment_event_and_past_due() {
    let p = pipeline();
    seed_gc_payment_chain(&p);

    p.processor
        .process_message(SourceSystem::Gocardless, &gc_confirmed_msg())
        .await
        .unwrap();

    p.processor
        .process_message(
            SourceSystem::Gocardless,
            &msg(json!({
                "id": "EV2",
                "resource_type": "payments",
                "action": "failed",
                "created_at": "2026-02-05T10:00:00Z",
                "links": {"payment": "PM001"}
            })),
        )
        .await
        .unwrap();

    let events = p.events.events();
    assert_eq!(events.len(), 2);
    let failed = events
        .iter()
        .find(|e| e.external_id == "gocardless-payment-failed-PM001")
        .unwrap();
    assert_eq!(failed.event_type, EventType::PaymentEvent);

    let supporter = &p.supporters.all()[0];
    assert_eq!(
        p.memberships.status_of(supporter.supporter_id),
        Some(MembershipStatus::PastDue)
    );
}

#[tokio::test]
async fn gocardless_missing_customer_link_skips_without_error() {
    let p = pipeline();
    p.gocardless.add_payment(GcPayment {
        id: "PM002".into(),
        amount: 500,
        currency: "GBP".into(),
        status: Some("confirmed".into()),
        links: GcPaymentLinks {
            mandate: Some("MD404".into()),
            subscription: None,
        },
    });
    // MD404 is never registered; the mandate lookup yields None.

    p.processor
        .process_message(
            SourceSystem::Gocardless,
            &msg(json!({
                "id": "EV3",
                "resource_type": "payments",
                "action": "confirmed",
                "links": {"payment": "PM002"}
            })),
        )
        .await
        .unwrap();

    assert!(p.events.events().is_empty());
    assert!(p.supporters.all().is_empty());
}

#[tokio::test]
async fn gocardless_subscription_sets_cadence_from_interval_unit() {
    let p = pipeline();
    seed_gc_payment_chain(&p);
    p.gocardless.add_subscription(GcSubscription {
        id: "SB001".into(),
        name: Some("Home Membership".into()),
        interval_unit: Some("monthly".into()),
        links: GcSubscriptionLinks {
            mandate: Some("MD001".into()),
        },
    });

    p.processor
        .process_message(
            SourceSystem::Gocardless,
            &msg(json!({
                "id": "EV4",
                "resource_type": "subscriptions",
                "action": "created",
                "created_at": "2026-01-06T08:00:00Z",
                "links": {"subscription": "SB001"}
            })),
        )
        .await
        .unwrap();

    let supporter = &p.supporters.all()[0];
    let membership = p.memberships.get(supporter.supporter_id).unwrap();
    assert_eq!(membership.status, MembershipStatus::Active);
    assert_eq!(membership.cadence, Some(Cadence::Monthly));
    assert_eq!(membership.tier.as_deref(), Some("Home Membership"));
}

#[tokio::test]
async fn unknown_gocardless_tag_is_logged_not_failed() {
    let p = pipeline();

    p.processor
        .process_message(
            SourceSystem::Gocardless,
            &msg(json!({
                "id": "EV9",
                "resource_type": "payouts",
                "action": "paid",
                "links": {}
            })),
        )
        .await
        .unwrap();

    assert!(p.events.events().is_empty());
}

#[tokio::test]
async fn stripe_payment_intent_amount_normalization() {
    let p = pipeline();

    p.processor
        .process_message(
            SourceSystem::Stripe,
            &msg(json!({
                "id": "evt_1",
                "type": "payment_intent.succeeded",
                "created": 1767225600i64,
                "data": {"object": {
                    "id": "pi_123",
                    "amount": 10000,
                    "currency": "eur",
                    "receipt_email": "fan@example.com",
                    "customer": "cus_9"
                }}
            })),
        )
        .await
        .unwrap();

    let events = p.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].external_id, "stripe-pi-pi_123");
    assert_eq!(events[0].event_type, EventType::PaymentEvent);
    assert_eq!(events[0].amount, Some(Decimal::new(10000, 2)));
    assert_eq!(events[0].currency.as_deref(), Some("EUR"));

    let supporter = &p.supporters.all()[0];
    assert_eq!(supporter.linked_ids.get(SourceSystem::Stripe), Some("cus_9"));
}

#[tokio::test]
async fn stripe_payment_intent_without_email_skips() {
    let p = pipeline();

    p.processor
        .process_message(
            SourceSystem::Stripe,
            &msg(json!({
                "id": "evt_2",
                "type": "payment_intent.succeeded",
                "created": 1767225600i64,
                "data": {"object": {
                    "id": "pi_456",
                    "amount": 2000,
                    "currency": "eur"
                }}
            })),
        )
        .await
        .unwrap();

    assert!(p.events.events().is_empty());
    assert!(p.supporters.all().is_empty());
}

#[tokio::test]
async fn stripe_invoice_payment_failed_moves_active_membership_to_past_due() {
    let p = pipeline();
    let supporter_id = p.supporters.seed("fan@example.com", Some("Ada Lovelace"));
    p.memberships
        .upsert(MembershipUpsert {
            supporter_id,
            tier: Some("home".into()),
            cadence: Some(Cadence::Monthly),
            billing_method: Some(BillingMethod::Stripe),
            status: MembershipStatus::Active,
            last_payment_date: None,
        })
        .await
        .unwrap();

    p.processor
        .process_message(
            SourceSystem::Stripe,
            &msg(json!({
                "id": "evt_3",
                "type": "invoice.payment_failed",
                "created": 1767225600i64,
                "data": {"object": {
                    "id": "in_123",
                    "amount_due": 2500,
                    "currency": "eur",
                    "customer": "cus_9",
                    "customer_email": "fan@example.com"
                }}
            })),
        )
        .await
        .unwrap();

    assert_eq!(
        p.memberships.status_of(supporter_id),
        Some(MembershipStatus::PastDue)
    );

    let events = p.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].external_id, "stripe-invoice-failed-in_123");
    assert_eq!(events[0].event_type, EventType::MembershipEvent);
    assert_eq!(events[0].metadata["status"], "payment_failed");
}

#[tokio::test]
async fn stripe_subscription_event_fetches_customer_for_email() {
    let p = pipeline();
    p.stripe.add_customer(StripeCustomer {
        id: "cus_42".into(),
        email: Some("member@example.com".into()),
        name: Some("Grace Hopper".into()),
        phone: None,
    });

    p.processor
        .process_message(
            SourceSystem::Stripe,
            &msg(json!({
                "id": "evt_4",
                "type": "customer.subscription.created",
                "created": 1767225600i64,
                "data": {"object": {
                    "id": "sub_1",
                    "customer": "cus_42",
                    "status": "active",
                    "items": {"data": [{"price": {
                        "nickname": "Away Membership",
                        "recurring": {"interval": "month"}
                    }}]}
                }}
            })),
        )
        .await
        .unwrap();

    let supporter = &p.supporters.all()[0];
    assert_eq!(
        supporter.primary_email.as_deref(),
        Some("member@example.com")
    );
    let membership = p.memberships.get(supporter.supporter_id).unwrap();
    assert_eq!(membership.status, MembershipStatus::Active);
    assert_eq!(membership.cadence, Some(Cadence::Monthly));
    assert_eq!(membership.tier.as_deref(), Some("Away Membership"));
    assert_eq!(membership.billing_method, Some(BillingMethod::Stripe));
}

#[tokio::test]
async fn stripe_subscription_deleted_cancels_membership() {
    let p = pipeline();
    p.stripe.add_customer(StripeCustomer {
        id: "cus_42".into(),
        email: Some("member@example.com".into()),
        name: None,
        phone: None,
    });

    p.processor
        .process_message(
            SourceSystem::Stripe,
            &msg(json!({
                "id": "evt_5",
                "type": "customer.subscription.deleted",
                "created": 1767225600i64,
                "data": {"object": {"id": "sub_1", "customer": "cus_42", "status": "canceled"}}
            })),
        )
        .await
        .unwrap();

    let supporter = &p.supporters.all()[0];
    assert_eq!(
        p.memberships.status_of(supporter.supporter_id),
        Some(MembershipStatus::Cancelled)
    );
}

#[tokio::test]
async fn shopify_order_creates_shop_order_event() {
    let p = pipeline();

    p.processor
        .process_message(
            SourceSystem::Shopify,
            &msg(json!({
                "topic": "orders/create",
                "payload": {
                    "id": 820982911946154508i64,
                    "email": "shopper@example.com",
                    "created_at": "2026-01-07T14:30:00Z",
                    "total_price": "49.99",
                    "currency": "eur",
                    "financial_status": "paid",
                    "customer": {
                        "id": 115310627314723954i64,
                        "first_name": "Ada",
                        "last_name": "Lovelace"
                    }
                }
            })),
        )
        .await
        .unwrap();

    let events = p.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ShopOrder);
    assert_eq!(events[0].external_id, "shopify-order-820982911946154508");
    assert_eq!(events[0].amount, Some(Decimal::new(4999, 2)));
    assert_eq!(events[0].currency.as_deref(), Some("EUR"));

    let supporter = &p.supporters.all()[0];
    assert_eq!(
        supporter.linked_ids.get(SourceSystem::Shopify),
        Some("115310627314723954")
    );
}

#[tokio::test]
async fn mailchimp_click_creates_email_click_event() {
    let p = pipeline();

    let message = msg(json!({
        "type": "click",
        "fired_at": "2026-01-08 09:15:00",
        "data": {
            "id": "sub_abc",
            "email": "Reader@Example.com",
            "campaign_id": "cmp_1",
            "url": "https://club.example.com/news"
        }
    }));
    p.processor
        .process_message(SourceSystem::Mailchimp, &message)
        .await
        .unwrap();

    let events = p.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::EmailClick);
    assert_eq!(
        events[0].external_id,
        "mailchimp-click-cmp_1-reader@example.com"
    );
    assert_eq!(events[0].event_time, datetime!(2026-01-08 09:15 UTC));

    // Redelivery of the same click dedups.
    p.processor
        .process_message(SourceSystem::Mailchimp, &message)
        .await
        .unwrap();
    assert_eq!(p.events.events().len(), 1);
}

#[tokio::test]
async fn mailchimp_subscribe_only_resolves_identity() {
    let p = pipeline();

    p.processor
        .process_message(
            SourceSystem::Mailchimp,
            &msg(json!({
                "type": "subscribe",
                "data": {
                    "id": "sub_abc",
                    "email": "reader@example.com",
                    "merges": {"FNAME": "Ada", "LNAME": "Lovelace"}
                }
            })),
        )
        .await
        .unwrap();

    assert!(p.events.events().is_empty());
    let supporter = &p.supporters.all()[0];
    assert_eq!(
        supporter.linked_ids.get(SourceSystem::Mailchimp),
        Some("sub_abc")
    );
    assert_eq!(supporter.name.as_deref(), Some("Ada Lovelace"));
}

#[tokio::test]
async fn ticketing_sync_is_idempotent_across_overlapping_windows() {
    let supporters = Arc::new(InMemorySupporterRepository::default());
    let events = Arc::new(InMemoryEventRepository::default());
    let memberships = Arc::new(InMemoryMembershipRepository::default());
    let repos = Repositories {
        supporters: supporters.clone(),
        events: events.clone(),
        memberships,
    };
    let ft = Arc::new(FakeFutureTicketing::default());
    ft.add_order(FtOrder {
        id: "FT1".into(),
        customer_id: Some("C9".into()),
        email: Some("fan@example.com".into()),
        first_name: Some("Ada".into()),
        last_name: Some("Lovelace".into()),
        phone: None,
        total: Some(Decimal::new(2550, 2)),
        currency: Some("eur".into()),
        created_at: datetime!(2026-06-01 09:30 UTC),
    });
    ft.add_entry(FtEntry {
        id: "EN1".into(),
        email: Some("fan@example.com".into()),
        customer_id: Some("C9".into()),
        gate: Some("North 3".into()),
        scanned_at: datetime!(2026-06-01 18:45 UTC),
    });

    let sync = TicketingSync::new(ft, &repos);
    let since = datetime!(2026-06-01 00:00 UTC);

    assert_eq!(sync.sync_orders(since).await.unwrap(), 1);
    assert_eq!(sync.sync_entries(since).await.unwrap(), 1);

    // Overlapping second run writes nothing new.
    assert_eq!(sync.sync_orders(since).await.unwrap(), 0);
    assert_eq!(sync.sync_entries(since).await.unwrap(), 0);

    let all = events.events();
    assert_eq!(all.len(), 2);
    let order = all
        .iter()
        .find(|e| e.external_id == "futureticketing-order-FT1")
        .unwrap();
    assert_eq!(order.event_type, EventType::TicketPurchase);
    assert_eq!(order.currency.as_deref(), Some("EUR"));
    let entry = all
        .iter()
        .find(|e| e.external_id == "futureticketing-entry-EN1")
        .unwrap();
    assert_eq!(entry.event_type, EventType::StadiumEntry);

    // Both facts attach to one supporter.
    assert_eq!(supporters.all().len(), 1);
    assert_eq!(
        supporters.all()[0].linked_ids.get(SourceSystem::Futureticketing),
        Some("C9")
    );
}
