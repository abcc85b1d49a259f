//! Core data model: supporters, events, memberships.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Provider a webhook or API record originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    Shopify,
    Stripe,
    Gocardless,
    Futureticketing,
    Mailchimp,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Shopify => "shopify",
            SourceSystem::Stripe => "stripe",
            SourceSystem::Gocardless => "gocardless",
            SourceSystem::Futureticketing => "futureticketing",
            SourceSystem::Mailchimp => "mailchimp",
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shopify" => Ok(SourceSystem::Shopify),
            "stripe" => Ok(SourceSystem::Stripe),
            "gocardless" => Ok(SourceSystem::Gocardless),
            "futureticketing" => Ok(SourceSystem::Futureticketing),
            "mailchimp" => Ok(SourceSystem::Mailchimp),
            other => Err(format!("unknown source system: {other}")),
        }
    }
}

/// Kind of fact recorded against a supporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TicketPurchase,
    StadiumEntry,
    ShopOrder,
    MembershipEvent,
    PaymentEvent,
    EmailClick,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TicketPurchase => "ticket_purchase",
            EventType::StadiumEntry => "stadium_entry",
            EventType::ShopOrder => "shop_order",
            EventType::MembershipEvent => "membership_event",
            EventType::PaymentEvent => "payment_event",
            EventType::EmailClick => "email_click",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ticket_purchase" => Ok(EventType::TicketPurchase),
            "stadium_entry" => Ok(EventType::StadiumEntry),
            "shop_order" => Ok(EventType::ShopOrder),
            "membership_event" => Ok(EventType::MembershipEvent),
            "payment_event" => Ok(EventType::PaymentEvent),
            "email_click" => Ok(EventType::EmailClick),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Membership billing status. Stored verbatim, including the space in
/// `Past Due`, so stored rows match what the profile APIs render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipStatus {
    Active,
    PastDue,
    Cancelled,
    Unknown,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "Active",
            MembershipStatus::PastDue => "Past Due",
            MembershipStatus::Cancelled => "Cancelled",
            MembershipStatus::Unknown => "Unknown",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(MembershipStatus::Active),
            "Past Due" => Ok(MembershipStatus::PastDue),
            "Cancelled" => Ok(MembershipStatus::Cancelled),
            "Unknown" => Ok(MembershipStatus::Unknown),
            other => Err(format!("unknown membership status: {other}")),
        }
    }
}

/// Billing cadence of a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cadence {
    Monthly,
    Annual,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Monthly => "Monthly",
            Cadence::Annual => "Annual",
        }
    }

    /// Derive a cadence from a provider interval unit.
    ///
    /// `monthly`/`month` map to Monthly; everything else is Annual.
    pub fn from_interval_unit(unit: &str) -> Cadence {
        match unit.to_ascii_lowercase().as_str() {
            "monthly" | "month" => Cadence::Monthly,
            _ => Cadence::Annual,
        }
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Monthly" => Ok(Cadence::Monthly),
            "Annual" => Ok(Cadence::Annual),
            other => Err(format!("unknown cadence: {other}")),
        }
    }
}

/// Which provider currently bills the membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingMethod {
    Stripe,
    Gocardless,
}

impl BillingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingMethod::Stripe => "stripe",
            BillingMethod::Gocardless => "gocardless",
        }
    }
}

impl FromStr for BillingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(BillingMethod::Stripe),
            "gocardless" => Ok(BillingMethod::Gocardless),
            other => Err(format!("unknown billing method: {other}")),
        }
    }
}

/// Supporter classification. Assignment beyond the default is an admin or
/// analytics concern; the pipeline only ever creates `Unknown` supporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupporterType {
    Unknown,
    Fan,
    Member,
    SeasonTicketHolder,
}

impl SupporterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupporterType::Unknown => "unknown",
            SupporterType::Fan => "fan",
            SupporterType::Member => "member",
            SupporterType::SeasonTicketHolder => "season_ticket_holder",
        }
    }
}

impl FromStr for SupporterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(SupporterType::Unknown),
            "fan" => Ok(SupporterType::Fan),
            "member" => Ok(SupporterType::Member),
            "season_ticket_holder" => Ok(SupporterType::SeasonTicketHolder),
            other => Err(format!("unknown supporter type: {other}")),
        }
    }
}

/// Whether the classification came from the pipeline or an admin override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSource {
    Auto,
    AdminOverride,
}

impl TypeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeSource::Auto => "auto",
            TypeSource::AdminOverride => "admin_override",
        }
    }
}

impl FromStr for TypeSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(TypeSource::Auto),
            "admin_override" => Ok(TypeSource::AdminOverride),
            other => Err(format!("unknown type source: {other}")),
        }
    }
}

/// Map of provider name to provider-native customer id, stored as JSONB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkedIds(BTreeMap<String, String>);

impl LinkedIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(source: SourceSystem, id: &str) -> Self {
        let mut linked = Self::default();
        linked.set(source, id);
        linked
    }

    pub fn get(&self, source: SourceSystem) -> Option<&str> {
        self.0.get(source.as_str()).map(String::as_str)
    }

    pub fn set(&mut self, source: SourceSystem, id: &str) {
        self.0.insert(source.as_str().to_string(), id.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Soft markers on a supporter record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupporterFlags {
    #[serde(default)]
    pub shared_email: bool,
}

/// A deduplicated person/account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supporter {
    pub supporter_id: Uuid,
    pub name: Option<String>,
    pub primary_email: Option<String>,
    pub phone: Option<String>,
    pub supporter_type: SupporterType,
    pub supporter_type_source: TypeSource,
    pub linked_ids: LinkedIds,
    pub flags: SupporterFlags,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields for creating a supporter on first contact.
#[derive(Debug, Clone, Default)]
pub struct NewSupporter {
    pub name: Option<String>,
    pub primary_email: Option<String>,
    pub phone: Option<String>,
    pub linked_ids: LinkedIds,
}

/// An immutable fact recorded against a supporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub supporter_id: Uuid,
    pub source_system: SourceSystem,
    pub event_type: EventType,
    pub event_time: OffsetDateTime,
    pub external_id: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub metadata: serde_json::Value,
    pub raw_payload_ref: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Fields for inserting an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub supporter_id: Uuid,
    pub source_system: SourceSystem,
    pub event_type: EventType,
    pub event_time: OffsetDateTime,
    pub external_id: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub metadata: serde_json::Value,
    pub raw_payload_ref: Option<String>,
}

/// The one-per-supporter recurring billing relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub supporter_id: Uuid,
    pub tier: Option<String>,
    pub cadence: Option<Cadence>,
    pub billing_method: Option<BillingMethod>,
    pub status: MembershipStatus,
    pub last_payment_date: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Upsert input for a membership.
///
/// `tier` and `cadence` are COALESCE-merged: a `None` here never
/// overwrites a value already on the row.
#[derive(Debug, Clone)]
pub struct MembershipUpsert {
    pub supporter_id: Uuid,
    pub tier: Option<String>,
    pub cadence: Option<Cadence>,
    pub billing_method: Option<BillingMethod>,
    pub status: MembershipStatus,
    pub last_payment_date: Option<OffsetDateTime>,
}

/// Convert provider integer minor units to a stored amount (divide by 100).
pub fn amount_from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Currency codes are upper-cased on storage.
pub fn normalize_currency(code: &str) -> String {
    code.to_ascii_uppercase()
}
