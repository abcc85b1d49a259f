//! Identity resolution: find-or-create a supporter for an inbound email
//! and merge provider linkage onto it.

use std::sync::Arc;

use crate::error::IngestResult;
use crate::model::{LinkedIds, NewSupporter, SourceSystem, Supporter};
use crate::repo::SupporterRepository;

/// Provider linkage carried by an inbound event.
///
/// The customer id is optional: some provider events (a Stripe payment
/// intent without a customer) carry an email but nothing to link.
#[derive(Debug, Clone)]
pub struct CandidateLinkage {
    pub source: SourceSystem,
    pub customer_id: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl CandidateLinkage {
    pub fn new(source: SourceSystem, customer_id: impl Into<String>) -> Self {
        Self {
            source,
            customer_id: Some(customer_id.into()),
            name: None,
            phone: None,
        }
    }

    pub fn unlinked(source: SourceSystem) -> Self {
        Self {
            source,
            customer_id: None,
            name: None,
            phone: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = clean_name(name);
        self
    }

    pub fn with_phone(mut self, phone: Option<String>) -> Self {
        self.phone = phone.filter(|p| !p.trim().is_empty());
        self
    }
}

/// Trim a display name; whitespace-only collapses to `None`.
pub fn clean_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// `"{given} {family}"` with either part optional; empty collapses to
/// `None`.
pub fn combine_name(given: Option<&str>, family: Option<&str>) -> Option<String> {
    clean_name(Some(format!(
        "{} {}",
        given.unwrap_or_default(),
        family.unwrap_or_default()
    )))
}

#[derive(Clone)]
pub struct IdentityResolver {
    supporters: Arc<dyn SupporterRepository>,
}

impl IdentityResolver {
    pub fn new(supporters: Arc<dyn SupporterRepository>) -> Self {
        Self { supporters }
    }

    /// Find-or-create the supporter for this email and attach the provider
    /// linkage.
    ///
    /// Shared-email collisions pick the oldest supporter (matches are
    /// ordered `created_at ASC, supporter_id ASC`), flag it, and log — they
    /// never fail the webhook. A true merge is a privileged admin
    /// operation outside this pipeline.
    pub async fn resolve(
        &self,
        email: &str,
        candidate: CandidateLinkage,
    ) -> IngestResult<Supporter> {
        let email = email.trim().to_lowercase();
        let mut matches = self.supporters.find_by_email(&email).await?;

        match matches.len() {
            0 => {
                let linked_ids = match candidate.customer_id.as_deref() {
                    Some(id) => LinkedIds::single(candidate.source, id),
                    None => LinkedIds::new(),
                };
                let supporter = self
                    .supporters
                    .create(NewSupporter {
                        name: candidate.name.clone(),
                        primary_email: Some(email.clone()),
                        phone: candidate.phone.clone(),
                        linked_ids,
                    })
                    .await?;
                self.supporters
                    .add_email_alias(supporter.supporter_id, &email, false)
                    .await?;

                tracing::info!(
                    supporter_id = %supporter.supporter_id,
                    source = %candidate.source,
                    "Created supporter for previously-unseen email"
                );
                Ok(supporter)
            }
            1 => {
                // Safe: len() == 1.
                #[allow(clippy::unwrap_used)]
                let supporter = matches.pop().unwrap();
                self.attach_linkage(supporter, &candidate).await
            }
            count => {
                tracing::warn!(
                    matches = count,
                    source = %candidate.source,
                    "Shared-email collision; picking oldest supporter"
                );
                let supporter = matches.swap_remove(0);
                self.supporters
                    .set_shared_email_flag(supporter.supporter_id)
                    .await?;
                self.attach_linkage(supporter, &candidate).await
            }
        }
    }

    async fn attach_linkage(
        &self,
        mut supporter: Supporter,
        candidate: &CandidateLinkage,
    ) -> IngestResult<Supporter> {
        if let Some(customer_id) = candidate.customer_id.as_deref() {
            if supporter.linked_ids.get(candidate.source).is_none() {
                supporter.linked_ids.set(candidate.source, customer_id);
                self.supporters
                    .update_linked_ids(supporter.supporter_id, &supporter.linked_ids)
                    .await?;
                tracing::info!(
                    supporter_id = %supporter.supporter_id,
                    source = %candidate.source,
                    "Linked provider customer id to supporter"
                );
            }
        }

        let fill_name = supporter.name.is_none() && candidate.name.is_some();
        let fill_phone = supporter.phone.is_none() && candidate.phone.is_some();
        if fill_name || fill_phone {
            self.supporters
                .update_contact(
                    supporter.supporter_id,
                    candidate.name.as_deref(),
                    candidate.phone.as_deref(),
                )
                .await?;
            if fill_name {
                supporter.name = candidate.name.clone();
            }
            if fill_phone {
                supporter.phone = candidate.phone.clone();
            }
        }

        Ok(supporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::InMemorySupporterRepository;

    fn resolver() -> (IdentityResolver, Arc<InMemorySupporterRepository>) {
        let repo = Arc::new(InMemorySupporterRepository::default());
        (IdentityResolver::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn creates_supporter_and_alias_for_unseen_email() {
        let (resolver, repo) = resolver();
        let candidate = CandidateLinkage::new(SourceSystem::Gocardless, "CU001")
            .with_name(Some("Ada Lovelace".into()));

        let supporter = resolver
            .resolve("New@Example.com", candidate)
            .await
            .unwrap();

        assert_eq!(supporter.primary_email.as_deref(), Some("new@example.com"));
        assert_eq!(supporter.linked_ids.get(SourceSystem::Gocardless), Some("CU001"));
        assert_eq!(supporter.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(repo.aliases_for(supporter.supporter_id), vec!["new@example.com"]);
    }

    #[tokio::test]
    async fn links_provider_id_to_existing_supporter() {
        let (resolver, repo) = resolver();
        let existing = repo.seed("fan@example.com", None);

        let supporter = resolver
            .resolve(
                "fan@example.com",
                CandidateLinkage::new(SourceSystem::Stripe, "cus_123"),
            )
            .await
            .unwrap();

        assert_eq!(supporter.supporter_id, existing);
        assert_eq!(supporter.linked_ids.get(SourceSystem::Stripe), Some("cus_123"));
    }

    #[tokio::test]
    async fn does_not_overwrite_existing_linkage() {
        let (resolver, repo) = resolver();
        let existing = repo.seed("fan@example.com", None);
        resolver
            .resolve(
                "fan@example.com",
                CandidateLinkage::new(SourceSystem::Stripe, "cus_first"),
            )
            .await
            .unwrap();

        let supporter = resolver
            .resolve(
                "fan@example.com",
                CandidateLinkage::new(SourceSystem::Stripe, "cus_second"),
            )
            .await
            .unwrap();

        assert_eq!(supporter.supporter_id, existing);
        assert_eq!(
            supporter.linked_ids.get(SourceSystem::Stripe),
            Some("cus_first")
        );
    }

    #[tokio::test]
    async fn shared_email_picks_oldest_and_flags() {
        let (resolver, repo) = resolver();
        let older = repo.seed("shared@example.com", None);
        let _newer = repo.seed("shared@example.com", None);

        let supporter = resolver
            .resolve(
                "shared@example.com",
                CandidateLinkage::new(SourceSystem::Shopify, "777"),
            )
            .await
            .unwrap();

        assert_eq!(supporter.supporter_id, older);
        assert!(repo.flags_of(older).shared_email);
    }

    #[tokio::test]
    async fn fills_previously_null_name() {
        let (resolver, repo) = resolver();
        let existing = repo.seed("fan@example.com", None);

        let supporter = resolver
            .resolve(
                "fan@example.com",
                CandidateLinkage::new(SourceSystem::Gocardless, "CU9")
                    .with_name(Some("  Grace Hopper ".into())),
            )
            .await
            .unwrap();

        assert_eq!(supporter.supporter_id, existing);
        assert_eq!(supporter.name.as_deref(), Some("Grace Hopper"));
    }

    #[test]
    fn blank_names_collapse_to_none() {
        assert_eq!(clean_name(Some("   ".into())), None);
        assert_eq!(clean_name(Some("".into())), None);
        assert_eq!(clean_name(None), None);
    }

    #[test]
    fn combine_name_handles_partial_parts() {
        assert_eq!(combine_name(Some("Ada"), Some("Lovelace")).as_deref(), Some("Ada Lovelace"));
        assert_eq!(combine_name(Some("Ada"), None).as_deref(), Some("Ada"));
        assert_eq!(combine_name(None, Some("Lovelace")).as_deref(), Some("Lovelace"));
        assert_eq!(combine_name(None, None), None);
    }
}
