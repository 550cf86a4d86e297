use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::DomainResult;
use crate::aliases::{Alias, AliasSet};
use crate::contacts::{Contact, MergeCandidate, MergeReason};
use crate::error::DomainError;
use crate::ports::contacts::{AliasClaim, ContactCreateOutcome, ContactRepository};

const MAX_RESOLVE_ATTEMPTS: usize = 4;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveRequest {
    pub lid: Option<String>,
    pub phone: Option<String>,
    pub chat_lid: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    pub name: Option<String>,
}

impl ResolveRequest {
    pub fn aliases(&self) -> AliasSet {
        AliasSet::from_raw(
            self.lid.as_deref(),
            self.phone.as_deref(),
            self.chat_lid.as_deref(),
            self.chat_id.as_deref(),
            self.is_group,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub contact: Contact,
    pub created: bool,
    /// Aliases registered on an existing contact during this call.
    pub learned: Vec<Alias>,
    pub stage: ResolveStage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveStage {
    Hit,
    Created,
    RaceLost,
}

impl ResolveStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Created => "created",
            Self::RaceLost => "race_lost",
        }
    }
}

/// Maps the aliases of one event to the canonical contact.
#[derive(Clone)]
pub struct IdentityResolver {
    contacts: Arc<dyn ContactRepository>,
}

impl IdentityResolver {
    pub fn new(contacts: Arc<dyn ContactRepository>) -> Self {
        Self { contacts }
    }

    pub async fn resolve_request(&self, request: &ResolveRequest) -> DomainResult<Resolution> {
        self.resolve(&request.aliases(), request.name.as_deref())
            .await
    }

    /// Looks aliases up in precedence order (LID, phone, chat key, group JID),
    /// backfilling whatever the found contact is missing. With no hit, creates
    /// the contact with all aliases at once; losing that race to a concurrent
    /// creator restarts the lookup, which then finds the winner.
    pub async fn resolve(&self, aliases: &AliasSet, name: Option<&str>) -> DomainResult<Resolution> {
        if aliases.is_empty() {
            return Err(DomainError::Validation(
                "at least one of lid, phone, chat_lid or chat_id is required".into(),
            ));
        }

        let mut raced = false;
        for attempt in 0..MAX_RESOLVE_ATTEMPTS {
            if let Some(contact) = self.lookup(aliases).await? {
                let stage = if raced {
                    ResolveStage::RaceLost
                } else {
                    ResolveStage::Hit
                };
                tracing::debug!(
                    contact_id = %contact.contact_id,
                    stage = stage.as_str(),
                    "identity resolved"
                );
                return self.backfill(contact, aliases, stage).await;
            }

            let candidate = Contact::from_aliases(aliases, name);
            match self
                .contacts
                .create_with_aliases(&candidate, &aliases.aliases())
                .await?
            {
                ContactCreateOutcome::Created(contact) => {
                    tracing::info!(
                        contact_id = %contact.contact_id,
                        is_group = contact.is_group,
                        "contact created"
                    );
                    return Ok(Resolution {
                        contact,
                        created: true,
                        learned: Vec::new(),
                        stage: ResolveStage::Created,
                    });
                }
                ContactCreateOutcome::AliasTaken => {
                    tracing::debug!(attempt, "alias registered concurrently, re-resolving");
                    raced = true;
                }
            }
        }

        Err(DomainError::Store(format!(
            "identity resolution did not converge after {MAX_RESOLVE_ATTEMPTS} attempts"
        )))
    }

    async fn lookup(&self, aliases: &AliasSet) -> DomainResult<Option<Contact>> {
        for alias in aliases.aliases() {
            if let Some(contact) = self.contacts.find_by_alias(alias.kind, &alias.value).await? {
                return Ok(Some(contact));
            }
        }
        Ok(None)
    }

    async fn backfill(
        &self,
        contact: Contact,
        aliases: &AliasSet,
        stage: ResolveStage,
    ) -> DomainResult<Resolution> {
        let mut learned = Vec::new();
        for alias in aliases.aliases() {
            if contact.alias(alias.kind) == Some(alias.value.as_str()) {
                continue;
            }
            match self.contacts.claim_alias(&contact.contact_id, &alias).await? {
                AliasClaim::Claimed => {
                    tracing::info!(
                        contact_id = %contact.contact_id,
                        alias_kind = %alias.kind,
                        "alias learned"
                    );
                    learned.push(alias);
                }
                AliasClaim::AlreadyOwned => {}
                AliasClaim::OwnedBy(other_contact_id) => {
                    // The higher-precedence hit wins; the other owner is queued
                    // for the sweep rather than merged inline.
                    tracing::warn!(
                        contact_id = %contact.contact_id,
                        other_contact_id = %other_contact_id,
                        alias = %alias,
                        "alias owned by another contact"
                    );
                    let candidate = MergeCandidate::new(
                        contact.contact_id.clone(),
                        other_contact_id,
                        MergeReason::AliasCollision,
                        Some(alias.to_string()),
                    );
                    self.contacts.record_merge_candidate(&candidate).await?;
                }
            }
        }

        let contact = if learned.is_empty() {
            contact
        } else {
            self.contacts
                .get(&contact.contact_id)
                .await?
                .unwrap_or(contact)
        };
        Ok(Resolution {
            contact,
            created: false,
            learned,
            stage,
        })
    }
}
