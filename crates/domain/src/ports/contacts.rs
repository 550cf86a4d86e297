use crate::DomainResult;
use crate::aliases::{Alias, AliasKind, AliasRecord};
use crate::contacts::{Contact, MergeCandidate};

use super::BoxFuture;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContactCreateOutcome {
    Created(Contact),
    /// At least one alias was registered concurrently; nothing was written.
    AliasTaken,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AliasClaim {
    Claimed,
    AlreadyOwned,
    OwnedBy(String),
}

pub trait ContactRepository: Send + Sync {
    fn get(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<Option<Contact>>>;

    fn find_by_alias(
        &self,
        kind: AliasKind,
        value: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Contact>>>;

    /// Inserts the contact and all of its aliases atomically.
    fn create_with_aliases(
        &self,
        contact: &Contact,
        aliases: &[Alias],
    ) -> BoxFuture<'_, DomainResult<ContactCreateOutcome>>;

    /// Registers `alias` for the contact if no contact owns it yet, filling the
    /// matching contact column when that column is empty.
    fn claim_alias(
        &self,
        contact_id: &str,
        alias: &Alias,
    ) -> BoxFuture<'_, DomainResult<AliasClaim>>;

    fn list_aliases(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<Vec<AliasRecord>>>;

    /// Moves every alias row owned by `from_contact_id` onto `to_contact_id`.
    fn reassign_aliases(
        &self,
        from_contact_id: &str,
        to_contact_id: &str,
    ) -> BoxFuture<'_, DomainResult<usize>>;

    /// Sets the display name only while the stored contact has none.
    fn learn_name(&self, contact_id: &str, name: &str) -> BoxFuture<'_, DomainResult<bool>>;

    /// Copies the alias columns and name of `source` into the stored contact
    /// wherever the stored column is still empty; set columns are never
    /// overwritten. Returns the stored contact afterwards.
    fn fill_empty_columns(
        &self,
        contact_id: &str,
        source: &Contact,
    ) -> BoxFuture<'_, DomainResult<Option<Contact>>>;

    fn list(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<Contact>>>;

    fn delete(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<bool>>;

    fn record_merge_candidate(
        &self,
        candidate: &MergeCandidate,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn list_merge_candidates(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<MergeCandidate>>>;

    fn delete_merge_candidate(&self, candidate_id: &str) -> BoxFuture<'_, DomainResult<()>>;
}
