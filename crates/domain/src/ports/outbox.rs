use crate::DomainResult;
use crate::outbox::OutboxEntry;

use super::{BoxFuture, ReparentReport, UpsertOutcome};

pub trait OutboxRepository: Send + Sync {
    /// The at-most-once gate: insert guarded by the unique `idempotency_key`.
    fn insert_pending(
        &self,
        entry: &OutboxEntry,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<OutboxEntry>>>;

    fn get(&self, outbox_id: &str) -> BoxFuture<'_, DomainResult<Option<OutboxEntry>>>;

    fn get_by_key(&self, idempotency_key: &str)
    -> BoxFuture<'_, DomainResult<Option<OutboxEntry>>>;

    fn update(&self, entry: &OutboxEntry) -> BoxFuture<'_, DomainResult<OutboxEntry>>;

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<OutboxEntry>>>;

    /// Entries the provider accepted whose message row is still missing.
    fn list_unrecorded(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<OutboxEntry>>>;

    fn reparent(
        &self,
        from_conversation_id: &str,
        to_conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<ReparentReport>>;
}
