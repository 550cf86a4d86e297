use crate::DomainResult;
use crate::conversations::Conversation;

use super::{BoxFuture, UpsertOutcome};

pub trait ConversationRepository: Send + Sync {
    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>>;

    fn get_by_thread_key(
        &self,
        thread_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Conversation>>>;

    /// Insert guarded by the unique `thread_key`; returns the stored row when
    /// another writer got there first.
    fn insert_if_absent(
        &self,
        conversation: &Conversation,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<Conversation>>>;

    /// Replaces the row. `Conflict` if the new `thread_key` belongs to another row.
    fn update(&self, conversation: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>>;

    fn list_by_contact(&self, contact_id: &str)
    -> BoxFuture<'_, DomainResult<Vec<Conversation>>>;

    fn list(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<Conversation>>>;

    fn delete(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<bool>>;
}
