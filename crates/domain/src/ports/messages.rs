use crate::DomainResult;
use crate::messages::Message;

use super::{BoxFuture, ReparentReport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(Message),
    /// A message with the same provider id already exists in the conversation.
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            Self::Appended(message) | Self::Duplicate(message) => message,
        }
    }
}

pub trait MessageRepository: Send + Sync {
    /// Appends unless `(conversation_id, provider_message_id)` already exists.
    fn append(&self, message: &Message) -> BoxFuture<'_, DomainResult<AppendOutcome>>;

    /// Messages of a conversation ordered by `sent_at`.
    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>>;

    fn count_by_conversation(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<usize>>;

    /// Re-parents every message; rows whose provider id already exists on the
    /// target are deleted instead.
    fn reparent(
        &self,
        from_conversation_id: &str,
        to_conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<ReparentReport>>;
}
