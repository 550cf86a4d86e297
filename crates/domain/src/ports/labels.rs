use crate::DomainResult;
use crate::labels::ConversationLabel;

use super::{BoxFuture, ReparentReport, UpsertOutcome};

pub trait LabelRepository: Send + Sync {
    fn add(
        &self,
        label: &ConversationLabel,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<ConversationLabel>>>;

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ConversationLabel>>>;

    /// Moves labels; a label already present on the target is discarded.
    fn reparent(
        &self,
        from_conversation_id: &str,
        to_conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<ReparentReport>>;
}
