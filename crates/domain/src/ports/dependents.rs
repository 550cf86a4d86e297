use crate::DomainResult;

use super::{BoxFuture, ReparentReport};

/// Records owned by a conversation outside this engine (tickets, protocols).
/// Registered with the consolidation service so merges carry them along.
pub trait DependentStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn reparent(
        &self,
        from_conversation_id: &str,
        to_conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<ReparentReport>>;
}
