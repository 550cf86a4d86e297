use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::messages::MessageType;

use super::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSendRequest {
    pub recipient: String,
    pub message_type: MessageType,
    pub content: String,
    pub media_url: Option<String>,
    pub idempotency_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
}

/// Outbound messaging provider. One call per request; retries belong to the
/// caller, gated by the outbox.
pub trait MessagingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn send(&self, request: &ProviderSendRequest) -> BoxFuture<'_, DomainResult<ProviderReceipt>>;
}
