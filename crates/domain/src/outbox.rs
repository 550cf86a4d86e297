use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::messages::MessageType;
use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for OutboxStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err("unknown outbox status"),
        }
    }
}

/// Origin of an outbound send. Human sends pause the AI on the conversation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Human,
    Ai,
    #[default]
    System,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
            Self::System => "system",
        }
    }
}

impl FromStr for SenderKind {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "human" => Ok(Self::Human),
            "ai" => Ok(Self::Ai),
            "system" => Ok(Self::System),
            _ => Err("unknown sender kind"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxEntry {
    pub outbox_id: String,
    pub conversation_id: String,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub to_chat_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub sender_kind: SenderKind,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    /// Set once the outbound message row exists in the conversation.
    pub message_recorded: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub sent_at_ms: Option<i64>,
}

impl OutboxEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        conversation_id: &str,
        idempotency_key: &str,
        to_chat_id: &str,
        content: &str,
        message_type: MessageType,
        media_url: Option<String>,
        sender_kind: SenderKind,
    ) -> Self {
        let now = now_ms();
        Self {
            outbox_id: uuid_v7_without_dashes(),
            conversation_id: conversation_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            status: OutboxStatus::Pending,
            to_chat_id: to_chat_id.to_string(),
            content: content.to_string(),
            message_type,
            media_url,
            sender_kind,
            provider_message_id: None,
            error: None,
            message_recorded: false,
            created_at_ms: now,
            updated_at_ms: now,
            sent_at_ms: None,
        }
    }

    pub fn mark_sent(&mut self, provider_message_id: &str) {
        let now = now_ms();
        self.status = OutboxStatus::Sent;
        self.provider_message_id = Some(provider_message_id.to_string());
        self.error = None;
        self.sent_at_ms = Some(now);
        self.updated_at_ms = now;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = OutboxStatus::Failed;
        self.error = Some(error.into());
        self.updated_at_ms = now_ms();
    }

    pub fn mark_recorded(&mut self) {
        self.message_recorded = true;
        self.updated_at_ms = now_ms();
    }

    pub fn needs_recording(&self) -> bool {
        self.status == OutboxStatus::Sent && !self.message_recorded
    }
}
