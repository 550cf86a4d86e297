use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            _ => Err("unknown message direction"),
        }
    }
}

/// Who produced a message. `Device` marks messages typed on the business
/// phone itself and echoed back by the provider.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Contact,
    Human,
    Ai,
    System,
    Device,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Human => "human",
            Self::Ai => "ai",
            Self::System => "system",
            Self::Device => "device",
        }
    }
}

impl FromStr for SenderType {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "contact" => Ok(Self::Contact),
            "human" => Ok(Self::Human),
            "ai" => Ok(Self::Ai),
            "system" => Ok(Self::System),
            "device" => Ok(Self::Device),
            _ => Err("unknown sender type"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl FromStr for MessageType {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            _ => Err("unknown message type"),
        }
    }
}

/// Immutable message record. Merges change `conversation_id`; nothing else is
/// ever rewritten.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub direction: Direction,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    pub content: String,
    pub media_url: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at_ms: i64,
    pub created_at_ms: i64,
}

impl Message {
    pub fn new(
        conversation_id: &str,
        direction: Direction,
        sender_type: SenderType,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            message_id: uuid_v7_without_dashes(),
            conversation_id: conversation_id.to_string(),
            direction,
            sender_type,
            message_type,
            content: content.into(),
            media_url: None,
            provider_message_id: None,
            sent_at_ms: now,
            created_at_ms: now,
        }
    }

    pub fn with_media_url(mut self, media_url: Option<String>) -> Self {
        self.media_url = media_url;
        self
    }

    pub fn with_provider_message_id(mut self, provider_message_id: Option<String>) -> Self {
        self.provider_message_id = provider_message_id.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_sent_at(mut self, sent_at_ms: i64) -> Self {
        self.sent_at_ms = sent_at_ms;
        self
    }

    /// Text shown in conversation lists.
    pub fn preview(&self) -> String {
        if self.content.trim().is_empty() && self.message_type.is_media() {
            format!("[{}]", self.message_type.as_str())
        } else {
            self.content.clone()
        }
    }
}

/// Orders messages the way a conversation displays them.
pub fn sort_for_display(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.sent_at_ms
            .cmp(&b.sent_at_ms)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
}
