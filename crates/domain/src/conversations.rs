use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::UpsertOutcome;
use crate::ports::contacts::ContactRepository;
use crate::ports::conversations::ConversationRepository;
use crate::util::{now_ms, uuid_v7_without_dashes};

const DIRECT_PREFIX: &str = "dm:";
const GROUP_PREFIX: &str = "group:";
const PREVIEW_MAX_CHARS: usize = 160;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Pending,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for ConversationStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            _ => Err("unknown conversation status"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    On,
    Off,
}

impl AiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl FromStr for AiMode {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            _ => Err("unknown ai mode"),
        }
    }
}

/// Deterministic conversation key. New writes only ever produce `Direct` or
/// `Group`; `Legacy` covers rows written under older schemes (`u:<phone>`,
/// `phone:<digits>`) until the sweep re-keys them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ThreadKey {
    Direct(String),
    Group(String),
    Legacy(String),
}

impl ThreadKey {
    pub fn direct(contact_id: &str) -> Self {
        Self::Direct(contact_id.to_string())
    }

    pub fn group(chat_id: &str) -> Self {
        Self::Group(chat_id.to_string())
    }

    pub fn for_contact(contact_id: &str, is_group: bool, chat_id: Option<&str>) -> DomainResult<Self> {
        if !is_group {
            return Ok(Self::direct(contact_id));
        }
        chat_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Self::group)
            .ok_or_else(|| DomainError::Validation("group conversations require a chat id".into()))
    }

    pub fn parse(value: &str) -> Self {
        if let Some(id) = value.strip_prefix(DIRECT_PREFIX).filter(|id| !id.is_empty()) {
            return Self::Direct(id.to_string());
        }
        if let Some(id) = value.strip_prefix(GROUP_PREFIX).filter(|id| !id.is_empty()) {
            return Self::Group(id.to_string());
        }
        Self::Legacy(value.to_string())
    }

    pub fn is_canonical(&self) -> bool {
        !matches!(self, Self::Legacy(_))
    }

    /// Raw identifier embedded in a legacy key (`u:558197438430` -> `558197438430`).
    pub fn legacy_identifier(&self) -> Option<&str> {
        match self {
            Self::Legacy(raw) => raw.split_once(':').map(|(_, id)| id).filter(|id| !id.is_empty()),
            _ => None,
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(id) => write!(f, "{DIRECT_PREFIX}{id}"),
            Self::Group(id) => write!(f, "{GROUP_PREFIX}{id}"),
            Self::Legacy(raw) => f.write_str(raw),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub conversation_id: String,
    pub contact_id: Option<String>,
    pub thread_key: String,
    pub chat_id: Option<String>,
    pub status: ConversationStatus,
    pub ai_mode: AiMode,
    pub ai_paused_until_ms: Option<i64>,
    pub unread_count: u32,
    pub last_message_at_ms: Option<i64>,
    pub last_message_preview: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Conversation {
    pub fn new(contact_id: Option<&str>, thread_key: &ThreadKey, chat_id: Option<&str>) -> Self {
        let now = now_ms();
        Self {
            conversation_id: uuid_v7_without_dashes(),
            contact_id: contact_id.map(str::to_string),
            thread_key: thread_key.to_string(),
            chat_id: chat_id.map(str::to_string),
            status: ConversationStatus::Open,
            ai_mode: AiMode::On,
            ai_paused_until_ms: None,
            unread_count: 0,
            last_message_at_ms: None,
            last_message_preview: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn key(&self) -> ThreadKey {
        ThreadKey::parse(&self.thread_key)
    }

    /// Message ordering is by `sent_at`, so a late-arriving older message must
    /// not move the conversation's last activity backwards.
    pub fn record_activity(&mut self, sent_at_ms: i64, preview: &str) {
        let is_latest = self
            .last_message_at_ms
            .is_none_or(|previous| sent_at_ms >= previous);
        if is_latest {
            self.last_message_at_ms = Some(sent_at_ms);
            self.last_message_preview = Some(preview.chars().take(PREVIEW_MAX_CHARS).collect());
        }
        self.updated_at_ms = now_ms();
    }

    pub fn record_inbound(&mut self, sent_at_ms: i64, preview: &str, now: i64) {
        self.record_activity(sent_at_ms, preview);
        self.unread_count = self.unread_count.saturating_add(1);
        if self.status == ConversationStatus::Resolved {
            self.status = ConversationStatus::Open;
        }
        self.resume_ai_if_due(now);
    }

    pub fn pause_ai(&mut self, until_ms: i64) {
        self.ai_mode = AiMode::Off;
        self.ai_paused_until_ms = Some(until_ms);
        self.updated_at_ms = now_ms();
    }

    pub fn resume_ai_if_due(&mut self, now: i64) -> bool {
        match self.ai_paused_until_ms {
            Some(until) if until <= now => {
                self.ai_mode = AiMode::On;
                self.ai_paused_until_ms = None;
                true
            }
            _ => false,
        }
    }

    /// Folds the duplicate's state into this conversation. Repeatable: applying
    /// the same duplicate twice leaves the same result.
    pub fn absorb(&mut self, duplicate: &Conversation) {
        if let Some(at) = duplicate.last_message_at_ms {
            let preview = duplicate.last_message_preview.clone().unwrap_or_default();
            self.record_activity(at, &preview);
        }
        self.unread_count = self.unread_count.max(duplicate.unread_count);
        if self.chat_id.is_none() {
            self.chat_id = duplicate.chat_id.clone();
        }
        if self.contact_id.is_none() {
            self.contact_id = duplicate.contact_id.clone();
        }
        if self.created_at_ms > duplicate.created_at_ms {
            self.created_at_ms = duplicate.created_at_ms;
        }
        self.updated_at_ms = now_ms();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Located {
    pub conversation: Conversation,
    pub created: bool,
}

#[derive(Clone)]
pub struct ConversationLocator {
    conversations: Arc<dyn ConversationRepository>,
    contacts: Arc<dyn ContactRepository>,
}

impl ConversationLocator {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        contacts: Arc<dyn ContactRepository>,
    ) -> Self {
        Self {
            conversations,
            contacts,
        }
    }

    /// Returns the one conversation for a contact (or group), creating it
    /// through an insert-if-absent on the unique thread key.
    ///
    /// Fails with `NotFound` when the contact no longer exists, so a caller
    /// holding the id of a contact merged away re-resolves instead of opening
    /// a thread for it. The check runs after the row is visible: a merge that
    /// deletes the contact later sweeps that row up itself.
    pub async fn locate(
        &self,
        contact_id: &str,
        is_group: bool,
        chat_id: Option<&str>,
    ) -> DomainResult<Located> {
        let thread_key = ThreadKey::for_contact(contact_id, is_group, chat_id)?;
        let key = thread_key.to_string();
        let located = match self.conversations.get_by_thread_key(&key).await? {
            Some(conversation) => Located {
                conversation,
                created: false,
            },
            None => self.insert(contact_id, &thread_key, chat_id).await?,
        };

        if self.contacts.get(contact_id).await?.is_none() {
            if located.created {
                self.conversations
                    .delete(&located.conversation.conversation_id)
                    .await?;
            }
            tracing::debug!(contact_id, thread_key = %key, "contact gone, not locating");
            return Err(DomainError::NotFound);
        }
        Ok(located)
    }

    async fn insert(
        &self,
        contact_id: &str,
        thread_key: &ThreadKey,
        chat_id: Option<&str>,
    ) -> DomainResult<Located> {
        let candidate = Conversation::new(Some(contact_id), thread_key, chat_id);
        match self.conversations.insert_if_absent(&candidate).await? {
            UpsertOutcome::Inserted(conversation) => {
                tracing::info!(
                    conversation_id = %conversation.conversation_id,
                    thread_key = %conversation.thread_key,
                    "conversation created"
                );
                Ok(Located {
                    conversation,
                    created: true,
                })
            }
            UpsertOutcome::Existing(conversation) => {
                tracing::debug!(thread_key = %thread_key, "conversation created concurrently");
                Ok(Located {
                    conversation,
                    created: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_keys_round_trip_through_display() {
        assert_eq!(ThreadKey::parse("dm:abc"), ThreadKey::direct("abc"));
        assert_eq!(ThreadKey::parse("group:120@g.us"), ThreadKey::group("120@g.us"));
        assert_eq!(ThreadKey::direct("abc").to_string(), "dm:abc");

        let legacy = ThreadKey::parse("u:558197438430");
        assert!(!legacy.is_canonical());
        assert_eq!(legacy.legacy_identifier(), Some("558197438430"));
        assert_eq!(ThreadKey::parse("dm:").legacy_identifier(), None);
    }

    #[test]
    fn group_key_requires_chat_id() {
        assert!(ThreadKey::for_contact("c1", true, None).is_err());
        assert_eq!(
            ThreadKey::for_contact("c1", true, Some("120@g.us")).unwrap(),
            ThreadKey::group("120@g.us")
        );
        assert_eq!(
            ThreadKey::for_contact("c1", false, Some("120@g.us")).unwrap(),
            ThreadKey::direct("c1")
        );
    }

    #[test]
    fn inbound_reopens_and_counts_unread() {
        let mut conversation = Conversation::new(Some("c1"), &ThreadKey::direct("c1"), None);
        conversation.status = ConversationStatus::Resolved;
        conversation.record_inbound(2_000, "hello", 2_000);
        conversation.record_inbound(1_000, "older", 2_000);
        assert_eq!(conversation.status, ConversationStatus::Open);
        assert_eq!(conversation.unread_count, 2);
        assert_eq!(conversation.last_message_at_ms, Some(2_000));
        assert_eq!(conversation.last_message_preview.as_deref(), Some("hello"));
    }

    #[test]
    fn paused_ai_resumes_after_deadline() {
        let mut conversation = Conversation::new(Some("c1"), &ThreadKey::direct("c1"), None);
        conversation.pause_ai(5_000);
        assert!(!conversation.resume_ai_if_due(4_999));
        assert_eq!(conversation.ai_mode, AiMode::Off);
        assert!(conversation.resume_ai_if_due(5_000));
        assert_eq!(conversation.ai_mode, AiMode::On);
    }

    #[test]
    fn absorb_is_repeatable() {
        let mut canonical = Conversation::new(Some("c1"), &ThreadKey::direct("c1"), None);
        canonical.record_inbound(1_000, "a", 1_000);
        let mut duplicate = Conversation::new(Some("c1"), &ThreadKey::parse("u:5581"), Some("5581"));
        duplicate.record_inbound(3_000, "b", 3_000);
        duplicate.record_inbound(4_000, "c", 4_000);

        canonical.absorb(&duplicate);
        let once = (canonical.unread_count, canonical.last_message_at_ms, canonical.chat_id.clone());
        canonical.absorb(&duplicate);
        assert_eq!(
            once,
            (canonical.unread_count, canonical.last_message_at_ms, canonical.chat_id.clone())
        );
        assert_eq!(canonical.unread_count, 2);
        assert_eq!(canonical.last_message_at_ms, Some(4_000));
    }
}
