use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::DomainResult;
use crate::aliases::provider_recipient;
use crate::error::DomainError;
use crate::locks::{ConversationLockService, LockKey};
use crate::messages::{Direction, Message, MessageType, SenderType};
use crate::outbox::{OutboxEntry, OutboxStatus, SenderKind};
use crate::ports::UpsertOutcome;
use crate::ports::contacts::ContactRepository;
use crate::ports::conversations::ConversationRepository;
use crate::ports::messages::MessageRepository;
use crate::ports::outbox::OutboxRepository;
use crate::ports::provider::{MessagingProvider, ProviderSendRequest};
use crate::util::{fingerprint, now_ms};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchRequest {
    pub conversation_id: String,
    pub recipient: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub sender_kind: SenderKind,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub outbox_id: String,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    /// True when an earlier request with the same key was returned instead.
    pub deduped: bool,
}

impl DispatchOutcome {
    fn from_entry(entry: &OutboxEntry, deduped: bool) -> Self {
        Self {
            outbox_id: entry.outbox_id.clone(),
            idempotency_key: entry.idempotency_key.clone(),
            status: entry.status,
            provider_message_id: entry.provider_message_id.clone(),
            error: entry.error.clone(),
            deduped,
        }
    }
}

#[derive(Serialize)]
struct FingerprintFields<'a> {
    conversation_id: &'a str,
    recipient: &'a str,
    content: &'a str,
    message_type: &'a str,
    media_url: Option<&'a str>,
}

/// Deterministic key over the fields that make two sends the same send.
pub fn dispatch_fingerprint(
    conversation_id: &str,
    recipient: &str,
    content: &str,
    message_type: MessageType,
    media_url: Option<&str>,
) -> DomainResult<String> {
    fingerprint(&FingerprintFields {
        conversation_id: conversation_id.trim(),
        recipient: recipient.trim(),
        content: content.trim(),
        message_type: message_type.as_str(),
        media_url: media_url.map(str::trim).filter(|value| !value.is_empty()),
    })
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub ai_pause_after_human: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ai_pause_after_human: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    conversations: Arc<dyn ConversationRepository>,
    contacts: Arc<dyn ContactRepository>,
    messages: Arc<dyn MessageRepository>,
    outbox: Arc<dyn OutboxRepository>,
    provider: Arc<dyn MessagingProvider>,
    locks: ConversationLockService,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        contacts: Arc<dyn ContactRepository>,
        messages: Arc<dyn MessageRepository>,
        outbox: Arc<dyn OutboxRepository>,
        provider: Arc<dyn MessagingProvider>,
        locks: ConversationLockService,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            conversations,
            contacts,
            messages,
            outbox,
            provider,
            locks,
            config,
        }
    }

    /// Sends at most once per idempotency key. The pending outbox insert is the
    /// only gate: a key that already exists returns its recorded outcome
    /// without touching the provider.
    pub async fn dispatch(&self, request: &DispatchRequest) -> DomainResult<DispatchOutcome> {
        let content = request.content.trim();
        let media_url = request
            .media_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if content.is_empty() && media_url.is_none() {
            return Err(DomainError::Validation(
                "content or media_url is required".into(),
            ));
        }
        if request.message_type.is_media() && media_url.is_none() {
            return Err(DomainError::Validation(format!(
                "{} messages require media_url",
                request.message_type.as_str()
            )));
        }

        let conversation = self
            .conversations
            .get(&request.conversation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        let recipient = match request
            .recipient
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(recipient) => recipient.to_string(),
            None => self.default_recipient(&conversation).await?,
        };

        let idempotency_key = match request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(key) => key.to_string(),
            None => dispatch_fingerprint(
                &conversation.conversation_id,
                &recipient,
                content,
                request.message_type,
                media_url,
            )?,
        };

        let pending = OutboxEntry::pending(
            &conversation.conversation_id,
            &idempotency_key,
            &recipient,
            content,
            request.message_type,
            media_url.map(str::to_string),
            request.sender_kind,
        );
        let mut entry = match self.outbox.insert_pending(&pending).await? {
            UpsertOutcome::Inserted(entry) => entry,
            UpsertOutcome::Existing(existing) => {
                tracing::info!(
                    idempotency_key = %existing.idempotency_key,
                    status = existing.status.as_str(),
                    "duplicate dispatch suppressed"
                );
                return Ok(DispatchOutcome::from_entry(&existing, true));
            }
        };

        let send = ProviderSendRequest {
            recipient: entry.to_chat_id.clone(),
            message_type: entry.message_type,
            content: entry.content.clone(),
            media_url: entry.media_url.clone(),
            idempotency_key: entry.idempotency_key.clone(),
        };
        match self.provider.send(&send).await {
            Ok(receipt) => {
                entry.mark_sent(&receipt.provider_message_id);
                entry = self.outbox.update(&entry).await?;
                tracing::info!(
                    outbox_id = %entry.outbox_id,
                    provider = self.provider.name(),
                    provider_message_id = %receipt.provider_message_id,
                    "outbound message sent"
                );
            }
            Err(err) => {
                tracing::warn!(
                    outbox_id = %entry.outbox_id,
                    provider = self.provider.name(),
                    error = %err,
                    "outbound send failed"
                );
                entry.mark_failed(err.to_string());
                entry = self.outbox.update(&entry).await?;
                return Ok(DispatchOutcome::from_entry(&entry, false));
            }
        }

        // The provider accepted the message; recording it is retried by the
        // reconciler when the conversation lease is unavailable right now.
        match self.record_outbound(&entry).await {
            Ok(recorded) => entry = recorded,
            Err(err) => tracing::warn!(
                outbox_id = %entry.outbox_id,
                error = %err,
                "outbound message left for reconciliation"
            ),
        }
        Ok(DispatchOutcome::from_entry(&entry, false))
    }

    async fn default_recipient(
        &self,
        conversation: &crate::conversations::Conversation,
    ) -> DomainResult<String> {
        let contact = match conversation.contact_id.as_deref() {
            Some(contact_id) => self.contacts.get(contact_id).await?,
            None => None,
        };
        provider_recipient(
            conversation.chat_id.as_deref(),
            contact.as_ref().and_then(|contact| contact.lid.as_deref()),
            contact.as_ref().and_then(|contact| contact.phone.as_deref()),
        )
        .ok_or_else(|| DomainError::Validation("conversation has no reachable recipient".into()))
    }

    /// Appends the outbound message for a sent entry and applies its
    /// conversation side effects under the conversation lease.
    pub async fn record_outbound(&self, entry: &OutboxEntry) -> DomainResult<OutboxEntry> {
        if !entry.needs_recording() {
            return Ok(entry.clone());
        }
        let key = LockKey::conversation(&entry.conversation_id);
        self.locks
            .with_lease(&key, |lease| async move {
                lease.ensure_live()?;
                let mut conversation = self
                    .conversations
                    .get(&entry.conversation_id)
                    .await?
                    .ok_or(DomainError::NotFound)?;

                let sent_at = entry.sent_at_ms.unwrap_or_else(now_ms);
                let sender_type = match entry.sender_kind {
                    SenderKind::Human => SenderType::Human,
                    SenderKind::Ai => SenderType::Ai,
                    SenderKind::System => SenderType::System,
                };
                let message = Message::new(
                    &conversation.conversation_id,
                    Direction::Outbound,
                    sender_type,
                    entry.message_type,
                    entry.content.clone(),
                )
                .with_media_url(entry.media_url.clone())
                .with_provider_message_id(entry.provider_message_id.clone())
                .with_sent_at(sent_at);
                let appended = self.messages.append(&message).await?;

                conversation.record_activity(sent_at, &appended.message().preview());
                if entry.sender_kind == SenderKind::Human {
                    let until = now_ms() + self.config.ai_pause_after_human.as_millis() as i64;
                    conversation.pause_ai(until);
                    tracing::info!(
                        conversation_id = %conversation.conversation_id,
                        ai_paused_until_ms = until,
                        "ai paused after human reply"
                    );
                }
                lease.ensure_live()?;
                self.conversations.update(&conversation).await?;

                let mut recorded = entry.clone();
                recorded.mark_recorded();
                self.outbox.update(&recorded).await
            })
            .await
    }

    /// Records messages for sent entries whose recording was interrupted.
    /// Returns how many were recorded.
    pub async fn reconcile_unrecorded(&self, limit: usize) -> DomainResult<usize> {
        let entries = self.outbox.list_unrecorded(limit).await?;
        let mut recorded = 0;
        for entry in entries {
            // Re-read: a merge may have moved the entry since it was listed.
            let Some(current) = self.outbox.get(&entry.outbox_id).await? else {
                continue;
            };
            match self.record_outbound(&current).await {
                Ok(_) => recorded += 1,
                Err(DomainError::NotFound) => {
                    tracing::warn!(
                        outbox_id = %current.outbox_id,
                        conversation_id = %current.conversation_id,
                        "outbox entry points at a missing conversation"
                    );
                }
                Err(err) if err.is_retryable() => {
                    tracing::debug!(outbox_id = %current.outbox_id, error = %err, "reconcile deferred");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_surrounding_whitespace() {
        let a = dispatch_fingerprint("c1", "5581@s.whatsapp.net", "hello", MessageType::Text, None)
            .unwrap();
        let b = dispatch_fingerprint(
            "c1",
            " 5581@s.whatsapp.net",
            "hello  ",
            MessageType::Text,
            Some(" "),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_separates_conversations_and_types() {
        let base =
            dispatch_fingerprint("c1", "r", "hello", MessageType::Text, None).unwrap();
        assert_ne!(
            base,
            dispatch_fingerprint("c2", "r", "hello", MessageType::Text, None).unwrap()
        );
        assert_ne!(
            base,
            dispatch_fingerprint("c1", "r", "hello", MessageType::Image, Some("u")).unwrap()
        );
    }
}
