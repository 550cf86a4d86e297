use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::DomainResult;
use crate::aliases::AliasSet;
use crate::contacts::{Contact, clean_name};
use crate::conversations::ConversationLocator;
use crate::error::DomainError;
use crate::identity::IdentityResolver;
use crate::locks::{ConversationLockService, LockKey};
use crate::messages::{Direction, Message, MessageType, SenderType};
use crate::ports::contacts::ContactRepository;
use crate::ports::conversations::ConversationRepository;
use crate::ports::messages::{AppendOutcome, MessageRepository};
use crate::util::now_ms;

/// Epoch values above this are milliseconds; below it, seconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;
/// A contact or conversation merged away between resolve and lease is
/// resolved and located again.
const LOCATE_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextPayload {
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    #[serde(
        alias = "imageUrl",
        alias = "audioUrl",
        alias = "videoUrl",
        alias = "documentUrl"
    )]
    pub url: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Inbound provider webhook (Z-API "on message received" shape).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub message_id: Option<String>,
    pub phone: Option<String>,
    pub chat_lid: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub from_me: bool,
    pub sender_name: Option<String>,
    pub chat_name: Option<String>,
    /// Z-API sends `momment`; other senders use `timestamp`. Both may appear.
    pub momment: Option<i64>,
    pub timestamp: Option<i64>,
    pub text: Option<TextPayload>,
    pub image: Option<MediaPayload>,
    pub audio: Option<MediaPayload>,
    pub video: Option<MediaPayload>,
    pub document: Option<MediaPayload>,
}

/// Message body extracted from an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundContent {
    pub message_type: MessageType,
    pub content: String,
    pub media_url: Option<String>,
}

impl InboundEvent {
    pub fn aliases(&self) -> AliasSet {
        AliasSet::from_raw(
            None,
            self.phone.as_deref(),
            self.chat_lid.as_deref(),
            self.chat_id.as_deref().or(self.phone.as_deref()),
            self.is_group,
        )
    }

    pub fn content(&self) -> Option<InboundContent> {
        if let Some(text) = self.text.as_ref().filter(|text| !text.message.trim().is_empty()) {
            return Some(InboundContent {
                message_type: MessageType::Text,
                content: text.message.clone(),
                media_url: None,
            });
        }
        let media = [
            (MessageType::Image, self.image.as_ref()),
            (MessageType::Audio, self.audio.as_ref()),
            (MessageType::Video, self.video.as_ref()),
            (MessageType::Document, self.document.as_ref()),
        ];
        media.into_iter().find_map(|(message_type, payload)| {
            let payload = payload?;
            let content = payload
                .caption
                .clone()
                .or_else(|| payload.file_name.clone())
                .unwrap_or_default();
            Some(InboundContent {
                message_type,
                content,
                media_url: payload.url.clone(),
            })
        })
    }

    pub fn sent_at_ms(&self) -> Option<i64> {
        let positive = |value: &i64| *value > 0;
        let raw = self
            .momment
            .filter(positive)
            .or_else(|| self.timestamp.filter(positive));
        raw.map(|value| {
            if value > MILLIS_THRESHOLD {
                value
            } else {
                value * 1_000
            }
        })
    }

    /// Display name for the resolved contact. For groups and for our own
    /// echoed messages the sender is not the contact, so the chat name is used.
    pub fn contact_name(&self) -> Option<&str> {
        if self.is_group || self.from_me {
            self.chat_name.as_deref()
        } else {
            self.sender_name.as_deref().or(self.chat_name.as_deref())
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct IngestReceipt {
    pub contact_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub duplicate: bool,
    pub contact_created: bool,
    pub conversation_created: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored(IngestReceipt),
    Ignored { reason: String },
}

#[derive(Clone)]
pub struct IngestService {
    resolver: IdentityResolver,
    locator: ConversationLocator,
    contacts: Arc<dyn ContactRepository>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    locks: ConversationLockService,
}

impl IngestService {
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        locks: ConversationLockService,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(contacts.clone()),
            locator: ConversationLocator::new(conversations.clone(), contacts.clone()),
            contacts,
            conversations,
            messages,
            locks,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn locator(&self) -> &ConversationLocator {
        &self.locator
    }

    /// resolve -> locate -> lease -> append -> update state -> release.
    ///
    /// Busy leases surface as `LockBusy` so the provider redelivers; the event
    /// is never processed without the lease.
    pub async fn handle(&self, event: &InboundEvent) -> DomainResult<IngestOutcome> {
        let Some(content) = event.content() else {
            return Ok(IngestOutcome::Ignored {
                reason: "event carries no message content".into(),
            });
        };
        let aliases = event.aliases();
        if aliases.is_empty() {
            return Err(DomainError::Validation(
                "event carries no sender identifier".into(),
            ));
        }

        let mut resolution = self.resolver.resolve(&aliases, event.contact_name()).await?;
        let contact_created = resolution.created;
        let chat_id = aliases
            .group_jid
            .as_deref()
            .or(aliases.chat_key.as_deref());
        let mut attempt = 0;
        let (located, appended) = loop {
            attempt += 1;
            let contact = &resolution.contact;
            let result = match self
                .locator
                .locate(&contact.contact_id, contact.is_group, chat_id)
                .await
            {
                Ok(located) => {
                    let conversation_id = located.conversation.conversation_id.as_str();
                    self.append_locked(event, &content, contact, conversation_id, chat_id)
                        .await
                        .map(|appended| (located, appended))
                }
                Err(err) => Err(err),
            };
            match result {
                Err(DomainError::NotFound) if attempt < LOCATE_ATTEMPTS => {
                    tracing::debug!(
                        contact_id = %contact.contact_id,
                        "contact or conversation merged away before lease, resolving again"
                    );
                    resolution = self.resolver.resolve(&aliases, event.contact_name()).await?;
                }
                result => break result?,
            }
        };
        let contact = resolution.contact;

        let duplicate = matches!(appended, AppendOutcome::Duplicate(_));
        let message = appended.message();
        tracing::info!(
            contact_id = %contact.contact_id,
            conversation_id = %message.conversation_id,
            message_id = %message.message_id,
            duplicate,
            resolve_stage = resolution.stage.as_str(),
            "inbound event stored"
        );
        Ok(IngestOutcome::Stored(IngestReceipt {
            contact_id: contact.contact_id.clone(),
            conversation_id: message.conversation_id.clone(),
            message_id: message.message_id.clone(),
            duplicate,
            contact_created,
            conversation_created: located.created,
        }))
    }

    async fn append_locked(
        &self,
        event: &InboundEvent,
        content: &InboundContent,
        contact: &Contact,
        conversation_id: &str,
        chat_id: Option<&str>,
    ) -> DomainResult<AppendOutcome> {
        let key = LockKey::conversation(conversation_id);
        self.locks
            .with_lease(&key, |lease| async move {
                lease.ensure_live()?;
                let mut conversation = self
                    .conversations
                    .get(conversation_id)
                    .await?
                    .ok_or(DomainError::NotFound)?;

                let now = now_ms();
                let sent_at = event.sent_at_ms().unwrap_or(now);
                let (direction, sender_type) = if event.from_me {
                    (Direction::Outbound, SenderType::Device)
                } else {
                    (Direction::Inbound, SenderType::Contact)
                };
                let message = Message::new(
                    &conversation.conversation_id,
                    direction,
                    sender_type,
                    content.message_type,
                    content.content.clone(),
                )
                .with_media_url(content.media_url.clone())
                .with_provider_message_id(event.message_id.clone())
                .with_sent_at(sent_at);

                let outcome = self.messages.append(&message).await?;
                if let AppendOutcome::Duplicate(existing) = &outcome {
                    tracing::debug!(
                        conversation_id = %conversation.conversation_id,
                        message_id = %existing.message_id,
                        "provider redelivered a known message"
                    );
                    return Ok(outcome);
                }

                let preview = outcome.message().preview();
                match direction {
                    Direction::Inbound => conversation.record_inbound(sent_at, &preview, now),
                    Direction::Outbound => conversation.record_activity(sent_at, &preview),
                }
                if conversation.chat_id.is_none() {
                    conversation.chat_id = chat_id.map(str::to_string);
                }
                lease.ensure_live()?;
                self.conversations.update(&conversation).await?;

                if contact.name.is_none() {
                    if let Some(name) = clean_name(event.contact_name()) {
                        lease.ensure_live()?;
                        self.contacts.learn_name(&contact.contact_id, &name).await?;
                    }
                }
                Ok(outcome)
            })
            .await
    }
}
