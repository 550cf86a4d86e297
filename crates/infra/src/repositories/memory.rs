use std::collections::HashMap;
use std::sync::Arc;

use threadline_domain::DomainResult;
use threadline_domain::aliases::{Alias, AliasKind, AliasRecord};
use threadline_domain::contacts::{Contact, MergeCandidate};
use threadline_domain::conversations::Conversation;
use threadline_domain::error::DomainError;
use threadline_domain::labels::ConversationLabel;
use threadline_domain::messages::{Message, sort_for_display};
use threadline_domain::outbox::OutboxEntry;
use threadline_domain::ports::contacts::{AliasClaim, ContactCreateOutcome, ContactRepository};
use threadline_domain::ports::conversations::ConversationRepository;
use threadline_domain::ports::labels::LabelRepository;
use threadline_domain::ports::messages::{AppendOutcome, MessageRepository};
use threadline_domain::ports::outbox::OutboxRepository;
use threadline_domain::ports::{BoxFuture, ReparentReport, UpsertOutcome};
use threadline_domain::util::now_ms;
use tokio::sync::RwLock;

fn truncate<T>(mut rows: Vec<T>, limit: usize) -> Vec<T> {
    if limit > 0 {
        rows.truncate(limit);
    }
    rows
}

#[derive(Default)]
struct ContactState {
    contacts: HashMap<String, Contact>,
    aliases: HashMap<(AliasKind, String), AliasRecord>,
    candidates: HashMap<String, MergeCandidate>,
}

/// Contacts, the alias index and merge candidates behind one lock so alias
/// uniqueness holds across concurrent creators.
#[derive(Default, Clone)]
pub struct InMemoryContactRepository {
    state: Arc<RwLock<ContactState>>,
}

impl InMemoryContactRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContactRepository for InMemoryContactRepository {
    fn get(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<Option<Contact>>> {
        let contact_id = contact_id.to_string();
        Box::pin(async move { Ok(self.state.read().await.contacts.get(&contact_id).cloned()) })
    }

    fn find_by_alias(
        &self,
        kind: AliasKind,
        value: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Contact>>> {
        let value = value.to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .aliases
                .get(&(kind, value))
                .and_then(|record| state.contacts.get(&record.contact_id))
                .cloned())
        })
    }

    fn create_with_aliases(
        &self,
        contact: &Contact,
        aliases: &[Alias],
    ) -> BoxFuture<'_, DomainResult<ContactCreateOutcome>> {
        let contact = contact.clone();
        let aliases = aliases.to_vec();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if state.contacts.contains_key(&contact.contact_id) {
                return Err(DomainError::Conflict);
            }
            if aliases
                .iter()
                .any(|alias| state.aliases.contains_key(&(alias.kind, alias.value.clone())))
            {
                return Ok(ContactCreateOutcome::AliasTaken);
            }
            for alias in aliases {
                state.aliases.insert(
                    (alias.kind, alias.value.clone()),
                    AliasRecord {
                        kind: alias.kind,
                        value: alias.value,
                        contact_id: contact.contact_id.clone(),
                        created_at_ms: contact.created_at_ms,
                    },
                );
            }
            state
                .contacts
                .insert(contact.contact_id.clone(), contact.clone());
            Ok(ContactCreateOutcome::Created(contact))
        })
    }

    fn claim_alias(
        &self,
        contact_id: &str,
        alias: &Alias,
    ) -> BoxFuture<'_, DomainResult<AliasClaim>> {
        let contact_id = contact_id.to_string();
        let alias = alias.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let index_key = (alias.kind, alias.value.clone());
            if let Some(record) = state.aliases.get(&index_key) {
                return Ok(if record.contact_id == contact_id {
                    AliasClaim::AlreadyOwned
                } else {
                    AliasClaim::OwnedBy(record.contact_id.clone())
                });
            }
            let contact = state
                .contacts
                .get_mut(&contact_id)
                .ok_or(DomainError::NotFound)?;
            contact.fill_alias(alias.kind, &alias.value);
            state.aliases.insert(
                index_key,
                AliasRecord {
                    kind: alias.kind,
                    value: alias.value,
                    contact_id,
                    created_at_ms: now_ms(),
                },
            );
            Ok(AliasClaim::Claimed)
        })
    }

    fn list_aliases(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<Vec<AliasRecord>>> {
        let contact_id = contact_id.to_string();
        Box::pin(async move {
            let mut records: Vec<_> = self
                .state
                .read()
                .await
                .aliases
                .values()
                .filter(|record| record.contact_id == contact_id)
                .cloned()
                .collect();
            records.sort_by(|left, right| {
                left.kind
                    .cmp(&right.kind)
                    .then_with(|| left.value.cmp(&right.value))
            });
            Ok(records)
        })
    }

    fn reassign_aliases(
        &self,
        from_contact_id: &str,
        to_contact_id: &str,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let from = from_contact_id.to_string();
        let to = to_contact_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let mut moved = 0;
            for record in state.aliases.values_mut() {
                if record.contact_id == from {
                    record.contact_id = to.clone();
                    moved += 1;
                }
            }
            Ok(moved)
        })
    }

    fn learn_name(&self, contact_id: &str, name: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let contact_id = contact_id.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let contact = state
                .contacts
                .get_mut(&contact_id)
                .ok_or(DomainError::NotFound)?;
            Ok(contact.learn_name(Some(&name)))
        })
    }

    fn fill_empty_columns(
        &self,
        contact_id: &str,
        source: &Contact,
    ) -> BoxFuture<'_, DomainResult<Option<Contact>>> {
        let contact_id = contact_id.to_string();
        let source = source.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            Ok(state.contacts.get_mut(&contact_id).map(|contact| {
                contact.absorb_aliases(&source);
                contact.clone()
            }))
        })
    }

    fn list(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<Contact>>> {
        Box::pin(async move {
            let mut contacts: Vec<_> = self.state.read().await.contacts.values().cloned().collect();
            contacts.sort_by(|left, right| {
                left.created_at_ms
                    .cmp(&right.created_at_ms)
                    .then_with(|| left.contact_id.cmp(&right.contact_id))
            });
            Ok(truncate(contacts, limit))
        })
    }

    fn delete(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let contact_id = contact_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let removed = state.contacts.remove(&contact_id).is_some();
            state
                .aliases
                .retain(|_, record| record.contact_id != contact_id);
            Ok(removed)
        })
    }

    fn record_merge_candidate(
        &self,
        candidate: &MergeCandidate,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let candidate = candidate.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let known = state.candidates.values().any(|existing| {
                existing.involves(&candidate.primary_contact_id)
                    && existing.involves(&candidate.secondary_contact_id)
            });
            if !known {
                state
                    .candidates
                    .insert(candidate.candidate_id.clone(), candidate);
            }
            Ok(())
        })
    }

    fn list_merge_candidates(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<MergeCandidate>>> {
        Box::pin(async move {
            let mut candidates: Vec<_> =
                self.state.read().await.candidates.values().cloned().collect();
            candidates.sort_by(|left, right| {
                left.created_at_ms
                    .cmp(&right.created_at_ms)
                    .then_with(|| left.candidate_id.cmp(&right.candidate_id))
            });
            Ok(truncate(candidates, limit))
        })
    }

    fn delete_merge_candidate(&self, candidate_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let candidate_id = candidate_id.to_string();
        Box::pin(async move {
            self.state.write().await.candidates.remove(&candidate_id);
            Ok(())
        })
    }
}

#[derive(Default)]
struct ConversationState {
    rows: HashMap<String, Conversation>,
    by_thread_key: HashMap<String, String>,
}

#[derive(Default, Clone)]
pub struct InMemoryConversationRepository {
    state: Arc<RwLock<ConversationState>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move { Ok(self.state.read().await.rows.get(&conversation_id).cloned()) })
    }

    fn get_by_thread_key(
        &self,
        thread_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let thread_key = thread_key.to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .by_thread_key
                .get(&thread_key)
                .and_then(|id| state.rows.get(id))
                .cloned())
        })
    }

    fn insert_if_absent(
        &self,
        conversation: &Conversation,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<Conversation>>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if let Some(existing) = state
                .by_thread_key
                .get(&conversation.thread_key)
                .and_then(|id| state.rows.get(id))
            {
                return Ok(UpsertOutcome::Existing(existing.clone()));
            }
            if state.rows.contains_key(&conversation.conversation_id) {
                return Err(DomainError::Conflict);
            }
            state.by_thread_key.insert(
                conversation.thread_key.clone(),
                conversation.conversation_id.clone(),
            );
            state
                .rows
                .insert(conversation.conversation_id.clone(), conversation.clone());
            Ok(UpsertOutcome::Inserted(conversation))
        })
    }

    fn update(&self, conversation: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let previous_key = state
                .rows
                .get(&conversation.conversation_id)
                .map(|row| row.thread_key.clone())
                .ok_or(DomainError::NotFound)?;
            if previous_key != conversation.thread_key {
                if let Some(owner) = state.by_thread_key.get(&conversation.thread_key) {
                    if owner != &conversation.conversation_id {
                        return Err(DomainError::Conflict);
                    }
                }
                state.by_thread_key.remove(&previous_key);
                state.by_thread_key.insert(
                    conversation.thread_key.clone(),
                    conversation.conversation_id.clone(),
                );
            }
            state
                .rows
                .insert(conversation.conversation_id.clone(), conversation.clone());
            Ok(conversation)
        })
    }

    fn list_by_contact(
        &self,
        contact_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        let contact_id = contact_id.to_string();
        Box::pin(async move {
            let mut rows: Vec<_> = self
                .state
                .read()
                .await
                .rows
                .values()
                .filter(|row| row.contact_id.as_deref() == Some(contact_id.as_str()))
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                left.created_at_ms
                    .cmp(&right.created_at_ms)
                    .then_with(|| left.conversation_id.cmp(&right.conversation_id))
            });
            Ok(rows)
        })
    }

    fn list(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        Box::pin(async move {
            let mut rows: Vec<_> = self.state.read().await.rows.values().cloned().collect();
            rows.sort_by(|left, right| {
                left.created_at_ms
                    .cmp(&right.created_at_ms)
                    .then_with(|| left.conversation_id.cmp(&right.conversation_id))
            });
            Ok(truncate(rows, limit))
        })
    }

    fn delete(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let Some(removed) = state.rows.remove(&conversation_id) else {
                return Ok(false);
            };
            if state.by_thread_key.get(&removed.thread_key) == Some(&conversation_id) {
                state.by_thread_key.remove(&removed.thread_key);
            }
            Ok(true)
        })
    }
}

#[derive(Default)]
struct MessageState {
    rows: HashMap<String, Message>,
    by_provider_id: HashMap<(String, String), String>,
}

#[derive(Default, Clone)]
pub struct InMemoryMessageRepository {
    state: Arc<RwLock<MessageState>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn provider_key(message: &Message) -> Option<(String, String)> {
    message
        .provider_message_id
        .as_ref()
        .map(|id| (message.conversation_id.clone(), id.clone()))
}

impl MessageRepository for InMemoryMessageRepository {
    fn append(&self, message: &Message) -> BoxFuture<'_, DomainResult<AppendOutcome>> {
        let message = message.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if let Some(key) = provider_key(&message) {
                if let Some(existing) = state
                    .by_provider_id
                    .get(&key)
                    .and_then(|id| state.rows.get(id))
                {
                    return Ok(AppendOutcome::Duplicate(existing.clone()));
                }
                state.by_provider_id.insert(key, message.message_id.clone());
            }
            state
                .rows
                .insert(message.message_id.clone(), message.clone());
            Ok(AppendOutcome::Appended(message))
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut rows: Vec<_> = self
                .state
                .read()
                .await
                .rows
                .values()
                .filter(|row| row.conversation_id == conversation_id)
                .cloned()
                .collect();
            sort_for_display(&mut rows);
            Ok(rows)
        })
    }

    fn count_by_conversation(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<usize>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .await
                .rows
                .values()
                .filter(|row| row.conversation_id == conversation_id)
                .count())
        })
    }

    fn reparent(
        &self,
        from_conversation_id: &str,
        to_conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<ReparentReport>> {
        let from = from_conversation_id.to_string();
        let to = to_conversation_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let mut report = ReparentReport::default();
            let ids: Vec<String> = state
                .rows
                .values()
                .filter(|row| row.conversation_id == from)
                .map(|row| row.message_id.clone())
                .collect();
            for id in ids {
                let Some(mut message) = state.rows.remove(&id) else {
                    continue;
                };
                if let Some(old_key) = provider_key(&message) {
                    state.by_provider_id.remove(&old_key);
                }
                message.conversation_id = to.clone();
                if let Some(new_key) = provider_key(&message) {
                    if state.by_provider_id.contains_key(&new_key) {
                        report.discarded += 1;
                        continue;
                    }
                    state.by_provider_id.insert(new_key, id.clone());
                }
                state.rows.insert(id, message);
                report.moved += 1;
            }
            Ok(report)
        })
    }
}

#[derive(Default)]
struct OutboxState {
    rows: HashMap<String, OutboxEntry>,
    by_key: HashMap<String, String>,
}

#[derive(Default, Clone)]
pub struct InMemoryOutboxRepository {
    state: Arc<RwLock<OutboxState>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_entries(mut entries: Vec<OutboxEntry>) -> Vec<OutboxEntry> {
    entries.sort_by(|left, right| {
        left.created_at_ms
            .cmp(&right.created_at_ms)
            .then_with(|| left.outbox_id.cmp(&right.outbox_id))
    });
    entries
}

impl OutboxRepository for InMemoryOutboxRepository {
    fn insert_pending(
        &self,
        entry: &OutboxEntry,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<OutboxEntry>>> {
        let entry = entry.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            if let Some(existing) = state
                .by_key
                .get(&entry.idempotency_key)
                .and_then(|id| state.rows.get(id))
            {
                return Ok(UpsertOutcome::Existing(existing.clone()));
            }
            state
                .by_key
                .insert(entry.idempotency_key.clone(), entry.outbox_id.clone());
            state.rows.insert(entry.outbox_id.clone(), entry.clone());
            Ok(UpsertOutcome::Inserted(entry))
        })
    }

    fn get(&self, outbox_id: &str) -> BoxFuture<'_, DomainResult<Option<OutboxEntry>>> {
        let outbox_id = outbox_id.to_string();
        Box::pin(async move { Ok(self.state.read().await.rows.get(&outbox_id).cloned()) })
    }

    fn get_by_key(
        &self,
        idempotency_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<OutboxEntry>>> {
        let idempotency_key = idempotency_key.to_string();
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .by_key
                .get(&idempotency_key)
                .and_then(|id| state.rows.get(id))
                .cloned())
        })
    }

    fn update(&self, entry: &OutboxEntry) -> BoxFuture<'_, DomainResult<OutboxEntry>> {
        let entry = entry.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let slot = state
                .rows
                .get_mut(&entry.outbox_id)
                .ok_or(DomainError::NotFound)?;
            *slot = entry.clone();
            Ok(entry)
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<OutboxEntry>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let entries = self
                .state
                .read()
                .await
                .rows
                .values()
                .filter(|entry| entry.conversation_id == conversation_id)
                .cloned()
                .collect();
            Ok(sorted_entries(entries))
        })
    }

    fn list_unrecorded(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<OutboxEntry>>> {
        Box::pin(async move {
            let entries = self
                .state
                .read()
                .await
                .rows
                .values()
                .filter(|entry| entry.needs_recording())
                .cloned()
                .collect();
            Ok(truncate(sorted_entries(entries), limit))
        })
    }

    fn reparent(
        &self,
        from_conversation_id: &str,
        to_conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<ReparentReport>> {
        let from = from_conversation_id.to_string();
        let to = to_conversation_id.to_string();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let mut report = ReparentReport::default();
            for entry in state.rows.values_mut() {
                if entry.conversation_id == from {
                    entry.conversation_id = to.clone();
                    entry.updated_at_ms = now_ms();
                    report.moved += 1;
                }
            }
            Ok(report)
        })
    }
}

#[derive(Default, Clone)]
pub struct InMemoryLabelRepository {
    rows: Arc<RwLock<HashMap<(String, String), ConversationLabel>>>,
}

impl InMemoryLabelRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelRepository for InMemoryLabelRepository {
    fn add(
        &self,
        label: &ConversationLabel,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<ConversationLabel>>> {
        let label = label.clone();
        Box::pin(async move {
            let mut rows = self.rows.write().await;
            let key = (label.conversation_id.clone(), label.label.clone());
            if let Some(existing) = rows.get(&key) {
                return Ok(UpsertOutcome::Existing(existing.clone()));
            }
            rows.insert(key, label.clone());
            Ok(UpsertOutcome::Inserted(label))
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ConversationLabel>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut labels: Vec<_> = self
                .rows
                .read()
                .await
                .values()
                .filter(|label| label.conversation_id == conversation_id)
                .cloned()
                .collect();
            labels.sort_by(|left, right| left.label.cmp(&right.label));
            Ok(labels)
        })
    }

    fn reparent(
        &self,
        from_conversation_id: &str,
        to_conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<ReparentReport>> {
        let from = from_conversation_id.to_string();
        let to = to_conversation_id.to_string();
        Box::pin(async move {
            let mut rows = self.rows.write().await;
            let mut report = ReparentReport::default();
            let keys: Vec<_> = rows.keys().filter(|(id, _)| *id == from).cloned().collect();
            for key in keys {
                let Some(mut label) = rows.remove(&key) else {
                    continue;
                };
                let target = (to.clone(), label.label.clone());
                if rows.contains_key(&target) {
                    report.discarded += 1;
                    continue;
                }
                label.conversation_id = to.clone();
                rows.insert(target, label);
                report.moved += 1;
            }
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_domain::aliases::AliasSet;
    use threadline_domain::conversations::ThreadKey;
    use threadline_domain::messages::{Direction, MessageType, SenderType};

    fn text(conversation_id: &str, provider_id: &str) -> Message {
        Message::new(
            conversation_id,
            Direction::Inbound,
            SenderType::Contact,
            MessageType::Text,
            "oi".to_string(),
        )
        .with_provider_message_id(Some(provider_id.to_string()))
    }

    #[tokio::test]
    async fn second_creator_sees_alias_taken() {
        let repo = InMemoryContactRepository::new();
        let aliases = AliasSet::from_raw(None, Some("558197438430"), None, None, false);
        let first = Contact::from_aliases(&aliases, None);
        let second = Contact::from_aliases(&aliases, None);

        assert!(matches!(
            repo.create_with_aliases(&first, &aliases.aliases()).await.unwrap(),
            ContactCreateOutcome::Created(_)
        ));
        assert_eq!(
            repo.create_with_aliases(&second, &aliases.aliases())
                .await
                .unwrap(),
            ContactCreateOutcome::AliasTaken
        );
        assert!(repo.get(&second.contact_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_fills_empty_column_only() {
        let repo = InMemoryContactRepository::new();
        let aliases = AliasSet::from_raw(None, Some("558197438430"), None, None, false);
        let contact = Contact::from_aliases(&aliases, None);
        repo.create_with_aliases(&contact, &aliases.aliases())
            .await
            .unwrap();

        let lid = Alias::new(AliasKind::Lid, "144723385778292");
        assert_eq!(
            repo.claim_alias(&contact.contact_id, &lid).await.unwrap(),
            AliasClaim::Claimed
        );
        assert_eq!(
            repo.claim_alias(&contact.contact_id, &lid).await.unwrap(),
            AliasClaim::AlreadyOwned
        );
        let stored = repo.get(&contact.contact_id).await.unwrap().unwrap();
        assert_eq!(stored.lid.as_deref(), Some("144723385778292"));
        assert_eq!(repo.list_aliases(&contact.contact_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn thread_key_update_conflicts_with_other_row() {
        let repo = InMemoryConversationRepository::new();
        let a = Conversation::new(Some("a"), &ThreadKey::direct("a"), None);
        let mut b = Conversation::new(Some("b"), &ThreadKey::direct("b"), None);
        repo.insert_if_absent(&a).await.unwrap();
        repo.insert_if_absent(&b).await.unwrap();

        b.thread_key = a.thread_key.clone();
        assert!(matches!(repo.update(&b).await, Err(DomainError::Conflict)));

        let again = Conversation::new(Some("a"), &ThreadKey::direct("a"), None);
        let outcome = repo.insert_if_absent(&again).await.unwrap();
        assert!(!outcome.is_inserted());
        assert_eq!(outcome.into_inner().conversation_id, a.conversation_id);
    }

    #[tokio::test]
    async fn message_reparent_discards_provider_duplicates() {
        let repo = InMemoryMessageRepository::new();
        repo.append(&text("dup", "wa-1")).await.unwrap();
        repo.append(&text("dup", "wa-2")).await.unwrap();
        repo.append(&text("canon", "wa-1")).await.unwrap();
        assert!(matches!(
            repo.append(&text("canon", "wa-1")).await.unwrap(),
            AppendOutcome::Duplicate(_)
        ));

        let report = repo.reparent("dup", "canon").await.unwrap();
        assert_eq!(report, ReparentReport { moved: 1, discarded: 1 });
        assert_eq!(repo.count_by_conversation("canon").await.unwrap(), 2);
        assert_eq!(repo.count_by_conversation("dup").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn label_reparent_drops_labels_the_target_has() {
        let repo = InMemoryLabelRepository::new();
        repo.add(&ConversationLabel::new("dup", "vip")).await.unwrap();
        repo.add(&ConversationLabel::new("dup", "billing")).await.unwrap();
        repo.add(&ConversationLabel::new("canon", "vip")).await.unwrap();

        let report = repo.reparent("dup", "canon").await.unwrap();
        assert_eq!(report, ReparentReport { moved: 1, discarded: 1 });
        let labels: Vec<_> = repo
            .list_by_conversation("canon")
            .await
            .unwrap()
            .into_iter()
            .map(|label| label.label)
            .collect();
        assert_eq!(labels, vec!["billing", "vip"]);
    }
}
