use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::DomainResult;
use crate::aliases::{AliasKind, lid_numeric, normalize_phone, normalize_wa_id, phone_equivalence_key};
use crate::contacts::{Contact, MergeReason};
use crate::conversations::{Conversation, ThreadKey};
use crate::error::DomainError;
use crate::locks::{ConversationLockService, LockKey, LockLease};
use crate::ports::ReparentReport;
use crate::ports::contacts::ContactRepository;
use crate::ports::conversations::ConversationRepository;
use crate::ports::dependents::DependentStore;
use crate::ports::labels::LabelRepository;
use crate::ports::messages::MessageRepository;
use crate::ports::outbox::OutboxRepository;

const SCAN_LIMIT: usize = 10_000;

/// Inputs to canonical-side selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalCandidate {
    pub id: String,
    /// Uses the current naming scheme (canonical thread key, LID-backed contact).
    pub canonical_naming: bool,
    pub message_count: usize,
    pub created_at_ms: i64,
}

/// Current naming first, then more messages, then the oldest row. The id
/// breaks exact ties so the choice is deterministic.
pub fn pick_canonical(candidates: &[CanonicalCandidate]) -> Option<&CanonicalCandidate> {
    candidates.iter().min_by(|a, b| {
        b.canonical_naming
            .cmp(&a.canonical_naming)
            .then_with(|| b.message_count.cmp(&a.message_count))
            .then_with(|| a.created_at_ms.cmp(&b.created_at_ms))
            .then_with(|| a.id.cmp(&b.id))
    })
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ConversationMergeReport {
    pub duplicate_id: String,
    pub canonical_id: String,
    /// The duplicate no longer existed; nothing was changed.
    pub already_merged: bool,
    pub messages: ReparentReport,
    pub outbox: ReparentReport,
    pub labels: ReparentReport,
    pub dependents: ReparentReport,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ContactMergeReport {
    pub duplicate_id: String,
    pub canonical_id: String,
    pub already_merged: bool,
    pub aliases_moved: usize,
    pub conversation_merges: Vec<ConversationMergeReport>,
    /// Conversations of the duplicate moved onto the canonical contact as-is.
    pub conversations_moved: Vec<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    Contact,
    Conversation,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PlannedMerge {
    pub kind: MergeKind,
    pub duplicate_id: String,
    pub canonical_id: String,
    pub reason: String,
    pub executed: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Rekey {
    pub conversation_id: String,
    pub from: String,
    pub to: String,
    pub executed: bool,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssueKind {
    /// A contact column holds an alias the index does not know.
    AliasIndexMissing,
    /// A contact column holds an alias the index maps to another contact.
    AliasIndexMismatch,
    /// A `dm:<id>` conversation whose contact is missing or different.
    ThreadKeyMismatch,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct IntegrityIssue {
    pub kind: IntegrityIssueKind,
    pub subject_id: String,
    pub detail: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepOptions {
    #[serde(default)]
    pub dry_run: bool,
    /// Maximum number of merges and re-keys per run; `None` is unbounded.
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub dry_run: bool,
    pub contact_merges: Vec<PlannedMerge>,
    pub conversation_merges: Vec<PlannedMerge>,
    pub rekeyed: Vec<Rekey>,
    pub integrity_issues: Vec<IntegrityIssue>,
    /// Planned actions skipped because a lease was busy.
    pub skipped: usize,
}

struct Budget(Option<usize>);

impl Budget {
    fn take(&mut self) -> bool {
        match &mut self.0 {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }
}

#[derive(Clone)]
pub struct ConsolidationService {
    contacts: Arc<dyn ContactRepository>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    outbox: Arc<dyn OutboxRepository>,
    labels: Arc<dyn LabelRepository>,
    dependents: Vec<Arc<dyn DependentStore>>,
    locks: ConversationLockService,
}

impl ConsolidationService {
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        outbox: Arc<dyn OutboxRepository>,
        labels: Arc<dyn LabelRepository>,
        locks: ConversationLockService,
    ) -> Self {
        Self {
            contacts,
            conversations,
            messages,
            outbox,
            labels,
            dependents: Vec::new(),
            locks,
        }
    }

    pub fn with_dependent(mut self, store: Arc<dyn DependentStore>) -> Self {
        self.dependents.push(store);
        self
    }

    /// Moves everything owned by `duplicate_id` onto `canonical_id` and deletes
    /// the duplicate, holding both conversation leases.
    ///
    /// Deletion is the last step, so an interrupted merge is completed by
    /// running it again; a merge whose duplicate is already gone is a no-op.
    pub async fn merge_conversations(
        &self,
        duplicate_id: &str,
        canonical_id: &str,
    ) -> DomainResult<ConversationMergeReport> {
        if duplicate_id == canonical_id {
            return Err(DomainError::Validation(
                "duplicate and canonical conversation must differ".into(),
            ));
        }
        let (duplicate_lease, canonical_lease) = self
            .locks
            .acquire_pair(
                &LockKey::conversation(duplicate_id),
                &LockKey::conversation(canonical_id),
            )
            .await?;
        let leases = [&duplicate_lease, &canonical_lease];
        let result = self
            .merge_conversations_locked(duplicate_id, canonical_id, &leases)
            .await;
        self.locks.release(&canonical_lease).await;
        self.locks.release(&duplicate_lease).await;
        result
    }

    async fn merge_conversations_locked(
        &self,
        duplicate_id: &str,
        canonical_id: &str,
        leases: &[&LockLease],
    ) -> DomainResult<ConversationMergeReport> {
        let mut report = ConversationMergeReport {
            duplicate_id: duplicate_id.to_string(),
            canonical_id: canonical_id.to_string(),
            ..ConversationMergeReport::default()
        };
        let Some(duplicate) = self.conversations.get(duplicate_id).await? else {
            report.already_merged = true;
            return Ok(report);
        };
        let mut canonical = self
            .conversations
            .get(canonical_id)
            .await?
            .ok_or(DomainError::NotFound)?;

        ensure_live(leases)?;
        report.messages = self.messages.reparent(duplicate_id, canonical_id).await?;
        ensure_live(leases)?;
        report.outbox = self.outbox.reparent(duplicate_id, canonical_id).await?;
        ensure_live(leases)?;
        report.labels = self.labels.reparent(duplicate_id, canonical_id).await?;
        for store in &self.dependents {
            ensure_live(leases)?;
            let moved = store.reparent(duplicate_id, canonical_id).await?;
            tracing::debug!(dependent = store.name(), moved = moved.moved, "dependents re-parented");
            report.dependents.add(moved);
        }

        canonical.absorb(&duplicate);
        ensure_live(leases)?;
        canonical = self.conversations.update(&canonical).await?;
        ensure_live(leases)?;
        self.conversations.delete(duplicate_id).await?;

        // The survivor inherits the current-scheme key when it only had a legacy one.
        if !canonical.key().is_canonical() && duplicate.key().is_canonical() {
            canonical.thread_key = duplicate.thread_key.clone();
            ensure_live(leases)?;
            self.conversations.update(&canonical).await?;
        }

        tracing::info!(
            duplicate_id,
            canonical_id,
            messages_moved = report.messages.moved,
            messages_discarded = report.messages.discarded,
            labels_discarded = report.labels.discarded,
            "conversations merged"
        );
        Ok(report)
    }

    /// Folds one contact into another: aliases, empty alias columns and
    /// conversations move to the canonical contact, then the duplicate is
    /// deleted. Holds both contact leases; conversation merges take their own
    /// conversation leases underneath.
    pub async fn merge_contacts(
        &self,
        duplicate_id: &str,
        canonical_id: &str,
    ) -> DomainResult<ContactMergeReport> {
        if duplicate_id == canonical_id {
            return Err(DomainError::Validation(
                "duplicate and canonical contact must differ".into(),
            ));
        }
        let (duplicate_lease, canonical_lease) = self
            .locks
            .acquire_pair(
                &LockKey::contact(duplicate_id),
                &LockKey::contact(canonical_id),
            )
            .await?;
        let leases = [&duplicate_lease, &canonical_lease];
        let result = self
            .merge_contacts_locked(duplicate_id, canonical_id, &leases)
            .await;
        self.locks.release(&canonical_lease).await;
        self.locks.release(&duplicate_lease).await;
        result
    }

    async fn merge_contacts_locked(
        &self,
        duplicate_id: &str,
        canonical_id: &str,
        leases: &[&LockLease],
    ) -> DomainResult<ContactMergeReport> {
        let mut report = ContactMergeReport {
            duplicate_id: duplicate_id.to_string(),
            canonical_id: canonical_id.to_string(),
            ..ContactMergeReport::default()
        };
        let Some(duplicate) = self.contacts.get(duplicate_id).await? else {
            report.already_merged = true;
            if let Some(canonical) = self.contacts.get(canonical_id).await? {
                self.rehome_conversations(duplicate_id, &canonical, leases, &mut report)
                    .await?;
            }
            return Ok(report);
        };
        let canonical = self
            .contacts
            .get(canonical_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if duplicate.is_group != canonical.is_group {
            return Err(DomainError::Validation(
                "cannot merge a group contact with a one-to-one contact".into(),
            ));
        }

        ensure_live(leases)?;
        report.aliases_moved = self
            .contacts
            .reassign_aliases(duplicate_id, canonical_id)
            .await?;
        ensure_live(leases)?;
        let canonical = self
            .contacts
            .fill_empty_columns(canonical_id, &duplicate)
            .await?
            .ok_or(DomainError::NotFound)?;

        self.rehome_conversations(duplicate_id, &canonical, leases, &mut report)
            .await?;

        for candidate in self.contacts.list_merge_candidates(SCAN_LIMIT).await? {
            if candidate.involves(duplicate_id) {
                self.contacts
                    .delete_merge_candidate(&candidate.candidate_id)
                    .await?;
            }
        }
        ensure_live(leases)?;
        self.contacts.delete(duplicate_id).await?;

        // Handlers that resolved the duplicate before its deletion may have
        // opened a thread for it in the meantime.
        self.rehome_conversations(duplicate_id, &canonical, leases, &mut report)
            .await?;

        tracing::info!(
            duplicate_id,
            canonical_id,
            aliases_moved = report.aliases_moved,
            conversations_merged = report.conversation_merges.len(),
            "contacts merged"
        );
        Ok(report)
    }

    async fn rehome_conversations(
        &self,
        duplicate_id: &str,
        canonical: &Contact,
        leases: &[&LockLease],
        report: &mut ContactMergeReport,
    ) -> DomainResult<()> {
        let mut owned = self.conversations.list_by_contact(duplicate_id).await?;
        if let Some(keyed) = self
            .conversations
            .get_by_thread_key(&ThreadKey::direct(duplicate_id).to_string())
            .await?
        {
            if !owned.iter().any(|c| c.conversation_id == keyed.conversation_id) {
                owned.push(keyed);
            }
        }
        for conversation in owned {
            ensure_live(leases)?;
            let target_key = match conversation.key() {
                ThreadKey::Group(chat_id) => ThreadKey::Group(chat_id),
                _ => ThreadKey::direct(&canonical.contact_id),
            };
            match self.move_conversation(&conversation, canonical, &target_key).await? {
                Moved::Rehomed => report
                    .conversations_moved
                    .push(conversation.conversation_id.clone()),
                Moved::Merged(merge) => report.conversation_merges.push(merge),
            }
        }
        Ok(())
    }

    /// Points a conversation at `contact` under `target_key`, merging it into
    /// the conversation that already holds that key if there is one.
    async fn move_conversation(
        &self,
        conversation: &Conversation,
        contact: &Contact,
        target_key: &ThreadKey,
    ) -> DomainResult<Moved> {
        let key = target_key.to_string();
        if let Some(existing) = self.conversations.get_by_thread_key(&key).await? {
            if existing.conversation_id != conversation.conversation_id {
                let merge = self
                    .merge_conversations(&conversation.conversation_id, &existing.conversation_id)
                    .await?;
                return Ok(Moved::Merged(merge));
            }
        }

        let lease_key = LockKey::conversation(&conversation.conversation_id);
        let rehomed = self
            .locks
            .with_lease(&lease_key, |lease| async move {
                let Some(mut current) = self.conversations.get(&conversation.conversation_id).await?
                else {
                    return Ok(false);
                };
                current.contact_id = Some(contact.contact_id.clone());
                current.thread_key = key.clone();
                lease.ensure_live()?;
                match self.conversations.update(&current).await {
                    Ok(_) => Ok(true),
                    Err(DomainError::Conflict) => Ok(false),
                    Err(err) => Err(err),
                }
            })
            .await?;
        if rehomed {
            return Ok(Moved::Rehomed);
        }

        // The key was claimed between the lookup and the update.
        let existing = self
            .conversations
            .get_by_thread_key(&target_key.to_string())
            .await?
            .ok_or_else(|| DomainError::Store("thread key vanished during merge".into()))?;
        let merge = self
            .merge_conversations(&conversation.conversation_id, &existing.conversation_id)
            .await?;
        Ok(Moved::Merged(merge))
    }

    /// Finds and repairs duplicates that slipped past resolution, then flags
    /// corruption that cannot be repaired automatically.
    pub async fn sweep(&self, options: &SweepOptions) -> DomainResult<SweepReport> {
        let mut report = SweepReport {
            dry_run: options.dry_run,
            ..SweepReport::default()
        };
        let mut budget = Budget(options.limit);

        self.sweep_contacts(options.dry_run, &mut budget, &mut report)
            .await?;
        self.sweep_conversations(options.dry_run, &mut budget, &mut report)
            .await?;
        report
            .integrity_issues
            .extend(self.check_alias_integrity().await?);

        tracing::info!(
            dry_run = options.dry_run,
            contact_merges = report.contact_merges.len(),
            conversation_merges = report.conversation_merges.len(),
            rekeyed = report.rekeyed.len(),
            integrity_issues = report.integrity_issues.len(),
            skipped = report.skipped,
            "consolidation sweep finished"
        );
        Ok(report)
    }

    async fn sweep_contacts(
        &self,
        dry_run: bool,
        budget: &mut Budget,
        report: &mut SweepReport,
    ) -> DomainResult<()> {
        let mut groups: Vec<(Vec<Contact>, MergeReason)> = Vec::new();

        for candidate in self.contacts.list_merge_candidates(SCAN_LIMIT).await? {
            let primary = self.contacts.get(&candidate.primary_contact_id).await?;
            let secondary = self.contacts.get(&candidate.secondary_contact_id).await?;
            match (primary, secondary) {
                (Some(primary), Some(secondary)) if primary.is_group == secondary.is_group => {
                    groups.push((vec![primary, secondary], candidate.reason));
                }
                _ if !dry_run => {
                    self.contacts
                        .delete_merge_candidate(&candidate.candidate_id)
                        .await?;
                }
                _ => {}
            }
        }

        let mut by_phone: BTreeMap<String, Vec<Contact>> = BTreeMap::new();
        for contact in self.contacts.list(SCAN_LIMIT).await? {
            if contact.is_group {
                continue;
            }
            if let Some(phone) = contact.phone.as_deref() {
                by_phone
                    .entry(phone_equivalence_key(phone))
                    .or_default()
                    .push(contact);
            }
        }
        groups.extend(
            by_phone
                .into_values()
                .filter(|group| group.len() > 1)
                .map(|group| (group, MergeReason::PhoneEquivalence)),
        );

        for (group, reason) in groups {
            let mut candidates = Vec::with_capacity(group.len());
            for contact in &group {
                candidates.push(CanonicalCandidate {
                    id: contact.contact_id.clone(),
                    canonical_naming: contact.lid.is_some(),
                    message_count: self.contact_message_count(&contact.contact_id).await?,
                    created_at_ms: contact.created_at_ms,
                });
            }
            let Some(canonical) = pick_canonical(&candidates).map(|c| c.id.clone()) else {
                continue;
            };
            for contact in &group {
                if contact.contact_id == canonical
                    || already_planned(&report.contact_merges, &contact.contact_id)
                {
                    continue;
                }
                if !budget.take() {
                    return Ok(());
                }
                let mut planned = PlannedMerge {
                    kind: MergeKind::Contact,
                    duplicate_id: contact.contact_id.clone(),
                    canonical_id: canonical.clone(),
                    reason: reason.as_str().to_string(),
                    executed: false,
                };
                if !dry_run {
                    match self.merge_contacts(&contact.contact_id, &canonical).await {
                        Ok(_) => planned.executed = true,
                        Err(err) if err.is_retryable() => {
                            tracing::warn!(duplicate_id = %contact.contact_id, error = %err, "contact merge deferred");
                            report.skipped += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
                report.contact_merges.push(planned);
            }
        }
        Ok(())
    }

    async fn sweep_conversations(
        &self,
        dry_run: bool,
        budget: &mut Budget,
        report: &mut SweepReport,
    ) -> DomainResult<()> {
        let conversations = self.conversations.list(SCAN_LIMIT).await?;
        let mut entities: BTreeMap<String, (Option<ThreadKey>, Vec<Conversation>)> =
            BTreeMap::new();
        for conversation in conversations {
            if let ThreadKey::Direct(contact_id) = conversation.key() {
                let contact_ok = conversation.contact_id.as_deref() == Some(contact_id.as_str())
                    && self.contacts.get(&contact_id).await?.is_some();
                if !contact_ok {
                    report.integrity_issues.push(IntegrityIssue {
                        kind: IntegrityIssueKind::ThreadKeyMismatch,
                        subject_id: conversation.conversation_id.clone(),
                        detail: format!(
                            "thread key {} does not match contact {:?}",
                            conversation.thread_key, conversation.contact_id
                        ),
                    });
                    continue;
                }
            }
            let (entity, canonical_key) = self.entity_of(&conversation).await?;
            let slot = entities
                .entry(entity)
                .or_insert_with(|| (canonical_key, Vec::new()));
            slot.1.push(conversation);
        }

        for (entity, (canonical_key, group)) in entities {
            let canonical_key = canonical_key.map(|key| key.to_string());
            if group.len() > 1 {
                let mut candidates = Vec::with_capacity(group.len());
                for conversation in &group {
                    candidates.push(CanonicalCandidate {
                        id: conversation.conversation_id.clone(),
                        canonical_naming: Some(&conversation.thread_key) == canonical_key.as_ref(),
                        message_count: self
                            .messages
                            .count_by_conversation(&conversation.conversation_id)
                            .await?,
                        created_at_ms: conversation.created_at_ms,
                    });
                }
                let Some(canonical) = pick_canonical(&candidates).map(|c| c.id.clone()) else {
                    continue;
                };
                for conversation in &group {
                    if conversation.conversation_id == canonical {
                        continue;
                    }
                    if !budget.take() {
                        return Ok(());
                    }
                    let mut planned = PlannedMerge {
                        kind: MergeKind::Conversation,
                        duplicate_id: conversation.conversation_id.clone(),
                        canonical_id: canonical.clone(),
                        reason: format!("duplicate conversation for {entity}"),
                        executed: false,
                    };
                    if !dry_run {
                        match self
                            .merge_conversations(&conversation.conversation_id, &canonical)
                            .await
                        {
                            Ok(_) => planned.executed = true,
                            Err(err) if err.is_retryable() => {
                                tracing::warn!(duplicate_id = %conversation.conversation_id, error = %err, "conversation merge deferred");
                                report.skipped += 1;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    report.conversation_merges.push(planned);
                }
                continue;
            }

            // A lone conversation still on a legacy key is re-keyed in place.
            let (Some(conversation), Some(target)) = (group.first(), canonical_key) else {
                continue;
            };
            if conversation.thread_key == target
                || self.conversations.get_by_thread_key(&target).await?.is_some()
            {
                continue;
            }
            if !budget.take() {
                return Ok(());
            }
            let mut rekey = Rekey {
                conversation_id: conversation.conversation_id.clone(),
                from: conversation.thread_key.clone(),
                to: target.clone(),
                executed: false,
            };
            if !dry_run {
                match self.rekey(conversation, &target, &entity).await {
                    Ok(executed) => rekey.executed = executed,
                    Err(err) if err.is_retryable() => report.skipped += 1,
                    Err(err) => return Err(err),
                }
            }
            report.rekeyed.push(rekey);
        }
        Ok(())
    }

    async fn rekey(
        &self,
        conversation: &Conversation,
        target: &str,
        entity: &str,
    ) -> DomainResult<bool> {
        let lease_key = LockKey::conversation(&conversation.conversation_id);
        let contact_id = entity.strip_prefix("contact:").map(str::to_string);
        self.locks
            .with_lease(&lease_key, |lease| async move {
                let Some(mut current) = self.conversations.get(&conversation.conversation_id).await?
                else {
                    return Ok(false);
                };
                current.thread_key = target.to_string();
                if current.contact_id.is_none() {
                    current.contact_id = contact_id;
                }
                lease.ensure_live()?;
                match self.conversations.update(&current).await {
                    Ok(_) => {
                        tracing::info!(
                            conversation_id = %current.conversation_id,
                            thread_key = %current.thread_key,
                            "legacy conversation re-keyed"
                        );
                        Ok(true)
                    }
                    Err(DomainError::Conflict) => Ok(false),
                    Err(err) => Err(err),
                }
            })
            .await
    }

    /// The real-world entity a conversation belongs to, and the thread key
    /// that entity's conversation should carry.
    async fn entity_of(
        &self,
        conversation: &Conversation,
    ) -> DomainResult<(String, Option<ThreadKey>)> {
        match conversation.key() {
            ThreadKey::Group(chat_id) => {
                Ok((format!("group:{chat_id}"), Some(ThreadKey::Group(chat_id))))
            }
            ThreadKey::Direct(contact_id) => Ok((
                format!("contact:{contact_id}"),
                Some(ThreadKey::Direct(contact_id)),
            )),
            legacy => {
                if let Some(contact_id) = conversation.contact_id.as_deref() {
                    let contact = self.contacts.get(contact_id).await?;
                    return Ok(match contact {
                        Some(contact) if contact.is_group => match conversation.chat_id.as_deref() {
                            Some(chat_id) => (
                                format!("group:{chat_id}"),
                                Some(ThreadKey::group(chat_id)),
                            ),
                            None => (format!("legacy:{legacy}"), None),
                        },
                        Some(_) => (
                            format!("contact:{contact_id}"),
                            Some(ThreadKey::direct(contact_id)),
                        ),
                        None => (format!("legacy:{legacy}"), None),
                    });
                }
                let raw = legacy
                    .legacy_identifier()
                    .map(str::to_string)
                    .or_else(|| conversation.chat_id.clone());
                if let Some(raw) = raw {
                    if let Some(contact) = self.find_contact_by_raw(&raw).await? {
                        let key = if contact.is_group {
                            conversation.chat_id.as_deref().map(ThreadKey::group)
                        } else {
                            Some(ThreadKey::direct(&contact.contact_id))
                        };
                        let entity = match &key {
                            Some(ThreadKey::Group(chat_id)) => format!("group:{chat_id}"),
                            _ => format!("contact:{}", contact.contact_id),
                        };
                        return Ok((entity, key));
                    }
                }
                Ok((format!("legacy:{legacy}"), None))
            }
        }
    }

    async fn find_contact_by_raw(&self, raw: &str) -> DomainResult<Option<Contact>> {
        let mut probes = Vec::new();
        if let Some(lid) = lid_numeric(raw) {
            probes.push((AliasKind::Lid, lid));
        }
        if let Some(phone) = normalize_phone(raw) {
            probes.push((AliasKind::Phone, phone));
        }
        if let Some(chat_key) = normalize_wa_id(raw) {
            probes.push((AliasKind::ChatKey, chat_key.clone()));
            probes.push((AliasKind::GroupJid, chat_key));
        }
        for (kind, value) in probes {
            if let Some(contact) = self.contacts.find_by_alias(kind, &value).await? {
                return Ok(Some(contact));
            }
        }
        Ok(None)
    }

    async fn contact_message_count(&self, contact_id: &str) -> DomainResult<usize> {
        let mut total = 0;
        for conversation in self.conversations.list_by_contact(contact_id).await? {
            total += self
                .messages
                .count_by_conversation(&conversation.conversation_id)
                .await?;
        }
        Ok(total)
    }

    /// Alias columns that the index does not back. These are never repaired
    /// automatically.
    pub async fn check_alias_integrity(&self) -> DomainResult<Vec<IntegrityIssue>> {
        let mut issues = Vec::new();
        let mut owners: HashMap<(AliasKind, String), String> = HashMap::new();
        for contact in self.contacts.list(SCAN_LIMIT).await? {
            for alias in contact.column_aliases().aliases() {
                let owner = match owners.get(&(alias.kind, alias.value.clone())) {
                    Some(owner) => Some(owner.clone()),
                    None => self
                        .contacts
                        .find_by_alias(alias.kind, &alias.value)
                        .await?
                        .map(|owner| owner.contact_id),
                };
                match owner {
                    None => issues.push(IntegrityIssue {
                        kind: IntegrityIssueKind::AliasIndexMissing,
                        subject_id: contact.contact_id.clone(),
                        detail: format!("{alias} is not in the alias index"),
                    }),
                    Some(owner) if owner != contact.contact_id => {
                        issues.push(IntegrityIssue {
                            kind: IntegrityIssueKind::AliasIndexMismatch,
                            subject_id: contact.contact_id.clone(),
                            detail: format!("{alias} is indexed to contact {owner}"),
                        });
                        owners.insert((alias.kind, alias.value), owner);
                    }
                    Some(owner) => {
                        owners.insert((alias.kind, alias.value), owner);
                    }
                }
            }
        }
        Ok(issues)
    }
}

enum Moved {
    Rehomed,
    Merged(ConversationMergeReport),
}

fn ensure_live(leases: &[&LockLease]) -> DomainResult<()> {
    leases.iter().try_for_each(|lease| lease.ensure_live())
}

fn already_planned(planned: &[PlannedMerge], contact_id: &str) -> bool {
    planned
        .iter()
        .any(|merge| merge.duplicate_id == contact_id || merge.canonical_id == contact_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, canonical: bool, messages: usize, created: i64) -> CanonicalCandidate {
        CanonicalCandidate {
            id: id.to_string(),
            canonical_naming: canonical,
            message_count: messages,
            created_at_ms: created,
        }
    }

    #[test]
    fn current_naming_beats_message_count() {
        let candidates = [candidate("a", false, 50, 1), candidate("b", true, 1, 9)];
        assert_eq!(pick_canonical(&candidates).unwrap().id, "b");
    }

    #[test]
    fn more_messages_then_oldest() {
        let candidates = [
            candidate("a", true, 3, 5),
            candidate("b", true, 7, 9),
            candidate("c", true, 7, 2),
        ];
        assert_eq!(pick_canonical(&candidates).unwrap().id, "c");
    }

    #[test]
    fn budget_counts_down() {
        let mut budget = Budget(Some(2));
        assert!(budget.take());
        assert!(budget.take());
        assert!(!budget.take());
        let mut unbounded = Budget(None);
        assert!((0..100).all(|_| unbounded.take()));
    }
}
