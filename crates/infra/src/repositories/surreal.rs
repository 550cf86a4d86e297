use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json, to_value};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
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

use crate::db::{DbConfig, connect, map_surreal_error};

type Db = Arc<Surreal<Client>>;

fn to_row<T: Serialize>(value: &T) -> DomainResult<Value> {
    to_value(value).map_err(|err| DomainError::Store(format!("row encode failed: {err}")))
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, table: &str) -> DomainResult<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<T>(row)
                .map_err(|err| DomainError::Store(format!("invalid {table} row: {err}")))
        })
        .collect()
}

fn take_rows(response: &mut surrealdb::Response, index: usize) -> DomainResult<Vec<Value>> {
    response
        .take(index)
        .map_err(|err| DomainError::Store(format!("invalid query result: {err}")))
}

/// Result of the final statement; transactions return their summary there.
fn take_last<T: DeserializeOwned>(response: &mut surrealdb::Response) -> DomainResult<Option<T>> {
    let last = response.num_statements().saturating_sub(1);
    let value: Option<Value> = response
        .take(last)
        .map_err(|err| DomainError::Store(format!("invalid query result: {err}")))?;
    value
        .map(|value| {
            serde_json::from_value(value)
                .map_err(|err| DomainError::Store(format!("invalid query summary: {err}")))
        })
        .transpose()
}

async fn run(pending: surrealdb::method::Query<'_, Client>) -> DomainResult<surrealdb::Response> {
    pending
        .await
        .map_err(map_surreal_error)?
        .check()
        .map_err(map_surreal_error)
}

fn limit_clause(limit: usize) -> String {
    if limit > 0 {
        format!(" LIMIT {limit}")
    } else {
        String::new()
    }
}

fn alias_column(kind: AliasKind) -> &'static str {
    match kind {
        AliasKind::Lid => "lid",
        AliasKind::Phone => "phone",
        AliasKind::ChatKey => "chat_key",
        AliasKind::GroupJid => "group_jid",
    }
}

#[derive(serde::Deserialize)]
struct ReparentSummary {
    moved: usize,
    discarded: usize,
}

impl From<ReparentSummary> for ReparentReport {
    fn from(summary: ReparentSummary) -> Self {
        ReparentReport {
            moved: summary.moved,
            discarded: summary.discarded,
        }
    }
}

#[derive(Clone)]
pub struct SurrealContactRepository {
    client: Db,
}

impl SurrealContactRepository {
    pub fn with_client(client: Db) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }

    async fn fetch(&self, contact_id: String) -> DomainResult<Option<Contact>> {
        let mut response = run(self
            .client
            .query("SELECT * OMIT id FROM contact WHERE contact_id = $contact_id LIMIT 1")
            .bind(("contact_id", contact_id)))
        .await?;
        let rows = take_rows(&mut response, 0)?;
        Ok(decode_rows::<Contact>(rows, "contact")?.pop())
    }

    async fn alias_owner(&self, kind: AliasKind, value: String) -> DomainResult<Option<String>> {
        let mut response = run(self
            .client
            .query(
                "SELECT VALUE contact_id FROM contact_alias \
                 WHERE kind = $kind AND value = $value LIMIT 1",
            )
            .bind(("kind", kind.as_str()))
            .bind(("value", value)))
        .await?;
        let owners: Vec<String> = response
            .take(0)
            .map_err(|err| DomainError::Store(format!("invalid query result: {err}")))?;
        Ok(owners.into_iter().next())
    }
}

impl ContactRepository for SurrealContactRepository {
    fn get(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<Option<Contact>>> {
        let contact_id = contact_id.to_string();
        Box::pin(self.fetch(contact_id))
    }

    fn find_by_alias(
        &self,
        kind: AliasKind,
        value: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Contact>>> {
        let value = value.to_string();
        Box::pin(async move {
            match self.alias_owner(kind, value).await? {
                Some(contact_id) => self.fetch(contact_id).await,
                None => Ok(None),
            }
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
            let records = aliases
                .into_iter()
                .map(|alias| {
                    to_row(&AliasRecord {
                        kind: alias.kind,
                        value: alias.value,
                        contact_id: contact.contact_id.clone(),
                        created_at_ms: contact.created_at_ms,
                    })
                })
                .collect::<DomainResult<Vec<_>>>()?;
            let result = run(self
                .client
                .query(
                    "BEGIN TRANSACTION; \
                     CREATE contact CONTENT $contact; \
                     FOR $alias IN $aliases { CREATE contact_alias CONTENT $alias; }; \
                     COMMIT TRANSACTION;",
                )
                .bind(("contact", to_row(&contact)?))
                .bind(("aliases", records)))
            .await;
            match result {
                Ok(_) => Ok(ContactCreateOutcome::Created(contact)),
                Err(DomainError::Conflict) => Ok(ContactCreateOutcome::AliasTaken),
                Err(err) => Err(err),
            }
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
            let record = to_row(&AliasRecord {
                kind: alias.kind,
                value: alias.value.clone(),
                contact_id: contact_id.clone(),
                created_at_ms: now_ms(),
            })?;
            let column = alias_column(alias.kind);
            let query = format!(
                "BEGIN TRANSACTION; \
                 CREATE contact_alias CONTENT $record; \
                 UPDATE contact SET {column} = $value, updated_at_ms = $now \
                     WHERE contact_id = $contact_id AND !{column}; \
                 COMMIT TRANSACTION;"
            );
            let result = run(self
                .client
                .query(query)
                .bind(("record", record))
                .bind(("value", alias.value.clone()))
                .bind(("now", now_ms()))
                .bind(("contact_id", contact_id.clone())))
            .await;
            match result {
                Ok(_) => Ok(AliasClaim::Claimed),
                Err(DomainError::Conflict) => {
                    match self.alias_owner(alias.kind, alias.value.clone()).await? {
                        Some(owner) if owner == contact_id => Ok(AliasClaim::AlreadyOwned),
                        Some(owner) => Ok(AliasClaim::OwnedBy(owner)),
                        None => Err(DomainError::Store(format!(
                            "alias {alias} conflicted but has no owner"
                        ))),
                    }
                }
                Err(err) => Err(err),
            }
        })
    }

    fn list_aliases(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<Vec<AliasRecord>>> {
        let contact_id = contact_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "SELECT * OMIT id FROM contact_alias WHERE contact_id = $contact_id \
                     ORDER BY kind, value",
                )
                .bind(("contact_id", contact_id)))
            .await?;
            decode_rows(take_rows(&mut response, 0)?, "contact_alias")
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
            let mut response = run(self
                .client
                .query(
                    "UPDATE contact_alias SET contact_id = $to \
                     WHERE contact_id = $from RETURN VALUE value",
                )
                .bind(("from", from))
                .bind(("to", to)))
            .await?;
            Ok(take_rows(&mut response, 0)?.len())
        })
    }

    fn learn_name(&self, contact_id: &str, name: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let contact_id = contact_id.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "UPDATE contact SET name = $name, updated_at_ms = $now \
                     WHERE contact_id = $contact_id AND !name RETURN VALUE contact_id",
                )
                .bind(("name", name))
                .bind(("now", now_ms()))
                .bind(("contact_id", contact_id)))
            .await?;
            Ok(!take_rows(&mut response, 0)?.is_empty())
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
            run(self
                .client
                .query(
                    "UPDATE contact SET \
                         lid = lid ?? $lid, \
                         phone = phone ?? $phone, \
                         chat_key = chat_key ?? $chat_key, \
                         group_jid = group_jid ?? $group_jid, \
                         name = name ?? $name, \
                         updated_at_ms = $now \
                     WHERE contact_id = $contact_id",
                )
                .bind(("lid", source.lid))
                .bind(("phone", source.phone))
                .bind(("chat_key", source.chat_key))
                .bind(("group_jid", source.group_jid))
                .bind(("name", source.name))
                .bind(("now", now_ms()))
                .bind(("contact_id", contact_id.clone())))
            .await?;
            self.fetch(contact_id).await
        })
    }

    fn list(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<Contact>>> {
        Box::pin(async move {
            let query = format!(
                "SELECT * OMIT id FROM contact ORDER BY created_at_ms, contact_id{}",
                limit_clause(limit)
            );
            let mut response = run(self.client.query(query)).await?;
            decode_rows(take_rows(&mut response, 0)?, "contact")
        })
    }

    fn delete(&self, contact_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let contact_id = contact_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "BEGIN TRANSACTION; \
                     LET $found = (SELECT VALUE contact_id FROM contact WHERE contact_id = $contact_id); \
                     DELETE contact_alias WHERE contact_id = $contact_id; \
                     DELETE contact WHERE contact_id = $contact_id; \
                     RETURN array::len($found); \
                     COMMIT TRANSACTION;",
                )
                .bind(("contact_id", contact_id)))
            .await?;
            Ok(take_last::<usize>(&mut response)?.unwrap_or(0) > 0)
        })
    }

    fn record_merge_candidate(
        &self,
        candidate: &MergeCandidate,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let candidate = candidate.clone();
        Box::pin(async move {
            let mut row = to_row(&candidate)?;
            let mut pair = [
                candidate.primary_contact_id.as_str(),
                candidate.secondary_contact_id.as_str(),
            ];
            pair.sort_unstable();
            row["pair_key"] = json!(pair.join("|"));
            match run(self
                .client
                .query("CREATE merge_candidate CONTENT $row")
                .bind(("row", row)))
            .await
            {
                Ok(_) | Err(DomainError::Conflict) => Ok(()),
                Err(err) => Err(err),
            }
        })
    }

    fn list_merge_candidates(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<MergeCandidate>>> {
        Box::pin(async move {
            let query = format!(
                "SELECT * OMIT id, pair_key FROM merge_candidate \
                 ORDER BY created_at_ms, candidate_id{}",
                limit_clause(limit)
            );
            let mut response = run(self.client.query(query)).await?;
            decode_rows(take_rows(&mut response, 0)?, "merge_candidate")
        })
    }

    fn delete_merge_candidate(&self, candidate_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let candidate_id = candidate_id.to_string();
        Box::pin(async move {
            run(self
                .client
                .query("DELETE merge_candidate WHERE candidate_id = $candidate_id")
                .bind(("candidate_id", candidate_id)))
            .await?;
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct SurrealConversationRepository {
    client: Db,
}

impl SurrealConversationRepository {
    pub fn with_client(client: Db) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }

    async fn select_one(&self, field: &'static str, value: String) -> DomainResult<Option<Conversation>> {
        let query = format!("SELECT * OMIT id FROM conversation WHERE {field} = $value LIMIT 1");
        let mut response = run(self.client.query(query).bind(("value", value))).await?;
        Ok(decode_rows::<Conversation>(take_rows(&mut response, 0)?, "conversation")?.pop())
    }
}

impl ConversationRepository for SurrealConversationRepository {
    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        Box::pin(self.select_one("conversation_id", conversation_id.to_string()))
    }

    fn get_by_thread_key(
        &self,
        thread_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        Box::pin(self.select_one("thread_key", thread_key.to_string()))
    }

    fn insert_if_absent(
        &self,
        conversation: &Conversation,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<Conversation>>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            let result = run(self
                .client
                .query("CREATE conversation CONTENT $row")
                .bind(("row", to_row(&conversation)?)))
            .await;
            match result {
                Ok(_) => Ok(UpsertOutcome::Inserted(conversation)),
                Err(DomainError::Conflict) => self
                    .select_one("thread_key", conversation.thread_key.clone())
                    .await?
                    .map(UpsertOutcome::Existing)
                    .ok_or(DomainError::Conflict),
                Err(err) => Err(err),
            }
        })
    }

    fn update(&self, conversation: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "UPDATE conversation CONTENT $row WHERE conversation_id = $conversation_id \
                     RETURN VALUE conversation_id",
                )
                .bind(("row", to_row(&conversation)?))
                .bind(("conversation_id", conversation.conversation_id.clone())))
            .await?;
            if take_rows(&mut response, 0)?.is_empty() {
                return Err(DomainError::NotFound);
            }
            Ok(conversation)
        })
    }

    fn list_by_contact(
        &self,
        contact_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        let contact_id = contact_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "SELECT * OMIT id FROM conversation WHERE contact_id = $contact_id \
                     ORDER BY created_at_ms, conversation_id",
                )
                .bind(("contact_id", contact_id)))
            .await?;
            decode_rows(take_rows(&mut response, 0)?, "conversation")
        })
    }

    fn list(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        Box::pin(async move {
            let query = format!(
                "SELECT * OMIT id FROM conversation ORDER BY created_at_ms, conversation_id{}",
                limit_clause(limit)
            );
            let mut response = run(self.client.query(query)).await?;
            decode_rows(take_rows(&mut response, 0)?, "conversation")
        })
    }

    fn delete(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "BEGIN TRANSACTION; \
                     LET $found = (SELECT VALUE conversation_id FROM conversation \
                         WHERE conversation_id = $conversation_id); \
                     DELETE conversation WHERE conversation_id = $conversation_id; \
                     RETURN array::len($found); \
                     COMMIT TRANSACTION;",
                )
                .bind(("conversation_id", conversation_id)))
            .await?;
            Ok(take_last::<usize>(&mut response)?.unwrap_or(0) > 0)
        })
    }
}

/// Messages carry `dedupe_key` so the unique index also covers rows without a
/// provider id.
fn message_row(message: &Message) -> DomainResult<Value> {
    let mut row = to_row(message)?;
    row["dedupe_key"] = json!(match &message.provider_message_id {
        Some(provider_id) => format!("wa:{provider_id}"),
        None => format!("id:{}", message.message_id),
    });
    Ok(row)
}

#[derive(Clone)]
pub struct SurrealMessageRepository {
    client: Db,
}

impl SurrealMessageRepository {
    pub fn with_client(client: Db) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }
}

impl MessageRepository for SurrealMessageRepository {
    fn append(&self, message: &Message) -> BoxFuture<'_, DomainResult<AppendOutcome>> {
        let message = message.clone();
        Box::pin(async move {
            let result = run(self
                .client
                .query("CREATE message CONTENT $row")
                .bind(("row", message_row(&message)?)))
            .await;
            match (result, message.provider_message_id.clone()) {
                (Ok(_), _) => Ok(AppendOutcome::Appended(message)),
                (Err(DomainError::Conflict), Some(provider_id)) => {
                    let mut response = run(self
                        .client
                        .query(
                            "SELECT * OMIT id, dedupe_key FROM message \
                             WHERE conversation_id = $conversation_id \
                             AND provider_message_id = $provider_id LIMIT 1",
                        )
                        .bind(("conversation_id", message.conversation_id.clone()))
                        .bind(("provider_id", provider_id)))
                    .await?;
                    decode_rows::<Message>(take_rows(&mut response, 0)?, "message")?
                        .pop()
                        .map(AppendOutcome::Duplicate)
                        .ok_or(DomainError::Conflict)
                }
                (Err(err), _) => Err(err),
            }
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "SELECT * OMIT id, dedupe_key FROM message \
                     WHERE conversation_id = $conversation_id ORDER BY sent_at_ms",
                )
                .bind(("conversation_id", conversation_id)))
            .await?;
            let mut messages = decode_rows(take_rows(&mut response, 0)?, "message")?;
            sort_for_display(&mut messages);
            Ok(messages)
        })
    }

    fn count_by_conversation(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<usize>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "RETURN count(SELECT VALUE message_id FROM message \
                     WHERE conversation_id = $conversation_id)",
                )
                .bind(("conversation_id", conversation_id)))
            .await?;
            Ok(take_last::<usize>(&mut response)?.unwrap_or(0))
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
            let mut response = run(self
                .client
                .query(
                    "BEGIN TRANSACTION; \
                     LET $taken = (SELECT VALUE dedupe_key FROM message WHERE conversation_id = $to); \
                     LET $dupes = (SELECT VALUE message_id FROM message \
                         WHERE conversation_id = $from AND dedupe_key INSIDE $taken); \
                     DELETE message WHERE message_id INSIDE $dupes; \
                     LET $moved = (UPDATE message SET conversation_id = $to \
                         WHERE conversation_id = $from RETURN VALUE message_id); \
                     RETURN { moved: array::len($moved), discarded: array::len($dupes) }; \
                     COMMIT TRANSACTION;",
                )
                .bind(("from", from))
                .bind(("to", to)))
            .await?;
            Ok(take_last::<ReparentSummary>(&mut response)?
                .map(ReparentReport::from)
                .unwrap_or_default())
        })
    }
}

#[derive(Clone)]
pub struct SurrealOutboxRepository {
    client: Db,
}

impl SurrealOutboxRepository {
    pub fn with_client(client: Db) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }

    async fn select_one(&self, field: &'static str, value: String) -> DomainResult<Option<OutboxEntry>> {
        let query = format!("SELECT * OMIT id FROM message_outbox WHERE {field} = $value LIMIT 1");
        let mut response = run(self.client.query(query).bind(("value", value))).await?;
        Ok(decode_rows::<OutboxEntry>(take_rows(&mut response, 0)?, "message_outbox")?.pop())
    }
}

impl OutboxRepository for SurrealOutboxRepository {
    fn insert_pending(
        &self,
        entry: &OutboxEntry,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<OutboxEntry>>> {
        let entry = entry.clone();
        Box::pin(async move {
            let result = run(self
                .client
                .query("CREATE message_outbox CONTENT $row")
                .bind(("row", to_row(&entry)?)))
            .await;
            match result {
                Ok(_) => Ok(UpsertOutcome::Inserted(entry)),
                Err(DomainError::Conflict) => self
                    .select_one("idempotency_key", entry.idempotency_key.clone())
                    .await?
                    .map(UpsertOutcome::Existing)
                    .ok_or(DomainError::Conflict),
                Err(err) => Err(err),
            }
        })
    }

    fn get(&self, outbox_id: &str) -> BoxFuture<'_, DomainResult<Option<OutboxEntry>>> {
        Box::pin(self.select_one("outbox_id", outbox_id.to_string()))
    }

    fn get_by_key(
        &self,
        idempotency_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<OutboxEntry>>> {
        Box::pin(self.select_one("idempotency_key", idempotency_key.to_string()))
    }

    fn update(&self, entry: &OutboxEntry) -> BoxFuture<'_, DomainResult<OutboxEntry>> {
        let entry = entry.clone();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "UPDATE message_outbox CONTENT $row WHERE outbox_id = $outbox_id \
                     RETURN VALUE outbox_id",
                )
                .bind(("row", to_row(&entry)?))
                .bind(("outbox_id", entry.outbox_id.clone())))
            .await?;
            if take_rows(&mut response, 0)?.is_empty() {
                return Err(DomainError::NotFound);
            }
            Ok(entry)
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<OutboxEntry>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "SELECT * OMIT id FROM message_outbox WHERE conversation_id = $conversation_id \
                     ORDER BY created_at_ms, outbox_id",
                )
                .bind(("conversation_id", conversation_id)))
            .await?;
            decode_rows(take_rows(&mut response, 0)?, "message_outbox")
        })
    }

    fn list_unrecorded(&self, limit: usize) -> BoxFuture<'_, DomainResult<Vec<OutboxEntry>>> {
        Box::pin(async move {
            let query = format!(
                "SELECT * OMIT id FROM message_outbox \
                 WHERE status = 'sent' AND message_recorded = false \
                 ORDER BY created_at_ms, outbox_id{}",
                limit_clause(limit)
            );
            let mut response = run(self.client.query(query)).await?;
            decode_rows(take_rows(&mut response, 0)?, "message_outbox")
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
            let mut response = run(self
                .client
                .query(
                    "UPDATE message_outbox SET conversation_id = $to, updated_at_ms = $now \
                     WHERE conversation_id = $from RETURN VALUE outbox_id",
                )
                .bind(("from", from))
                .bind(("to", to))
                .bind(("now", now_ms())))
            .await?;
            Ok(ReparentReport {
                moved: take_rows(&mut response, 0)?.len(),
                discarded: 0,
            })
        })
    }
}

#[derive(Clone)]
pub struct SurrealLabelRepository {
    client: Db,
}

impl SurrealLabelRepository {
    pub fn with_client(client: Db) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(connect(db_config).await?))
    }
}

impl LabelRepository for SurrealLabelRepository {
    fn add(
        &self,
        label: &ConversationLabel,
    ) -> BoxFuture<'_, DomainResult<UpsertOutcome<ConversationLabel>>> {
        let label = label.clone();
        Box::pin(async move {
            let result = run(self
                .client
                .query("CREATE conversation_label CONTENT $row")
                .bind(("row", to_row(&label)?)))
            .await;
            match result {
                Ok(_) => Ok(UpsertOutcome::Inserted(label)),
                Err(DomainError::Conflict) => {
                    let mut response = run(self
                        .client
                        .query(
                            "SELECT * OMIT id FROM conversation_label \
                             WHERE conversation_id = $conversation_id AND label = $label LIMIT 1",
                        )
                        .bind(("conversation_id", label.conversation_id.clone()))
                        .bind(("label", label.label.clone())))
                    .await?;
                    decode_rows::<ConversationLabel>(
                        take_rows(&mut response, 0)?,
                        "conversation_label",
                    )?
                    .pop()
                    .map(UpsertOutcome::Existing)
                    .ok_or(DomainError::Conflict)
                }
                Err(err) => Err(err),
            }
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ConversationLabel>>> {
        let conversation_id = conversation_id.to_string();
        Box::pin(async move {
            let mut response = run(self
                .client
                .query(
                    "SELECT * OMIT id FROM conversation_label \
                     WHERE conversation_id = $conversation_id ORDER BY label",
                )
                .bind(("conversation_id", conversation_id)))
            .await?;
            decode_rows(take_rows(&mut response, 0)?, "conversation_label")
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
            let mut response = run(self
                .client
                .query(
                    "BEGIN TRANSACTION; \
                     LET $taken = (SELECT VALUE label FROM conversation_label WHERE conversation_id = $to); \
                     LET $dupes = (SELECT VALUE label_id FROM conversation_label \
                         WHERE conversation_id = $from AND label INSIDE $taken); \
                     DELETE conversation_label WHERE label_id INSIDE $dupes; \
                     LET $moved = (UPDATE conversation_label SET conversation_id = $to \
                         WHERE conversation_id = $from RETURN VALUE label_id); \
                     RETURN { moved: array::len($moved), discarded: array::len($dupes) }; \
                     COMMIT TRANSACTION;",
                )
                .bind(("from", from))
                .bind(("to", to)))
            .await?;
            Ok(take_last::<ReparentSummary>(&mut response)?
                .map(ReparentReport::from)
                .unwrap_or_default())
        })
    }
}
