use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::locks::{ConversationLockService, LockKey};
use crate::ports::UpsertOutcome;
use crate::ports::conversations::ConversationRepository;
use crate::ports::labels::LabelRepository;
use crate::util::{now_ms, uuid_v7_without_dashes};

const LABEL_MAX_CHARS: usize = 64;

/// A tag on a conversation. Unique per `(conversation_id, label)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationLabel {
    pub label_id: String,
    pub conversation_id: String,
    pub label: String,
    pub created_at_ms: i64,
}

impl ConversationLabel {
    pub fn new(conversation_id: &str, label: &str) -> Self {
        Self {
            label_id: uuid_v7_without_dashes(),
            conversation_id: conversation_id.to_string(),
            label: normalize_label(label),
            created_at_ms: now_ms(),
        }
    }
}

pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

#[derive(Clone)]
pub struct LabelService {
    conversations: Arc<dyn ConversationRepository>,
    labels: Arc<dyn LabelRepository>,
    locks: ConversationLockService,
}

impl LabelService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        labels: Arc<dyn LabelRepository>,
        locks: ConversationLockService,
    ) -> Self {
        Self {
            conversations,
            labels,
            locks,
        }
    }

    /// Adds the label under the conversation lease, so it is either re-parented
    /// by a concurrent merge or rejected because the conversation is gone.
    pub async fn add(
        &self,
        conversation_id: &str,
        label: &str,
    ) -> DomainResult<UpsertOutcome<ConversationLabel>> {
        let label = normalize_label(label);
        if label.is_empty() || label.chars().count() > LABEL_MAX_CHARS {
            return Err(DomainError::Validation(format!(
                "label must be 1 to {LABEL_MAX_CHARS} characters"
            )));
        }
        let key = LockKey::conversation(conversation_id);
        self.locks
            .with_lease(&key, |lease| async move {
                if self.conversations.get(conversation_id).await?.is_none() {
                    return Err(DomainError::NotFound);
                }
                lease.ensure_live()?;
                self.labels
                    .add(&ConversationLabel::new(conversation_id, &label))
                    .await
            })
            .await
    }

    pub async fn list(&self, conversation_id: &str) -> DomainResult<Vec<ConversationLabel>> {
        if self.conversations.get(conversation_id).await?.is_none() {
            return Err(DomainError::NotFound);
        }
        self.labels.list_by_conversation(conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_trimmed_and_lowercased() {
        let label = ConversationLabel::new("c1", "  Urgente ");
        assert_eq!(label.label, "urgente");
    }
}
