use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::DomainError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Exponential delay for the given zero-based attempt, capped at `max_ms`.
pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    let multiplier = 1u64 << attempt.min(16);
    base_ms.saturating_mul(multiplier).max(1).min(max_ms.max(1))
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let fallback = OffsetDateTime::from_unix_timestamp(0).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let value =
        OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000).unwrap_or(fallback);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

/// SHA-256 over the canonical JSON encoding of `value`.
///
/// Object keys are sorted recursively, so two values with the same fields hash
/// identically regardless of field order.
pub fn fingerprint<T>(value: &T) -> crate::DomainResult<String>
where
    T: Serialize,
{
    let value = serde_json::to_value(value)
        .map_err(|err| DomainError::Validation(format!("failed to canonicalize payload: {err}")))?;
    let payload = serde_json::to_vec(&canonicalize(value))
        .map_err(|err| DomainError::Validation(format!("failed to serialize payload: {err}")))?;
    let digest = Sha256::digest(&payload);
    Ok(hex::encode(digest))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = json!({ "content": "hi", "recipient": "5581", "conversation_id": "c1" });
        let b = json!({ "recipient": "5581", "conversation_id": "c1", "content": "hi" });
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = json!({ "content": "hi" });
        let b = json!({ "content": "hi!" });
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn rfc3339_from_epoch_ms() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ms_rfc3339(1_700_000_000_000), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_ms(50, 0, 2_000), 50);
        assert_eq!(backoff_ms(50, 2, 2_000), 200);
        assert_eq!(backoff_ms(50, 10, 2_000), 2_000);
    }
}
