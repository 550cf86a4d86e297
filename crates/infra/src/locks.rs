use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use redis::aio::ConnectionManager;
use serde_json::json;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;
use threadline_domain::DomainResult;
use threadline_domain::error::DomainError;
use threadline_domain::ports::BoxFuture;
use threadline_domain::ports::health::HealthProbe;
use threadline_domain::ports::locks::{AcquireOutcome, LockRecord, LockStore};
use threadline_domain::util::now_ms;

use crate::db::map_surreal_error;

pub const LOCK_ACQUIRED_TOTAL: &str = "threadline_lock_acquired_total";
pub const LOCK_BUSY_TOTAL: &str = "threadline_lock_busy_total";

/// Deletes the key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// Lease rows live at `conversation_lock:<lock key>`, so the record id is the
/// mutual-exclusion constraint.
const SURREAL_ACQUIRE: &str = "BEGIN TRANSACTION; \
     DELETE type::thing('conversation_lock', $lock_key) WHERE expires_at_ms <= $now; \
     CREATE type::thing('conversation_lock', $lock_key) CONTENT $row; \
     COMMIT TRANSACTION;";
const SURREAL_HOLDER_EXPIRY: &str =
    "SELECT VALUE expires_at_ms FROM type::thing('conversation_lock', $lock_key)";
const SURREAL_RELEASE: &str = "BEGIN TRANSACTION; \
     LET $held = (SELECT VALUE lock_key FROM type::thing('conversation_lock', $lock_key) \
         WHERE token = $token); \
     DELETE type::thing('conversation_lock', $lock_key) WHERE token = $token; \
     RETURN array::len($held); \
     COMMIT TRANSACTION;";

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn record_outcome(backend: &'static str, outcome: &AcquireOutcome) {
    match outcome {
        AcquireOutcome::Acquired(_) => counter!(LOCK_ACQUIRED_TOTAL, "backend" => backend).increment(1),
        AcquireOutcome::Busy { .. } => counter!(LOCK_BUSY_TOTAL, "backend" => backend).increment(1),
    }
}

#[derive(Clone)]
pub struct RedisLockStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisLockStore {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> DomainResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| DomainError::Store(format!("invalid redis url: {err}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| DomainError::Store(format!("redis connect failed: {err}")))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    fn store_error(err: redis::RedisError) -> DomainError {
        DomainError::Store(format!("redis lock operation failed: {err}"))
    }
}

impl LockStore for RedisLockStore {
    fn try_acquire(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<AcquireOutcome>> {
        let redis_key = self.redis_key(key);
        let key = key.to_string();
        let token = token.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let ttl_ms = ttl_ms(ttl);
            let set: Option<String> = redis::cmd("SET")
                .arg(&redis_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(Self::store_error)?;
            let outcome = if set.is_some() {
                AcquireOutcome::Acquired(LockRecord {
                    key,
                    token,
                    expires_at_ms: now_ms() + ttl_ms as i64,
                })
            } else {
                let remaining: i64 = redis::cmd("PTTL")
                    .arg(&redis_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::store_error)?;
                AcquireOutcome::Busy {
                    expires_at_ms: (remaining > 0).then(|| now_ms() + remaining),
                }
            };
            record_outcome("redis", &outcome);
            Ok(outcome)
        })
    }

    fn release(&self, key: &str, token: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let redis_key = self.redis_key(key);
        let token = token.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
                .key(&redis_key)
                .arg(&token)
                .invoke_async(&mut conn)
                .await
                .map_err(Self::store_error)?;
            Ok(deleted == 1)
        })
    }

    /// Redis expires keys on its own.
    fn purge_expired(&self) -> BoxFuture<'_, DomainResult<usize>> {
        Box::pin(async { Ok(0) })
    }
}

impl HealthProbe for RedisLockStore {
    fn component(&self) -> &'static str {
        "redis"
    }

    fn check(&self) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(Self::store_error)?;
            Ok(())
        })
    }
}

/// Leases as rows of `conversation_lock` keyed by the lock key. Expired rows
/// are replaced on acquire and swept by `purge_expired`.
#[derive(Clone)]
pub struct SurrealLockStore {
    client: Arc<Surreal<Client>>,
}

impl SurrealLockStore {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl LockStore for SurrealLockStore {
    fn try_acquire(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<AcquireOutcome>> {
        let key = key.to_string();
        let token = token.to_string();
        Box::pin(async move {
            let now = now_ms();
            let expires_at_ms = now + ttl_ms(ttl) as i64;
            let result = self
                .client
                .query(SURREAL_ACQUIRE)
                .bind(("lock_key", key.clone()))
                .bind(("now", now))
                .bind((
                    "row",
                    json!({ "lock_key": key, "token": token, "expires_at_ms": expires_at_ms }),
                ))
                .await
                .map_err(map_surreal_error)
                .and_then(|response| response.check().map_err(map_surreal_error));

            let outcome = match result {
                Ok(_) => AcquireOutcome::Acquired(LockRecord {
                    key,
                    token,
                    expires_at_ms,
                }),
                Err(DomainError::Conflict) => {
                    let mut response = self
                        .client
                        .query(SURREAL_HOLDER_EXPIRY)
                        .bind(("lock_key", key))
                        .await
                        .map_err(map_surreal_error)?;
                    let holders: Vec<i64> = response
                        .take(0)
                        .map_err(|err| DomainError::Store(format!("invalid lock row: {err}")))?;
                    AcquireOutcome::Busy {
                        expires_at_ms: holders.into_iter().next(),
                    }
                }
                Err(err) => return Err(err),
            };
            record_outcome("surreal", &outcome);
            Ok(outcome)
        })
    }

    fn release(&self, key: &str, token: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let key = key.to_string();
        let token = token.to_string();
        Box::pin(async move {
            let mut response = self
                .client
                .query(SURREAL_RELEASE)
                .bind(("lock_key", key))
                .bind(("token", token))
                .await
                .map_err(map_surreal_error)?;
            let last = response.num_statements().saturating_sub(1);
            let released: Option<usize> = response
                .take(last)
                .map_err(|err| DomainError::Store(format!("invalid release result: {err}")))?;
            Ok(released.unwrap_or(0) > 0)
        })
    }

    fn purge_expired(&self) -> BoxFuture<'_, DomainResult<usize>> {
        Box::pin(async move {
            let mut response = self
                .client
                .query(
                    "BEGIN TRANSACTION; \
                     LET $expired = (SELECT VALUE lock_key FROM conversation_lock \
                         WHERE expires_at_ms <= $now); \
                     DELETE conversation_lock WHERE lock_key INSIDE $expired; \
                     RETURN array::len($expired); \
                     COMMIT TRANSACTION;",
                )
                .bind(("now", now_ms()))
                .await
                .map_err(map_surreal_error)?;
            let last = response.num_statements().saturating_sub(1);
            let purged: Option<usize> = response
                .take(last)
                .map_err(|err| DomainError::Store(format!("invalid purge result: {err}")))?;
            Ok(purged.unwrap_or(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surreal_lease_rows_are_addressed_by_lock_key() {
        for query in [SURREAL_ACQUIRE, SURREAL_HOLDER_EXPIRY, SURREAL_RELEASE] {
            assert!(query.contains("type::thing('conversation_lock', $lock_key)"));
            assert!(!query.contains("WHERE lock_key"));
        }
    }

    #[test]
    fn ttl_is_at_least_one_millisecond() {
        assert_eq!(ttl_ms(Duration::ZERO), 1);
        assert_eq!(ttl_ms(Duration::from_secs(30)), 30_000);
    }
}
