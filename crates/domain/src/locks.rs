use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::locks::{AcquireOutcome, LockRecord, LockStore};
use crate::util::{backoff_ms, now_ms, uuid_v7_without_dashes};

/// What a lease serializes. Merges of contacts lock `Contact` keys; all other
/// critical sections lock the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Conversation(String),
    Contact(String),
}

impl LockKey {
    pub fn conversation(conversation_id: &str) -> Self {
        Self::Conversation(conversation_id.to_string())
    }

    pub fn contact(contact_id: &str) -> Self {
        Self::Contact(contact_id.to_string())
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Conversation(id) | Self::Contact(id) => id,
        }
    }

    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::Contact(id) => write!(f, "contact:{id}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LockConfig {
    pub ttl: Duration,
    pub acquire_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            acquire_attempts: 8,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// A held lease. The local deadline is taken before the store round-trip, so
/// it never outlives the stored expiry.
#[derive(Clone, Debug)]
pub struct LockLease {
    key: LockKey,
    token: String,
    expires_at_ms: i64,
    deadline: Instant,
}

impl LockLease {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    pub fn is_live(&self) -> bool {
        Instant::now() < self.deadline
    }

    /// Holders call this before every mutation; an overrun holder must abort.
    pub fn ensure_live(&self) -> DomainResult<()> {
        if self.is_live() {
            Ok(())
        } else {
            tracing::warn!(lock_key = %self.key, "lease expired inside critical section");
            Err(DomainError::LeaseExpired)
        }
    }
}

#[derive(Clone)]
pub struct ConversationLockService {
    store: Arc<dyn LockStore>,
    config: LockConfig,
}

impl ConversationLockService {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Single attempt. `None` means another holder has the lease.
    pub async fn acquire(&self, key: &LockKey, ttl: Duration) -> DomainResult<Option<LockLease>> {
        if ttl.is_zero() {
            return Err(DomainError::Validation("lock ttl must be positive".into()));
        }
        let token = uuid_v7_without_dashes();
        let started = Instant::now();
        match self.store.try_acquire(&key.storage_key(), &token, ttl).await? {
            AcquireOutcome::Acquired(LockRecord { expires_at_ms, .. }) => {
                tracing::debug!(lock_key = %key, expires_at_ms, "lease acquired");
                Ok(Some(LockLease {
                    key: key.clone(),
                    token,
                    expires_at_ms,
                    deadline: started + ttl,
                }))
            }
            AcquireOutcome::Busy { expires_at_ms } => {
                tracing::debug!(lock_key = %key, ?expires_at_ms, "lease busy");
                Ok(None)
            }
        }
    }

    /// Retries with exponential backoff; exhaustion surfaces `LockBusy`.
    pub async fn acquire_with_retry(&self, key: &LockKey) -> DomainResult<LockLease> {
        let attempts = self.config.acquire_attempts.max(1);
        for attempt in 0..attempts {
            if let Some(lease) = self.acquire(key, self.config.ttl).await? {
                return Ok(lease);
            }
            if attempt + 1 < attempts {
                let delay = backoff_ms(
                    self.config.backoff_base.as_millis() as u64,
                    attempt,
                    self.config.backoff_max.as_millis() as u64,
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        tracing::warn!(lock_key = %key, attempts, "lease still busy after retries");
        Err(DomainError::LockBusy)
    }

    /// Acquires two leases in ascending key order so concurrent merges of the
    /// same pair cannot deadlock.
    pub async fn acquire_pair(
        &self,
        first: &LockKey,
        second: &LockKey,
    ) -> DomainResult<(LockLease, LockLease)> {
        if first == second {
            return Err(DomainError::Validation("cannot lock a row against itself".into()));
        }
        let (low, high) = if first < second {
            (first, second)
        } else {
            (second, first)
        };
        let low_lease = self.acquire_with_retry(low).await?;
        let high_lease = match self.acquire_with_retry(high).await {
            Ok(lease) => lease,
            Err(err) => {
                self.release(&low_lease).await;
                return Err(err);
            }
        };
        if low == first {
            Ok((low_lease, high_lease))
        } else {
            Ok((high_lease, low_lease))
        }
    }

    /// Best-effort release; a lost lease is left to expire.
    pub async fn release(&self, lease: &LockLease) -> bool {
        match self.release_token(lease.key(), lease.token()).await {
            Ok(released) => released,
            Err(err) => {
                tracing::warn!(lock_key = %lease.key, error = %err, "lease release failed");
                false
            }
        }
    }

    pub async fn release_token(&self, key: &LockKey, token: &str) -> DomainResult<bool> {
        let released = self.store.release(&key.storage_key(), token).await?;
        if !released {
            tracing::debug!(lock_key = %key, "release skipped, token no longer holds the lease");
        }
        Ok(released)
    }

    pub async fn purge_expired(&self) -> DomainResult<usize> {
        self.store.purge_expired().await
    }

    /// Runs `body` while holding the lease for `key`, releasing it afterwards
    /// whether or not `body` succeeded.
    pub async fn with_lease<T, F, Fut>(&self, key: &LockKey, body: F) -> DomainResult<T>
    where
        F: FnOnce(LockLease) -> Fut,
        Fut: std::future::Future<Output = DomainResult<T>>,
    {
        let lease = self.acquire_with_retry(key).await?;
        let result = body(lease.clone()).await;
        self.release(&lease).await;
        result
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryLockStore {
    inner: Arc<Mutex<HashMap<String, MemoryLease>>>,
}

#[derive(Clone, Debug)]
struct MemoryLease {
    token: String,
    deadline: Instant,
    expires_at_ms: i64,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> DomainError {
        DomainError::Store("lock store mutex poisoned".into())
    }
}

impl LockStore for InMemoryLockStore {
    fn try_acquire(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<AcquireOutcome>> {
        let key = key.to_string();
        let token = token.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().map_err(|_| Self::poisoned())?;
            let now = Instant::now();
            if let Some(existing) = guard.get(&key) {
                if now < existing.deadline {
                    return Ok(AcquireOutcome::Busy {
                        expires_at_ms: Some(existing.expires_at_ms),
                    });
                }
            }
            let expires_at_ms = now_ms() + ttl.as_millis() as i64;
            guard.insert(
                key.clone(),
                MemoryLease {
                    token: token.clone(),
                    deadline: now + ttl,
                    expires_at_ms,
                },
            );
            Ok(AcquireOutcome::Acquired(LockRecord {
                key,
                token,
                expires_at_ms,
            }))
        })
    }

    fn release(&self, key: &str, token: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let key = key.to_string();
        let token = token.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().map_err(|_| Self::poisoned())?;
            match guard.get(&key) {
                Some(existing) if existing.token == token => {
                    guard.remove(&key);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn purge_expired(&self) -> BoxFuture<'_, DomainResult<usize>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().map_err(|_| Self::poisoned())?;
            let now = Instant::now();
            let before = guard.len();
            guard.retain(|_, lease| now < lease.deadline);
            Ok(before - guard.len())
        })
    }
}
