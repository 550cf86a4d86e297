use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::DomainResult;

use super::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub key: String,
    pub token: String,
    pub expires_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(LockRecord),
    Busy { expires_at_ms: Option<i64> },
}

/// Lease storage. `try_acquire` inserts when the key is absent or its lease
/// has expired; `release` deletes only when the stored token matches.
pub trait LockStore: Send + Sync {
    fn try_acquire(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<AcquireOutcome>>;

    fn release(&self, key: &str, token: &str) -> BoxFuture<'_, DomainResult<bool>>;

    /// Deletes expired leases. Stores that expire keys natively return 0.
    fn purge_expired(&self) -> BoxFuture<'_, DomainResult<usize>>;
}
