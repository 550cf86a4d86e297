use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("conversation lock busy, retry later")]
    LockBusy,
    #[error("lease expired before the critical section finished")]
    LeaseExpired,
    #[error("provider failure: {0}")]
    Provider(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("store error: {0}")]
    Store(String),
}

impl DomainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockBusy | Self::LeaseExpired)
    }
}
