pub mod aliases;
pub mod auth;
pub mod consolidation;
pub mod contacts;
pub mod conversations;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod labels;
pub mod locks;
pub mod messages;
pub mod outbox;
pub mod ports;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
