use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod contacts;
pub mod conversations;
pub mod dependents;
pub mod health;
pub mod labels;
pub mod locks;
pub mod messages;
pub mod outbox;
pub mod provider;

/// Result of an insert guarded by a unique constraint. `Existing` is the
/// expected "someone else already did this" signal, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpsertOutcome<T> {
    Inserted(T),
    Existing(T),
}

impl<T> UpsertOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Inserted(value) | Self::Existing(value) => value,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Counts from moving dependent rows between parents. `discarded` rows hit a
/// uniqueness conflict on the canonical side and were dropped.
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ReparentReport {
    pub moved: usize,
    pub discarded: usize,
}

impl ReparentReport {
    pub fn add(&mut self, other: ReparentReport) {
        self.moved += other.moved;
        self.discarded += other.discarded;
    }
}
