use crate::DomainResult;

use super::BoxFuture;

/// A backing service whose reachability is reported by the health endpoint.
pub trait HealthProbe: Send + Sync {
    fn component(&self) -> &'static str;

    fn check(&self) -> BoxFuture<'_, DomainResult<()>>;
}
