//! Child dependency scopes owned by units of work.
//!
//! Whatever a unit of work resolves per flow (repositories, executors) lives
//! in a scope created with the unit of work and released when it is disposed.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::UowResult;

#[async_trait]
pub trait ServiceScope: Send + Sync {
    /// Releases everything resolved from the scope.
    async fn release(&self);
}

#[async_trait]
pub trait ScopeFactory: Send + Sync {
    async fn create_scope(&self, unit_of_work: Uuid) -> UowResult<Box<dyn ServiceScope>>;
}
