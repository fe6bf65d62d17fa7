use async_trait::async_trait;
use uuid::Uuid;

use crate::error::UowResult;

/// Trait for components that need to be notified when a unit of work
/// finishes.
///
/// Components implementing this trait can be registered with a
/// [`UnitOfWork`](crate::UnitOfWork) to receive callbacks once its
/// transactions are committed or rolled back, e.g. to update caches or
/// publish buffered events.
#[async_trait]
pub trait TransactionAware: Send + Sync {
    /// Called after every owned transaction of the unit of work committed.
    async fn on_commit(&self, unit_of_work: Uuid) -> UowResult<()>;

    /// Called after the unit of work rolled back, whether or not every
    /// backend rollback succeeded.
    async fn on_rollback(&self, unit_of_work: Uuid) -> UowResult<()>;
}
