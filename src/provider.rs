//! Transaction providers and their priority-ordered selection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::UowResult;
use crate::executor::DbExecutor;
use crate::options::UnitOfWorkOptions;
use crate::transaction::TransactionObject;

/// Inputs available to a provider creating a transaction.
pub struct TransactionContext<'a> {
    pub unit_of_work_id: Uuid,
    pub resource_key: &'a str,
    pub options: &'a UnitOfWorkOptions,
    pub executor: &'a dyn DbExecutor,
}

/// Policy deciding how transactions are obtained for a class of executors.
///
/// Providers are shared between unrelated flows and must not keep
/// caller-specific mutable state.
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    /// Lower values are consulted first.
    fn order(&self) -> i32 {
        0
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn can_create(&self, executor: &dyn DbExecutor) -> bool;

    /// Picks an already open transaction the executor can join, if any.
    fn reuse(
        &self,
        existing: &[Arc<TransactionObject>],
        executor: &dyn DbExecutor,
    ) -> Option<Arc<TransactionObject>>;

    async fn create(
        &self,
        context: TransactionContext<'_>,
        cancel: &CancellationToken,
    ) -> UowResult<TransactionObject>;
}

/// Providers sorted ascending by order. Ties keep registration order.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: Vec<Arc<dyn TransactionProvider>>,
}

impl ProviderSet {
    pub fn new(mut providers: Vec<Arc<dyn TransactionProvider>>) -> Self {
        providers.sort_by_key(|provider| provider.order());
        Self { providers }
    }

    /// First provider, by priority, that claims the executor.
    pub fn resolve(&self, executor: &dyn DbExecutor) -> Option<&Arc<dyn TransactionProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.can_create(executor))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
