use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::executor::PostgresDatabase;
use super::TECHNOLOGY;
use crate::error::{UnitOfWorkError, UowResult};
use crate::executor::DbExecutor;
use crate::options::UnitOfWorkOptions;
use crate::provider::{TransactionContext, TransactionProvider};
use crate::transaction::{TransactionBackend, TransactionObject};

/// Backend handle over one `sqlx` transaction.
pub struct PostgresTransaction {
    database_id: Uuid,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PostgresTransaction {
    fn new(database_id: Uuid, tx: Transaction<'static, Postgres>) -> Self {
        Self {
            database_id,
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Instance id of the database the transaction was opened on.
    pub fn database_id(&self) -> Uuid {
        self.database_id
    }

    /// Locks the transaction for a query. `None` once committed or rolled back.
    pub async fn lock(&self) -> MutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        self.tx.lock().await
    }

    /// Takes ownership of the transaction, leaving None in its place.
    /// This should only be called when committing or rolling back.
    async fn take_transaction(&self) -> UowResult<Transaction<'static, Postgres>> {
        Ok(self.tx.lock().await.take().ok_or(sqlx::Error::PoolClosed)?)
    }
}

#[async_trait]
impl TransactionBackend for PostgresTransaction {
    async fn commit(&self, cancel: &CancellationToken) -> UowResult<()> {
        if cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }
        let tx = self.take_transaction().await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, _cancel: &CancellationToken) -> UowResult<()> {
        let tx = self.take_transaction().await?;
        tx.rollback().await?;
        Ok(())
    }

    async fn dispose(&self) {
        // sqlx rolls an unfinished transaction back when it is dropped.
        if self.tx.lock().await.take().is_some() {
            tracing::debug!(database = %self.database_id, "disposing unfinished postgres transaction");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Provider for [`PostgresExecutor`](super::PostgresExecutor)s.
///
/// Reuses any open transaction on the same database; otherwise begins one
/// and applies the unit of work's isolation level, read-only flag and
/// timeout (as `statement_timeout`).
#[derive(Debug, Clone, Default)]
pub struct PostgresTransactionProvider {
    order: i32,
}

impl PostgresTransactionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(order: i32) -> Self {
        Self { order }
    }
}

fn database_of(executor: &dyn DbExecutor) -> Option<&PostgresDatabase> {
    executor.backend().downcast_ref::<PostgresDatabase>()
}

/// Statements run right after `BEGIN` for the given options.
fn session_statements(options: &UnitOfWorkOptions) -> Vec<String> {
    let mut statements = Vec::new();
    if let Some(level) = options.isolation_level {
        statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
    }
    if options.is_read_only {
        statements.push("SET TRANSACTION READ ONLY".to_string());
    }
    if let Some(timeout) = options.timeout {
        statements.push(format!("SET LOCAL statement_timeout = {}", timeout.as_millis()));
    }
    statements
}

#[async_trait]
impl TransactionProvider for PostgresTransactionProvider {
    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        "postgres"
    }

    fn can_create(&self, executor: &dyn DbExecutor) -> bool {
        database_of(executor).is_some()
    }

    fn reuse(
        &self,
        existing: &[Arc<TransactionObject>],
        executor: &dyn DbExecutor,
    ) -> Option<Arc<TransactionObject>> {
        let database = database_of(executor)?;
        existing
            .iter()
            .find(|transaction| {
                transaction.is_active()
                    && transaction
                        .backend::<PostgresTransaction>()
                        .is_some_and(|pg| pg.database_id() == database.instance_id())
            })
            .cloned()
    }

    async fn create(
        &self,
        context: TransactionContext<'_>,
        cancel: &CancellationToken,
    ) -> UowResult<TransactionObject> {
        if cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }
        let database = database_of(context.executor).ok_or_else(|| UnitOfWorkError::ProviderResolution {
            resource_key: context.resource_key.to_string(),
        })?;

        let mut tx = database.pool().begin().await?;
        for statement in session_statements(context.options) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        tracing::debug!(
            unit_of_work = %context.unit_of_work_id,
            database = %database.instance_id(),
            "postgres transaction started"
        );
        Ok(TransactionObject::new(
            TECHNOLOGY,
            PostgresTransaction::new(database.instance_id(), tx),
        ))
    }
}
