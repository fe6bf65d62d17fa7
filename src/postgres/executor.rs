use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::provider::PostgresTransaction;
use super::writer::{write_entries, PostgresEntityWriter};
use super::TECHNOLOGY;
use crate::error::{UnitOfWorkError, UowResult};
use crate::executor::{ChangeTracker, DbExecutor, EntityEntry, EntityState};
use crate::transaction::TransactionObject;

/// A connection pool plus the identity used to build its resource key.
///
/// Clones share the identity, so executors built from clones of the same
/// database enlist into the same transaction.
#[derive(Clone, Debug)]
pub struct PostgresDatabase {
    pool: PgPool,
    instance_id: Uuid,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self::with_instance_id(pool, Uuid::new_v4())
    }

    pub fn with_instance_id(pool: PgPool, instance_id: Uuid) -> Self {
        Self { pool, instance_id }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

/// Executor used by repositories.
///
/// Queries run inside the bound transaction once the executor is enlisted,
/// and directly against the pool otherwise (e.g. under a suppressed unit of
/// work). Tracked changes are written at save time by the registered
/// writers.
pub struct PostgresExecutor {
    database: PostgresDatabase,
    transaction: RwLock<Option<Arc<TransactionObject>>>,
    tracker: ChangeTracker,
    writers: RwLock<Vec<Arc<dyn PostgresEntityWriter>>>,
}

impl PostgresExecutor {
    pub fn new(database: PostgresDatabase) -> Arc<Self> {
        Arc::new(Self {
            database,
            transaction: RwLock::new(None),
            tracker: ChangeTracker::new(),
            writers: RwLock::new(Vec::new()),
        })
    }

    /// Adds a writer for flushing tracked entities. Earlier writers win when
    /// several accept the same entity.
    pub fn register_writer(&self, writer: Arc<dyn PostgresEntityWriter>) {
        self.writers.write().push(writer);
    }

    pub fn database(&self) -> &PostgresDatabase {
        &self.database
    }

    /// Records a change for the save pipeline.
    pub fn track<T: Any + Send + Sync>(&self, state: EntityState, entity: T) {
        self.tracker.track(state, entity);
    }

    pub async fn execute(&self, query: Query<'_, Postgres, PgArguments>) -> UowResult<PgQueryResult> {
        match self.transaction() {
            Some(transaction) => {
                let backend = postgres_backend(&transaction)?;
                let mut guard = backend.lock().await;
                let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
                Ok(query.execute(&mut **tx).await?)
            }
            None => Ok(query.execute(self.database.pool()).await?),
        }
    }

    pub async fn fetch_optional(&self, query: Query<'_, Postgres, PgArguments>) -> UowResult<Option<PgRow>> {
        match self.transaction() {
            Some(transaction) => {
                let backend = postgres_backend(&transaction)?;
                let mut guard = backend.lock().await;
                let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
                Ok(query.fetch_optional(&mut **tx).await?)
            }
            None => Ok(query.fetch_optional(self.database.pool()).await?),
        }
    }

    pub async fn fetch_one(&self, query: Query<'_, Postgres, PgArguments>) -> UowResult<PgRow> {
        match self.transaction() {
            Some(transaction) => {
                let backend = postgres_backend(&transaction)?;
                let mut guard = backend.lock().await;
                let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
                Ok(query.fetch_one(&mut **tx).await?)
            }
            None => Ok(query.fetch_one(self.database.pool()).await?),
        }
    }
}

fn postgres_backend(transaction: &TransactionObject) -> UowResult<&PostgresTransaction> {
    transaction.backend::<PostgresTransaction>().ok_or_else(|| {
        UnitOfWorkError::backend(
            "execute",
            format!("transaction {} is not a postgres transaction", transaction.id()),
        )
    })
}

#[async_trait]
impl DbExecutor for PostgresExecutor {
    fn technology(&self) -> &str {
        TECHNOLOGY
    }

    fn instance_id(&self) -> String {
        self.database.instance_id.to_string()
    }

    fn backend(&self) -> &dyn Any {
        &self.database
    }

    /// Refuses a second, different transaction while the bound one is open.
    fn set_transaction(&self, transaction: Arc<TransactionObject>) -> bool {
        let mut bound = self.transaction.write();
        if let Some(current) = bound.as_ref() {
            if current.id() != transaction.id() && current.is_active() {
                return false;
            }
        }
        *bound = Some(transaction);
        true
    }

    fn transaction(&self) -> Option<Arc<TransactionObject>> {
        self.transaction.read().clone()
    }

    fn change_tracker(&self) -> Option<&ChangeTracker> {
        Some(&self.tracker)
    }

    async fn save_changes(&self, entries: &[EntityEntry], cancel: &CancellationToken) -> UowResult<()> {
        let changed: Vec<&EntityEntry> = entries
            .iter()
            .filter(|entry| entry.state != EntityState::Unchanged)
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        let writers = self.writers.read().clone();

        match self.transaction() {
            Some(transaction) => {
                let backend = postgres_backend(&transaction)?;
                let mut guard = backend.lock().await;
                let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
                write_entries(&writers, &changed, &mut **tx, cancel).await
            }
            None => {
                let mut conn = self.database.pool().acquire().await?;
                write_entries(&writers, &changed, &mut *conn, cancel).await
            }
        }
    }

    async fn dispose(&self) {
        self.transaction.write().take();
    }
}
