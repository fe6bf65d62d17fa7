use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;

use crate::error::{UnitOfWorkError, UowResult};
use crate::executor::{EntityEntry, EntityRef, EntityState};

/// Writes one kind of tracked entity when a [`PostgresExecutor`] flushes.
///
/// The state passed in is the one left by the pre-save hooks, so a hook
/// turning a delete into an update changes the statement that runs.
///
/// [`PostgresExecutor`]: super::PostgresExecutor
#[async_trait]
pub trait PostgresEntityWriter: Send + Sync {
    /// True when this writer knows the entity's type.
    fn accepts(&self, entity: &EntityRef) -> bool;

    async fn write(&self, state: EntityState, entity: &EntityRef, conn: &mut PgConnection) -> UowResult<()>;
}

/// Runs every changed entry through the first writer accepting it.
pub(super) async fn write_entries(
    writers: &[Arc<dyn PostgresEntityWriter>],
    entries: &[&EntityEntry],
    conn: &mut PgConnection,
    cancel: &CancellationToken,
) -> UowResult<()> {
    for entry in entries {
        if cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }
        let writer = writers
            .iter()
            .find(|writer| writer.accepts(&entry.entity))
            .ok_or_else(|| UnitOfWorkError::backend("flush", format!("no writer for {:?} entity", entry.state)))?;
        writer.write(entry.state, &entry.entity, &mut *conn).await?;
    }
    Ok(())
}
