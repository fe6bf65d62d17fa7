use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::UowResult;
use crate::transaction::TransactionObject;

/// Tracked state of an entity at save time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// Shared handle to a tracked entity. Hooks downcast to the types they know.
pub type EntityRef = Arc<dyn Any + Send + Sync>;

/// One pending change recorded by a repository.
#[derive(Clone)]
pub struct EntityEntry {
    pub state: EntityState,
    pub entity: EntityRef,
}

impl EntityEntry {
    pub fn new<T: Any + Send + Sync>(state: EntityState, entity: T) -> Self {
        Self {
            state,
            entity: Arc::new(entity),
        }
    }

    pub fn entity_as<T: Any>(&self) -> Option<&T> {
        self.entity.downcast_ref::<T>()
    }
}

impl fmt::Debug for EntityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityEntry")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Pending changes of one executor, in the order they were recorded.
#[derive(Default)]
pub struct ChangeTracker {
    entries: Mutex<Vec<EntityEntry>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track<T: Any + Send + Sync>(&self, state: EntityState, entity: T) {
        self.entries.lock().push(EntityEntry::new(state, entity));
    }

    pub fn track_entry(&self, entry: EntityEntry) {
        self.entries.lock().push(entry);
    }

    /// Takes every pending entry, leaving the tracker empty.
    pub fn drain(&self) -> Vec<EntityEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Adapter over one physical resource instance, e.g. a database pool or an
/// outbox.
///
/// An executor is bound to at most one unit of work at a time and receives
/// its transaction through [`DbExecutor::set_transaction`].
#[async_trait]
pub trait DbExecutor: Send + Sync {
    /// Storage technology tag, e.g. `postgres`.
    fn technology(&self) -> &str;

    /// Identity of the physical resource instance behind this executor.
    fn instance_id(&self) -> String;

    /// Key identifying the physical resource within a unit of work.
    fn resource_key(&self) -> String {
        format!("{}-{}", self.technology(), self.instance_id())
    }

    /// The backend instance, for providers to downcast.
    fn backend(&self) -> &dyn Any;

    /// Binds the transaction. Returns `false` when the executor refuses it.
    fn set_transaction(&self, transaction: Arc<TransactionObject>) -> bool;

    /// The transaction currently bound, if any.
    fn transaction(&self) -> Option<Arc<TransactionObject>>;

    /// Pending changes to run through the save pipeline.
    fn change_tracker(&self) -> Option<&ChangeTracker> {
        None
    }

    /// Writes the final entries to the resource, inside the bound transaction
    /// when there is one.
    async fn save_changes(&self, _entries: &[EntityEntry], _cancel: &CancellationToken) -> UowResult<()> {
        Ok(())
    }

    /// Drops the transaction binding and releases per-flow state.
    async fn dispose(&self) {}
}
