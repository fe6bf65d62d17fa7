use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use uow_coordinator::{
    CancellationToken, ChangeTracker, DbExecutor, EntityEntry, EntityState, ScopeFactory,
    ServiceScope, TransactionAware, TransactionBackend, TransactionContext, TransactionObject,
    TransactionProvider, UnitOfWorkError, UowResult,
};

/// Ordered record of everything the fakes did.
#[derive(Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

/// Backend identity of a fake resource.
#[derive(Debug, Clone)]
pub struct FakeResource {
    pub technology: String,
    pub instance: String,
}

/// Executor over an in-memory fake resource.
pub struct FakeExecutor {
    resource: FakeResource,
    journal: Arc<Journal>,
    transaction: RwLock<Option<Arc<TransactionObject>>>,
    tracker: ChangeTracker,
    flushed: Mutex<Vec<EntityState>>,
}

impl FakeExecutor {
    pub fn new(technology: &str, instance: &str, journal: &Arc<Journal>) -> Arc<Self> {
        Arc::new(Self {
            resource: FakeResource {
                technology: technology.to_string(),
                instance: instance.to_string(),
            },
            journal: journal.clone(),
            transaction: RwLock::new(None),
            tracker: ChangeTracker::new(),
            flushed: Mutex::new(Vec::new()),
        })
    }

    pub fn track<T: Any + Send + Sync>(&self, state: EntityState, entity: T) {
        self.tracker.track(state, entity);
    }

    /// States written by the last flushes, in order.
    pub fn flushed(&self) -> Vec<EntityState> {
        self.flushed.lock().clone()
    }

    pub fn label(&self) -> String {
        self.resource_key()
    }
}

#[async_trait]
impl DbExecutor for FakeExecutor {
    fn technology(&self) -> &str {
        &self.resource.technology
    }

    fn instance_id(&self) -> String {
        self.resource.instance.clone()
    }

    fn backend(&self) -> &dyn Any {
        &self.resource
    }

    fn set_transaction(&self, transaction: Arc<TransactionObject>) -> bool {
        *self.transaction.write() = Some(transaction);
        true
    }

    fn transaction(&self) -> Option<Arc<TransactionObject>> {
        self.transaction.read().clone()
    }

    fn change_tracker(&self) -> Option<&ChangeTracker> {
        Some(&self.tracker)
    }

    async fn save_changes(&self, entries: &[EntityEntry], _cancel: &CancellationToken) -> UowResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.journal.record(format!("flush:{}", self.label()));
        self.flushed
            .lock()
            .extend(entries.iter().map(|entry| entry.state));
        Ok(())
    }

    async fn dispose(&self) {
        self.transaction.write().take();
    }
}

/// Backend whose operations are written to the journal.
pub struct FakeBackend {
    label: String,
    journal: Arc<Journal>,
    fail_commit: bool,
    fail_rollback: bool,
    cancel_after_commit: Option<CancellationToken>,
}

#[async_trait]
impl TransactionBackend for FakeBackend {
    async fn commit(&self, _cancel: &CancellationToken) -> UowResult<()> {
        self.journal.record(format!("commit:{}", self.label));
        if self.fail_commit {
            return Err(UnitOfWorkError::backend("commit", format!("{} refused commit", self.label)));
        }
        if let Some(token) = &self.cancel_after_commit {
            token.cancel();
        }
        Ok(())
    }

    async fn rollback(&self, _cancel: &CancellationToken) -> UowResult<()> {
        self.journal.record(format!("rollback:{}", self.label));
        if self.fail_rollback {
            return Err(UnitOfWorkError::backend("rollback", format!("{} refused rollback", self.label)));
        }
        Ok(())
    }

    async fn dispose(&self) {
        self.journal.record(format!("dispose:{}", self.label));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Provider for fake executors of one technology (or all of them).
pub struct FakeProvider {
    pub name: String,
    pub order: i32,
    pub technology: Option<String>,
    pub reuse_open: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub cancel_after_commit: Option<CancellationToken>,
    pub journal: Arc<Journal>,
}

impl FakeProvider {
    pub fn new(name: &str, order: i32, journal: &Arc<Journal>) -> Self {
        Self {
            name: name.to_string(),
            order,
            technology: None,
            reuse_open: false,
            fail_commit: false,
            fail_rollback: false,
            cancel_after_commit: None,
            journal: journal.clone(),
        }
    }

    pub fn for_technology(mut self, technology: &str) -> Self {
        self.technology = Some(technology.to_string());
        self
    }

    pub fn reusing(mut self) -> Self {
        self.reuse_open = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    /// Cancels `token` once a transaction of this provider committed.
    pub fn cancelling_after_commit(mut self, token: &CancellationToken) -> Self {
        self.cancel_after_commit = Some(token.clone());
        self
    }

    pub fn shared(self) -> Arc<dyn TransactionProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl TransactionProvider for FakeProvider {
    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn can_create(&self, executor: &dyn DbExecutor) -> bool {
        executor.backend().downcast_ref::<FakeResource>().is_some()
            && self
                .technology
                .as_deref()
                .map_or(true, |technology| technology == executor.technology())
    }

    fn reuse(
        &self,
        existing: &[Arc<TransactionObject>],
        executor: &dyn DbExecutor,
    ) -> Option<Arc<TransactionObject>> {
        if !self.reuse_open {
            return None;
        }
        existing
            .iter()
            .find(|tx| tx.is_active() && tx.technology() == executor.technology())
            .cloned()
    }

    async fn create(
        &self,
        context: TransactionContext<'_>,
        _cancel: &CancellationToken,
    ) -> UowResult<TransactionObject> {
        self.journal
            .record(format!("create:{}:{}", self.name, context.resource_key));
        Ok(TransactionObject::new(
            context.executor.technology(),
            FakeBackend {
                label: context.resource_key.to_string(),
                journal: self.journal.clone(),
                fail_commit: self.fail_commit,
                fail_rollback: self.fail_rollback,
                cancel_after_commit: self.cancel_after_commit.clone(),
            },
        ))
    }
}

/// Observer recording commit and rollback notifications.
pub struct RecordingObserver {
    pub journal: Arc<Journal>,
}

#[async_trait]
impl TransactionAware for RecordingObserver {
    async fn on_commit(&self, unit_of_work: Uuid) -> UowResult<()> {
        self.journal.record(format!("on_commit:{unit_of_work}"));
        Ok(())
    }

    async fn on_rollback(&self, unit_of_work: Uuid) -> UowResult<()> {
        self.journal.record(format!("on_rollback:{unit_of_work}"));
        Ok(())
    }
}

/// Scope factory whose scopes record their release.
pub struct RecordingScopeFactory {
    pub journal: Arc<Journal>,
}

struct RecordingScope {
    unit_of_work: Uuid,
    journal: Arc<Journal>,
}

#[async_trait]
impl ServiceScope for RecordingScope {
    async fn release(&self) {
        self.journal.record(format!("release_scope:{}", self.unit_of_work));
    }
}

#[async_trait]
impl ScopeFactory for RecordingScopeFactory {
    async fn create_scope(&self, unit_of_work: Uuid) -> UowResult<Box<dyn ServiceScope>> {
        self.journal.record(format!("create_scope:{unit_of_work}"));
        Ok(Box::new(RecordingScope {
            unit_of_work,
            journal: self.journal.clone(),
        }))
    }
}
