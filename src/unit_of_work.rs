use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{UnitOfWorkError, UowResult};
use crate::executor::{DbExecutor, EntityEntry};
use crate::feature_container::{Enlistment, TransactionFeatureContainer};
use crate::lifecycle::HookFailure;
use crate::options::UnitOfWorkOptions;
use crate::provider::TransactionContext;
use crate::registry::UnitOfWorkRegistry;
use crate::scope::ServiceScope;
use crate::transaction::TransactionObject;
use crate::transaction_aware::TransactionAware;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Open,
    Saving,
    Saved,
    Failed,
    RolledBack,
}

/// Result of a successful `save_changes`.
#[derive(Debug, Default)]
pub struct SaveChangesOutcome {
    /// Transaction objects committed by this unit of work.
    pub committed: usize,
    /// Hook failures tolerated by the failure strategy.
    pub hook_failures: Vec<HookFailure>,
    /// Errors returned by transaction-aware observers after the commit.
    pub observer_failures: Vec<UnitOfWorkError>,
    /// Ancestor owning the borrowed transactions this unit of work flushed
    /// into. Post-save hooks and commit notifications for that work run when
    /// the ancestor commits.
    pub deferred_to: Option<Uuid>,
}

/// Work handed up by nested units of work that flushed into a transaction
/// owned here.
#[derive(Default)]
struct Deferred {
    entries: Vec<EntityEntry>,
    observers: Vec<(Uuid, Arc<dyn TransactionAware>)>,
}

impl SaveChangesOutcome {
    pub fn is_clean(&self) -> bool {
        self.hook_failures.is_empty() && self.observer_failures.is_empty()
    }
}

/// One logical transaction boundary spanning any number of resources.
///
/// Executors are enlisted with [`UnitOfWork::try_enlist`]; each resource key
/// gets at most one transaction object. `save_changes` runs the pre-save
/// hooks, commits every owned transaction once in enlistment order and then
/// runs the post-save hooks.
///
/// A nested unit of work that flushed into a transaction borrowed from an
/// ancestor leaves its post-save hooks and commit notifications to that
/// ancestor, so they only run once the transaction actually committed.
///
/// Commits across several transaction objects are not atomic. When
/// cancellation or a backend failure hits between two commits, the objects
/// already committed stay committed and only the remaining ones are rolled
/// back.
pub struct UnitOfWork {
    id: Uuid,
    options: UnitOfWorkOptions,
    registry: Arc<UnitOfWorkRegistry>,
    features: TransactionFeatureContainer,
    parent: Option<Weak<UnitOfWork>>,
    scope: Mutex<Option<Box<dyn ServiceScope>>>,
    executors: Mutex<Vec<Arc<dyn DbExecutor>>>,
    observers: RwLock<Vec<Arc<dyn TransactionAware>>>,
    deferred: Mutex<Deferred>,
    completion: Mutex<Completion>,
    disposed: Mutex<bool>,
}

impl UnitOfWork {
    pub(crate) fn new(
        registry: Arc<UnitOfWorkRegistry>,
        options: UnitOfWorkOptions,
        parent: Option<&Arc<UnitOfWork>>,
        suppressed: bool,
        scope: Option<Box<dyn ServiceScope>>,
        id: Uuid,
    ) -> Self {
        let features = if suppressed {
            TransactionFeatureContainer::suppressed()
        } else {
            TransactionFeatureContainer::new()
        };
        Self {
            id,
            options,
            registry,
            features,
            parent: parent.map(Arc::downgrade),
            scope: Mutex::new(scope),
            executors: Mutex::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            deferred: Mutex::new(Deferred::default()),
            completion: Mutex::new(Completion::Open),
            disposed: Mutex::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &UnitOfWorkOptions {
        &self.options
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }

    /// True when enlistments run without transactions.
    pub fn is_suppressed(&self) -> bool {
        self.features.is_suppressed()
    }

    pub fn parent(&self) -> Option<Arc<UnitOfWork>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn features(&self) -> &TransactionFeatureContainer {
        &self.features
    }

    /// Register a component that needs to be notified of commit or rollback.
    pub fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    /// Binds `executor` to the transaction of its resource, creating or
    /// reusing one through the providers when needed.
    ///
    /// Returns `false` when the executor runs without a transaction: the unit
    /// of work is suppressed, or the executor refused the binding. Only
    /// executors that end up bound, or that run under suppression, are
    /// flushed by `save_changes`.
    pub async fn try_enlist(
        &self,
        executor: Arc<dyn DbExecutor>,
        cancel: &CancellationToken,
    ) -> UowResult<bool> {
        self.ensure_not_disposed()?;
        if cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }

        let key = executor.resource_key();

        if let Some(enlistment) = self.features.get(&key) {
            return Ok(self.bind(&executor, &key, enlistment.transaction));
        }

        if self.features.is_suppressed() {
            tracing::debug!(unit_of_work = %self.id, resource_key = %key, "transactions suppressed, executor not enlisted");
            self.track_executor(&executor);
            return Ok(false);
        }

        let provider = self
            .registry
            .providers()
            .resolve(executor.as_ref())
            .ok_or_else(|| UnitOfWorkError::ProviderResolution {
                resource_key: key.clone(),
            })?;

        let visible = self.visible_transactions();
        if let Some(transaction) = provider.reuse(&visible, executor.as_ref()) {
            let owned = self.features.contains_transaction(transaction.id());
            tracing::debug!(
                unit_of_work = %self.id,
                resource_key = %key,
                transaction = %transaction.id(),
                provider = provider.name(),
                owned,
                "reusing open transaction"
            );
            let enlistment = Enlistment { transaction, owned };
            return Ok(match self.features.get_or_add(&key, enlistment) {
                Some((stored, _)) => self.bind(&executor, &key, stored.transaction),
                None => false,
            });
        }

        let context = TransactionContext {
            unit_of_work_id: self.id,
            resource_key: &key,
            options: &self.options,
            executor: executor.as_ref(),
        };
        let created = Arc::new(provider.create(context, cancel).await?);
        tracing::debug!(
            unit_of_work = %self.id,
            resource_key = %key,
            transaction = %created.id(),
            provider = provider.name(),
            "transaction created"
        );

        let enlistment = Enlistment {
            transaction: created.clone(),
            owned: true,
        };
        match self.features.get_or_add(&key, enlistment) {
            Some((stored, inserted)) => {
                if !inserted {
                    created.dispose().await;
                }
                Ok(self.bind(&executor, &key, stored.transaction))
            }
            None => {
                created.dispose().await;
                Ok(false)
            }
        }
    }

    /// Runs the save pipeline and commits every owned transaction once.
    ///
    /// Hook failures follow the configured strategy; tolerated ones are
    /// returned in the outcome. Any error before the commit phase rolls back
    /// every owned transaction.
    pub async fn save_changes(&self, cancel: &CancellationToken) -> UowResult<SaveChangesOutcome> {
        self.begin_completion("save changes", &[Completion::Open])?;

        match self.save_inner(cancel).await {
            Ok((mut outcome, owner)) => {
                *self.completion.lock() = Completion::Saved;
                match owner {
                    Some(owner) => {
                        let observers = self.observers.read().clone();
                        owner.defer_observers(self.id, observers);
                    }
                    None => outcome.observer_failures = self.notify_commit().await,
                }
                tracing::debug!(
                    unit_of_work = %self.id,
                    committed = outcome.committed,
                    deferred_to = ?outcome.deferred_to,
                    "changes saved"
                );
                Ok(outcome)
            }
            Err(err) => {
                *self.completion.lock() = Completion::Failed;
                Err(err)
            }
        }
    }

    /// Rolls back every owned transaction that is still active.
    ///
    /// A failing rollback does not stop the others; all failures are
    /// returned once every transaction was attempted.
    pub async fn rollback(&self, cancel: &CancellationToken) -> UowResult<()> {
        self.begin_completion("rollback", &[Completion::Open, Completion::Failed])?;
        *self.completion.lock() = Completion::RolledBack;

        let errors = self.rollback_owned(cancel).await;
        let observers: Vec<(Uuid, Arc<dyn TransactionAware>)> = self
            .observers
            .read()
            .iter()
            .map(|observer| (self.id, observer.clone()))
            .collect();
        let deferred = std::mem::take(&mut *self.deferred.lock());
        for (unit_of_work, observer) in observers.into_iter().chain(deferred.observers) {
            if let Err(err) = observer.on_rollback(unit_of_work).await {
                tracing::warn!(unit_of_work = %unit_of_work, error = %err, "rollback observer failed");
            }
        }

        match UnitOfWorkError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Disposes owned transactions and executors, then releases the child
    /// scope. A second call does nothing.
    pub async fn dispose(&self) {
        {
            let mut disposed = self.disposed.lock();
            if *disposed {
                return;
            }
            *disposed = true;
        }

        for enlistment in self.features.distinct() {
            if enlistment.owned {
                enlistment.transaction.dispose().await;
            }
        }

        let executors = std::mem::take(&mut *self.executors.lock());
        for executor in executors {
            executor.dispose().await;
        }

        let scope = self.scope.lock().take();
        if let Some(scope) = scope {
            scope.release().await;
        }

        tracing::debug!(unit_of_work = %self.id, "unit of work disposed");
    }

    async fn save_inner(
        &self,
        cancel: &CancellationToken,
    ) -> UowResult<(SaveChangesOutcome, Option<Arc<UnitOfWork>>)> {
        let pipeline = self.registry.pipeline();
        let mut outcome = SaveChangesOutcome::default();
        let executors = self.executors.lock().clone();

        let mut pending: Vec<(Arc<dyn DbExecutor>, Vec<EntityEntry>)> = Vec::with_capacity(executors.len());
        for executor in executors {
            let mut entries = executor
                .change_tracker()
                .map(|tracker| tracker.drain())
                .unwrap_or_default();

            if let Err(err) = pipeline
                .run_pre_save(&mut entries, &mut outcome.hook_failures, cancel)
                .await
            {
                return Err(self.abort(err).await);
            }
            if let Err(err) = executor.save_changes(&entries, cancel).await {
                return Err(self.abort(err).await);
            }
            pending.push((executor, entries));
        }

        if cancel.is_cancelled() {
            return Err(self.abort(UnitOfWorkError::Cancelled).await);
        }

        let owned: Vec<Arc<TransactionObject>> = self
            .features
            .distinct()
            .into_iter()
            .filter(|enlistment| enlistment.owned && enlistment.transaction.is_active())
            .map(|enlistment| enlistment.transaction)
            .collect();

        for (position, transaction) in owned.iter().enumerate() {
            let result = if cancel.is_cancelled() {
                Err(UnitOfWorkError::Cancelled)
            } else {
                transaction.commit(cancel).await
            };

            if let Err(err) = result {
                if position > 0 {
                    tracing::warn!(
                        unit_of_work = %self.id,
                        committed = position,
                        remaining = owned.len() - position,
                        "commit interrupted after partial success"
                    );
                }
                let failures = self.rollback_best_effort(&owned[position..]).await;
                return Err(err.with_rollback_failures(failures));
            }
            outcome.committed += 1;
        }

        let mut owner: Option<Arc<UnitOfWork>> = None;
        for (executor, entries) in pending.iter_mut() {
            match self.borrowed_from(executor.as_ref()) {
                Some(ancestor) => {
                    ancestor.deferred.lock().entries.append(entries);
                    owner.get_or_insert(ancestor);
                }
                None => {
                    pipeline
                        .run_post_save(entries, &mut outcome.hook_failures, cancel)
                        .await?
                }
            }
        }

        let mut handed_up = std::mem::take(&mut self.deferred.lock().entries);
        if !handed_up.is_empty() {
            pipeline
                .run_post_save(&mut handed_up, &mut outcome.hook_failures, cancel)
                .await?;
        }

        outcome.deferred_to = owner.as_ref().map(|ancestor| ancestor.id());
        Ok((outcome, owner))
    }

    /// Rolls back everything owned and returns the triggering error.
    async fn abort(&self, err: UnitOfWorkError) -> UnitOfWorkError {
        tracing::debug!(unit_of_work = %self.id, error = %err, "save aborted, rolling back");
        let owned: Vec<Arc<TransactionObject>> = self
            .features
            .distinct()
            .into_iter()
            .filter(|enlistment| enlistment.owned)
            .map(|enlistment| enlistment.transaction)
            .collect();
        let failures = self.rollback_best_effort(&owned).await;
        err.with_rollback_failures(failures)
    }

    /// Rollback that never stops at a failure. Failures are logged and
    /// returned for the caller to attach to the triggering error.
    async fn rollback_best_effort(&self, transactions: &[Arc<TransactionObject>]) -> Vec<UnitOfWorkError> {
        // The caller's token may be the reason for this rollback.
        let cancel = CancellationToken::new();
        let mut failures = Vec::new();
        for transaction in transactions.iter().filter(|tx| tx.is_active()) {
            if let Err(err) = transaction.rollback(&cancel).await {
                tracing::warn!(
                    unit_of_work = %self.id,
                    transaction = %transaction.id(),
                    error = %err,
                    "best-effort rollback failed"
                );
                failures.push(err);
            }
        }
        failures
    }

    async fn rollback_owned(&self, cancel: &CancellationToken) -> Vec<UnitOfWorkError> {
        let mut errors = Vec::new();
        for enlistment in self.features.distinct() {
            if !enlistment.owned || !enlistment.transaction.is_active() {
                continue;
            }
            if let Err(err) = enlistment.transaction.rollback(cancel).await {
                tracing::warn!(
                    unit_of_work = %self.id,
                    transaction = %enlistment.transaction.id(),
                    error = %err,
                    "rollback failed, continuing with remaining transactions"
                );
                errors.push(err);
            }
        }
        errors
    }

    async fn notify_commit(&self) -> Vec<UnitOfWorkError> {
        let observers: Vec<(Uuid, Arc<dyn TransactionAware>)> = self
            .observers
            .read()
            .iter()
            .map(|observer| (self.id, observer.clone()))
            .collect();
        let deferred = std::mem::take(&mut self.deferred.lock().observers);

        let mut failures = Vec::new();
        for (unit_of_work, observer) in observers.into_iter().chain(deferred) {
            if let Err(err) = observer.on_commit(unit_of_work).await {
                tracing::warn!(unit_of_work = %unit_of_work, error = %err, "commit observer failed");
                failures.push(err);
            }
        }
        failures
    }

    fn defer_observers(&self, unit_of_work: Uuid, observers: Vec<Arc<dyn TransactionAware>>) {
        self.deferred
            .lock()
            .observers
            .extend(observers.into_iter().map(|observer| (unit_of_work, observer)));
    }

    /// The ancestor owning the still open transaction `executor` is bound
    /// to, when this unit of work only borrowed it.
    fn borrowed_from(&self, executor: &dyn DbExecutor) -> Option<Arc<UnitOfWork>> {
        let transaction = executor.transaction()?;
        if !transaction.is_active() || self.features.is_owned(transaction.id()) {
            return None;
        }
        let mut ancestor = self.parent();
        while let Some(unit_of_work) = ancestor {
            if unit_of_work.features.is_owned(transaction.id()) {
                return Some(unit_of_work);
            }
            ancestor = unit_of_work.parent();
        }
        None
    }

    /// Open transactions of this unit of work and its ancestors, nearest first.
    fn visible_transactions(&self) -> Vec<Arc<TransactionObject>> {
        let mut seen = HashSet::new();
        let mut visible: Vec<Arc<TransactionObject>> = self
            .features
            .transactions()
            .into_iter()
            .filter(|tx| tx.is_active() && seen.insert(tx.id()))
            .collect();

        let mut ancestor = self.parent();
        while let Some(unit_of_work) = ancestor {
            visible.extend(
                unit_of_work
                    .features
                    .transactions()
                    .into_iter()
                    .filter(|tx| tx.is_active() && seen.insert(tx.id())),
            );
            ancestor = unit_of_work.parent();
        }
        visible
    }

    fn bind(&self, executor: &Arc<dyn DbExecutor>, key: &str, transaction: Arc<TransactionObject>) -> bool {
        let transaction_id = transaction.id();
        let bound = executor.set_transaction(transaction);
        if bound {
            self.track_executor(executor);
        } else {
            tracing::warn!(unit_of_work = %self.id, resource_key = %key, transaction = %transaction_id, "executor refused transaction");
        }
        bound
    }

    fn track_executor(&self, executor: &Arc<dyn DbExecutor>) {
        let mut executors = self.executors.lock();
        let address = Arc::as_ptr(executor) as *const ();
        if !executors
            .iter()
            .any(|known| Arc::as_ptr(known) as *const () == address)
        {
            executors.push(executor.clone());
        }
    }

    fn ensure_not_disposed(&self) -> UowResult<()> {
        if self.is_disposed() {
            return Err(UnitOfWorkError::Disposed(self.id));
        }
        Ok(())
    }

    fn begin_completion(&self, operation: &'static str, allowed: &[Completion]) -> UowResult<()> {
        self.ensure_not_disposed()?;
        let mut completion = self.completion.lock();
        if !allowed.contains(&*completion) {
            return Err(UnitOfWorkError::double_operation(
                operation,
                format!("unit of work {} ({:?})", self.id, *completion),
            ));
        }
        *completion = Completion::Saving;
        Ok(())
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("suppressed", &self.is_suppressed())
            .field("resources", &self.features.keys())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
