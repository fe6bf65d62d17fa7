//! Entry point creating and ending units of work for one logical flow.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::call_context::UnitOfWorkCallContext;
use crate::error::{UnitOfWorkError, UowResult};
use crate::options::{InitializationMode, TransactionScope, UnitOfWorkOptions};
use crate::registry::UnitOfWorkRegistry;
use crate::unit_of_work::UnitOfWork;

/// Creates, returns and ends the units of work of one logical flow.
///
/// A manager owns the flow's [`UnitOfWorkCallContext`]. Obtain one per flow
/// (request, job) from [`UnitOfWorkRegistry::manager`] and pass it down, or
/// install it with [`crate::ambient::scope`].
pub struct UnitOfWorkManager {
    id: Uuid,
    registry: Arc<UnitOfWorkRegistry>,
    context: UnitOfWorkCallContext,
    disposed: Mutex<bool>,
}

impl UnitOfWorkManager {
    pub fn new(registry: Arc<UnitOfWorkRegistry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            context: UnitOfWorkCallContext::new(),
            disposed: Mutex::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &Arc<UnitOfWorkRegistry> {
        &self.registry
    }

    pub fn call_context(&self) -> &UnitOfWorkCallContext {
        &self.context
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }

    /// Returns the unit of work for `options`.
    ///
    /// Without a current unit of work a new root is created. Under an active
    /// one, `Required` joins it and returns it unchanged, except with
    /// `InitializationMode::Immediate` which pushes a nested child reusing
    /// its ancestors' transactions. `Suppress` always pushes a child that
    /// enlists nothing.
    ///
    /// Every successful call must be paired with
    /// [`UnitOfWorkManager::dispose_unit_of_work`].
    pub async fn create(
        &self,
        options: UnitOfWorkOptions,
        cancel: &CancellationToken,
    ) -> UowResult<Arc<UnitOfWork>> {
        if self.is_disposed() {
            return Err(UnitOfWorkError::Disposed(self.id));
        }
        if cancel.is_cancelled() {
            return Err(UnitOfWorkError::Cancelled);
        }

        let Some(current) = self.context.current() else {
            let suppressed = options.is_suppressed();
            let root = self.build(options, None, suppressed).await?;
            self.context.push(root.clone());
            return Ok(root);
        };

        match (options.scope, options.initialization_mode) {
            (TransactionScope::Required, InitializationMode::Lazy) => {
                tracing::trace!(unit_of_work = %current.id(), "joining current unit of work");
                self.context
                    .join()
                    .ok_or(UnitOfWorkError::NoActiveUnitOfWork)
            }
            (TransactionScope::Required, InitializationMode::Immediate) => {
                let suppressed = current.is_suppressed();
                let child = self.build(options, Some(&current), suppressed).await?;
                self.context.push(child.clone());
                Ok(child)
            }
            (TransactionScope::Suppress, _) => {
                let child = self.build(options, Some(&current), true).await?;
                self.context.push(child.clone());
                Ok(child)
            }
        }
    }

    pub fn current_unit_of_work(&self) -> Option<Arc<UnitOfWork>> {
        self.context.current()
    }

    /// Looks a unit of work up by id across the active tree.
    pub fn get_unit_of_work(&self, id: Uuid) -> Option<Arc<UnitOfWork>> {
        self.context.find(id)
    }

    /// Ends one `create` call for `unit_of_work`.
    ///
    /// A call that joined an existing unit of work only leaves it. The call
    /// that created it disposes it and restores the parent as current.
    /// Ending an already disposed unit of work is a no-op.
    pub async fn dispose_unit_of_work(&self, unit_of_work: &Arc<UnitOfWork>) -> UowResult<()> {
        let is_current = self
            .context
            .current()
            .is_some_and(|current| current.id() == unit_of_work.id());
        if !is_current {
            if unit_of_work.is_disposed() {
                return Ok(());
            }
            return Err(UnitOfWorkError::CallContext(format!(
                "unit of work {} is not the innermost active unit of work",
                unit_of_work.id()
            )));
        }

        if self.context.leave() {
            return Ok(());
        }

        if self.context.depth() > 1 {
            self.context.pop()?;
        } else {
            self.context.clear_root()?;
        }
        unit_of_work.dispose().await;
        Ok(())
    }

    /// Disposes every live unit of work, innermost first. Idempotent.
    pub async fn dispose(&self) {
        {
            let mut disposed = self.disposed.lock();
            if *disposed {
                return;
            }
            *disposed = true;
        }

        while let Some(unit_of_work) = self.context.take_innermost() {
            unit_of_work.dispose().await;
        }
        tracing::debug!(manager = %self.id, "unit of work manager disposed");
    }

    async fn build(
        &self,
        options: UnitOfWorkOptions,
        parent: Option<&Arc<UnitOfWork>>,
        suppressed: bool,
    ) -> UowResult<Arc<UnitOfWork>> {
        let id = Uuid::new_v4();
        let scope = match self.registry.scope_factory() {
            Some(factory) => Some(factory.create_scope(id).await?),
            None => None,
        };

        tracing::debug!(
            unit_of_work = %id,
            parent = ?parent.map(|p| p.id()),
            scope = ?options.scope,
            suppressed,
            "unit of work created"
        );

        Ok(Arc::new(UnitOfWork::new(
            self.registry.clone(),
            options,
            parent,
            suppressed,
            scope,
            id,
        )))
    }
}
