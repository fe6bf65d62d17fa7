//! Task-local carrier for the flow's manager.
//!
//! `scope` installs a manager for the duration of a future. The value follows
//! that future across `.await` points but is not inherited by spawned tasks,
//! so concurrent flows never see each other's units of work.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{UnitOfWorkError, UowResult};
use crate::executor::DbExecutor;
use crate::manager::UnitOfWorkManager;
use crate::unit_of_work::UnitOfWork;

tokio::task_local! {
    static CURRENT_MANAGER: Arc<UnitOfWorkManager>;
}

/// Runs `future` with `manager` as the flow's ambient manager.
pub async fn scope<F>(manager: Arc<UnitOfWorkManager>, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_MANAGER.scope(manager, future).await
}

pub fn current_manager() -> Option<Arc<UnitOfWorkManager>> {
    CURRENT_MANAGER.try_with(Arc::clone).ok()
}

/// The innermost unit of work of the ambient manager.
pub fn current_unit_of_work() -> UowResult<Arc<UnitOfWork>> {
    current_manager()
        .and_then(|manager| manager.current_unit_of_work())
        .ok_or(UnitOfWorkError::NoActiveUnitOfWork)
}

/// Enlists `executor` into the ambient unit of work.
pub async fn enlist(executor: Arc<dyn DbExecutor>, cancel: &CancellationToken) -> UowResult<bool> {
    current_unit_of_work()?.try_enlist(executor, cancel).await
}
