//! Request scoping: one root unit of work per request.
//!
//! This is the flow a web filter wraps around an action: translate the
//! declared options, open the unit of work, run the action, save on success,
//! roll back on failure and always dispose.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ambient;
use crate::config::UnitOfWorkConfig;
use crate::error::UnitOfWorkError;
use crate::manager::UnitOfWorkManager;
use crate::options::{InitializationMode, IsolationLevel, TransactionScope, UnitOfWorkOptions};
use crate::unit_of_work::UnitOfWork;

/// Options declared on an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitOfWorkRequestOptions {
    /// `Some(false)` runs the action without a unit of work.
    pub enabled: Option<bool>,
    pub is_read_only: bool,
    pub isolation_level: Option<IsolationLevel>,
    pub initialization_mode: InitializationMode,
}

impl UnitOfWorkRequestOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Self::default()
        }
    }
}

/// Translates the declared options of `action` into unit of work options.
/// Returns `None` when the action runs without a unit of work.
pub fn resolve_options(
    config: &UnitOfWorkConfig,
    action: &str,
    declared: Option<&UnitOfWorkRequestOptions>,
) -> Option<UnitOfWorkOptions> {
    let enabled = declared
        .and_then(|options| options.enabled)
        .unwrap_or(config.enabled);
    if !enabled {
        return None;
    }

    let mut options = config.default_options.clone();
    if let Some(declared) = declared {
        options.is_read_only = declared.is_read_only;
        options.isolation_level = declared.isolation_level.or(options.isolation_level);
        options.initialization_mode = declared.initialization_mode;
    }
    if config.is_suppressed_action(action) {
        options.scope = TransactionScope::Suppress;
    }
    Some(options)
}

/// Runs `handler` for `action` inside a unit of work, with `manager`
/// installed as the ambient manager.
///
/// When the call joins a unit of work that is already active, saving and
/// rolling back are left to its creator.
pub async fn run_in_unit_of_work<T, E, F, Fut>(
    manager: &Arc<UnitOfWorkManager>,
    action: &str,
    declared: Option<&UnitOfWorkRequestOptions>,
    cancel: &CancellationToken,
    handler: F,
) -> Result<T, E>
where
    F: FnOnce(Option<Arc<UnitOfWork>>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<UnitOfWorkError>,
{
    let Some(options) = resolve_options(manager.registry().config(), action, declared) else {
        tracing::trace!(action, "unit of work disabled for action");
        return ambient::scope(manager.clone(), handler(None)).await;
    };

    ambient::scope(manager.clone(), async {
        let previous = manager.current_unit_of_work().map(|uow| uow.id());
        let unit_of_work = manager.create(options, cancel).await?;
        let joined = previous == Some(unit_of_work.id());

        let result = handler(Some(unit_of_work.clone())).await;
        let result = if joined {
            result
        } else {
            complete(&unit_of_work, action, result, cancel).await
        };

        if let Err(err) = manager.dispose_unit_of_work(&unit_of_work).await {
            tracing::warn!(action, unit_of_work = %unit_of_work.id(), error = %err, "failed to end unit of work");
        }
        result
    })
    .await
}

async fn complete<T, E>(
    unit_of_work: &UnitOfWork,
    action: &str,
    result: Result<T, E>,
    cancel: &CancellationToken,
) -> Result<T, E>
where
    E: From<UnitOfWorkError>,
{
    match result {
        Ok(value) => {
            let outcome = unit_of_work.save_changes(cancel).await?;
            if !outcome.is_clean() {
                tracing::warn!(
                    action,
                    unit_of_work = %unit_of_work.id(),
                    hook_failures = outcome.hook_failures.len(),
                    observer_failures = outcome.observer_failures.len(),
                    "changes saved with tolerated failures"
                );
            }
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = unit_of_work.rollback(cancel).await {
                tracing::warn!(action, unit_of_work = %unit_of_work.id(), error = %rollback, "rollback after failed action reported errors");
            }
            Err(err)
        }
    }
}
