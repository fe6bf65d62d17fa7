//! Error types for unit of work coordination.

use uuid::Uuid;

use crate::lifecycle::HookPhase;

/// Boxed error returned by collaborator code (hooks, backends, scopes).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for unit of work operations.
pub type UowResult<T> = Result<T, UnitOfWorkError>;

/// Errors raised by the unit of work engine.
#[derive(Debug, thiserror::Error)]
pub enum UnitOfWorkError {
    /// Repository code needs an ambient unit of work but none is active.
    #[error("no active unit of work in the current flow")]
    NoActiveUnitOfWork,

    /// Commit, rollback or save was requested more than once.
    #[error("{operation} already performed on {target}")]
    DoubleOperation {
        operation: &'static str,
        target: String,
    },

    /// No registered provider claims the executor.
    #[error("no transaction provider can create a transaction for resource `{resource_key}`")]
    ProviderResolution { resource_key: String },

    /// A pre or post save hook failed.
    #[error("{phase} hook `{hook}` failed: {source}")]
    LifecycleHook {
        phase: HookPhase,
        hook: String,
        #[source]
        source: BoxError,
    },

    /// Failure reported by the backing resource.
    #[error("backend {operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// The unit of work has already been disposed.
    #[error("unit of work {0} is disposed")]
    Disposed(Uuid),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid call context transition.
    #[error("call context error: {0}")]
    CallContext(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A save failed and the rollback that followed did not complete cleanly.
    /// `source` is the failure that triggered the rollback.
    #[error("{source} (rollback failed for {} transaction(s))", .rollback_failures.len())]
    RollbackIncomplete {
        #[source]
        source: Box<UnitOfWorkError>,
        rollback_failures: Vec<UnitOfWorkError>,
    },

    /// Several independent failures, in the order they happened.
    #[error("{} operations failed, first: {}", .0.len(), first_message(.0))]
    Aggregate(Vec<UnitOfWorkError>),
}

fn first_message(errors: &[UnitOfWorkError]) -> String {
    errors
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl UnitOfWorkError {
    /// Wraps a backend failure for the given operation.
    pub fn backend(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }

    pub fn double_operation(operation: &'static str, target: impl Into<String>) -> Self {
        Self::DoubleOperation {
            operation,
            target: target.into(),
        }
    }

    /// Collapses a list of failures: `None` when empty, the error itself when
    /// there is exactly one, `Aggregate` otherwise.
    pub fn aggregate(mut errors: Vec<UnitOfWorkError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Attaches the failures of a best-effort rollback to the error that
    /// caused it. Without failures the error is returned as is.
    pub fn with_rollback_failures(self, rollback_failures: Vec<UnitOfWorkError>) -> Self {
        if rollback_failures.is_empty() {
            return self;
        }
        Self::RollbackIncomplete {
            source: Box::new(self),
            rollback_failures,
        }
    }

    /// Configuration defects that must reach the caller unchanged.
    pub fn is_configuration_defect(&self) -> bool {
        matches!(
            self,
            Self::NoActiveUnitOfWork | Self::ProviderResolution { .. } | Self::Config(_)
        )
    }

    /// The first error of an aggregate, or the error itself.
    pub fn first(&self) -> &UnitOfWorkError {
        match self {
            Self::Aggregate(errors) => errors.first().map(|e| e.first()).unwrap_or(self),
            Self::RollbackIncomplete { source, .. } => source.first(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for UnitOfWorkError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend("database", err)
    }
}

impl From<toml::de::Error> for UnitOfWorkError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
