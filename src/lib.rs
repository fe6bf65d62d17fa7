//! Unit of Work coordination
//!
//! This crate coordinates one logical, possibly nested transaction boundary
//! over any number of data resources without the calling code knowing which
//! storage technology backs each of them. Resource technologies plug in
//! through [`TransactionProvider`], [`DbExecutor`] and [`TransactionBackend`];
//! a PostgreSQL integration is provided in [`postgres`].
//!
//! Coordination is local and best-effort: resources backed by different
//! transaction objects are committed one after the other, not atomically.

pub mod ambient;
pub mod call_context;
pub mod config;
pub mod error;
pub mod executor;
pub mod feature_container;
pub mod lifecycle;
pub mod manager;
pub mod options;
pub mod postgres;
pub mod provider;
pub mod registry;
pub mod request;
pub mod scope;
pub mod transaction;
pub mod transaction_aware;
pub mod unit_of_work;

pub use call_context::UnitOfWorkCallContext;
pub use config::UnitOfWorkConfig;
pub use error::{BoxError, UnitOfWorkError, UowResult};
pub use executor::{ChangeTracker, DbExecutor, EntityEntry, EntityRef, EntityState};
pub use feature_container::{Enlistment, TransactionFeatureContainer};
pub use lifecycle::{
    EventFailureStrategy, HookFailure, HookPhase, PostSaveChanges, PreSaveChanges, SaveChangesPipeline,
};
pub use manager::UnitOfWorkManager;
pub use options::{InitializationMode, IsolationLevel, TransactionScope, UnitOfWorkOptions};
pub use provider::{ProviderSet, TransactionContext, TransactionProvider};
pub use registry::{UnitOfWorkRegistry, UnitOfWorkRegistryBuilder};
pub use request::{run_in_unit_of_work, UnitOfWorkRequestOptions};
pub use scope::{ScopeFactory, ServiceScope};
pub use transaction::{TransactionBackend, TransactionObject, TransactionState};
pub use transaction_aware::TransactionAware;
pub use unit_of_work::{SaveChangesOutcome, UnitOfWork};

/// Re-exported so callers name the same token type the engine threads through.
pub use tokio_util::sync::CancellationToken;
