//! Transaction objects handed out by providers.
//!
//! A [`TransactionObject`] wraps one backend transaction and enforces the
//! lifecycle rules every backend shares: commit and rollback are each allowed
//! once, `is_commit` never resets, and dispose is idempotent. Backends only
//! implement the raw operations through [`TransactionBackend`].

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{UnitOfWorkError, UowResult};

/// Raw transaction operations of one storage technology.
#[async_trait]
pub trait TransactionBackend: Send + Sync + 'static {
    /// Commits the underlying transaction.
    async fn commit(&self, cancel: &CancellationToken) -> UowResult<()>;

    /// Rolls back the underlying transaction.
    async fn rollback(&self, cancel: &CancellationToken) -> UowResult<()>;

    /// Releases the underlying handle. Called at most once, after commit or
    /// rollback or instead of them.
    async fn dispose(&self) {}

    fn as_any(&self) -> &dyn Any;
}

/// Lifecycle state of a transaction object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Disposed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Active => "active",
            TransactionState::Committing => "committing",
            TransactionState::Committed => "committed",
            TransactionState::RollingBack => "rolling back",
            TransactionState::RolledBack => "rolled back",
            TransactionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

struct Lifecycle {
    state: TransactionState,
    is_commit: bool,
}

/// Opaque handle over one backend transaction.
pub struct TransactionObject {
    id: Uuid,
    technology: String,
    lifecycle: Mutex<Lifecycle>,
    backend: Box<dyn TransactionBackend>,
}

impl TransactionObject {
    pub fn new(technology: impl Into<String>, backend: impl TransactionBackend) -> Self {
        Self {
            id: Uuid::new_v4(),
            technology: technology.into(),
            lifecycle: Mutex::new(Lifecycle {
                state: TransactionState::Active,
                is_commit: false,
            }),
            backend: Box::new(backend),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Technology tag of the backend, e.g. `postgres`.
    pub fn technology(&self) -> &str {
        &self.technology
    }

    /// True once a commit succeeded. Never resets.
    pub fn is_commit(&self) -> bool {
        self.lifecycle.lock().is_commit
    }

    pub fn state(&self) -> TransactionState {
        self.lifecycle.lock().state
    }

    /// True while the transaction can still be committed or rolled back.
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Downcasts the backend instance.
    pub fn backend<T: Any>(&self) -> Option<&T> {
        self.backend.as_any().downcast_ref::<T>()
    }

    /// Commits the transaction. A second call fails with `DoubleOperation`.
    pub async fn commit(&self, cancel: &CancellationToken) -> UowResult<()> {
        self.transition("commit", TransactionState::Committing)?;

        match self.backend.commit(cancel).await {
            Ok(()) => {
                let mut lifecycle = self.lifecycle.lock();
                lifecycle.state = TransactionState::Committed;
                lifecycle.is_commit = true;
                tracing::debug!(transaction = %self.id, technology = %self.technology, "transaction committed");
                Ok(())
            }
            Err(err) => {
                // Leave the object rollback-able after a failed commit.
                self.lifecycle.lock().state = TransactionState::Active;
                Err(err)
            }
        }
    }

    /// Rolls back the transaction. Fails with `DoubleOperation` after a commit
    /// or a previous rollback attempt.
    pub async fn rollback(&self, cancel: &CancellationToken) -> UowResult<()> {
        self.transition("rollback", TransactionState::RollingBack)?;

        let result = self.backend.rollback(cancel).await;
        self.lifecycle.lock().state = TransactionState::RolledBack;
        if result.is_ok() {
            tracing::debug!(transaction = %self.id, technology = %self.technology, "transaction rolled back");
        }
        result
    }

    /// Releases the backend handle. Idempotent.
    pub async fn dispose(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == TransactionState::Disposed {
                return;
            }
            lifecycle.state = TransactionState::Disposed;
        }
        self.backend.dispose().await;
    }

    fn transition(&self, operation: &'static str, next: TransactionState) -> UowResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != TransactionState::Active {
            return Err(UnitOfWorkError::double_operation(
                operation,
                format!("transaction {} ({})", self.id, lifecycle.state),
            ));
        }
        lifecycle.state = next;
        Ok(())
    }
}

impl fmt::Debug for TransactionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionObject")
            .field("id", &self.id)
            .field("technology", &self.technology)
            .field("state", &self.state())
            .finish()
    }
}
