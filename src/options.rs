//! Options attached to a unit of work when it is created.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a nested unit of work joins its parent or runs without transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransactionScope {
    /// Join the enclosing boundary, or start a new root.
    #[default]
    Required,
    /// Run every enlistment of the subtree non-transactionally.
    Suppress,
}

/// Isolation level requested from the backing resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form, as used in `SET TRANSACTION ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// How a `Required` unit of work behaves when one is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitializationMode {
    /// Join the current unit of work.
    #[default]
    Lazy,
    /// Push a nested child that reuses its ancestors' transactions.
    Immediate,
}

/// Options of one unit of work. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitOfWorkOptions {
    pub scope: TransactionScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<IsolationLevel>,
    #[serde(rename = "timeout_ms", with = "duration_millis", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub is_read_only: bool,
    pub initialization_mode: InitializationMode,
}

impl UnitOfWorkOptions {
    pub fn required() -> Self {
        Self::default()
    }

    pub fn suppress() -> Self {
        Self {
            scope: TransactionScope::Suppress,
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: TransactionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn read_only(mut self, is_read_only: bool) -> Self {
        self.is_read_only = is_read_only;
        self
    }

    pub fn with_initialization_mode(mut self, mode: InitializationMode) -> Self {
        self.initialization_mode = mode;
        self
    }

    pub fn is_suppressed(&self) -> bool {
        self.scope == TransactionScope::Suppress
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
