//! PostgreSQL integration over `sqlx`.
//!
//! [`PostgresExecutor`] adapts a pool for repositories,
//! [`PostgresTransactionProvider`] opens or reuses transactions for it and
//! [`PostgresEntityWriter`]s turn tracked entities into statements at save.

mod executor;
mod provider;
mod writer;

pub use executor::{PostgresDatabase, PostgresExecutor};
pub use provider::{PostgresTransaction, PostgresTransactionProvider};
pub use writer::PostgresEntityWriter;

/// Technology tag used in resource keys.
pub const TECHNOLOGY: &str = "postgres";
