//! Raw SQL execution for scheduled jobs.
//!
//! Scripts arrive already validated as a single statement (see
//! `JobType::validate_script`) and run outside any entity lifecycle. The
//! executor reports failure as a plain message; the job executor turns it
//! into a task error.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("sql execution failed: {0}")]
pub struct SqlError(pub String);

/// Runs one statement on the caller's connection, inside whatever
/// transaction the caller holds. Commit and rollback stay with the caller.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Returns the number of affected rows.
    async fn execute(&self, statement: &str) -> Result<u64, SqlError>;
}
