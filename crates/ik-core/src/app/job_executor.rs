//! Runs the body of a `scheduler_job` message in-process.

use std::sync::Arc;

use tracing::{error, info};

use crate::domain::{JobType, ScheduledJobRequest, TaskError};
use crate::ports::SqlExecutor;

pub struct JobExecutor {
    sql: Arc<dyn SqlExecutor>,
}

impl JobExecutor {
    pub fn new(sql: Arc<dyn SqlExecutor>) -> Self {
        Self { sql }
    }

    /// SQL failures are logged and swallowed: a broken scheduled script must
    /// not take the worker down. Commit or rollback is the caller's call.
    pub async fn execute(&self, job: &ScheduledJobRequest) -> Result<(), TaskError> {
        match job.job_type {
            JobType::Sql => {
                match self.sql.execute(&job.script).await {
                    Ok(rows) => info!(job_id = %job.job_id, rows, "scheduled SQL job executed"),
                    Err(e) => error!(job_id = %job.job_id, error = %e, "scheduled SQL job failed"),
                }
                Ok(())
            }
            JobType::Bash => Err(TaskError::CannotProceed(format!(
                "job type not supported: {}",
                job.job_type
            ))),
        }
    }
}
