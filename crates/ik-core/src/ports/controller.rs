//! Task controller port.
//!
//! The dispatcher only sees `TaskController`; per-kind behavior lives behind
//! the factory. A controller owns one loaded entity for the duration of a
//! single message: `run` performs the requested action, and the remaining
//! operations are the levers the failure policy pulls afterwards (mark the
//! entity failed or retryable, append to and persist the task log).
//!
//! Controllers never notify users and never decide about redelivery. Both
//! belong to the dispatcher, which keeps every kind under the same policy.

use async_trait::async_trait;

use crate::domain::{ControllerKind, Entity, LogLevel, TaskError, TaskRequest, User};

/// One entity task, ready to run.
#[async_trait]
pub trait TaskController: Send {
    fn entity(&self) -> &Entity;

    /// Runs the pipeline for the requested action.
    async fn run(&mut self) -> Result<(), TaskError>;

    /// `make_failed` + persist.
    async fn mark_failed(&mut self) -> Result<(), TaskError>;

    /// `make_retry` + persist.
    async fn mark_retry(&mut self) -> Result<(), TaskError>;

    /// Appends to the task log (and mirrors it to tracing).
    fn log(&mut self, level: LogLevel, message: String);

    /// Persists the buffered task log.
    async fn save_logs(&mut self) -> Result<(), TaskError>;
}

#[async_trait]
pub trait ControllerFactory: Send + Sync {
    /// Loads the addressed entity and its collaborators. Only a missing
    /// entity (or a failing store) is an `Err`; once the entity is loaded,
    /// problems assembling the rest surface from `TaskController::run`.
    async fn build(
        &self,
        kind: ControllerKind,
        request: &TaskRequest,
        user: &User,
    ) -> Result<Box<dyn TaskController>, TaskError>;
}
