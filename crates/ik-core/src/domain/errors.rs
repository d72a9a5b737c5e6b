//! Errors - pipeline error taxonomy.
//!
//! `TaskError` is what an entity pipeline returns. The dispatcher matches it
//! exhaustively to pick a failure policy, so every variant here maps to
//! exactly one row of the retry/terminal table in `domain::decision`.

use std::fmt;

use thiserror::Error;

use super::ids::EntityId;
use super::lifecycle::{State, Status};

/// Named lifecycle operations that can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Reject,
    Approve,
    Destroy,
    Delete,
    Execute,
    Recreate,
    Begin,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Reject => "reject",
            Transition::Approve => "approve",
            Transition::Destroy => "destroy",
            Transition::Delete => "delete",
            Transition::Execute => "execute",
            Transition::Recreate => "recreate",
            Transition::Begin => "begin",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle state machine refused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entity has wrong state for {transition}: state={state}, status={status}")]
pub struct EntityWrongState {
    pub transition: Transition,
    pub state: State,
    pub status: Status,
}

/// Error returned by an entity pipeline step.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A parent entity has not been provisioned yet.
    #[error("parent is not ready: {0}")]
    ParentNotReady(String),

    /// A child entity has not been destroyed yet.
    #[error("children are not ready: {0}")]
    ChildrenNotReady(String),

    #[error(transparent)]
    WrongState(#[from] EntityWrongState),

    /// Malformed request or missing collaborator. Never retried.
    #[error("cannot proceed: {0}")]
    CannotProceed(String),

    /// Broken internal invariant. Never retried.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// The controller decided to stop without persisting any change.
    #[error("exit without save: {0}")]
    ExitWithoutSave(String),

    #[error("unhandled error: {0}")]
    Unexpected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    pub fn unexpected(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        TaskError::Unexpected(err.into())
    }

    /// Short classification used in user notifications. Never contains
    /// the error chain.
    pub fn class_name(&self) -> &'static str {
        match self {
            TaskError::ParentNotReady(_) => "ParentIsNotReady",
            TaskError::ChildrenNotReady(_) => "ChildrenIsNotReady",
            TaskError::WrongState(_) => "EntityWrongState",
            TaskError::CannotProceed(_) => "CannotProceed",
            TaskError::Assertion(_) => "AssertionError",
            TaskError::ExitWithoutSave(_) => "ExitWithoutSave",
            TaskError::Unexpected(_) => "UnhandledError",
        }
    }
}

/// Terminal outcome of `process_message`.
///
/// The transport only uses this as a "do not redeliver" acknowledgment.
#[derive(Debug, Error)]
#[error("task failed ({}): {source}", .source.class_name())]
pub struct TaskFailure {
    pub entity_id: Option<EntityId>,
    #[source]
    pub source: TaskError,
}

impl TaskFailure {
    pub fn new(entity_id: Option<EntityId>, source: TaskError) -> Self {
        Self { entity_id, source }
    }
}
