//! Domain model: ids, entity lifecycle, messages, jobs, error taxonomy and
//! the retry decision.

pub mod decision;
pub mod entity;
pub mod errors;
pub mod ids;
pub mod job;
pub mod lifecycle;
pub mod message;
pub mod task_log;

pub use decision::{Decider, Decision, DefaultDecider, RedeliveryDirective, RetryPolicy};
pub use entity::{ControllerKind, Entity, EntityKind, UnknownController, User};
pub use errors::{EntityWrongState, TaskError, TaskFailure, Transition};
pub use ids::{EntityId, Id, IdMarker, JobId, TraceId, UserId};
pub use job::{CronSchedule, Job, JobType, JobValidationError};
pub use lifecycle::{Lifecycle, State, Status, UnreachableLifecycle};
pub use message::{
    Message, MessageType, ScheduledJobRequest, SchedulerJobBody, TASK_ROUTING_KEY, TaskAction,
    TaskMetadata, TaskRequest,
};
pub use task_log::{LogEntry, LogLevel, TaskLog, TaskLogRecord};
