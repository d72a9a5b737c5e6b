//! Work items carried by the task queue.
//!
//! The wire shape is deliberately loose (every metadata field optional) so
//! that a malformed message can be rejected field by field with a precise
//! `CannotProceed` instead of a generic decode failure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entity::{ControllerKind, UnknownController};
use super::errors::TaskError;
use super::ids::{EntityId, JobId, TraceId, UserId};
use super::job::{Job, JobType, JobValidationError};

/// Routing key of the task queue.
pub const TASK_ROUTING_KEY: &str = "ik_tasks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Task,
    SchedulerJob,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_controller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerJobBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_script: Option<String>,
}

/// One unit of work on the dispatch queue.
///
/// The redelivery fields are owned by the transport. `retries` counts how
/// many times this message has already been redelivered; `max_retries` and
/// `delay_ms` record the directive that scheduled the latest redelivery and
/// stay empty on a fresh message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub body: SchedulerJobBody,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl Message {
    pub fn task(request: &TaskRequest) -> Self {
        Self {
            message_type: MessageType::Task,
            metadata: TaskMetadata {
                id: Some(request.entity_id.as_ulid().to_string()),
                action: Some(request.action.as_str().to_string()),
                user: Some(request.user_id.as_ulid().to_string()),
                entity_controller: Some(request.controller.as_str().to_string()),
                trace_id: Some(request.trace_id.as_ulid().to_string()),
            },
            body: SchedulerJobBody::default(),
            ..Self::default()
        }
    }

    pub fn scheduler_job(job: &Job) -> Self {
        Self {
            message_type: MessageType::SchedulerJob,
            metadata: TaskMetadata::default(),
            body: SchedulerJobBody {
                job_id: Some(job.id.as_ulid().to_string()),
                job_type: Some(job.job_type.as_str().to_string()),
                job_script: Some(job.script.clone()),
            },
            ..Self::default()
        }
    }
}

/// What the controller is asked to do with its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    /// Provision or destroy, depending on the entity state.
    Execute,
    /// Plan only; the lifecycle is left untouched.
    DryRun,
    /// Plan against a throw-away state (used by workspaces).
    DryRunWithTempState,
    /// Re-read external state (e.g. refresh a repository).
    Sync,
}

impl TaskAction {
    pub const ALL: [TaskAction; 4] = [
        TaskAction::Execute,
        TaskAction::DryRun,
        TaskAction::DryRunWithTempState,
        TaskAction::Sync,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskAction::Execute => "execute",
            TaskAction::DryRun => "dryrun",
            TaskAction::DryRunWithTempState => "dryrun_with_temp_state",
            TaskAction::Sync => "sync",
        }
    }

    pub fn is_dry_run(self) -> bool {
        matches!(self, TaskAction::DryRun | TaskAction::DryRunWithTempState)
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskAction {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| TaskError::CannotProceed(format!("unknown action: {s}")))
    }
}

/// Validated task metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRequest {
    pub entity_id: EntityId,
    pub action: TaskAction,
    pub user_id: UserId,
    pub controller: ControllerKind,
    pub trace_id: TraceId,
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, TaskError> {
    field
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| TaskError::CannotProceed(format!("{name} is required")))
}

impl TaskRequest {
    /// Validates metadata in a fixed order: action, id, user,
    /// entity_controller. A missing trace id is replaced by `fallback_trace`.
    pub fn parse(metadata: &TaskMetadata, fallback_trace: TraceId) -> Result<Self, TaskError> {
        let action = required(&metadata.action, "action")?;
        let id = required(&metadata.id, "id")?;
        let user = required(&metadata.user, "user")?;
        let controller = required(&metadata.entity_controller, "entity_controller")?;

        let action: TaskAction = action.parse()?;
        let entity_id: EntityId = id
            .parse()
            .map_err(|e| TaskError::CannotProceed(format!("invalid id {id}: {e}")))?;
        let user_id: UserId = user
            .parse()
            .map_err(|e| TaskError::CannotProceed(format!("invalid user {user}: {e}")))?;
        let controller: ControllerKind = controller
            .parse()
            .map_err(|e: UnknownController| TaskError::CannotProceed(e.to_string()))?;
        let trace_id: TraceId = match metadata.trace_id.as_deref() {
            Some(raw) if !raw.is_empty() => raw
                .parse()
                .map_err(|e| TaskError::CannotProceed(format!("invalid trace_id {raw}: {e}")))?,
            _ => fallback_trace,
        };

        Ok(Self {
            entity_id,
            action,
            user_id,
            controller,
            trace_id,
        })
    }
}

/// Validated scheduler-job body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJobRequest {
    pub job_id: JobId,
    pub job_type: JobType,
    pub script: String,
}

impl ScheduledJobRequest {
    pub fn parse(body: &SchedulerJobBody) -> Result<Self, TaskError> {
        let job_id = required(&body.job_id, "job_id")?;
        let job_type = required(&body.job_type, "job_type")?;
        let script = required(&body.job_script, "job_script")?;

        let parsed_id: JobId = job_id
            .parse()
            .map_err(|e| TaskError::CannotProceed(format!("invalid job_id {job_id}: {e}")))?;
        let job_type: JobType = job_type
            .parse()
            .map_err(|e: JobValidationError| TaskError::CannotProceed(e.to_string()))?;

        Ok(Self {
            job_id: parsed_id,
            job_type,
            script: script.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn full_metadata() -> TaskMetadata {
        TaskMetadata {
            id: Some(Ulid::new().to_string()),
            action: Some("execute".into()),
            user: Some(Ulid::new().to_string()),
            entity_controller: Some("resource".into()),
            trace_id: Some(Ulid::new().to_string()),
        }
    }

    #[test]
    fn parses_complete_metadata() {
        let metadata = full_metadata();
        let req = TaskRequest::parse(&metadata, TraceId::from_ulid(Ulid::new())).unwrap();
        assert_eq!(req.action, TaskAction::Execute);
        assert_eq!(req.controller, ControllerKind::Resource);
        assert_eq!(
            req.trace_id.as_ulid().to_string(),
            metadata.trace_id.unwrap()
        );
    }

    #[rstest]
    #[case::action(|m: &mut TaskMetadata| m.action = None, "action is required")]
    #[case::id(|m: &mut TaskMetadata| m.id = None, "id is required")]
    #[case::user(|m: &mut TaskMetadata| m.user = None, "user is required")]
    #[case::controller(|m: &mut TaskMetadata| m.entity_controller = None, "entity_controller is required")]
    fn each_missing_field_is_reported(#[case] strip: fn(&mut TaskMetadata), #[case] expected: &str) {
        let mut metadata = full_metadata();
        strip(&mut metadata);

        let err = TaskRequest::parse(&metadata, TraceId::from_ulid(Ulid::new())).unwrap_err();
        assert!(matches!(&err, TaskError::CannotProceed(msg) if msg == expected), "{err}");
    }

    #[test]
    fn missing_trace_id_falls_back() {
        let mut metadata = full_metadata();
        metadata.trace_id = None;
        let fallback = TraceId::from_ulid(Ulid::new());

        let req = TaskRequest::parse(&metadata, fallback).unwrap();
        assert_eq!(req.trace_id, fallback);
    }

    #[test]
    fn unknown_controller_cannot_proceed() {
        let mut metadata = full_metadata();
        metadata.entity_controller = Some("template".into());

        let err = TaskRequest::parse(&metadata, TraceId::from_ulid(Ulid::new())).unwrap_err();
        assert!(matches!(err, TaskError::CannotProceed(_)));
    }

    #[test]
    fn task_message_wire_shape() {
        let req = TaskRequest {
            entity_id: EntityId::from_ulid(Ulid::new()),
            action: TaskAction::DryRunWithTempState,
            user_id: UserId::from_ulid(Ulid::new()),
            controller: ControllerKind::Workspace,
            trace_id: TraceId::from_ulid(Ulid::new()),
        };
        let v = serde_json::to_value(Message::task(&req)).unwrap();
        assert_eq!(v["message_type"], "task");
        assert_eq!(v["metadata"]["action"], "dryrun_with_temp_state");
        assert_eq!(v["metadata"]["entity_controller"], "workspace");
        assert_eq!(v["retries"], 0);
        assert!(v.get("max_retries").is_none());
    }

    #[test]
    fn message_type_defaults_to_task() {
        let msg: Message = serde_json::from_str(r#"{"metadata":{"action":"sync"}}"#).unwrap();
        assert_eq!(msg.message_type, MessageType::Task);
        assert_eq!(msg.metadata.action.as_deref(), Some("sync"));
    }

    #[test]
    fn scheduler_body_requires_all_fields() {
        let body = SchedulerJobBody {
            job_id: Some(Ulid::new().to_string()),
            job_type: Some("SQL".into()),
            job_script: None,
        };
        let err = ScheduledJobRequest::parse(&body).unwrap_err();
        assert!(matches!(err, TaskError::CannotProceed(msg) if msg == "job_script is required"));
    }
}
