//! Entity task controllers.
//!
//! Every kind runs through the same `EntityTask`: lifecycle bookkeeping,
//! dependency readiness and log capture live here, and the per-kind
//! `Pipeline` only supplies the actual steps.

mod infra;
mod source_code;
mod workspace;

pub use self::infra::InfraPipeline;
pub use self::source_code::{SourceCodePipeline, SourceCodeVersionPipeline};
pub use self::workspace::WorkspacePipeline;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::domain::{
    ControllerKind, Entity, LogLevel, State, TaskAction, TaskError, TaskLog, TaskLogRecord,
    TraceId,
};
use crate::ports::{Clock, EntityStore, StoreError, TaskController};

/// Which relatives gate this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// Provisioning waits for every parent to be provisioned.
    pub parents: bool,
    /// Destruction waits for every child to be released.
    pub children: bool,
}

/// What a pipeline step sees of its task.
pub struct StepContext<'a> {
    pub entity: &'a Entity,
    trace_id: TraceId,
    log: &'a mut TaskLog,
    clock: &'a dyn Clock,
}

impl StepContext<'_> {
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        emit(level, self.entity, self.trace_id, &message);
        self.log.push(level, message, self.clock.now());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Merges the log of a nested task.
    pub fn append(&mut self, nested: TaskLog) {
        self.log.extend(nested);
    }
}

/// Per-kind steps of an entity task.
///
/// `EntityTask` borrows itself across the awaits of its own futures, so a
/// pipeline has to be shareable between threads as well as movable.
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn kind(&self) -> ControllerKind;

    fn readiness(&self) -> Readiness;

    async fn provision(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError>;

    async fn destroy(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError>;

    async fn dry_run(&mut self, cx: &mut StepContext<'_>, temp_state: bool)
    -> Result<(), TaskError>;

    async fn sync(&mut self, _cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        Err(TaskError::CannotProceed(format!(
            "sync is not supported for {}",
            self.kind()
        )))
    }
}

fn emit(level: LogLevel, entity: &Entity, trace_id: TraceId, message: &str) {
    match level {
        LogLevel::Debug => debug!(entity_id = %entity.id, %trace_id, "{message}"),
        LogLevel::Info => info!(entity_id = %entity.id, %trace_id, "{message}"),
        LogLevel::Warn => warn!(entity_id = %entity.id, %trace_id, "{message}"),
        LogLevel::Error => error!(entity_id = %entity.id, %trace_id, "{message}"),
    }
}

fn relative_error(err: StoreError) -> TaskError {
    match err {
        StoreError::EntityNotFound(id) => {
            TaskError::CannotProceed(format!("related entity {id} not found"))
        }
        other => other.into(),
    }
}

/// Stands in for a pipeline whose collaborators could not be put together.
/// `EntityTask::run` reports the assembly error before any step is reached.
struct Unassembled(ControllerKind);

#[async_trait]
impl Pipeline for Unassembled {
    fn kind(&self) -> ControllerKind {
        self.0
    }

    fn readiness(&self) -> Readiness {
        Readiness::default()
    }

    async fn provision(&mut self, _cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        Err(self.refuse())
    }

    async fn destroy(&mut self, _cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        Err(self.refuse())
    }

    async fn dry_run(
        &mut self,
        _cx: &mut StepContext<'_>,
        _temp_state: bool,
    ) -> Result<(), TaskError> {
        Err(self.refuse())
    }

    async fn sync(&mut self, _cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        Err(self.refuse())
    }
}

impl Unassembled {
    fn refuse(&self) -> TaskError {
        TaskError::CannotProceed(format!("{} task was not assembled", self.0))
    }
}

/// One run of one action against one entity.
pub struct EntityTask {
    entity: Entity,
    action: TaskAction,
    trace_id: TraceId,
    pipeline: Box<dyn Pipeline>,
    /// Set when the pipeline could not be built; the first `run` returns it.
    assembly_error: Option<TaskError>,
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    log: TaskLog,
}

impl EntityTask {
    pub fn new(
        entity: Entity,
        action: TaskAction,
        trace_id: TraceId,
        pipeline: Box<dyn Pipeline>,
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entity,
            action,
            trace_id,
            pipeline,
            assembly_error: None,
            store,
            clock,
            log: TaskLog::new(),
        }
    }

    /// A task for a loaded entity whose pipeline could not be built. It
    /// still owns the entity, so the failure policy can mark it failed,
    /// persist the log and notify the user. The lifecycle is not touched by
    /// `run`.
    pub fn unassembled(
        entity: Entity,
        action: TaskAction,
        trace_id: TraceId,
        kind: ControllerKind,
        error: TaskError,
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            assembly_error: Some(error),
            ..Self::new(
                entity,
                action,
                trace_id,
                Box::new(Unassembled(kind)),
                store,
                clock,
            )
        }
    }

    pub fn action(&self) -> TaskAction {
        self.action
    }

    pub fn take_log(&mut self) -> TaskLog {
        self.log.take()
    }

    async fn persist(&self) -> Result<(), TaskError> {
        self.store.save_entity(&self.entity).await?;
        Ok(())
    }

    async fn check_ready(&self, destroying: bool) -> Result<(), TaskError> {
        let readiness = self.pipeline.readiness();

        if !destroying && readiness.parents {
            let parents = self
                .store
                .load_relatives(&self.entity.parents)
                .await
                .map_err(relative_error)?;
            if let Some(p) = parents.iter().find(|p| !p.is_ready_as_parent()) {
                return Err(TaskError::ParentNotReady(format!(
                    "{} {} is {}/{}",
                    p.kind,
                    p.name,
                    p.state(),
                    p.status()
                )));
            }
        }

        if destroying && readiness.children {
            let children = self
                .store
                .load_relatives(&self.entity.children)
                .await
                .map_err(relative_error)?;
            if let Some(c) = children.iter().find(|c| !c.is_released_as_child()) {
                return Err(TaskError::ChildrenNotReady(format!(
                    "{} {} is {}/{}",
                    c.kind,
                    c.name,
                    c.state(),
                    c.status()
                )));
            }
        }

        Ok(())
    }

    async fn execute(&mut self) -> Result<(), TaskError> {
        let destroying = matches!(self.entity.state(), State::Destroy | State::Destroyed);

        self.entity.lifecycle.begin()?;
        self.persist().await?;
        self.log(
            LogLevel::Info,
            format!(
                "{} {} started",
                if destroying { "destroy" } else { "provision" },
                self.entity.name
            ),
        );

        self.check_ready(destroying).await?;

        let mut cx = StepContext {
            entity: &self.entity,
            trace_id: self.trace_id,
            log: &mut self.log,
            clock: self.clock.as_ref(),
        };
        if destroying {
            self.pipeline.destroy(&mut cx).await?;
        } else {
            self.pipeline.provision(&mut cx).await?;
        }

        self.entity.lifecycle.make_done();
        self.persist().await?;
        self.log(
            LogLevel::Info,
            format!(
                "{} is now {}/{}",
                self.entity.name,
                self.entity.state(),
                self.entity.status()
            ),
        );
        Ok(())
    }
}

#[async_trait]
impl TaskController for EntityTask {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    async fn run(&mut self) -> Result<(), TaskError> {
        if let Some(error) = self.assembly_error.take() {
            return Err(error);
        }
        match self.action {
            TaskAction::Execute => self.execute().await,
            // dry runs and syncs never move the lifecycle
            TaskAction::DryRun | TaskAction::DryRunWithTempState => {
                let temp_state = self.action == TaskAction::DryRunWithTempState;
                let mut cx = StepContext {
                    entity: &self.entity,
                    trace_id: self.trace_id,
                    log: &mut self.log,
                    clock: self.clock.as_ref(),
                };
                self.pipeline.dry_run(&mut cx, temp_state).await
            }
            TaskAction::Sync => {
                let mut cx = StepContext {
                    entity: &self.entity,
                    trace_id: self.trace_id,
                    log: &mut self.log,
                    clock: self.clock.as_ref(),
                };
                self.pipeline.sync(&mut cx).await
            }
        }
    }

    async fn mark_failed(&mut self) -> Result<(), TaskError> {
        if self.entity.lifecycle.make_failed() {
            self.persist().await?;
        }
        Ok(())
    }

    async fn mark_retry(&mut self) -> Result<(), TaskError> {
        if self.entity.lifecycle.make_retry() {
            self.persist().await?;
        }
        Ok(())
    }

    fn log(&mut self, level: LogLevel, message: String) {
        emit(level, &self.entity, self.trace_id, &message);
        self.log.push(level, message, self.clock.now());
    }

    async fn save_logs(&mut self) -> Result<(), TaskError> {
        if self.log.is_empty() {
            return Ok(());
        }
        let record = TaskLogRecord {
            entity_id: self.entity.id,
            revision_number: self.entity.revision_number,
            trace_id: self.trace_id,
            entries: self.log.take().into_entries(),
        };
        self.store.save_logs(record).await?;
        Ok(())
    }
}
