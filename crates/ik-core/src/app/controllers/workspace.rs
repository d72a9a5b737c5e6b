//! Workspaces: rendered on top of a backing resource and pushed to git.
//!
//! Every workspace step first runs the backing resource's pipeline as a
//! temp-state dry run, so a workspace is never pushed against a resource
//! whose plan does not render.

use std::sync::Arc;

use async_trait::async_trait;

use super::{EntityTask, Pipeline, Readiness, StepContext};
use crate::domain::{ControllerKind, TaskAction, TaskError};
use crate::ports::{GitProvider, TaskController};

pub struct WorkspacePipeline {
    backing: EntityTask,
    git: Arc<dyn GitProvider>,
}

impl WorkspacePipeline {
    /// `backing` must be a `dryrun_with_temp_state` task.
    pub fn new(backing: EntityTask, git: Arc<dyn GitProvider>) -> Result<Self, TaskError> {
        if backing.action() != TaskAction::DryRunWithTempState {
            return Err(TaskError::Assertion(format!(
                "backing resource task must be {}, got {}",
                TaskAction::DryRunWithTempState,
                backing.action()
            )));
        }
        Ok(Self { backing, git })
    }

    async fn plan_backing(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        let result = self.backing.run().await;
        cx.append(self.backing.take_log());
        result
    }

    fn render(&self, cx: &StepContext<'_>) -> String {
        let backing = self.backing.entity();
        format!(
            "# workspace: {}\n# revision: {}\n# backing resource: {} ({})\n",
            cx.entity.name, cx.entity.revision_number, backing.name, backing.id
        )
    }
}

#[async_trait]
impl Pipeline for WorkspacePipeline {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Workspace
    }

    fn readiness(&self) -> Readiness {
        Readiness::default()
    }

    async fn provision(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.plan_backing(cx).await?;
        let content = self.render(cx);
        self.git.push(cx.entity, &content).await?;
        cx.info(format!("workspace {} pushed", cx.entity.name));
        Ok(())
    }

    async fn destroy(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.git.remove(cx.entity).await?;
        cx.info(format!("workspace {} removed", cx.entity.name));
        Ok(())
    }

    async fn dry_run(
        &mut self,
        cx: &mut StepContext<'_>,
        _temp_state: bool,
    ) -> Result<(), TaskError> {
        self.plan_backing(cx).await
    }

    async fn sync(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.git.sync(cx.entity).await?;
        Ok(())
    }
}
