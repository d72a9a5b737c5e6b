//! Git-backed kinds: source code repositories and their versions.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Pipeline, Readiness, StepContext};
use crate::domain::{ControllerKind, TaskError};
use crate::ports::GitProvider;

pub struct SourceCodePipeline {
    git: Arc<dyn GitProvider>,
}

impl SourceCodePipeline {
    pub fn new(git: Arc<dyn GitProvider>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Pipeline for SourceCodePipeline {
    fn kind(&self) -> ControllerKind {
        ControllerKind::SourceCode
    }

    fn readiness(&self) -> Readiness {
        Readiness::default()
    }

    async fn provision(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.git.sync(cx.entity).await?;
        cx.info(format!("repository {} synced", cx.entity.name));
        Ok(())
    }

    async fn destroy(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.git.remove(cx.entity).await?;
        cx.info(format!("repository {} detached", cx.entity.name));
        Ok(())
    }

    async fn dry_run(
        &mut self,
        cx: &mut StepContext<'_>,
        _temp_state: bool,
    ) -> Result<(), TaskError> {
        cx.info("nothing to plan for a repository");
        Ok(())
    }

    async fn sync(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.provision(cx).await
    }
}

/// A pinned version of a repository. Needs its repository provisioned.
pub struct SourceCodeVersionPipeline {
    git: Arc<dyn GitProvider>,
}

impl SourceCodeVersionPipeline {
    pub fn new(git: Arc<dyn GitProvider>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Pipeline for SourceCodeVersionPipeline {
    fn kind(&self) -> ControllerKind {
        ControllerKind::SourceCodeVersion
    }

    fn readiness(&self) -> Readiness {
        Readiness {
            parents: true,
            children: false,
        }
    }

    async fn provision(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.git.sync(cx.entity).await?;
        cx.info(format!("version {} fetched", cx.entity.name));
        Ok(())
    }

    async fn destroy(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        cx.info(format!("version {} released", cx.entity.name));
        Ok(())
    }

    async fn dry_run(
        &mut self,
        cx: &mut StepContext<'_>,
        _temp_state: bool,
    ) -> Result<(), TaskError> {
        cx.info("nothing to plan for a source code version");
        Ok(())
    }

    async fn sync(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        self.provision(cx).await
    }
}
