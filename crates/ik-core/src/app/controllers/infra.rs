//! Provisioner-backed kinds: resource, storage, executor.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Pipeline, Readiness, StepContext};
use crate::domain::{ControllerKind, TaskError};
use crate::ports::{Provisioner, SecretManager, Secrets};

pub struct InfraPipeline {
    kind: ControllerKind,
    readiness: Readiness,
    /// Storage runs without secrets.
    secrets: Option<Arc<dyn SecretManager>>,
    provisioner: Arc<dyn Provisioner>,
    /// Whether `sync` refreshes the plan.
    syncable: bool,
}

impl InfraPipeline {
    pub fn resource(secrets: Arc<dyn SecretManager>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            kind: ControllerKind::Resource,
            readiness: Readiness {
                parents: true,
                children: true,
            },
            secrets: Some(secrets),
            provisioner,
            syncable: true,
        }
    }

    pub fn storage(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            kind: ControllerKind::Storage,
            readiness: Readiness {
                parents: false,
                children: true,
            },
            secrets: None,
            provisioner,
            syncable: false,
        }
    }

    pub fn executor(secrets: Arc<dyn SecretManager>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            kind: ControllerKind::Executor,
            readiness: Readiness {
                parents: true,
                children: true,
            },
            secrets: Some(secrets),
            provisioner,
            syncable: false,
        }
    }

    async fn secrets(&self, cx: &mut StepContext<'_>) -> Result<Secrets, TaskError> {
        let Some(manager) = &self.secrets else {
            return Ok(Secrets::new());
        };
        let secrets = manager.resolve(cx.entity).await?;
        cx.info(format!("resolved {} secrets", secrets.len()));
        Ok(secrets)
    }

    async fn plan(&self, cx: &mut StepContext<'_>, temp_state: bool) -> Result<(), TaskError> {
        let secrets = self.secrets(cx).await?;
        let plan = self.provisioner.plan(cx.entity, &secrets, temp_state).await?;
        cx.info(plan);
        Ok(())
    }
}

#[async_trait]
impl Pipeline for InfraPipeline {
    fn kind(&self) -> ControllerKind {
        self.kind
    }

    fn readiness(&self) -> Readiness {
        self.readiness
    }

    async fn provision(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        let secrets = self.secrets(cx).await?;
        self.provisioner.apply(cx.entity, &secrets).await?;
        cx.info(format!("{} {} applied", self.kind, cx.entity.name));
        Ok(())
    }

    async fn destroy(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        let secrets = self.secrets(cx).await?;
        self.provisioner.destroy(cx.entity, &secrets).await?;
        cx.info(format!("{} {} destroyed", self.kind, cx.entity.name));
        Ok(())
    }

    async fn dry_run(
        &mut self,
        cx: &mut StepContext<'_>,
        temp_state: bool,
    ) -> Result<(), TaskError> {
        self.plan(cx, temp_state).await
    }

    async fn sync(&mut self, cx: &mut StepContext<'_>) -> Result<(), TaskError> {
        if !self.syncable {
            return Err(TaskError::CannotProceed(format!(
                "sync is not supported for {}",
                self.kind
            )));
        }
        self.plan(cx, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::EntityTask;
    use super::super::testing::*;
    use super::*;
    use crate::domain::{EntityKind, State, Status, TaskAction};
    use crate::impls::{InMemoryStore, RecordingProvisioner, StaticSecretManager};
    use crate::ports::TaskController;

    fn secrets() -> Arc<dyn SecretManager> {
        Arc::new(StaticSecretManager::new(Secrets::from([(
            "AWS_ACCESS_KEY_ID".to_string(),
            "AKIA".to_string(),
        )])))
    }

    #[tokio::test]
    async fn resource_execute_applies_with_secrets() {
        let store = InMemoryStore::new();
        let provisioner = RecordingProvisioner::new();
        let vpc = entity(EntityKind::Resource, "vpc", State::Provision, Status::Queued);

        let mut task = EntityTask::new(
            vpc,
            TaskAction::Execute,
            trace(),
            Box::new(InfraPipeline::resource(secrets(), Arc::new(provisioner.clone()))),
            Arc::new(store.clone()),
            clock(),
        );
        task.run().await.unwrap();

        assert_eq!(provisioner.calls().await, vec!["apply:vpc".to_string()]);
        let log = task.take_log();
        assert!(log.entries().iter().any(|e| e.message == "resolved 1 secrets"));
    }

    #[tokio::test]
    async fn resource_sync_refreshes_plan() {
        let store = InMemoryStore::new();
        let provisioner = RecordingProvisioner::new();
        let vpc = entity(EntityKind::Resource, "vpc", State::Provisioned, Status::Done);

        let mut task = EntityTask::new(
            vpc,
            TaskAction::Sync,
            trace(),
            Box::new(InfraPipeline::resource(secrets(), Arc::new(provisioner.clone()))),
            Arc::new(store.clone()),
            clock(),
        );
        task.run().await.unwrap();
        assert_eq!(provisioner.calls().await, vec!["plan:vpc".to_string()]);
    }

    #[tokio::test]
    async fn storage_destroy_skips_secrets() {
        let store = InMemoryStore::new();
        let provisioner = RecordingProvisioner::new();
        let bucket = entity(EntityKind::Storage, "state-bucket", State::Destroy, Status::Queued);

        let mut task = EntityTask::new(
            bucket,
            TaskAction::Execute,
            trace(),
            Box::new(InfraPipeline::storage(Arc::new(provisioner.clone()))),
            Arc::new(store.clone()),
            clock(),
        );
        task.run().await.unwrap();

        assert_eq!(provisioner.calls().await, vec!["destroy:state-bucket".to_string()]);
        assert!(
            !task
                .take_log()
                .entries()
                .iter()
                .any(|e| e.message.contains("secrets"))
        );
    }

    #[test]
    fn readiness_per_kind() {
        let provisioner: Arc<dyn Provisioner> = Arc::new(RecordingProvisioner::new());
        assert_eq!(
            InfraPipeline::storage(Arc::clone(&provisioner)).readiness(),
            Readiness {
                parents: false,
                children: true
            }
        );
        assert_eq!(
            InfraPipeline::executor(secrets(), provisioner).readiness(),
            Readiness {
                parents: true,
                children: true
            }
        );
    }
}
