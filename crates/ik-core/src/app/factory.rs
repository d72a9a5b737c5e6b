//! Builds the task controller addressed by a message.
//!
//! Building happens in two stages. Loading the entity is the only stage
//! that can fail outright: without an entity there is nothing to mark or
//! notify about. Once it is loaded, a kind mismatch or a collaborator that
//! cannot be put together still yields a controller, one whose `run`
//! reports the error, so the dispatcher applies the same failure policy as
//! for a pipeline error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::controllers::{
    EntityTask, InfraPipeline, Pipeline, SourceCodePipeline, SourceCodeVersionPipeline,
    WorkspacePipeline,
};
use crate::domain::{
    ControllerKind, Entity, EntityId, EntityKind, TaskAction, TaskError, TaskRequest, TraceId,
    User,
};
use crate::ports::{
    Clock, ControllerFactory, EntityStore, GitProvider, Provisioner, SecretManager, TaskController,
};

pub struct DefaultControllerFactory {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    secrets: Arc<dyn SecretManager>,
    provisioner: Arc<dyn Provisioner>,
    git: Arc<dyn GitProvider>,
}

impl DefaultControllerFactory {
    pub fn new(
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
        secrets: Arc<dyn SecretManager>,
        provisioner: Arc<dyn Provisioner>,
        git: Arc<dyn GitProvider>,
    ) -> Self {
        Self {
            store,
            clock,
            secrets,
            provisioner,
            git,
        }
    }

    async fn load(&self, id: EntityId, kind: ControllerKind) -> Result<Entity, TaskError> {
        self.store.load_entity(id).await?.ok_or_else(|| {
            TaskError::CannotProceed(format!("{} {id} not found", kind.entity_kind()))
        })
    }

    async fn pipeline(
        &self,
        kind: ControllerKind,
        entity: &Entity,
        trace_id: TraceId,
    ) -> Result<Box<dyn Pipeline>, TaskError> {
        let expected = kind.entity_kind();
        if entity.kind != expected {
            return Err(TaskError::CannotProceed(format!(
                "entity {} is a {}, not a {expected}",
                entity.id, entity.kind
            )));
        }

        let pipeline: Box<dyn Pipeline> = match kind {
            ControllerKind::SourceCode => Box::new(SourceCodePipeline::new(Arc::clone(&self.git))),
            ControllerKind::SourceCodeVersion => {
                Box::new(SourceCodeVersionPipeline::new(Arc::clone(&self.git)))
            }
            ControllerKind::Storage => {
                Box::new(InfraPipeline::storage(Arc::clone(&self.provisioner)))
            }
            ControllerKind::Resource => Box::new(self.resource_pipeline()),
            ControllerKind::Workspace => {
                let backing = self.backing_resource(entity).await?;
                let nested = self.task(
                    backing,
                    TaskAction::DryRunWithTempState,
                    trace_id,
                    Box::new(self.resource_pipeline()),
                );
                Box::new(WorkspacePipeline::new(nested, Arc::clone(&self.git))?)
            }
            ControllerKind::Executor => Box::new(InfraPipeline::executor(
                Arc::clone(&self.secrets),
                Arc::clone(&self.provisioner),
            )),
        };
        Ok(pipeline)
    }

    /// The workspace's parent of kind resource.
    async fn backing_resource(&self, workspace: &Entity) -> Result<Entity, TaskError> {
        for id in &workspace.parents {
            if let Some(parent) = self.store.load_entity(*id).await?
                && parent.kind == EntityKind::Resource
            {
                return Ok(parent);
            }
        }
        Err(TaskError::CannotProceed(format!(
            "workspace {} has no backing resource",
            workspace.name
        )))
    }

    fn task(
        &self,
        entity: Entity,
        action: TaskAction,
        trace_id: TraceId,
        pipeline: Box<dyn Pipeline>,
    ) -> EntityTask {
        EntityTask::new(
            entity,
            action,
            trace_id,
            pipeline,
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
        )
    }

    fn resource_pipeline(&self) -> InfraPipeline {
        InfraPipeline::resource(Arc::clone(&self.secrets), Arc::clone(&self.provisioner))
    }
}

#[async_trait]
impl ControllerFactory for DefaultControllerFactory {
    async fn build(
        &self,
        kind: ControllerKind,
        request: &TaskRequest,
        user: &User,
    ) -> Result<Box<dyn TaskController>, TaskError> {
        debug!(
            controller = %kind,
            entity_id = %request.entity_id,
            user = %user.identifier,
            "building task controller"
        );
        let entity = self.load(request.entity_id, kind).await?;

        let task = match self.pipeline(kind, &entity, request.trace_id).await {
            Ok(pipeline) => self.task(entity, request.action, request.trace_id, pipeline),
            Err(error) => {
                debug!(entity_id = %entity.id, error = %error, "task controller left unassembled");
                EntityTask::unassembled(
                    entity,
                    request.action,
                    request.trace_id,
                    kind,
                    error,
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                )
            }
        };
        Ok(Box::new(task))
    }
}

#[cfg(test)]
mod tests {
    use super::super::controllers::testing::*;
    use super::*;
    use crate::domain::{State, Status, UserId};
    use crate::impls::{
        InMemoryStore, RecordingGitProvider, RecordingProvisioner, StaticSecretManager,
    };
    use ulid::Ulid;

    struct Fixture {
        store: InMemoryStore,
        provisioner: RecordingProvisioner,
        git: RecordingGitProvider,
        factory: DefaultControllerFactory,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let provisioner = RecordingProvisioner::new();
        let git = RecordingGitProvider::new();
        let factory = DefaultControllerFactory::new(
            Arc::new(store.clone()),
            clock(),
            Arc::new(StaticSecretManager::default()),
            Arc::new(provisioner.clone()),
            Arc::new(git.clone()),
        );
        Fixture {
            store,
            provisioner,
            git,
            factory,
        }
    }

    fn user() -> User {
        User {
            id: UserId::from_ulid(Ulid::new()),
            identifier: "ops@example.com".into(),
        }
    }

    fn request(entity: &Entity, controller: ControllerKind, action: TaskAction) -> TaskRequest {
        TaskRequest {
            entity_id: entity.id,
            action,
            user_id: UserId::from_ulid(Ulid::new()),
            controller,
            trace_id: trace(),
        }
    }

    #[tokio::test]
    async fn missing_entity_cannot_proceed() {
        let f = fixture();
        let ghost = entity(EntityKind::Resource, "ghost", State::Provision, Status::Queued);
        let result = f
            .factory
            .build(
                ControllerKind::Resource,
                &request(&ghost, ControllerKind::Resource, TaskAction::Execute),
                &user(),
            )
            .await;
        assert!(matches!(result, Err(TaskError::CannotProceed(_))));
    }

    #[tokio::test]
    async fn kind_mismatch_is_reported_by_run() {
        let f = fixture();
        let bucket = entity(EntityKind::Storage, "bucket", State::Provision, Status::Queued);
        f.store.insert_entity(bucket.clone()).await;

        let mut controller = f
            .factory
            .build(
                ControllerKind::Resource,
                &request(&bucket, ControllerKind::Resource, TaskAction::Execute),
                &user(),
            )
            .await
            .unwrap();

        assert_eq!(controller.entity().id, bucket.id);
        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, TaskError::CannotProceed(m) if m.contains("not a resource")));
    }

    #[tokio::test]
    async fn workspace_without_backing_resource_fails_without_starting() {
        let f = fixture();
        let ws = entity(EntityKind::Workspace, "team-a", State::Provision, Status::Queued);
        f.store.insert_entity(ws.clone()).await;

        let mut controller = f
            .factory
            .build(
                ControllerKind::Workspace,
                &request(&ws, ControllerKind::Workspace, TaskAction::Execute),
                &user(),
            )
            .await
            .unwrap();

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, TaskError::CannotProceed(m) if m.contains("no backing resource")));
        // the lifecycle never started
        assert_eq!(controller.entity().status(), Status::Queued);
        assert_eq!(f.store.entity_saves().await, 0);
        assert!(f.provisioner.calls().await.is_empty());
    }

    #[tokio::test]
    async fn workspace_runs_nested_resource_dry_run() {
        let f = fixture();
        let repo = entity(EntityKind::SourceCode, "modules", State::Provisioned, Status::Done);
        let vpc = entity(EntityKind::Resource, "vpc", State::Provisioned, Status::Done);
        let ws = entity(EntityKind::Workspace, "team-a", State::Provision, Status::Queued)
            .with_parent(repo.id)
            .with_parent(vpc.id);
        f.store.insert_entity(repo).await;
        f.store.insert_entity(vpc).await;
        f.store.insert_entity(ws.clone()).await;

        let mut controller = f
            .factory
            .build(
                ControllerKind::Workspace,
                &request(&ws, ControllerKind::Workspace, TaskAction::Execute),
                &user(),
            )
            .await
            .unwrap();
        controller.run().await.unwrap();

        assert_eq!(f.provisioner.calls().await, vec!["plan_temp:vpc".to_string()]);
        assert_eq!(f.git.calls().await, vec!["push:team-a".to_string()]);
    }

    #[tokio::test]
    async fn every_controller_kind_builds() {
        let f = fixture();
        for kind in ControllerKind::ALL {
            let mut e = entity(kind.entity_kind(), kind.as_str(), State::Provision, Status::Queued);
            if kind == ControllerKind::Workspace {
                let vpc = entity(EntityKind::Resource, "vpc", State::Provisioned, Status::Done);
                e = e.with_parent(vpc.id);
                f.store.insert_entity(vpc).await;
            }
            f.store.insert_entity(e.clone()).await;

            let controller = f
                .factory
                .build(kind, &request(&e, kind, TaskAction::DryRun), &user())
                .await
                .unwrap();
            assert_eq!(controller.entity().id, e.id);
        }
    }
}
