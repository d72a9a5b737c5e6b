use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use ik_core::app::EngineBuilder;
use ik_core::config::WorkerConfig;
use ik_core::domain::{
    ControllerKind, Entity, EntityId, EntityKind, Job, JobType, Lifecycle, Message, Status,
    TaskAction, TaskRequest, User,
};
use ik_core::impls::{
    InMemoryQueue, InMemoryStore, RecordingGitProvider, RecordingProvisioner,
    RecordingSqlExecutor, StaticSecretManager, TokioCronScheduler, TracingNotifier,
};
use ik_core::ports::{
    Clock, IdGenerator, MessageConsumer, MessagePublisher, SystemClock, UlidGenerator,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(filter),
        )
        .init();
}

/// A new entity as the API would hand it over: approved if needed, then
/// queued for execution.
fn queued_entity(
    ids: &dyn IdGenerator,
    kind: EntityKind,
    name: &str,
    approval_flow: bool,
) -> Result<Entity, Box<dyn Error>> {
    let mut lifecycle = Lifecycle::new_entity(approval_flow);
    if lifecycle.status() == Status::ApprovalPending {
        lifecycle.approve(false)?;
    }
    lifecycle.execute()?;
    Ok(Entity::new(ids.generate_entity_id(), kind, name, lifecycle))
}

/// Seeds a repository, a version of it and a resource built from that
/// version, and returns the task messages for all three. The messages are
/// ordered dependents first so the readiness retries have work to do.
async fn seed_demo(
    store: &InMemoryStore,
    ids: &dyn IdGenerator,
    approval_flow: bool,
) -> Result<(Vec<EntityId>, Vec<Message>), Box<dyn Error>> {
    let user = User {
        id: ids.generate_user_id(),
        identifier: "demo@ik.local".into(),
    };
    store.insert_user(user.clone()).await;

    let repo = queued_entity(ids, EntityKind::SourceCode, "infra-modules", approval_flow)?;
    let version = queued_entity(
        ids,
        EntityKind::SourceCodeVersion,
        "infra-modules@v1.4.0",
        approval_flow,
    )?
    .with_parent(repo.id);
    let vpc = queued_entity(ids, EntityKind::Resource, "vpc", approval_flow)?
        .with_parent(version.id);
    let repo = repo.with_child(version.id);
    let version = version.with_child(vpc.id);

    let plan = [
        (&vpc, ControllerKind::Resource),
        (&version, ControllerKind::SourceCodeVersion),
        (&repo, ControllerKind::SourceCode),
    ];
    let messages = plan
        .iter()
        .map(|(entity, controller)| {
            Message::task(&TaskRequest {
                entity_id: entity.id,
                action: TaskAction::Execute,
                user_id: user.id,
                controller: *controller,
                trace_id: ids.generate_trace_id(),
            })
        })
        .collect();
    let entity_ids = vec![repo.id, version.id, vpc.id];

    for entity in [repo, version, vpc] {
        store.insert_entity(entity).await;
    }

    let cleanup = Job::new(
        ids.generate_job_id(),
        JobType::Sql,
        "DELETE FROM task_logs WHERE created_at < now() - interval '30 days';",
        "0 3 * * *",
    )?;
    store.upsert_job(cleanup).await;

    Ok((entity_ids, messages))
}

/// Waits until every published message has been settled.
async fn wait_for_drain(queue: &InMemoryQueue, expected: usize) -> Result<(), Box<dyn Error>> {
    loop {
        let counts = queue.counts().await?;
        if counts.is_idle() && counts.acked + counts.dead >= expected {
            info!(
                acked = counts.acked,
                requeued = counts.requeued,
                dead = counts.dead,
                "demo tasks settled"
            );
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = WorkerConfig::from_env()?;
    init_tracing(&config.logging.level);
    info!(
        routing_key = %config.routing_key,
        approval_flow = config.approval_flow,
        max_retries = config.retry.max_retries,
        "starting ik-worker"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
    let store = InMemoryStore::new();
    let queue = InMemoryQueue::new(config.routing_key.clone());

    let (entity_ids, messages) = seed_demo(&store, ids.as_ref(), config.approval_flow).await?;
    let expected = messages.len();

    let engine = EngineBuilder::new(config.clone())
        .clock(Arc::clone(&clock))
        .ids(Arc::clone(&ids))
        .store(Arc::new(store.clone()))
        .jobs(Arc::new(store.clone()))
        .transport(Arc::new(queue.clone()), Arc::new(queue.clone()))
        .notifier(Arc::new(TracingNotifier))
        .sql(Arc::new(RecordingSqlExecutor::new()))
        .cron(Arc::new(TokioCronScheduler::new(Arc::clone(&clock))))
        .secrets(Arc::new(StaticSecretManager::default()))
        .provisioner(Arc::new(RecordingProvisioner::new()))
        .git(Arc::new(RecordingGitProvider::new()))
        .build()?;
    let running = engine.start().await?;

    for message in messages {
        queue.publish(&config.routing_key, message).await?;
    }

    tokio::select! {
        drained = wait_for_drain(&queue, expected) => drained?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("interrupted, shutting down");
        }
    }

    running.shutdown().await?;
    queue.close().await;

    for id in entity_ids {
        if let Some(entity) = store.entity(id).await {
            info!(entity = %serde_json::to_string(&entity)?, "final entity state");
        }
    }
    Ok(())
}
