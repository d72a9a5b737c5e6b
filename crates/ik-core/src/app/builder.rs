//! EngineBuilder - wires the ports into a dispatcher, scheduler and worker.
//!
//! `build()` is fail-fast: every collaborator without a sensible default
//! must be supplied, and all missing ones are reported at once.

use std::sync::Arc;

use tracing::info;

use super::dispatcher::Dispatcher;
use super::factory::DefaultControllerFactory;
use super::job_executor::JobExecutor;
use super::scheduler::{Scheduler, SchedulerError};
use super::worker::Worker;
use crate::config::WorkerConfig;
use crate::domain::DefaultDecider;
use crate::ports::{
    Clock, CronEngine, EntityStore, GitProvider, IdGenerator, JobStore, MessageConsumer,
    MessagePublisher, NotificationSink, Provisioner, SecretManager, SqlExecutor, SystemClock,
    UlidGenerator,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborators: {0:?}. These ports must be supplied before build().")]
    MissingPorts(Vec<&'static str>),
}

pub struct EngineBuilder {
    config: WorkerConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    store: Option<Arc<dyn EntityStore>>,
    jobs: Option<Arc<dyn JobStore>>,
    publisher: Option<Arc<dyn MessagePublisher>>,
    consumer: Option<Arc<dyn MessageConsumer>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    sql: Option<Arc<dyn SqlExecutor>>,
    cron: Option<Arc<dyn CronEngine>>,
    secrets: Option<Arc<dyn SecretManager>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    git: Option<Arc<dyn GitProvider>>,
}

impl EngineBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ids: None,
            store: None,
            jobs: None,
            publisher: None,
            consumer: None,
            notifier: None,
            sql: None,
            cron: None,
            secrets: None,
            provisioner: None,
            git: None,
        }
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a `UlidGenerator` over the configured clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn jobs(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn transport(
        mut self,
        publisher: Arc<dyn MessagePublisher>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> Self {
        self.publisher = Some(publisher);
        self.consumer = Some(consumer);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn sql(mut self, sql: Arc<dyn SqlExecutor>) -> Self {
        self.sql = Some(sql);
        self
    }

    pub fn cron(mut self, cron: Arc<dyn CronEngine>) -> Self {
        self.cron = Some(cron);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretManager>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn git(mut self, git: Arc<dyn GitProvider>) -> Self {
        self.git = Some(git);
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("entity store");
        }
        if self.jobs.is_none() {
            missing.push("job store");
        }
        if self.publisher.is_none() || self.consumer.is_none() {
            missing.push("transport");
        }
        if self.notifier.is_none() {
            missing.push("notifier");
        }
        if self.sql.is_none() {
            missing.push("sql executor");
        }
        if self.cron.is_none() {
            missing.push("cron engine");
        }
        if self.secrets.is_none() {
            missing.push("secret manager");
        }
        if self.provisioner.is_none() {
            missing.push("provisioner");
        }
        if self.git.is_none() {
            missing.push("git provider");
        }

        let (
            Some(store),
            Some(jobs),
            Some(publisher),
            Some(consumer),
            Some(notifier),
            Some(sql),
            Some(cron),
            Some(secrets),
            Some(provisioner),
            Some(git),
        ) = (
            self.store,
            self.jobs,
            self.publisher,
            self.consumer,
            self.notifier,
            self.sql,
            self.cron,
            self.secrets,
            self.provisioner,
            self.git,
        )
        else {
            return Err(BuildError::MissingPorts(missing));
        };

        let clock = self.clock;
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        };

        let factory = DefaultControllerFactory::new(
            Arc::clone(&store),
            clock,
            secrets,
            provisioner,
            git,
        );
        let dispatcher = Dispatcher::new(
            store,
            Arc::new(factory),
            notifier,
            JobExecutor::new(sql),
            Arc::new(DefaultDecider::new(self.config.retry.policy())),
            Arc::clone(&ids),
        );
        let scheduler = Scheduler::new(
            jobs,
            cron,
            publisher,
            ids,
            self.config.routing_key.clone(),
            self.config.scheduler.poll_interval,
        );

        Ok(Engine {
            config: self.config,
            dispatcher: Arc::new(dispatcher),
            scheduler,
            consumer,
        })
    }
}

/// Wired but not yet running.
pub struct Engine {
    pub config: WorkerConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Scheduler,
    consumer: Arc<dyn MessageConsumer>,
}

impl Engine {
    /// Starts the scheduler, then the consume loop.
    pub async fn start(self) -> Result<RunningEngine, SchedulerError> {
        self.scheduler.start().await?;
        let worker = Worker::spawn(self.consumer, Arc::clone(&self.dispatcher));
        info!(routing_key = %self.config.routing_key, "engine started");
        Ok(RunningEngine {
            scheduler: self.scheduler,
            worker,
        })
    }
}

pub struct RunningEngine {
    scheduler: Scheduler,
    worker: Worker,
}

impl RunningEngine {
    /// Stops new triggers first, then lets the in-flight task finish.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        let stopped = self.scheduler.shutdown().await;
        self.worker.shutdown_and_join().await;
        info!("engine stopped");
        stopped
    }
}
