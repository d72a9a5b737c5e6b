//! Scripted controller and dispatcher harness shared by the dispatcher and
//! worker tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ulid::Ulid;

use super::controllers::testing::{entity, trace};
use super::dispatcher::Dispatcher;
use super::job_executor::JobExecutor;
use crate::domain::{
    ControllerKind, DefaultDecider, Entity, EntityKind, EntityWrongState, LogLevel, Message,
    State, Status, TaskAction, TaskError, TaskRequest, Transition, User, UserId,
};
use crate::impls::{InMemoryStore, RecordingNotifier, RecordingSqlExecutor};
use crate::ports::{ControllerFactory, SystemClock, TaskController, UlidGenerator};

pub type ErrorScript = Option<fn() -> TaskError>;

pub fn wrong_state() -> TaskError {
    EntityWrongState {
        transition: Transition::Begin,
        state: State::Provision,
        status: Status::InProgress,
    }
    .into()
}

#[derive(Default)]
pub struct Journal {
    pub builds: usize,
    pub events: Vec<&'static str>,
    pub logs: Vec<String>,
    pub last_status: Option<Status>,
}

/// Hands out controllers that run `error` (or succeed) against a copy of
/// `template`.
pub struct ScriptedFactory {
    template: Entity,
    error: ErrorScript,
    journal: Arc<Mutex<Journal>>,
}

struct ScriptedController {
    entity: Entity,
    error: ErrorScript,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedController {
    fn record(&self, event: &'static str) {
        let mut journal = self.journal.lock().unwrap();
        journal.events.push(event);
        journal.last_status = Some(self.entity.status());
    }
}

#[async_trait]
impl TaskController for ScriptedController {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    async fn run(&mut self) -> Result<(), TaskError> {
        self.entity.lifecycle.make_in_progress();
        self.record("run");
        match self.error {
            Some(make) => Err(make()),
            None => {
                self.entity.lifecycle.make_done();
                Ok(())
            }
        }
    }

    async fn mark_failed(&mut self) -> Result<(), TaskError> {
        self.entity.lifecycle.make_failed();
        self.record("mark_failed");
        Ok(())
    }

    async fn mark_retry(&mut self) -> Result<(), TaskError> {
        if self.entity.lifecycle.make_retry() {
            self.record("mark_retry");
        }
        Ok(())
    }

    fn log(&mut self, _level: LogLevel, message: String) {
        self.journal.lock().unwrap().logs.push(message);
    }

    async fn save_logs(&mut self) -> Result<(), TaskError> {
        self.record("save_logs");
        Ok(())
    }
}

#[async_trait]
impl ControllerFactory for ScriptedFactory {
    async fn build(
        &self,
        _kind: ControllerKind,
        _request: &TaskRequest,
        _user: &User,
    ) -> Result<Box<dyn TaskController>, TaskError> {
        self.journal.lock().unwrap().builds += 1;
        Ok(Box::new(ScriptedController {
            entity: self.template.clone(),
            error: self.error,
            journal: Arc::clone(&self.journal),
        }))
    }
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: InMemoryStore,
    pub notifier: RecordingNotifier,
    pub sql: RecordingSqlExecutor,
    pub user: User,
    pub entity: Entity,
    journal: Arc<Mutex<Journal>>,
}

impl Harness {
    pub async fn new(error: ErrorScript) -> Self {
        let store = InMemoryStore::new();
        let notifier = RecordingNotifier::new();
        let sql = RecordingSqlExecutor::new();
        let user = User {
            id: UserId::from_ulid(Ulid::new()),
            identifier: "ops@example.com".into(),
        };
        store.insert_user(user.clone()).await;
        let entity = entity(EntityKind::Resource, "vpc", State::Provision, Status::Queued);
        let journal = Arc::new(Mutex::new(Journal::default()));

        let factory = ScriptedFactory {
            template: entity.clone(),
            error,
            journal: Arc::clone(&journal),
        };
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(factory),
            Arc::new(notifier.clone()),
            JobExecutor::new(Arc::new(sql.clone())),
            Arc::new(DefaultDecider::default()),
            Arc::new(UlidGenerator::new(SystemClock)),
        );

        Self {
            dispatcher: Arc::new(dispatcher),
            store,
            notifier,
            sql,
            user,
            entity,
            journal,
        }
    }

    pub fn request(&self) -> TaskRequest {
        TaskRequest {
            entity_id: self.entity.id,
            action: TaskAction::Execute,
            user_id: self.user.id,
            controller: ControllerKind::Resource,
            trace_id: trace(),
        }
    }

    pub fn message(&self, retries: u32) -> Message {
        Message {
            retries,
            ..Message::task(&self.request())
        }
    }

    pub fn builds(&self) -> usize {
        self.journal.lock().unwrap().builds
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.journal.lock().unwrap().events.clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.journal.lock().unwrap().logs.clone()
    }

    pub fn last_status(&self) -> Option<Status> {
        self.journal.lock().unwrap().last_status
    }
}
