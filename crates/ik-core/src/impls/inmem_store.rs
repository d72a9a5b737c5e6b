//! In-memory entity/user/job store with recorded task logs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Entity, EntityId, Job, JobId, TaskLogRecord, User, UserId};
use crate::ports::{EntityStore, JobStore, StoreError};

#[derive(Default)]
struct StoreState {
    entities: HashMap<EntityId, Entity>,
    users: HashMap<UserId, User>,
    jobs: Vec<Job>,
    logs: Vec<TaskLogRecord>,
    entity_saves: usize,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_entity(&self, entity: Entity) {
        self.state.lock().await.entities.insert(entity.id, entity);
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Adds a job, replacing one with the same id.
    pub async fn upsert_job(&self, job: Job) {
        let mut state = self.state.lock().await;
        match state.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => state.jobs.push(job),
        }
    }

    pub async fn remove_job(&self, id: JobId) {
        self.state.lock().await.jobs.retain(|j| j.id != id);
    }

    pub async fn entity(&self, id: EntityId) -> Option<Entity> {
        self.state.lock().await.entities.get(&id).cloned()
    }

    pub async fn logs(&self) -> Vec<TaskLogRecord> {
        self.state.lock().await.logs.clone()
    }

    pub async fn logs_for(&self, id: EntityId) -> Vec<TaskLogRecord> {
        self.state
            .lock()
            .await
            .logs
            .iter()
            .filter(|r| r.entity_id == id)
            .cloned()
            .collect()
    }

    /// Number of `save_entity` calls so far.
    pub async fn entity_saves(&self) -> usize {
        self.state.lock().await.entity_saves
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn load_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self.entity(id).await)
    }

    async fn save_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.entity_saves += 1;
        state.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn save_logs(&self, record: TaskLogRecord) -> Result<(), StoreError> {
        self.state.lock().await.logs.push(record);
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.state.lock().await.jobs.clone())
    }
}
