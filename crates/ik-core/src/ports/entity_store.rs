//! Persistence port for entities, users and task logs.
//!
//! The store owns the entities. Controllers mutate an in-memory copy
//! through the lifecycle transitions and hand it back with `save_entity`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Entity, EntityId, Job, TaskError, TaskLogRecord, User, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        TaskError::unexpected(err)
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn load_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError>;

    /// Persists the entity's current fields (including its lifecycle).
    async fn save_entity(&self, entity: &Entity) -> Result<(), StoreError>;

    async fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn save_logs(&self, record: TaskLogRecord) -> Result<(), StoreError>;

    /// Loads relatives (parents or children) of an entity. A missing id is an
    /// error: relationship data must not point at nothing.
    async fn load_relatives(&self, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let entity = self
                .load_entity(*id)
                .await?
                .ok_or(StoreError::EntityNotFound(*id))?;
            out.push(entity);
        }
        Ok(out)
    }
}

/// Read side of the scheduler's job table.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
}
