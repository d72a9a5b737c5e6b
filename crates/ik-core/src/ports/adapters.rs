//! Capabilities injected into task controllers. Their internals (cloud
//! APIs, IaC tooling, git hosting) live outside this crate.
//!
//! - `SecretManager` resolves the credentials a resource or executor needs
//!   before anything is planned.
//! - `Provisioner` plans, applies and destroys infrastructure for one entity.
//!   A plan can run against a throw-away state, which is how workspaces
//!   validate their backing resource without touching it.
//! - `GitProvider` mirrors repositories and pushes workspace code.
//!
//! Every error surfaces as a `TaskError`, so the dispatcher's failure policy
//! applies to adapter failures unchanged.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{Entity, TaskError};

pub type Secrets = BTreeMap<String, String>;

#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Secrets the entity needs at provisioning time.
    async fn resolve(&self, entity: &Entity) -> Result<Secrets, TaskError>;
}

/// Plans, applies and destroys infrastructure for one entity.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns the rendered plan. With `temp_state` the plan runs against a
    /// throw-away state and leaves the real one untouched.
    async fn plan(
        &self,
        entity: &Entity,
        secrets: &Secrets,
        temp_state: bool,
    ) -> Result<String, TaskError>;

    async fn apply(&self, entity: &Entity, secrets: &Secrets) -> Result<(), TaskError>;

    async fn destroy(&self, entity: &Entity, secrets: &Secrets) -> Result<(), TaskError>;
}

#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Refreshes the repository backing `entity`.
    async fn sync(&self, entity: &Entity) -> Result<(), TaskError>;

    /// Commits `content` for `entity` and pushes it.
    async fn push(&self, entity: &Entity, content: &str) -> Result<(), TaskError>;

    async fn remove(&self, entity: &Entity) -> Result<(), TaskError>;
}
