//! Stand-in infrastructure adapters. They record every call as
//! `"<operation>:<entity name>"` and succeed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Entity, TaskError};
use crate::ports::{GitProvider, Provisioner, SecretManager, Secrets};

#[derive(Clone, Default)]
pub struct StaticSecretManager {
    secrets: Secrets,
}

impl StaticSecretManager {
    pub fn new(secrets: Secrets) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl SecretManager for StaticSecretManager {
    async fn resolve(&self, _entity: &Entity) -> Result<Secrets, TaskError> {
        Ok(self.secrets.clone())
    }
}

#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    async fn record(&self, op: &str, entity: &Entity) {
        self.calls.lock().await.push(format!("{op}:{}", entity.name));
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[derive(Clone, Default)]
pub struct RecordingProvisioner {
    log: CallLog,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.log.calls().await
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn plan(
        &self,
        entity: &Entity,
        secrets: &Secrets,
        temp_state: bool,
    ) -> Result<String, TaskError> {
        let op = if temp_state { "plan_temp" } else { "plan" };
        self.log.record(op, entity).await;
        Ok(format!(
            "# plan for {} ({} secrets)\n",
            entity.name,
            secrets.len()
        ))
    }

    async fn apply(&self, entity: &Entity, _secrets: &Secrets) -> Result<(), TaskError> {
        self.log.record("apply", entity).await;
        Ok(())
    }

    async fn destroy(&self, entity: &Entity, _secrets: &Secrets) -> Result<(), TaskError> {
        self.log.record("destroy", entity).await;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingGitProvider {
    log: CallLog,
    pushed: Arc<Mutex<Vec<String>>>,
}

impl RecordingGitProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.log.calls().await
    }

    /// Contents passed to `push`, in order.
    pub async fn pushed(&self) -> Vec<String> {
        self.pushed.lock().await.clone()
    }
}

#[async_trait]
impl GitProvider for RecordingGitProvider {
    async fn sync(&self, entity: &Entity) -> Result<(), TaskError> {
        self.log.record("sync", entity).await;
        Ok(())
    }

    async fn push(&self, entity: &Entity, content: &str) -> Result<(), TaskError> {
        self.log.record("push", entity).await;
        self.pushed.lock().await.push(content.to_string());
        Ok(())
    }

    async fn remove(&self, entity: &Entity) -> Result<(), TaskError> {
        self.log.record("remove", entity).await;
        Ok(())
    }
}
