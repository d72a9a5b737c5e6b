//! Cron engine port.
//!
//! A `CronEngine` keeps named registrations, each a `Trigger` plus a
//! callback. Names are unique: adding one that already exists is refused
//! with `false`, which is how the scheduler keeps repeated job loads
//! idempotent. A callback builds a fresh future per fire. Each
//! registration has its own trigger task, which awaits that future before
//! computing the next fire time, so a slow job only delays itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::CronSchedule;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("cron engine is shut down")]
    ShutDown,

    #[error("cron engine already started")]
    AlreadyStarted,

    #[error("interval must be non-zero")]
    ZeroInterval,
}

pub type CronFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Invoked on every fire. Each call builds a fresh future.
pub type CronCallback = Arc<dyn Fn() -> CronFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronSchedule),
    /// Fires every `Duration`, first fire one interval after start.
    Interval(Duration),
}

#[async_trait]
pub trait CronEngine: Send + Sync {
    /// Registers `callback` under `id`. Returns `false` and leaves the
    /// existing registration in place if `id` is already known.
    async fn add_job(
        &self,
        id: &str,
        trigger: Trigger,
        callback: CronCallback,
    ) -> Result<bool, CronError>;

    async fn contains(&self, id: &str) -> bool;

    async fn start(&self) -> Result<(), CronError>;

    /// Stops all triggers and waits for running callbacks to return.
    async fn shutdown(&self) -> Result<(), CronError>;
}
