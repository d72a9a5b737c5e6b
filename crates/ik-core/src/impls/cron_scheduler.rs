//! Tokio-backed cron engine: one task per registered trigger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ports::{Clock, CronCallback, CronEngine, CronError, Trigger};

#[derive(Clone)]
struct Registration {
    trigger: Trigger,
    callback: CronCallback,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Registration>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
    shut_down: bool,
}

pub struct TokioCronScheduler {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    shutdown_tx: watch::Sender<bool>,
}

impl TokioCronScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
            shutdown_tx,
        }
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.lock().await.jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn spawn(&self, id: String, registration: Registration) -> JoinHandle<()> {
        let clock = Arc::clone(&self.clock);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(run_trigger(id, registration, clock, shutdown_rx))
    }
}

async fn run_trigger(
    id: String,
    registration: Registration,
    clock: Arc<dyn Clock>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let wait = match &registration.trigger {
            Trigger::Interval(every) => *every,
            Trigger::Cron(schedule) => {
                let now = clock.now();
                // never fire the same slot twice when the clock lags behind
                let from = last_fire.map_or(now, |last| last.max(now));
                let Some(next) = schedule.next_after(&from) else {
                    info!(job_id = %id, "cron schedule has no further fire times");
                    break;
                };
                last_fire = Some(next);
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
        };

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        debug!(job_id = %id, "trigger fired");
        (registration.callback)().await;
    }
    debug!(job_id = %id, "trigger stopped");
}

#[async_trait]
impl CronEngine for TokioCronScheduler {
    async fn add_job(
        &self,
        id: &str,
        trigger: Trigger,
        callback: CronCallback,
    ) -> Result<bool, CronError> {
        if trigger == Trigger::Interval(Duration::ZERO) {
            return Err(CronError::ZeroInterval);
        }

        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return Err(CronError::ShutDown);
        }
        if inner.jobs.contains_key(id) {
            return Ok(false);
        }

        let registration = Registration { trigger, callback };
        inner.jobs.insert(id.to_string(), registration.clone());
        if inner.started {
            let handle = self.spawn(id.to_string(), registration);
            inner.handles.push(handle);
        }
        Ok(true)
    }

    async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.jobs.contains_key(id)
    }

    async fn start(&self) -> Result<(), CronError> {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return Err(CronError::ShutDown);
        }
        if inner.started {
            return Err(CronError::AlreadyStarted);
        }
        inner.started = true;

        let jobs: Vec<_> = inner
            .jobs
            .iter()
            .map(|(id, reg)| (id.clone(), reg.clone()))
            .collect();
        for (id, registration) in jobs {
            let handle = self.spawn(id, registration);
            inner.handles.push(handle);
        }
        info!(jobs = inner.jobs.len(), "cron scheduler started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), CronError> {
        let handles = {
            let mut inner = self.inner.lock().await;
            if inner.shut_down {
                return Ok(());
            }
            inner.shut_down = true;
            std::mem::take(&mut inner.handles)
        };

        // ignore send error: no trigger task may be running
        let _ = self.shutdown_tx.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "cron trigger task panicked");
            }
        }
        info!("cron scheduler stopped");
        Ok(())
    }
}
