//! Cron-driven job scheduler.
//!
//! Stored jobs are registered on the cron engine under their own id; each
//! fire publishes a `scheduler_job` message onto the task queue. A second,
//! fixed-interval trigger re-runs the loader so jobs created after start
//! are picked up.

use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::domain::{Job, Message};
use crate::ports::{
    CronCallback, CronEngine, CronError, CronFuture, IdGenerator, JobStore, MessagePublisher,
    StoreError, Trigger,
};

/// Cron registration id of the job poller.
pub const POLL_JOB_ID: &str = "poll_jobs";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cannot load jobs: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cron(#[from] CronError),
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    cron: Arc<dyn CronEngine>,
    publisher: Arc<dyn MessagePublisher>,
    ids: Arc<dyn IdGenerator>,
    routing_key: String,
    poll_interval: Duration,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        cron: Arc<dyn CronEngine>,
        publisher: Arc<dyn MessagePublisher>,
        ids: Arc<dyn IdGenerator>,
        routing_key: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                cron,
                publisher,
                ids,
                routing_key: routing_key.into(),
                poll_interval,
            }),
        }
    }

    /// Registers every stored job that is not registered yet. Returns how
    /// many were added.
    pub async fn schedule_jobs(&self) -> Result<usize, SchedulerError> {
        self.inner.schedule_jobs().await
    }

    /// Registers the poller. `false` if it was already registered.
    pub async fn schedule_polling_job(&self) -> Result<bool, SchedulerError> {
        // weak: the engine owns the callback, the callback must not own us
        let inner = Arc::downgrade(&self.inner);
        let callback: CronCallback = Arc::new(move || {
            let inner: Weak<Inner> = inner.clone();
            let fut: CronFuture = Box::pin(async move {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                match inner.schedule_jobs().await {
                    Ok(0) => debug!("job poll found nothing new"),
                    Ok(added) => info!(added, "job poll registered new jobs"),
                    Err(e) => error!(error = %e, "job poll failed"),
                }
            });
            fut
        });

        let added = self
            .inner
            .cron
            .add_job(
                POLL_JOB_ID,
                Trigger::Interval(self.inner.poll_interval),
                callback,
            )
            .await?;
        Ok(added)
    }

    /// Loads jobs, registers the poller and starts the engine.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let added = self.schedule_jobs().await?;
        self.schedule_polling_job().await?;
        self.inner.cron.start().await?;
        info!(
            jobs = added,
            poll_interval = ?self.inner.poll_interval,
            "scheduler started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.inner.cron.shutdown().await?;
        info!("scheduler stopped");
        Ok(())
    }
}

impl Inner {
    async fn schedule_jobs(&self) -> Result<usize, SchedulerError> {
        let mut added = 0;
        for job in self.jobs.list_jobs().await? {
            let key = job.id.to_string();
            if self.cron.contains(&key).await {
                continue;
            }
            let trigger = Trigger::Cron(job.cron.clone());
            let job_id = job.id;
            let schedule = job.cron.to_string();
            if self.cron.add_job(&key, trigger, self.fire(job)).await? {
                info!(job_id = %job_id, cron = %schedule, "job scheduled");
                added += 1;
            }
        }
        Ok(added)
    }

    fn fire(&self, job: Job) -> CronCallback {
        let job = Arc::new(job);
        let publisher = Arc::clone(&self.publisher);
        let ids = Arc::clone(&self.ids);
        let routing_key = self.routing_key.clone();

        Arc::new(move || {
            let job = Arc::clone(&job);
            let publisher = Arc::clone(&publisher);
            let routing_key = routing_key.clone();
            let trace_id = ids.generate_trace_id();
            let fut: CronFuture = Box::pin(async move {
                let mut message = Message::scheduler_job(&job);
                message.metadata.trace_id = Some(trace_id.as_ulid().to_string());
                match publisher.publish(&routing_key, message).await {
                    Ok(()) => debug!(job_id = %job.id, trace_id = %trace_id, "scheduler job published"),
                    Err(e) => error!(job_id = %job.id, error = %e, "cannot publish scheduler job"),
                }
            });
            fut
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobType, MessageType, TASK_ROUTING_KEY};
    use crate::impls::{InMemoryQueue, InMemoryStore, TokioCronScheduler};
    use crate::ports::{Clock, FixedClock, MessageConsumer, MessageLease, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    const POLL: Duration = Duration::from_secs(600);

    struct Fixture {
        store: InMemoryStore,
        cron: Arc<TokioCronScheduler>,
        queue: InMemoryQueue,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 30).unwrap(),
        ));
        let store = InMemoryStore::new();
        let cron = Arc::new(TokioCronScheduler::new(Arc::clone(&clock)));
        let queue = InMemoryQueue::new(TASK_ROUTING_KEY);
        let scheduler = Scheduler::new(
            Arc::new(store.clone()),
            cron.clone(),
            Arc::new(queue.clone()),
            Arc::new(UlidGenerator::new(clock)),
            TASK_ROUTING_KEY,
            POLL,
        );
        Fixture {
            store,
            cron,
            queue,
            scheduler,
        }
    }

    fn job(script: &str, cron: &str) -> Job {
        Job::new(JobId::from_ulid(Ulid::new()), JobType::Sql, script, cron).unwrap()
    }

    #[tokio::test]
    async fn scheduling_twice_registers_each_job_once() {
        let f = fixture();
        let a = job("DELETE FROM sessions", "0 3 * * *");
        let b = job("VACUUM", "0 4 * * *");
        f.store.upsert_job(a.clone()).await;
        f.store.upsert_job(b.clone()).await;

        assert_eq!(f.scheduler.schedule_jobs().await.unwrap(), 2);
        assert_eq!(f.scheduler.schedule_jobs().await.unwrap(), 0);

        let mut expected = vec![a.id.to_string(), b.id.to_string()];
        expected.sort();
        assert_eq!(f.cron.job_ids().await, expected);
    }

    #[tokio::test]
    async fn polling_job_is_registered_once() {
        let f = fixture();
        assert!(f.scheduler.schedule_polling_job().await.unwrap());
        assert!(!f.scheduler.schedule_polling_job().await.unwrap());
        assert_eq!(f.cron.job_ids().await, vec![POLL_JOB_ID.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_picks_up_new_jobs() {
        let f = fixture();
        f.scheduler.start().await.unwrap();

        let late = job("VACUUM", "0 4 * * *");
        f.store.upsert_job(late.clone()).await;
        assert!(!f.cron.contains(&late.id.to_string()).await);

        tokio::time::sleep(POLL + Duration::from_secs(1)).await;
        assert!(f.cron.contains(&late.id.to_string()).await);

        f.scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fired_job_publishes_scheduler_message() {
        let f = fixture();
        let every_minute = job("DELETE FROM sessions WHERE expired", "* * * * *");
        f.store.upsert_job(every_minute.clone()).await;
        f.scheduler.start().await.unwrap();

        // clock sits at :30, so the first slot is 30s away
        tokio::time::sleep(Duration::from_secs(31)).await;

        let lease = f.queue.lease().await.unwrap();
        let message = lease.message().clone();
        lease.ack().await.unwrap();

        assert_eq!(message.message_type, MessageType::SchedulerJob);
        assert_eq!(
            message.body.job_id.as_deref(),
            Some(every_minute.id.as_ulid().to_string().as_str())
        );
        assert_eq!(message.body.job_type.as_deref(), Some("SQL"));
        assert_eq!(
            message.body.job_script.as_deref(),
            Some("DELETE FROM sessions WHERE expired")
        );
        assert!(message.metadata.trace_id.is_some());

        f.scheduler.shutdown().await.unwrap();
    }
}
