use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;
use crate::ports::MessageConsumer;

/// Consume-loop handle.
/// - `request_shutdown` stops taking new leases; an in-flight task finishes
/// - `shutdown_and_join` waits for the loop to exit
pub struct Worker {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Worker {
    pub fn spawn(consumer: Arc<dyn MessageConsumer>, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            consume_loop(consumer, dispatcher, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "worker task panicked");
        }
    }
}

async fn consume_loop(
    consumer: Arc<dyn MessageConsumer>,
    dispatcher: Arc<Dispatcher>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    info!("worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let lease = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            lease = consumer.lease() => lease,
        };
        let Some(lease) = lease else {
            debug!("queue closed");
            break;
        };

        // pipelines are not preempted: shutdown is only observed between messages
        let outcome = dispatcher.process_message(lease.message()).await;
        let settled = match outcome {
            Ok(directive) => lease.requeue(directive).await,
            Err(failure) => lease.reject(failure.to_string()).await,
        };
        if let Err(e) = settled {
            error!(error = %e, "cannot settle lease");
        }
    }
    info!("worker stopped");
}

#[cfg(test)]
mod tests {
    use super::super::dispatcher::{SUCCESS_TEXT, TIMED_OUT_TEXT};
    use super::super::testing::Harness;
    use super::*;
    use crate::domain::{Status, TASK_ROUTING_KEY, TaskError};
    use crate::impls::InMemoryQueue;
    use crate::ports::MessagePublisher;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn unready_dependency_is_retried_then_timed_out() {
        let h = Harness::new(Some(|| TaskError::ChildrenNotReady("subnet".into()))).await;
        let queue = InMemoryQueue::new(TASK_ROUTING_KEY);
        queue.publish(TASK_ROUTING_KEY, h.message(0)).await.unwrap();

        let worker = Worker::spawn(Arc::new(queue.clone()), Arc::clone(&h.dispatcher));
        tokio::time::sleep(Duration::from_secs(5)).await;
        worker.shutdown_and_join().await;

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.requeued, 3);
        assert_eq!(counts.dead, 1);
        assert!(counts.is_idle());
        assert_eq!(h.builds(), 4);

        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, TIMED_OUT_TEXT);
        assert_eq!(h.last_status(), Some(Status::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_out_the_delay() {
        let h = Harness::new(Some(|| TaskError::ParentNotReady("vpc".into()))).await;
        let queue = InMemoryQueue::new(TASK_ROUTING_KEY);
        queue.publish(TASK_ROUTING_KEY, h.message(0)).await.unwrap();

        let worker = Worker::spawn(Arc::new(queue.clone()), Arc::clone(&h.dispatcher));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.builds(), 1);
        assert_eq!(queue.counts().await.unwrap().scheduled, 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(h.builds(), 2);
        worker.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn success_is_acked() {
        let h = Harness::new(None).await;
        let queue = InMemoryQueue::new(TASK_ROUTING_KEY);
        queue.publish(TASK_ROUTING_KEY, h.message(0)).await.unwrap();
        let worker = Worker::spawn(Arc::new(queue.clone()), Arc::clone(&h.dispatcher));

        while h.notifier.sent().await.is_empty() {
            tokio::task::yield_now().await;
        }
        worker.shutdown_and_join().await;

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.acked, 1);
        assert_eq!(counts.dead, 0);
        assert_eq!(h.notifier.sent().await[0].text, SUCCESS_TEXT);
    }

    #[tokio::test]
    async fn shutdown_interrupts_idle_wait() {
        let h = Harness::new(None).await;
        let queue = InMemoryQueue::new(TASK_ROUTING_KEY);
        let worker = Worker::spawn(Arc::new(queue), Arc::clone(&h.dispatcher));

        tokio::time::timeout(Duration::from_secs(1), worker.shutdown_and_join())
            .await
            .unwrap();
        assert_eq!(h.builds(), 0);
    }

    #[tokio::test]
    async fn closed_queue_ends_loop() {
        let h = Harness::new(None).await;
        let queue = InMemoryQueue::new(TASK_ROUTING_KEY);
        let worker = Worker::spawn(Arc::new(queue.clone()), Arc::clone(&h.dispatcher));
        queue.close().await;

        tokio::time::timeout(Duration::from_secs(1), worker.join)
            .await
            .unwrap()
            .unwrap();
    }
}
