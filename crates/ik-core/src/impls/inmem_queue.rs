//! In-memory message queue with delayed redelivery.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{Message, RedeliveryDirective};
use crate::ports::{MessageConsumer, MessageLease, MessagePublisher, QueueCounts, QueueError};

/// A message waiting out its redelivery delay.
///
/// Ordered so that `BinaryHeap` pops the earliest `due` first; `seq` keeps
/// equal deadlines FIFO.
#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    scheduled: BinaryHeap<Scheduled>,
    next_seq: u64,
    in_flight: usize,
    acked: usize,
    requeued: usize,
    dead: usize,
    closed: bool,
}

impl QueueState {
    fn promote_due(&mut self) {
        let now = Instant::now();
        while self.scheduled.peek().is_some_and(|s| s.due <= now) {
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.message);
            }
        }
    }

    fn counts(&self) -> QueueCounts {
        QueueCounts {
            queued: self.ready.len(),
            in_flight: self.in_flight,
            scheduled: self.scheduled.len(),
            acked: self.acked,
            requeued: self.requeued,
            dead: self.dead,
        }
    }
}

/// Single-routing-key queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    routing_key: Arc<str>,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryQueue {
    pub fn new(routing_key: impl Into<String>) -> Self {
        Self {
            routing_key: Arc::from(routing_key.into()),
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Wakes every waiting consumer; `lease` returns `None` from now on.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl MessagePublisher for InMemoryQueue {
    async fn publish(&self, routing_key: &str, message: Message) -> Result<(), QueueError> {
        if routing_key != &*self.routing_key {
            return Err(QueueError::UnknownRoute(routing_key.to_string()));
        }
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.ready.push_back(message);
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for InMemoryQueue {
    async fn lease(&self) -> Option<Box<dyn MessageLease>> {
        loop {
            // registered before checking state so a publish in between is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                state.promote_due();

                if let Some(message) = state.ready.pop_front() {
                    state.in_flight += 1;
                    return Some(Box::new(InMemoryLease {
                        message,
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                    }));
                }

                state.scheduled.peek().map(|s| s.due)
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(self.state.lock().await.counts())
    }
}

struct InMemoryLease {
    message: Message,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl MessageLease for InMemoryLease {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        state.acked += 1;
        Ok(())
    }

    async fn requeue(self: Box<Self>, directive: RedeliveryDirective) -> Result<(), QueueError> {
        if !directive.requeue {
            return self.ack().await;
        }

        let InMemoryLease {
            mut message,
            state,
            notify,
        } = *self;
        message.retries += 1;
        message.max_retries = Some(directive.max_attempts);
        message.delay_ms = Some(u64::try_from(directive.delay.as_millis()).unwrap_or(u64::MAX));
        debug!(
            retries = message.retries,
            max_attempts = directive.max_attempts,
            delay_ms = directive.delay.as_millis() as u64,
            "message scheduled for redelivery"
        );

        {
            let mut state = state.lock().await;
            state.in_flight = state.in_flight.saturating_sub(1);
            state.requeued += 1;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.scheduled.push(Scheduled {
                due: Instant::now() + directive.delay,
                seq,
                message,
            });
        }
        // a waiting consumer has to recompute its wake-up time
        notify.notify_one();
        Ok(())
    }

    async fn reject(self: Box<Self>, reason: String) -> Result<(), QueueError> {
        debug!(%reason, "message rejected");
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        state.dead += 1;
        Ok(())
    }
}
