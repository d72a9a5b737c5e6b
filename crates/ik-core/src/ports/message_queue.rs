//! Message transport port.
//!
//! The transport provides competing-consumer delivery: a consumer leases one
//! message and must settle the lease with `ack`, `requeue` or `reject`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Message, RedeliveryDirective};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queue bound to routing key {0}")]
    UnknownRoute(String),

    #[error("queue is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Ready to be leased.
    pub queued: usize,
    /// Leased and not yet settled.
    pub in_flight: usize,
    /// Waiting out a redelivery delay.
    pub scheduled: usize,
    pub acked: usize,
    pub requeued: usize,
    /// Rejected as terminal.
    pub dead: usize,
}

impl QueueCounts {
    /// Nothing left to deliver or settle.
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.in_flight == 0 && self.scheduled == 0
    }
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, message: Message) -> Result<(), QueueError>;
}

/// A leased message. Exactly one of the settling methods consumes it.
#[async_trait]
pub trait MessageLease: Send {
    fn message(&self) -> &Message;

    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Redeliver per `directive`. The transport bumps `retries`.
    async fn requeue(self: Box<Self>, directive: RedeliveryDirective) -> Result<(), QueueError>;

    /// Terminal acknowledgment; the message is never redelivered.
    async fn reject(self: Box<Self>, reason: String) -> Result<(), QueueError>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Waits for the next message. `None` once the queue is closed.
    async fn lease(&self) -> Option<Box<dyn MessageLease>>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}
