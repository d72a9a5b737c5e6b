//! Notification sink port: per-user task outcome messages.
//!
//! The dispatcher sends at most one notification per task outcome: success,
//! time-out after the retry budget, or the short class name of a terminal
//! error. Retries in flight stay silent. Error internals never reach the
//! text; they go to the task log instead. Delivery is best effort and a
//! failing sink never changes the outcome of the task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EntityId, UserId};

#[derive(Debug, Error)]
#[error("failed to publish notification: {0}")]
pub struct NotifyError(pub String);

/// Human-readable outcome, routed to `user_id`. Never carries an error
/// chain, only a short classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub entity_name: String,
    pub entity_id: EntityId,
    pub user_id: UserId,
    pub text: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError>;
}
