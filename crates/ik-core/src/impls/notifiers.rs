//! Notification sinks.
//!
//! `RecordingNotifier` keeps every notification in memory behind a shared
//! handle, so a test can clone it into the engine and inspect what was sent
//! afterwards. `TracingNotifier` is the demo binary's sink: each
//! notification becomes one `info` event with the user and entity as
//! fields.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::ports::{Notification, NotificationSink, NotifyError};

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

/// Emits each notification as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            user_id = %notification.user_id,
            entity_id = %notification.entity_id,
            entity_name = %notification.entity_name,
            "{}",
            notification.text
        );
        Ok(())
    }
}
