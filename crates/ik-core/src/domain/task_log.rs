//! Per-task log buffer, persisted next to the entity revision it describes.
//!
//! A controller appends to its `TaskLog` while it runs and mirrors every
//! line to `tracing`. The buffer is flushed once per task outcome as a
//! `TaskLogRecord` keyed by entity id, `revision_number` and trace id, so
//! the lines of a retried task land in one record per attempt. Flushing
//! drains the buffer; a second flush with nothing new is a no-op.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EntityId, TraceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLog {
    entries: Vec<LogEntry>,
}

impl TaskLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>, at: DateTime<Utc>) {
        self.entries.push(LogEntry {
            level,
            message: message.into(),
            at,
        });
    }

    /// Appends another log (e.g. from a nested task), keeping order.
    pub fn extend(&mut self, other: TaskLog) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn take(&mut self) -> TaskLog {
        std::mem::take(self)
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

/// What the store receives from `save_logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogRecord {
    pub entity_id: EntityId,
    pub revision_number: u64,
    pub trace_id: TraceId,
    pub entries: Vec<LogEntry>,
}
