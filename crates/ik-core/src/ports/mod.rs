//! Ports: narrow interfaces to the collaborators around the engine
//! (persistence, transport, cron, notifications, infrastructure tooling).

pub mod adapters;
pub mod clock;
pub mod controller;
pub mod cron;
pub mod entity_store;
pub mod id_generator;
pub mod message_queue;
pub mod notifier;
pub mod sql;

pub use self::adapters::{GitProvider, Provisioner, SecretManager, Secrets};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::controller::{ControllerFactory, TaskController};
pub use self::cron::{CronCallback, CronEngine, CronError, CronFuture, Trigger};
pub use self::entity_store::{EntityStore, JobStore, StoreError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_queue::{
    MessageConsumer, MessageLease, MessagePublisher, QueueCounts, QueueError,
};
pub use self::notifier::{Notification, NotificationSink, NotifyError};
pub use self::sql::{SqlError, SqlExecutor};
