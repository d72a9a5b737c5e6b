//! In-process implementations of the ports. Used by the worker binary and
//! as fakes in tests.

pub mod adapters;
pub mod cron_scheduler;
pub mod inmem_queue;
pub mod inmem_store;
pub mod notifiers;
pub mod sql;

pub use self::adapters::{RecordingGitProvider, RecordingProvisioner, StaticSecretManager};
pub use self::cron_scheduler::TokioCronScheduler;
pub use self::inmem_queue::InMemoryQueue;
pub use self::inmem_store::InMemoryStore;
pub use self::notifiers::{RecordingNotifier, TracingNotifier};
pub use self::sql::RecordingSqlExecutor;
