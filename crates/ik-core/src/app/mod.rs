//! App - application layer.
//!
//! Combines the ports into the running engine.
//!
//! # Components
//! - **Dispatcher**: one message in, redelivery directive or terminal failure out
//! - **Worker**: consume loop around the dispatcher
//! - **Scheduler**: cron jobs and the job poller
//! - **JobExecutor**: in-process body of scheduler jobs
//! - **DefaultControllerFactory** and **controllers**: per-kind entity tasks
//! - **EngineBuilder**: fail-fast wiring

pub mod builder;
pub mod controllers;
pub mod dispatcher;
pub mod factory;
pub mod job_executor;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
mod testing;

pub use self::builder::{BuildError, Engine, EngineBuilder, RunningEngine};
pub use self::controllers::{EntityTask, Pipeline, Readiness, StepContext};
pub use self::dispatcher::{Dispatcher, SUCCESS_TEXT, TIMED_OUT_TEXT};
pub use self::factory::DefaultControllerFactory;
pub use self::job_executor::JobExecutor;
pub use self::scheduler::{POLL_JOB_ID, Scheduler, SchedulerError};
pub use self::worker::Worker;
