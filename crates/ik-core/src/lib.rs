//! ik-core
//!
//! Task orchestration engine for infrastructure entities.
//!
//! # Modules
//! - **domain**: ids, entity lifecycle, messages, jobs, error taxonomy, retry decision
//! - **ports**: collaborator traits (EntityStore, MessageConsumer, CronEngine, NotificationSink, ...)
//! - **app**: dispatcher, worker, scheduler, job executor, controller factory
//! - **impls**: in-memory implementations (InMemoryQueue, InMemoryStore, TokioCronScheduler, ...)
//! - **config**: worker configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
