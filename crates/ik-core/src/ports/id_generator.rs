//! IdGenerator port.
//!
//! ULIDs are time-sortable and need no coordination between worker
//! processes; the timestamp half comes from the injected `Clock`.

use ulid::Ulid;

use crate::domain::ids::{EntityId, Id, IdMarker, JobId, TraceId, UserId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_entity_id(&self) -> EntityId;

    fn generate_user_id(&self) -> UserId;

    fn generate_job_id(&self) -> JobId;

    /// Used when a message arrives without a trace id, and for messages
    /// the scheduler publishes.
    fn generate_trace_id(&self) -> TraceId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_entity_id(&self) -> EntityId {
        self.next()
    }

    fn generate_user_id(&self) -> UserId {
        self.next()
    }

    fn generate_job_id(&self) -> JobId {
        self.next()
    }

    fn generate_trace_id(&self) -> TraceId {
        self.next()
    }
}
