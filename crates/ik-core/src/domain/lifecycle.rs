//! Entity lifecycle state machine.
//!
//! An entity carries two coordinates:
//! - `State`: the phase it is heading for (provision / destroy) or has reached.
//! - `Status`: progress inside that phase.
//!
//! All mutation goes through the named transitions on [`Lifecycle`]. The
//! functions are pure apart from updating the two fields; persisting the
//! result is the caller's job and must happen in the same transaction.
//!
//! State transitions (non-abstract entity, approval flow on):
//! - PROVISION/APPROVAL_PENDING -approve-> READY -execute-> QUEUED
//!   -make_in_progress-> IN_PROGRESS -make_done-> PROVISIONED/DONE
//! - PROVISIONED/DONE -destroy-> DESTROY/APPROVAL_PENDING -approve-> READY
//!   -execute-> QUEUED -> IN_PROGRESS -make_done-> DESTROYED/DONE
//! - any IN_PROGRESS -make_retry-> ERROR -execute-> QUEUED (retry path)

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::errors::{EntityWrongState, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Provision,
    Provisioned,
    Destroy,
    Destroyed,
}

impl State {
    pub const ALL: [State; 4] = [
        State::Provision,
        State::Provisioned,
        State::Destroy,
        State::Destroyed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            State::Provision => "provision",
            State::Provisioned => "provisioned",
            State::Destroy => "destroy",
            State::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    InProgress,
    Done,
    Error,
    ApprovalPending,
    Pending,
    Rejected,
    Ready,
    Enabled,
    Disabled,
    Unknown,
}

impl Status {
    pub const ALL: [Status; 11] = [
        Status::Queued,
        Status::InProgress,
        Status::Done,
        Status::Error,
        Status::ApprovalPending,
        Status::Pending,
        Status::Rejected,
        Status::Ready,
        Status::Enabled,
        Status::Disabled,
        Status::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::InProgress => "in_progress",
            Status::Done => "done",
            Status::Error => "error",
            Status::ApprovalPending => "approval_pending",
            Status::Pending => "pending",
            Status::Rejected => "rejected",
            Status::Ready => "ready",
            Status::Enabled => "enabled",
            Status::Disabled => "disabled",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted `(state, status)` pair that no sequence of transitions can
/// produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unreachable lifecycle pair: state={state}, status={status}")]
pub struct UnreachableLifecycle {
    pub state: State,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RawLifecycle {
    state: State,
    status: Status,
}

/// The `(state, status)` pair of one entity.
///
/// Fields are private: outside this module the pair only changes through
/// the transition methods, and deserialization goes through
/// [`Lifecycle::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLifecycle")]
pub struct Lifecycle {
    state: State,
    status: Status,
}

impl TryFrom<RawLifecycle> for Lifecycle {
    type Error = UnreachableLifecycle;

    fn try_from(raw: RawLifecycle) -> Result<Self, Self::Error> {
        Lifecycle::restore(raw.state, raw.status)
    }
}

impl Lifecycle {
    /// Lifecycle of a freshly created entity.
    pub fn new_entity(approval_flow: bool) -> Self {
        Self {
            state: State::Provision,
            status: pending_or_ready(approval_flow),
        }
    }

    /// Rehydrate a pair loaded from storage.
    pub fn restore(state: State, status: Status) -> Result<Self, UnreachableLifecycle> {
        if Self::is_reachable(state, status) {
            Ok(Self { state, status })
        } else {
            Err(UnreachableLifecycle { state, status })
        }
    }

    /// Whether some sequence of transitions from a freshly created entity
    /// yields this pair.
    pub fn is_reachable(state: State, status: Status) -> bool {
        use State::*;
        use Status::*;
        matches!(
            (state, status),
            (Provision, Ready | ApprovalPending | Rejected | Queued | InProgress | Error)
                | (Provisioned, Done | Ready | Queued | InProgress | Error)
                | (Destroy, ApprovalPending | Ready | Queued | InProgress | Error)
                | (Destroyed, Done | Ready | Queued | InProgress | Error)
        )
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    fn wrong(&self, transition: Transition) -> EntityWrongState {
        EntityWrongState {
            transition,
            state: self.state,
            status: self.status,
        }
    }

    pub fn reject(&mut self) -> Result<(), EntityWrongState> {
        match self.state {
            State::Provision => {
                self.status = Status::Rejected;
                Ok(())
            }
            State::Destroy => {
                self.status = Status::Done;
                self.state = State::Provisioned;
                Ok(())
            }
            _ => Err(self.wrong(Transition::Reject)),
        }
    }

    /// Abstract entities (templates) have no execution step, so approval
    /// settles them directly.
    pub fn approve(&mut self, is_abstract: bool) -> Result<(), EntityWrongState> {
        if !is_abstract {
            self.status = Status::Ready;
            return Ok(());
        }
        match self.state {
            State::Provision | State::Provisioned => {
                self.status = Status::Done;
                self.state = State::Provisioned;
                Ok(())
            }
            State::Destroy => {
                self.status = Status::Done;
                self.state = State::Destroyed;
                Ok(())
            }
            State::Destroyed => Err(self.wrong(Transition::Approve)),
        }
    }

    pub fn destroy(&mut self, approval_flow: bool) -> Result<(), EntityWrongState> {
        let allowed = self.state == State::Provisioned
            || (self.status == Status::Error && self.state == State::Provision);
        if !allowed {
            return Err(self.wrong(Transition::Destroy));
        }
        self.status = pending_or_ready(approval_flow);
        self.state = State::Destroy;
        Ok(())
    }

    /// Checks that the entity may be removed. Never mutates.
    pub fn delete(&self) -> Result<(), EntityWrongState> {
        let destroyed = self.status == Status::Done && self.state == State::Destroyed;
        let never_ran = self.state == State::Provision
            && matches!(
                self.status,
                Status::Ready | Status::Rejected | Status::ApprovalPending
            );
        if destroyed || never_ran {
            Ok(())
        } else {
            Err(self.wrong(Transition::Delete))
        }
    }

    pub fn execute(&mut self) -> Result<(), EntityWrongState> {
        let allowed = match self.status {
            Status::Ready => true,
            Status::Error => matches!(
                self.state,
                State::Provision | State::Destroy | State::Provisioned
            ),
            Status::Done => self.state == State::Provisioned,
            _ => false,
        };
        if !allowed {
            return Err(self.wrong(Transition::Execute));
        }
        self.status = Status::Queued;
        Ok(())
    }

    pub fn recreate(
        &mut self,
        approval_flow: bool,
        is_resource: bool,
    ) -> Result<(), EntityWrongState> {
        match (self.state, self.status) {
            (State::Provision, Status::Rejected) => {
                self.status = pending_or_ready(approval_flow && is_resource);
                Ok(())
            }
            (State::Destroy, Status::Ready) => {
                self.status = Status::Ready;
                self.state = State::Provisioned;
                Ok(())
            }
            (State::Destroyed, Status::Done) => {
                self.status = pending_or_ready(approval_flow && is_resource);
                self.state = State::Provision;
                Ok(())
            }
            _ => Err(self.wrong(Transition::Recreate)),
        }
    }

    /// No-op once the entity is destroyed. Returns whether anything changed.
    pub fn make_failed(&mut self) -> bool {
        if self.state == State::Destroyed {
            return false;
        }
        self.status = Status::Error;
        true
    }

    pub fn make_retry(&mut self) -> bool {
        if self.status != Status::InProgress {
            return false;
        }
        self.status = Status::Error;
        true
    }

    pub fn make_in_progress(&mut self) -> bool {
        if !self.can_start() {
            return false;
        }
        self.status = Status::InProgress;
        true
    }

    /// Strict `make_in_progress` used by the worker: a task may only start
    /// from a startable status.
    pub fn begin(&mut self) -> Result<(), EntityWrongState> {
        if self.make_in_progress() {
            Ok(())
        } else {
            Err(self.wrong(Transition::Begin))
        }
    }

    pub fn make_done(&mut self) -> bool {
        if self.status != Status::InProgress {
            return false;
        }
        self.status = Status::Done;
        match self.state {
            State::Destroy => self.state = State::Destroyed,
            State::Provision => self.state = State::Provisioned,
            State::Provisioned | State::Destroyed => {}
        }
        true
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == Status::InProgress
    }

    fn can_start(&self) -> bool {
        matches!(
            self.status,
            Status::Ready | Status::Error | Status::Done | Status::Queued
        )
    }
}

fn pending_or_ready(approval_required: bool) -> Status {
    if approval_required {
        Status::ApprovalPending
    } else {
        Status::Ready
    }
}
