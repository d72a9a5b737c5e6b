//! Domain identifiers (strongly-typed IDs).
//!
//! Every identifier is a 128-bit ULID wrapped in `Id<T>`, where `T` is a
//! zero-sized marker. `EntityId` and `UserId` cannot be mixed up at compile
//! time, while the wire format stays a bare ULID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each ID kind.
///
/// The prefix is only used for `Display` (log output). Serialization and
/// parsing use the bare ULID.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Parses a bare ULID. A `Display`-style prefix is accepted too, so ids
/// copied from log lines round-trip.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {}

impl IdMarker for Entity {
    fn prefix() -> &'static str {
        "entity-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trace {}

impl IdMarker for Trace {
    fn prefix() -> &'static str {
        "trace-"
    }
}

/// Identifier of a provisionable entity (resource, storage, workspace, ...).
pub type EntityId = Id<Entity>;

/// Identifier of the user who requested a task.
pub type UserId = Id<User>;

/// Identifier of a scheduler-managed job.
pub type JobId = Id<Job>;

/// Correlates log lines of one task across redeliveries.
pub type TraceId = Id<Trace>;
