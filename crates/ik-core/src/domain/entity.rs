//! Entity model handed to task controllers by the persistence layer.
//!
//! An `Entity` is one piece of managed infrastructure (a repository, one of
//! its versions, a storage bucket, a resource, a workspace, an executor)
//! together with its `Lifecycle` and its place in the dependency graph.
//! `parents` must be provisioned before this entity can be; `children` must
//! be released before it can be destroyed. The readiness predicates here
//! answer those two questions for a single relative; which relatives gate a
//! given kind is decided by its controller.
//!
//! `ControllerKind` is the routing key carried on task messages. Every
//! controller kind manages exactly one entity kind; templates are abstract
//! and have no controller.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::{EntityId, UserId};
use super::lifecycle::{Lifecycle, State, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Template,
    Resource,
    SourceCode,
    SourceCodeVersion,
    Storage,
    Secret,
    Executor,
    Workspace,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Template => "template",
            EntityKind::Resource => "resource",
            EntityKind::SourceCode => "source_code",
            EntityKind::SourceCodeVersion => "source_code_version",
            EntityKind::Storage => "storage",
            EntityKind::Secret => "secret",
            EntityKind::Executor => "executor",
            EntityKind::Workspace => "workspace",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisionable infrastructure object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    /// Bumped by the persistence layer whenever user-visible fields change.
    /// Lifecycle transitions leave it alone.
    pub revision_number: u64,
    /// Templates are abstract: approval settles them without execution.
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    /// Entities this one is built on (must be provisioned first).
    #[serde(default)]
    pub parents: Vec<EntityId>,
    /// Entities built on this one (must be destroyed first).
    #[serde(default)]
    pub children: Vec<EntityId>,
}

impl Entity {
    pub fn new(
        id: EntityId,
        kind: EntityKind,
        name: impl Into<String>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            lifecycle,
            revision_number: 1,
            is_abstract: kind == EntityKind::Template,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn with_child(mut self, child: EntityId) -> Self {
        self.children.push(child);
        self
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    pub fn status(&self) -> Status {
        self.lifecycle.status()
    }

    /// A parent is usable once its provisioning finished.
    pub fn is_ready_as_parent(&self) -> bool {
        self.state() == State::Provisioned && self.status() == Status::Done
    }

    /// A child stops blocking its parent's destruction once it is destroyed
    /// or if it never started provisioning.
    pub fn is_released_as_child(&self) -> bool {
        match self.state() {
            State::Destroyed => self.status() == Status::Done,
            State::Provision => matches!(
                self.status(),
                Status::Ready | Status::Rejected | Status::ApprovalPending
            ),
            State::Provisioned | State::Destroy => false,
        }
    }
}

/// The user who requested a task; notifications are routed to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub identifier: String,
}

/// Which task controller handles a message (`entity_controller` field).
///
/// A closed set: adding a kind means adding a variant, and every `match` on
/// it has to handle the new case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    SourceCode,
    SourceCodeVersion,
    Storage,
    Resource,
    Workspace,
    Executor,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 6] = [
        ControllerKind::SourceCode,
        ControllerKind::SourceCodeVersion,
        ControllerKind::Storage,
        ControllerKind::Resource,
        ControllerKind::Workspace,
        ControllerKind::Executor,
    ];

    pub fn as_str(self) -> &'static str {
        self.entity_kind().as_str()
    }

    /// Kind of entity the controller loads.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            ControllerKind::SourceCode => EntityKind::SourceCode,
            ControllerKind::SourceCodeVersion => EntityKind::SourceCodeVersion,
            ControllerKind::Storage => EntityKind::Storage,
            ControllerKind::Resource => EntityKind::Resource,
            ControllerKind::Workspace => EntityKind::Workspace,
            ControllerKind::Executor => EntityKind::Executor,
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity controller: {0}")]
pub struct UnknownController(pub String);

impl FromStr for ControllerKind {
    type Err = UnknownController;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControllerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownController(s.to_string()))
    }
}
