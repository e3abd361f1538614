//! Core types for the synchronization-root registry.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identifier of a repository node.
///
/// Identifiers survive moves; paths do not.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Group every principal belongs to implicitly.
pub const EVERYONE: &str = "Everyone";

/// An authenticated identity evaluated for access control.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User name; subscriptions are recorded under this name.
    pub name: String,
    /// Group memberships at the time the principal was resolved.
    pub groups: Vec<String>,
    /// Administrators bypass access checks.
    pub administrator: bool,
}

impl Principal {
    /// A regular user without group memberships.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            administrator: false,
        }
    }

    /// A system administrator.
    pub fn administrator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            administrator: true,
        }
    }

    /// Add a group membership.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Check whether an access entry subject designates this principal.
    pub fn matches(&self, subject: &str) -> bool {
        subject == self.name || subject == EVERYONE || self.groups.iter().any(|g| g == subject)
    }
}

/// A principal's view onto one repository.
#[derive(Clone, Debug)]
pub struct Session {
    pub principal: Principal,
    pub repository: String,
}

impl Session {
    pub fn new(principal: Principal, repository: impl Into<String>) -> Self {
        Self {
            principal,
            repository: repository.into(),
        }
    }
}

/// Snapshot of a repository node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Name of the owning repository.
    pub repository: String,
    pub name: String,
    /// Absolute path at the time the snapshot was taken.
    pub path: String,
    /// Document type, e.g. `Workspace` or `Folder`.
    pub doc_type: String,
    /// Current lifecycle state.
    pub lifecycle_state: String,
}

/// One principal's subscription on one node.
///
/// `enabled = false` is a soft-delete marker: the record stays on the node
/// but is excluded from every resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub username: String,
    pub enabled: bool,
    pub creation_date: Timestamp,
}

impl SubscriptionRecord {
    /// A fresh enabled record.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            enabled: true,
            creation_date: Timestamp::now(),
        }
    }

    /// Whether this record is an enabled subscription of `username`.
    pub fn is_active_for(&self, username: &str) -> bool {
        self.enabled && self.username == username
    }
}

/// Resolved synchronization roots of one principal in one repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SynchronizationRoots {
    /// Repository the roots belong to.
    pub repository: String,
    /// Identifiers of the root nodes.
    pub refs: HashSet<NodeId>,
    /// Paths of the root nodes, resolved at computation time.
    pub paths: HashSet<String>,
}

impl SynchronizationRoots {
    /// An empty root set for a repository.
    pub fn empty(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            ..Default::default()
        }
    }

    /// Add a root node.
    pub fn insert(&mut self, node: &Node) {
        self.refs.insert(node.id);
        self.paths.insert(node.path.clone());
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Canonical `repository:id` definitions, sorted by id.
    pub fn definitions(&self) -> Vec<String> {
        let mut ids: Vec<NodeId> = self.refs.iter().copied().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| format!("{}:{}", self.repository, id))
            .collect()
    }
}
