//! Interface to the hierarchical document repository.
//!
//! The registry never owns nodes. It consumes a [`Repository`] for:
//! - Existence and path/identifier resolution
//! - Live read-access checks
//! - Ancestor/descendant traversal
//! - Facet property storage (the persistence substrate for subscriptions)
//!
//! Structural changes flow back through [`StructuralChangeListener`], which
//! the repository invokes synchronously after each change is applied.
//!
//! [`MemoryRepository`] is an in-process implementation used by tests,
//! benchmarks and embedders without an external repository.

mod memory;

pub use memory::MemoryRepository;

use crate::error::Result;
use crate::types::{Node, NodeId, Principal};
use std::sync::Arc;

/// Lifecycle state of live nodes.
pub const PROJECT_STATE: &str = "project";

/// Terminal lifecycle state of soft-deleted nodes.
pub const DELETED_STATE: &str = "deleted";

/// A single facet property write.
///
/// `value = None` removes the property. A facet with no properties left is
/// detached from the node.
#[derive(Clone, Debug, PartialEq)]
pub struct FacetWrite {
    pub node: NodeId,
    pub facet: String,
    pub property: String,
    pub value: Option<serde_json::Value>,
}

/// What happened to a subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The node followed a lifecycle transition.
    LifecycleTransition { from: String, to: String },
    /// The node and its subtree were physically removed.
    Removed,
    /// The node was moved; paths below it changed.
    Moved,
    /// Access entries on the node changed; effective access below it may differ.
    AccessChanged,
}

/// Notification of a structural change rooted at `node`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuralChange {
    pub repository: String,
    pub node: NodeId,
    pub kind: ChangeKind,
}

/// Receives structural change notifications from a repository.
pub trait StructuralChangeListener: Send + Sync {
    fn on_structural_change(&self, change: &StructuralChange);
}

/// The repository collaborator.
pub trait Repository: Send + Sync {
    /// Repository name; root sets are keyed by it.
    fn name(&self) -> &str;

    /// Identifier of the repository root node.
    fn root(&self) -> NodeId;

    /// Fetch a node by identifier.
    fn get_document(&self, id: NodeId) -> Result<Node>;

    /// Fetch a node by absolute path.
    fn get_document_by_path(&self, path: &str) -> Result<Node>;

    /// Live read-access check.
    fn has_read_access(&self, principal: &Principal, id: NodeId) -> Result<bool>;

    /// Ancestors of a node, nearest parent first, ending at the root.
    fn get_ancestors(&self, id: NodeId) -> Result<Vec<Node>>;

    /// Every node strictly below `id`.
    fn get_descendants(&self, id: NodeId) -> Result<Vec<Node>>;

    /// Read one facet property; `None` when the facet or property is absent.
    fn get_facet_property(
        &self,
        id: NodeId,
        facet: &str,
        property: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Apply a batch of facet writes atomically: all of them or none.
    fn set_facet_properties(&self, writes: Vec<FacetWrite>) -> Result<()>;

    /// Write a single facet property.
    fn set_facet_property(
        &self,
        id: NodeId,
        facet: &str,
        property: &str,
        value: Option<serde_json::Value>,
    ) -> Result<()> {
        self.set_facet_properties(vec![FacetWrite {
            node: id,
            facet: facet.to_string(),
            property: property.to_string(),
            value,
        }])
    }

    /// Identifiers of every node carrying `facet`.
    fn nodes_with_facet(&self, facet: &str) -> Result<Vec<NodeId>>;

    /// Register a structural change listener.
    fn add_listener(&self, listener: Arc<dyn StructuralChangeListener>);
}
