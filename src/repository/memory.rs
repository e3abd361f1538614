//! In-memory repository implementation.

use super::{
    ChangeKind, FacetWrite, Repository, StructuralChange, StructuralChangeListener,
    DELETED_STATE, PROJECT_STATE,
};
use crate::error::{RegistryError, Result};
use crate::types::{Node, NodeId, Principal};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Document type of the root node.
const ROOT_TYPE: &str = "Root";

/// Read grant or denial for a user or group.
#[derive(Clone, Debug, PartialEq, Eq)]
struct AccessEntry {
    subject: String,
    granted: bool,
}

struct NodeEntry {
    name: String,
    doc_type: String,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    lifecycle_state: String,
    /// Evaluated in order; the first entry matching the principal wins.
    acl: Vec<AccessEntry>,
    facets: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl NodeEntry {
    fn new(name: &str, doc_type: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            doc_type: doc_type.to_string(),
            parent,
            children: BTreeMap::new(),
            lifecycle_state: PROJECT_STATE.to_string(),
            acl: Vec::new(),
            facets: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<NodeId, NodeEntry>,
}

impl Tree {
    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes.get(&id).ok_or(RegistryError::NodeNotFound(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes.get_mut(&id).ok_or(RegistryError::NodeNotFound(id))
    }

    fn path_of(&self, id: NodeId) -> Result<String> {
        let mut segments = Vec::new();
        let mut current = self.entry(id)?;
        while let Some(parent) = current.parent {
            segments.push(current.name.as_str());
            current = self.entry(parent)?;
        }
        if segments.is_empty() {
            return Ok("/".to_string());
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    fn resolve_path(&self, root: NodeId, path: &str) -> Result<NodeId> {
        let mut current = root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = *self
                .entry(current)?
                .children
                .get(segment)
                .ok_or_else(|| RegistryError::PathNotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn snapshot(&self, repository: &str, id: NodeId) -> Result<Node> {
        let entry = self.entry(id)?;
        Ok(Node {
            id,
            repository: repository.to_string(),
            name: entry.name.clone(),
            path: self.path_of(id)?,
            doc_type: entry.doc_type.clone(),
            lifecycle_state: entry.lifecycle_state.clone(),
        })
    }

    /// `id` followed by every node below it, breadth first.
    fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.entry(id)?;
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            out.push(next);
            if let Some(entry) = self.nodes.get(&next) {
                queue.extend(entry.children.values().copied());
            }
        }
        Ok(out)
    }
}

/// A thread-safe in-memory document repository.
///
/// Supports a path-addressed tree, inherited read ACLs, a `project`/`deleted`
/// lifecycle, facet properties and synchronous structural change
/// notification.
pub struct MemoryRepository {
    name: String,
    root: NodeId,
    tree: RwLock<Tree>,
    next_id: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn StructuralChangeListener>>>,
    /// Fail the next facet write (for atomicity tests).
    fail_next_write: AtomicBool,
}

impl MemoryRepository {
    /// Create an empty repository containing only its root node.
    pub fn new(name: impl Into<String>) -> Self {
        let root = NodeId(1);
        let mut tree = Tree::default();
        tree.nodes.insert(root, NodeEntry::new("", ROOT_TYPE, None));

        Self {
            name: name.into(),
            root,
            tree: RwLock::new(tree),
            next_id: AtomicU64::new(2),
            listeners: RwLock::new(Vec::new()),
            fail_next_write: AtomicBool::new(false),
        }
    }

    /// Create a child node under `parent_path`.
    pub fn create_node(&self, parent_path: &str, name: &str, doc_type: &str) -> Result<Node> {
        if name.is_empty() || name.contains('/') {
            return Err(RegistryError::InvalidOperation(format!(
                "Invalid node name: {:?}",
                name
            )));
        }

        let mut tree = self.tree.write();
        let parent = tree.resolve_path(self.root, parent_path)?;
        if tree.entry(parent)?.children.contains_key(name) {
            return Err(RegistryError::InvalidOperation(format!(
                "Node {} already exists under {}",
                name, parent_path
            )));
        }

        let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        tree.nodes.insert(id, NodeEntry::new(name, doc_type, Some(parent)));
        tree.entry_mut(parent)?.children.insert(name.to_string(), id);

        tree.snapshot(&self.name, id)
    }

    /// Grant or deny read access to a user or group on a node.
    ///
    /// Replaces any existing entry for the same subject.
    pub fn set_read_access(&self, id: NodeId, subject: &str, granted: bool) -> Result<()> {
        {
            let mut tree = self.tree.write();
            let entry = tree.entry_mut(id)?;
            match entry.acl.iter_mut().find(|ace| ace.subject == subject) {
                Some(ace) => ace.granted = granted,
                None => entry.acl.push(AccessEntry {
                    subject: subject.to_string(),
                    granted,
                }),
            }
        }
        self.notify(id, ChangeKind::AccessChanged);
        Ok(())
    }

    /// Drop every access entry set directly on a node.
    pub fn clear_access(&self, id: NodeId) -> Result<()> {
        self.tree.write().entry_mut(id)?.acl.clear();
        self.notify(id, ChangeKind::AccessChanged);
        Ok(())
    }

    /// Follow a lifecycle transition: `delete` or `undelete`.
    pub fn follow_transition(&self, id: NodeId, transition: &str) -> Result<()> {
        let (from, to) = {
            let mut tree = self.tree.write();
            let entry = tree.entry_mut(id)?;
            let to = match (transition, entry.lifecycle_state.as_str()) {
                ("delete", PROJECT_STATE) => DELETED_STATE,
                ("undelete", DELETED_STATE) => PROJECT_STATE,
                _ => {
                    return Err(RegistryError::InvalidOperation(format!(
                        "Transition {} not allowed from state {}",
                        transition, entry.lifecycle_state
                    )))
                }
            };
            let from = std::mem::replace(&mut entry.lifecycle_state, to.to_string());
            (from, to.to_string())
        };
        self.notify(id, ChangeKind::LifecycleTransition { from, to });
        Ok(())
    }

    /// Physically remove a node and its whole subtree, facets included.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(RegistryError::InvalidOperation(
                "Cannot remove the repository root".into(),
            ));
        }
        {
            let mut tree = self.tree.write();
            let subtree = tree.subtree(id)?;
            let entry = tree.entry(id)?;
            let (parent, name) = (entry.parent, entry.name.clone());
            if let Some(parent) = parent {
                tree.entry_mut(parent)?.children.remove(&name);
            }
            for node in subtree {
                tree.nodes.remove(&node);
            }
        }
        self.notify(id, ChangeKind::Removed);
        Ok(())
    }

    /// Move a node under another parent. The identifier is preserved.
    pub fn move_node(&self, id: NodeId, new_parent_path: &str) -> Result<Node> {
        if id == self.root {
            return Err(RegistryError::InvalidOperation(
                "Cannot move the repository root".into(),
            ));
        }
        let node = {
            let mut tree = self.tree.write();
            let new_parent = tree.resolve_path(self.root, new_parent_path)?;
            if tree.subtree(id)?.contains(&new_parent) {
                return Err(RegistryError::InvalidOperation(format!(
                    "Cannot move {} below itself",
                    id
                )));
            }
            let entry = tree.entry(id)?;
            let (old_parent, name) = (entry.parent, entry.name.clone());
            if tree.entry(new_parent)?.children.contains_key(&name) {
                return Err(RegistryError::InvalidOperation(format!(
                    "Node {} already exists under {}",
                    name, new_parent_path
                )));
            }
            if let Some(old_parent) = old_parent {
                tree.entry_mut(old_parent)?.children.remove(&name);
            }
            tree.entry_mut(new_parent)?.children.insert(name, id);
            tree.entry_mut(id)?.parent = Some(new_parent);
            tree.snapshot(&self.name, id)?
        };
        self.notify(id, ChangeKind::Moved);
        Ok(node)
    }

    /// Make the next facet write fail without applying anything.
    pub fn inject_write_failure(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Deliver a change to every listener, outside the tree lock.
    fn notify(&self, node: NodeId, kind: ChangeKind) {
        let change = StructuralChange {
            repository: self.name.clone(),
            node,
            kind,
        };
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_structural_change(&change);
        }
    }
}

impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn get_document(&self, id: NodeId) -> Result<Node> {
        self.tree.read().snapshot(&self.name, id)
    }

    fn get_document_by_path(&self, path: &str) -> Result<Node> {
        let tree = self.tree.read();
        let id = tree.resolve_path(self.root, path)?;
        tree.snapshot(&self.name, id)
    }

    fn has_read_access(&self, principal: &Principal, id: NodeId) -> Result<bool> {
        let tree = self.tree.read();
        tree.entry(id)?;
        if principal.administrator {
            return Ok(true);
        }

        let mut current = Some(id);
        while let Some(node) = current {
            let entry = tree.entry(node)?;
            if let Some(ace) = entry.acl.iter().find(|ace| principal.matches(&ace.subject)) {
                return Ok(ace.granted);
            }
            current = entry.parent;
        }
        Ok(false)
    }

    fn get_ancestors(&self, id: NodeId) -> Result<Vec<Node>> {
        let tree = self.tree.read();
        let mut ancestors = Vec::new();
        let mut current = tree.entry(id)?.parent;
        while let Some(parent) = current {
            ancestors.push(tree.snapshot(&self.name, parent)?);
            current = tree.entry(parent)?.parent;
        }
        Ok(ancestors)
    }

    fn get_descendants(&self, id: NodeId) -> Result<Vec<Node>> {
        let tree = self.tree.read();
        tree.subtree(id)?
            .into_iter()
            .skip(1)
            .map(|node| tree.snapshot(&self.name, node))
            .collect()
    }

    fn get_facet_property(
        &self,
        id: NodeId,
        facet: &str,
        property: &str,
    ) -> Result<Option<serde_json::Value>> {
        let tree = self.tree.read();
        Ok(tree
            .entry(id)?
            .facets
            .get(facet)
            .and_then(|props| props.get(property))
            .cloned())
    }

    fn set_facet_properties(&self, writes: Vec<FacetWrite>) -> Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(RegistryError::Repository("Injected write failure".into()));
        }

        let mut tree = self.tree.write();

        // Validate the whole batch before touching anything
        for write in &writes {
            tree.entry(write.node)?;
        }

        for write in writes {
            let entry = tree.entry_mut(write.node)?;
            match write.value {
                Some(value) => {
                    entry
                        .facets
                        .entry(write.facet)
                        .or_default()
                        .insert(write.property, value);
                }
                None => {
                    if let Some(props) = entry.facets.get_mut(&write.facet) {
                        props.remove(&write.property);
                        if props.is_empty() {
                            entry.facets.remove(&write.facet);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn nodes_with_facet(&self, facet: &str) -> Result<Vec<NodeId>> {
        let tree = self.tree.read();
        let mut ids: Vec<NodeId> = tree
            .nodes
            .iter()
            .filter(|(_, entry)| entry.facets.contains_key(facet))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn add_listener(&self, listener: Arc<dyn StructuralChangeListener>) {
        self.listeners.write().push(listener);
    }
}
