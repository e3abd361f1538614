//! Subscription store backed by node facet properties.

use super::locks::KeyedLocks;
use crate::error::{RegistryError, Result};
use crate::repository::{FacetWrite, Repository};
use crate::types::{NodeId, SubscriptionRecord};
use tracing::debug;

/// A requested state for one principal's subscription on one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub node: NodeId,
    pub enabled: bool,
}

impl SubscriptionChange {
    pub fn enable(node: NodeId) -> Self {
        Self {
            node,
            enabled: true,
        }
    }

    pub fn disable(node: NodeId) -> Self {
        Self {
            node,
            enabled: false,
        }
    }
}

/// Reads and writes the per-node list of [`SubscriptionRecord`]s.
///
/// Each list lives in one facet property of its node. Read-modify-write of
/// a list is serialized per node; unrelated nodes proceed concurrently.
/// Multi-node sequences of one principal (conflict resolution followed by a
/// write, or a full scan) are serialized per (principal, repository).
pub struct SubscriptionStore {
    facet: String,
    property: String,
    node_locks: KeyedLocks<(String, NodeId)>,
    principal_locks: KeyedLocks<(String, String)>,
}

impl SubscriptionStore {
    pub fn new(facet: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            facet: facet.into(),
            property: property.into(),
            node_locks: KeyedLocks::new(),
            principal_locks: KeyedLocks::new(),
        }
    }

    /// Run `f` exclusively with respect to every other sequence of
    /// `username` in `repository`.
    pub fn with_principal_locked<R>(
        &self,
        repository: &str,
        username: &str,
        f: impl FnOnce() -> R,
    ) -> R {
        let key = (username.to_string(), repository.to_string());
        self.principal_locks.with_locked(&[key], f)
    }

    /// Facet carrying the subscription list.
    pub fn facet(&self) -> &str {
        &self.facet
    }

    /// All records on a node. A node without the facet has none.
    pub fn read(&self, repo: &dyn Repository, node: NodeId) -> Result<Vec<SubscriptionRecord>> {
        match repo.get_facet_property(node, &self.facet, &self.property)? {
            None => Ok(Vec::new()),
            Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| RegistryError::Deserialization(e.to_string())),
        }
    }

    /// Whether `username` holds an enabled record exactly on `node`.
    pub fn is_subscribed(&self, repo: &dyn Repository, node: NodeId, username: &str) -> Result<bool> {
        Ok(self
            .read(repo, node)?
            .iter()
            .any(|r| r.is_active_for(username)))
    }

    /// Nodes on which `username` holds an enabled record.
    ///
    /// Nodes removed while scanning are skipped.
    pub fn subscribed_nodes(&self, repo: &dyn Repository, username: &str) -> Result<Vec<NodeId>> {
        let mut nodes = Vec::new();
        for node in repo.nodes_with_facet(&self.facet)? {
            match self.is_subscribed(repo, node, username) {
                Ok(true) => nodes.push(node),
                Ok(false) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(nodes)
    }

    /// Usernames holding an enabled record on `node`.
    pub fn subscribers(&self, repo: &dyn Repository, node: NodeId) -> Result<Vec<String>> {
        Ok(self
            .read(repo, node)?
            .into_iter()
            .filter(|r| r.enabled)
            .map(|r| r.username)
            .collect())
    }

    /// Apply `changes` for `username` as a single unit.
    ///
    /// Every touched node is locked for the duration of the call, and all
    /// modified lists are written in one atomic batch: either every change
    /// lands or none does. Changes that are already in effect are skipped.
    /// Returns the changes that modified state.
    pub fn apply(
        &self,
        repo: &dyn Repository,
        username: &str,
        changes: &[SubscriptionChange],
    ) -> Result<Vec<SubscriptionChange>> {
        let keys: Vec<(String, NodeId)> = changes
            .iter()
            .map(|c| (repo.name().to_string(), c.node))
            .collect();

        self.node_locks.with_locked(&keys, || {
            let mut writes = Vec::new();
            let mut applied = Vec::new();

            for change in changes {
                let mut records = self.read(repo, change.node)?;
                if !set_enabled(&mut records, username, change.enabled) {
                    continue;
                }
                writes.push(FacetWrite {
                    node: change.node,
                    facet: self.facet.clone(),
                    property: self.property.clone(),
                    value: Some(serde_json::to_value(&records)?),
                });
                applied.push(*change);
            }

            if !writes.is_empty() {
                repo.set_facet_properties(writes)?;
                debug!(
                    repository = repo.name(),
                    principal = username,
                    changes = applied.len(),
                    "Subscription lists written"
                );
            }
            Ok(applied)
        })
    }
}

/// Flip `username`'s record to `enabled`, creating it if needed.
///
/// Returns false when the list already reflects the requested state.
fn set_enabled(records: &mut Vec<SubscriptionRecord>, username: &str, enabled: bool) -> bool {
    if enabled {
        if records.iter().any(|r| r.is_active_for(username)) {
            return false;
        }
        match records.iter_mut().find(|r| r.username == username) {
            Some(record) => record.enabled = true,
            None => records.push(SubscriptionRecord::new(username)),
        }
        true
    } else {
        let mut changed = false;
        for record in records.iter_mut().filter(|r| r.is_active_for(username)) {
            record.enabled = false;
            changed = true;
        }
        changed
    }
}
