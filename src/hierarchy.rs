//! Tree-aware conflict detection for root registration.
//!
//! A principal may hold at most one enabled subscription along any
//! ancestor/descendant chain of a repository. Before a node is registered
//! the resolver checks:
//! - ancestors: an enabled ancestor subscription covers the node, so the
//!   registration is redundant;
//! - descendants: enabled descendant subscriptions are dominated by the new
//!   root and must be disabled.

use crate::error::{RegistryError, Result};
use crate::repository::Repository;
use crate::subscriptions::SubscriptionStore;
use crate::types::{Node, NodeId};

/// Outcome of a conflict check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Descendants whose subscriptions the new root supersedes.
    pub to_disable: Vec<NodeId>,
    /// An ancestor is already a root; registering is a no-op.
    ///
    /// Coverage ignores read access: an ancestor root the principal can no
    /// longer read still covers the node, although resolution filters it.
    pub already_covered: bool,
    /// The covering ancestor, when `already_covered`.
    pub covered_by: Option<NodeId>,
}

/// Resolves registration conflicts against the subscription store.
pub struct HierarchyResolver<'a> {
    store: &'a SubscriptionStore,
    deleted_state: &'a str,
}

impl<'a> HierarchyResolver<'a> {
    pub fn new(store: &'a SubscriptionStore, deleted_state: &'a str) -> Self {
        Self {
            store,
            deleted_state,
        }
    }

    /// Compute the changes needed to make `target` a root of `username`.
    ///
    /// Fails with `NodeNotFound` when `target` does not exist or sits in a
    /// deleted subtree.
    pub fn resolve_conflicts(
        &self,
        repo: &dyn Repository,
        username: &str,
        target: NodeId,
    ) -> Result<Resolution> {
        let node = repo.get_document(target)?;
        let ancestors = repo.get_ancestors(target)?;
        if self.in_deleted_chain(&node, &ancestors) {
            return Err(RegistryError::NodeNotFound(target));
        }

        for ancestor in &ancestors {
            if self.store.is_subscribed(repo, ancestor.id, username)? {
                return Ok(Resolution {
                    to_disable: Vec::new(),
                    already_covered: true,
                    covered_by: Some(ancestor.id),
                });
            }
        }

        let mut to_disable = Vec::new();
        for descendant in repo.get_descendants(target)? {
            match self.store.is_subscribed(repo, descendant.id, username) {
                Ok(true) => to_disable.push(descendant.id),
                Ok(false) => {}
                // Removed while scanning: its records went with it
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(Resolution {
            to_disable,
            already_covered: false,
            covered_by: None,
        })
    }

    /// Whether `node` or one of its `ancestors` is in the deleted state.
    pub fn in_deleted_chain(&self, node: &Node, ancestors: &[Node]) -> bool {
        node.lifecycle_state == self.deleted_state
            || ancestors
                .iter()
                .any(|a| a.lifecycle_state == self.deleted_state)
    }
}
