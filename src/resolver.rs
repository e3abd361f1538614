//! Access-filtered resolution of a principal's synchronization roots.

use crate::cache::{CacheKey, RootCache};
use crate::error::Result;
use crate::hierarchy::HierarchyResolver;
use crate::repository::Repository;
use crate::subscriptions::SubscriptionStore;
use crate::types::{Node, NodeId, Principal, SynchronizationRoots};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolves the roots a principal may still synchronize.
///
/// Every enabled subscription is re-checked at resolution time: the node
/// must still exist, must not be in (or below) the deleted lifecycle state,
/// and must still be readable by the principal. Paths are resolved fresh.
pub struct AccessFilteredResolver<'a> {
    store: &'a SubscriptionStore,
    hierarchy: HierarchyResolver<'a>,
    cache: &'a RootCache,
}

impl<'a> AccessFilteredResolver<'a> {
    pub fn new(store: &'a SubscriptionStore, cache: &'a RootCache, deleted_state: &'a str) -> Self {
        Self {
            store,
            hierarchy: HierarchyResolver::new(store, deleted_state),
            cache,
        }
    }

    /// Roots of `principal` in one repository, cache first.
    pub fn resolve(&self, repo: &dyn Repository, principal: &Principal) -> Result<SynchronizationRoots> {
        let key = CacheKey::for_principal(principal, repo.name());
        if let Some(roots) = self.cache.get(&key) {
            trace!(principal = %principal.name, repository = repo.name(), "Root cache hit");
            return Ok(roots);
        }

        // Under the principal lock the scan never observes half of a registration
        let generation = self.cache.generation();
        let roots = self
            .store
            .with_principal_locked(repo.name(), &principal.name, || self.compute(repo, principal))?;
        if !self.cache.insert(key, roots.clone(), generation) {
            debug!(
                principal = %principal.name,
                repository = repo.name(),
                "Invalidated during resolution, result not cached"
            );
        }
        Ok(roots)
    }

    /// Roots of `principal` in every given repository, keyed by repository name.
    pub fn resolve_all(
        &self,
        repos: &[Arc<dyn Repository>],
        principal: &Principal,
    ) -> Result<HashMap<String, SynchronizationRoots>> {
        repos
            .iter()
            .map(|repo| Ok((repo.name().to_string(), self.resolve(repo.as_ref(), principal)?)))
            .collect()
    }

    /// Full scan-and-filter, bypassing the cache.
    ///
    /// A surviving root below another surviving root of the same principal
    /// (possible after a move) is dominated and left out.
    pub fn compute(&self, repo: &dyn Repository, principal: &Principal) -> Result<SynchronizationRoots> {
        let mut visible = Vec::new();
        for id in self.store.subscribed_nodes(repo, &principal.name)? {
            match self.visible_root(repo, principal, id) {
                Ok(Some(root)) => visible.push(root),
                Ok(None) => {}
                // Removed concurrently
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let survivors: HashSet<NodeId> = visible.iter().map(|(node, _)| node.id).collect();
        let mut roots = SynchronizationRoots::empty(repo.name());
        for (node, ancestors) in &visible {
            match ancestors.iter().find(|a| survivors.contains(*a)) {
                Some(by) => trace!(node = %node.id, by = %by, "Dominated root skipped"),
                None => roots.insert(node),
            }
        }
        debug!(
            principal = %principal.name,
            repository = repo.name(),
            roots = roots.len(),
            "Synchronization roots computed"
        );
        Ok(roots)
    }

    /// The node and its ancestor ids, when it still counts as a root.
    fn visible_root(
        &self,
        repo: &dyn Repository,
        principal: &Principal,
        id: NodeId,
    ) -> Result<Option<(Node, Vec<NodeId>)>> {
        let node = repo.get_document(id)?;
        let ancestors = repo.get_ancestors(id)?;
        if self.hierarchy.in_deleted_chain(&node, &ancestors) {
            return Ok(None);
        }
        if !repo.has_read_access(principal, id)? {
            return Ok(None);
        }
        Ok(Some((node, ancestors.into_iter().map(|a| a.id).collect())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryRepository, DELETED_STATE};
    use crate::subscriptions::SubscriptionChange;

    struct Fixture {
        repo: MemoryRepository,
        store: SubscriptionStore,
        cache: RootCache,
        workspace: NodeId,
        folder: NodeId,
    }

    fn fixture() -> Fixture {
        let repo = MemoryRepository::new("default");
        let workspace = repo.create_node("/", "ws", "Workspace").unwrap().id;
        let folder = repo.create_node("/ws", "folder", "Folder").unwrap().id;
        repo.set_read_access(workspace, "members", true).unwrap();
        Fixture {
            repo,
            store: SubscriptionStore::new("DriveSynchronized", "drv:subscriptions"),
            cache: RootCache::new(16),
            workspace,
            folder,
        }
    }

    fn member(name: &str) -> Principal {
        Principal::user(name).with_group("members")
    }

    #[test]
    fn test_resolves_enabled_readable_roots() {
        let f = fixture();
        f.store
            .apply(&f.repo, "user1", &[SubscriptionChange::enable(f.folder)])
            .unwrap();
        let resolver = AccessFilteredResolver::new(&f.store, &f.cache, DELETED_STATE);

        let roots = resolver.resolve(&f.repo, &member("user1")).unwrap();
        assert_eq!(roots.repository, "default");
        assert!(roots.refs.contains(&f.folder));
        assert!(roots.paths.contains("/ws/folder"));
        assert_eq!(f.cache.len(), 1);

        assert!(resolver.resolve(&f.repo, &member("user2")).unwrap().is_empty());
    }

    #[test]
    fn test_revoked_access_filtered() {
        let f = fixture();
        f.store
            .apply(&f.repo, "user1", &[SubscriptionChange::enable(f.folder)])
            .unwrap();
        f.repo.set_read_access(f.folder, "user1", false).unwrap();
        let resolver = AccessFilteredResolver::new(&f.store, &f.cache, DELETED_STATE);

        assert!(resolver.compute(&f.repo, &member("user1")).unwrap().is_empty());
        // The record itself is kept
        assert!(f.store.is_subscribed(&f.repo, f.folder, "user1").unwrap());
    }

    #[test]
    fn test_deleted_subtree_filtered() {
        let f = fixture();
        f.store
            .apply(&f.repo, "user1", &[SubscriptionChange::enable(f.folder)])
            .unwrap();
        f.repo.follow_transition(f.workspace, "delete").unwrap();
        let resolver = AccessFilteredResolver::new(&f.store, &f.cache, DELETED_STATE);

        assert!(resolver.compute(&f.repo, &member("user1")).unwrap().is_empty());
    }

    #[test]
    fn test_paths_follow_moves() {
        let f = fixture();
        f.store
            .apply(&f.repo, "user1", &[SubscriptionChange::enable(f.folder)])
            .unwrap();
        f.repo.move_node(f.folder, "/").unwrap();
        let resolver = AccessFilteredResolver::new(&f.store, &f.cache, DELETED_STATE);

        // Moved out of the workspace granting access
        let admin = Principal::administrator("user1");
        let roots = resolver.compute(&f.repo, &admin).unwrap();
        assert!(roots.refs.contains(&f.folder));
        assert!(roots.paths.contains("/folder"));
    }

    #[test]
    fn test_moved_root_dominated_by_ancestor_root() {
        let f = fixture();
        let other = f.repo.create_node("/", "other", "Workspace").unwrap().id;
        let nested = f.repo.create_node("/other", "nested", "Folder").unwrap().id;
        f.repo.set_read_access(other, "members", true).unwrap();
        f.store
            .apply(
                &f.repo,
                "user1",
                &[SubscriptionChange::enable(f.workspace), SubscriptionChange::enable(nested)],
            )
            .unwrap();
        let resolver = AccessFilteredResolver::new(&f.store, &f.cache, DELETED_STATE);
        assert_eq!(resolver.compute(&f.repo, &member("user1")).unwrap().len(), 2);

        f.repo.move_node(nested, "/ws").unwrap();
        let roots = resolver.compute(&f.repo, &member("user1")).unwrap();
        assert_eq!(roots.refs, HashSet::from([f.workspace]));

        // Once the ancestor root is unreadable the moved root is effective again
        f.repo.set_read_access(f.workspace, "members", false).unwrap();
        f.repo.set_read_access(nested, "user1", true).unwrap();
        let roots = resolver.compute(&f.repo, &member("user1")).unwrap();
        assert_eq!(roots.refs, HashSet::from([nested]));
    }

    #[test]
    fn test_group_view_not_shared_through_cache() {
        let f = fixture();
        f.store
            .apply(&f.repo, "user1", &[SubscriptionChange::enable(f.folder)])
            .unwrap();
        let resolver = AccessFilteredResolver::new(&f.store, &f.cache, DELETED_STATE);

        assert_eq!(resolver.resolve(&f.repo, &member("user1")).unwrap().len(), 1);
        assert!(resolver.resolve(&f.repo, &Principal::user("user1")).unwrap().is_empty());
        assert_eq!(resolver.resolve(&f.repo, &member("user1")).unwrap().len(), 1);
        assert_eq!(f.cache.len(), 2);
    }

    #[test]
    fn test_cache_hit_serves_previous_result() {
        let f = fixture();
        let resolver = AccessFilteredResolver::new(&f.store, &f.cache, DELETED_STATE);
        assert!(resolver.resolve(&f.repo, &member("user1")).unwrap().is_empty());

        // Written behind the registry's back: not visible until invalidated
        f.store
            .apply(&f.repo, "user1", &[SubscriptionChange::enable(f.folder)])
            .unwrap();
        assert!(resolver.resolve(&f.repo, &member("user1")).unwrap().is_empty());

        f.cache.invalidate("user1", "default");
        assert_eq!(resolver.resolve(&f.repo, &member("user1")).unwrap().len(), 1);
    }
}
