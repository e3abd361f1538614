//! Main registry tying all components together.

use crate::cache::RootCache;
use crate::error::{RegistryError, Result};
use crate::events::{FeedConfig, FeedHandle, FeedId, InvalidationScope, RootEvent, RootEventBus};
use crate::hierarchy::HierarchyResolver;
use crate::repository::{
    ChangeKind, Repository, StructuralChange, StructuralChangeListener, DELETED_STATE,
};
use crate::resolver::AccessFilteredResolver;
use crate::subscriptions::{SubscriptionChange, SubscriptionStore};
use crate::types::{NodeId, Principal, Session, SubscriptionRecord, SynchronizationRoots};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Registry configuration.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Max cached (principal, repository) root sets.
    pub cache_capacity: usize,

    /// Facet marking nodes that carry subscriptions.
    pub facet_name: String,

    /// Facet property holding the subscription list.
    pub subscriptions_property: String,

    /// Lifecycle state treated as terminal deletion.
    pub deleted_state: String,

    /// Default buffer size of root feed subscriptions.
    pub event_buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            facet_name: "DriveSynchronized".to_string(),
            subscriptions_property: "drv:subscriptions".to_string(),
            deleted_state: DELETED_STATE.to_string(),
            event_buffer_size: 1000,
        }
    }
}

/// The synchronization-root registry.
///
/// Provides a unified interface for:
/// - Registering and unregistering synchronization roots
/// - Resolving the access-filtered roots of a principal
/// - Invalidating resolved roots on structural repository changes
/// - Streaming root changes to feed subscribers
pub struct RootRegistry {
    config: RegistryConfig,

    /// Attached repositories by name.
    repositories: RwLock<HashMap<String, Arc<dyn Repository>>>,

    store: SubscriptionStore,

    cache: RootCache,

    feed: RootEventBus,
}

/// Forwards repository notifications to the registry.
struct DeletionHandler {
    registry: Weak<RootRegistry>,
}

impl StructuralChangeListener for DeletionHandler {
    fn on_structural_change(&self, change: &StructuralChange) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_structural_change(change);
        }
    }
}

impl RootRegistry {
    /// Create a registry with no repositories attached.
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            store: SubscriptionStore::new(
                config.facet_name.clone(),
                config.subscriptions_property.clone(),
            ),
            cache: RootCache::new(config.cache_capacity),
            repositories: RwLock::new(HashMap::new()),
            feed: RootEventBus::new(),
            config,
        })
    }

    /// Attach a repository and subscribe to its structural changes.
    pub fn add_repository(self: &Arc<Self>, repo: Arc<dyn Repository>) -> Result<()> {
        let name = repo.name().to_string();
        {
            let mut repositories = self.repositories.write();
            if repositories.contains_key(&name) {
                return Err(RegistryError::RepositoryExists(name));
            }
            repositories.insert(name.clone(), Arc::clone(&repo));
        }

        repo.add_listener(Arc::new(DeletionHandler {
            registry: Arc::downgrade(self),
        }));
        info!(repository = %name, "Repository attached");
        Ok(())
    }

    /// Look up an attached repository.
    pub fn repository(&self, name: &str) -> Result<Arc<dyn Repository>> {
        self.repositories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRepository(name.to_string()))
    }

    /// Attached repositories, sorted by name.
    pub fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        let mut repos: Vec<_> = self.repositories.read().values().cloned().collect();
        repos.sort_by(|a, b| a.name().cmp(b.name()));
        repos
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // --- Registration ---

    /// Make `node` a synchronization root of `principal`.
    ///
    /// A no-op when an ancestor is already a root of `principal` or when
    /// `node` already is one. Otherwise every descendant root of `principal`
    /// is disabled and `node` enabled, in one atomic write.
    pub fn register_synchronization_root(
        &self,
        principal: &Principal,
        node: NodeId,
        session: &Session,
    ) -> Result<()> {
        let repo = self.repository(&session.repository)?;
        let target = repo.get_document(node)?;
        self.check_read_access(repo.as_ref(), session, node)?;

        self.store.with_principal_locked(repo.name(), &principal.name, || {
            let resolution = HierarchyResolver::new(&self.store, &self.config.deleted_state)
                .resolve_conflicts(repo.as_ref(), &principal.name, node)?;

            if resolution.already_covered {
                debug!(
                    principal = %principal.name,
                    repository = repo.name(),
                    node = %node,
                    covered_by = ?resolution.covered_by,
                    "Already covered by an ancestor root"
                );
                return Ok(());
            }

            let mut changes: Vec<SubscriptionChange> = resolution
                .to_disable
                .iter()
                .map(|&descendant| SubscriptionChange::disable(descendant))
                .collect();
            changes.push(SubscriptionChange::enable(node));

            let applied = self.store.apply(repo.as_ref(), &principal.name, &changes)?;
            if applied.is_empty() {
                debug!(
                    principal = %principal.name,
                    repository = repo.name(),
                    node = %node,
                    "Already a synchronization root"
                );
                return Ok(());
            }

            self.invalidate_principal(&principal.name, repo.name());

            for change in applied {
                let event = if change.enabled {
                    RootEvent::Registered {
                        principal: principal.name.clone(),
                        repository: repo.name().to_string(),
                        node,
                        path: target.path.clone(),
                    }
                } else {
                    RootEvent::Superseded {
                        principal: principal.name.clone(),
                        repository: repo.name().to_string(),
                        node: change.node,
                        by: node,
                    }
                };
                self.feed.broadcast(event);
            }

            info!(
                principal = %principal.name,
                repository = repo.name(),
                node = %node,
                path = %target.path,
                superseded = resolution.to_disable.len(),
                "Synchronization root registered"
            );
            Ok(())
        })
    }

    /// Stop synchronizing `node` for `principal`.
    ///
    /// A no-op when `node` is not currently a root of `principal`.
    pub fn unregister_synchronization_root(
        &self,
        principal: &Principal,
        node: NodeId,
        session: &Session,
    ) -> Result<()> {
        let repo = self.repository(&session.repository)?;
        repo.get_document(node)?;
        self.check_read_access(repo.as_ref(), session, node)?;

        self.store.with_principal_locked(repo.name(), &principal.name, || {
            let applied = self.store.apply(
                repo.as_ref(),
                &principal.name,
                &[SubscriptionChange::disable(node)],
            )?;
            if applied.is_empty() {
                debug!(
                    principal = %principal.name,
                    repository = repo.name(),
                    node = %node,
                    "Not a synchronization root, nothing to unregister"
                );
                return Ok(());
            }

            self.invalidate_principal(&principal.name, repo.name());
            self.feed.broadcast(RootEvent::Unregistered {
                principal: principal.name.clone(),
                repository: repo.name().to_string(),
                node,
            });

            info!(
                principal = %principal.name,
                repository = repo.name(),
                node = %node,
                "Synchronization root unregistered"
            );
            Ok(())
        })
    }

    fn check_read_access(&self, repo: &dyn Repository, session: &Session, node: NodeId) -> Result<()> {
        if repo.has_read_access(&session.principal, node)? {
            Ok(())
        } else {
            warn!(
                principal = %session.principal.name,
                repository = repo.name(),
                node = %node,
                "Read access denied"
            );
            Err(RegistryError::AccessDenied {
                principal: session.principal.name.clone(),
                node,
            })
        }
    }

    // --- Resolution ---

    fn resolver(&self) -> AccessFilteredResolver<'_> {
        AccessFilteredResolver::new(&self.store, &self.cache, &self.config.deleted_state)
    }

    /// Root identifiers of the session's principal in the session's repository.
    pub fn get_synchronization_root_references(&self, session: &Session) -> Result<HashSet<NodeId>> {
        let repo = self.repository(&session.repository)?;
        Ok(self.resolver().resolve(repo.as_ref(), &session.principal)?.refs)
    }

    /// Roots of `principal` in every attached repository, keyed by name.
    ///
    /// Repositories without roots map to an empty set.
    pub fn get_synchronization_roots(
        &self,
        principal: &Principal,
    ) -> Result<HashMap<String, SynchronizationRoots>> {
        self.resolver().resolve_all(&self.repositories(), principal)
    }

    /// Canonical comma-separated `repository:id` list of the active roots.
    ///
    /// Sync clients store it as a checkpoint: any difference means the root
    /// set changed since their last poll.
    pub fn active_root_definitions(&self, principal: &Principal) -> Result<String> {
        let roots = self.get_synchronization_roots(principal)?;
        let mut names: Vec<&String> = roots.keys().collect();
        names.sort();
        let definitions: Vec<String> = names
            .into_iter()
            .flat_map(|name| roots[name].definitions())
            .collect();
        Ok(definitions.join(","))
    }

    // --- Inspection ---

    /// Whether `username` holds an enabled subscription exactly on `node`.
    pub fn is_subscribed(&self, username: &str, repository: &str, node: NodeId) -> Result<bool> {
        let repo = self.repository(repository)?;
        self.store.is_subscribed(repo.as_ref(), node, username)
    }

    /// Raw subscription records on `node`, disabled ones included.
    pub fn subscriptions(&self, repository: &str, node: NodeId) -> Result<Vec<SubscriptionRecord>> {
        let repo = self.repository(repository)?;
        self.store.read(repo.as_ref(), node)
    }

    /// Number of cached root sets.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    // --- Invalidation ---

    /// Treat `node` and its subtree as removed and drop affected cached roots.
    ///
    /// Passing the repository root resets every principal's roots for that
    /// repository.
    pub fn handle_folder_deletion(&self, repository: &str, node: NodeId) -> Result<()> {
        self.repository(repository)?;
        self.on_structural_change(&StructuralChange {
            repository: repository.to_string(),
            node,
            kind: ChangeKind::Removed,
        });
        Ok(())
    }

    /// React to a structural repository change.
    ///
    /// Lifecycle transitions into or out of the deleted state invalidate the
    /// principals subscribed inside the subtree. Removals, moves and access
    /// changes cannot be attributed cheaply and invalidate the whole
    /// repository.
    pub fn on_structural_change(&self, change: &StructuralChange) {
        debug!(
            repository = %change.repository,
            node = %change.node,
            kind = ?change.kind,
            "Structural change"
        );

        match &change.kind {
            ChangeKind::LifecycleTransition { from, to } => {
                let deleted = &self.config.deleted_state;
                if from == deleted || to == deleted {
                    self.invalidate_subtree(&change.repository, change.node);
                }
            }
            ChangeKind::Removed => {
                let is_root = self
                    .repository(&change.repository)
                    .map(|repo| repo.root() == change.node)
                    .unwrap_or(false);
                if is_root {
                    info!(repository = %change.repository, "Repository root deleted, resetting roots");
                }
                self.invalidate_repository(&change.repository);
            }
            ChangeKind::Moved | ChangeKind::AccessChanged => {
                self.invalidate_repository(&change.repository);
            }
        }
    }

    /// Drop every cached root set.
    pub fn invalidate_all(&self) {
        self.cache.clear();
        self.feed.broadcast(RootEvent::Invalidated {
            scope: InvalidationScope::All,
        });
    }

    fn invalidate_principal(&self, principal: &str, repository: &str) {
        self.cache.invalidate(principal, repository);
        self.feed.broadcast(RootEvent::Invalidated {
            scope: InvalidationScope::Principal {
                principal: principal.to_string(),
                repository: repository.to_string(),
            },
        });
    }

    fn invalidate_repository(&self, repository: &str) {
        self.cache.invalidate_repository(repository);
        self.feed.broadcast(RootEvent::Invalidated {
            scope: InvalidationScope::Repository {
                repository: repository.to_string(),
            },
        });
    }

    /// Invalidate the principals subscribed at or below `node`, falling back
    /// to the whole repository when they cannot be determined.
    fn invalidate_subtree(&self, repository: &str, node: NodeId) {
        match self.subtree_subscribers(repository, node) {
            Ok(principals) => {
                for principal in &principals {
                    self.invalidate_principal(principal, repository);
                }
                debug!(repository, node = %node, principals = principals.len(), "Subtree invalidated");
            }
            Err(e) => {
                warn!(repository, node = %node, error = %e, "Falling back to repository invalidation");
                self.invalidate_repository(repository);
            }
        }
    }

    fn subtree_subscribers(&self, repository: &str, node: NodeId) -> Result<BTreeSet<String>> {
        let repo = self.repository(repository)?;
        let mut principals: BTreeSet<String> =
            self.store.subscribers(repo.as_ref(), node)?.into_iter().collect();
        for descendant in repo.get_descendants(node)? {
            principals.extend(self.store.subscribers(repo.as_ref(), descendant.id)?);
        }
        Ok(principals)
    }

    // --- Feed ---

    /// Subscribe to root events. A zero `buffer_size` uses the configured default.
    pub fn subscribe(&self, mut config: FeedConfig) -> FeedHandle {
        if config.buffer_size == 0 {
            config.buffer_size = self.config.event_buffer_size;
        }
        self.feed.subscribe(config)
    }

    pub fn unsubscribe(&self, id: FeedId) {
        self.feed.unsubscribe(id);
    }
}
