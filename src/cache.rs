//! Memoized root sets keyed by (principal, repository).
//!
//! Reads take a shared lock and never reorder the LRU, so concurrent
//! resolutions do not serialize on the cache. Every invalidation bumps a
//! generation counter under the exclusive lock; a slow-path result is only
//! stored if no invalidation happened since the caller started computing
//! it, which closes the window where a stale recomputation could overwrite
//! a fresh invalidation.

use crate::types::{Principal, SynchronizationRoots};
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Cache key.
///
/// Resolved roots depend on the whole access identity of the principal, so
/// the key carries a fingerprint of its groups and administrator flag next
/// to the name. Invalidation works on (name, repository) and drops every
/// variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub principal: String,
    pub repository: String,
    pub access: String,
}

impl CacheKey {
    /// Key of a plain user without group memberships.
    pub fn new(principal: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            repository: repository.into(),
            access: String::new(),
        }
    }

    /// Key of `principal` as it is evaluated for access.
    pub fn for_principal(principal: &Principal, repository: impl Into<String>) -> Self {
        Self {
            principal: principal.name.clone(),
            repository: repository.into(),
            access: access_fingerprint(principal),
        }
    }
}

/// Sorted, deduplicated groups, prefixed by `!admin` for administrators.
fn access_fingerprint(principal: &Principal) -> String {
    let mut groups: Vec<&str> = principal.groups.iter().map(String::as_str).collect();
    groups.sort_unstable();
    groups.dedup();
    let groups = groups.join(",");
    if principal.administrator {
        format!("!admin;{}", groups)
    } else {
        groups
    }
}

/// Process-wide cache of resolved synchronization roots.
pub struct RootCache {
    entries: RwLock<LruCache<CacheKey, SynchronizationRoots>>,
    generation: AtomicU64,
}

impl RootCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        }
    }

    /// Current invalidation generation; capture before a slow-path compute.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Look up an entry.
    pub fn get(&self, key: &CacheKey) -> Option<SynchronizationRoots> {
        self.entries.read().peek(key).cloned()
    }

    /// Store a computed entry unless an invalidation happened after
    /// `observed_generation`. Returns whether the entry was stored.
    pub fn insert(
        &self,
        key: CacheKey,
        roots: SynchronizationRoots,
        observed_generation: u64,
    ) -> bool {
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::SeqCst) != observed_generation {
            return false;
        }
        entries.put(key, roots);
        true
    }

    /// Drop every entry of `principal` in `repository`, whatever its access
    /// fingerprint.
    pub fn invalidate(&self, principal: &str, repository: &str) {
        let dropped =
            self.drop_where(|key| key.principal == principal && key.repository == repository);
        debug!(principal, repository, dropped, "Cache entry invalidated");
    }

    /// Drop every entry of a repository.
    pub fn invalidate_repository(&self, repository: &str) {
        let dropped = self.drop_where(|key| key.repository == repository);
        debug!(repository, dropped, "Repository cache invalidated");
    }

    fn drop_where(&self, stale: impl Fn(&CacheKey) -> bool) -> usize {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| stale(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
        debug!("Root cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
