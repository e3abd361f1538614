//! Keyed mutual exclusion.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A set of mutexes created on demand, one per key.
///
/// Callers holding different keys never block each other. Entries are
/// pruned once no caller holds them.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Clone + Ord + Hash> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` while holding the locks of every key in `keys`.
    ///
    /// Keys are locked in sorted order so overlapping callers cannot deadlock.
    pub fn with_locked<R>(&self, keys: &[K], f: impl FnOnce() -> R) -> R {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let handles: Vec<Arc<Mutex<()>>> = {
            let mut locks = self.locks.lock();
            keys.iter()
                .map(|key| Arc::clone(locks.entry(key.clone()).or_default()))
                .collect()
        };

        let result = {
            let _guards: Vec<_> = handles.iter().map(|m| m.lock()).collect();
            f()
        };

        drop(handles);
        self.prune(&keys);
        result
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, keys: &[K]) {
        let mut locks = self.locks.lock();
        for key in keys {
            if locks
                .get(key)
                .map(|m| Arc::strong_count(m) == 1)
                .unwrap_or(false)
            {
                locks.remove(key);
            }
        }
    }
}

impl<K: Clone + Ord + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_entries_pruned_after_use() {
        let locks: KeyedLocks<u64> = KeyedLocks::new();
        let value = locks.with_locked(&[3, 1, 3], || 42);
        assert_eq!(value, 42);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_same_key_is_exclusive() {
        let locks: KeyedLocks<&'static str> = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        locks.with_locked(&["node"], || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
