//! Concurrent keyed registry.
//!
//! [`Registry`] is a `HashMap` behind a single `parking_lot::RwLock`. The
//! coarse lock is what lets [`Registry::values`] return a consistent
//! point-in-time view, which round scoring relies on. Readers share the
//! lock; every mutation takes it exclusively for the duration of one call.
//!
//! ```
//! use mazerace_registry::Registry;
//!
//! let levels: Registry<&str, i32> = Registry::new();
//! levels.set("alice", 1);
//! assert!(levels.update(&"alice", |level| *level += 2));
//! assert_eq!(levels.get(&"alice"), Some(3));
//! assert_eq!(levels.delete(&"alice"), Some(3));
//! assert!(levels.is_empty());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::RwLock;

/// A thread-safe map from `K` to `V`.
///
/// Lookups hand out clones, so `V` is usually a small value or a cheap
/// handle such as an `Arc`.
pub struct Registry<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or replaces the value for `key`.
    pub fn set(&self, key: K, value: V) {
        self.entries.write().insert(key, value);
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// Exactly one of several concurrent callers gets `Some`, which makes
    /// this usable as an atomic claim.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.entries.write().remove(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Mutates the value for `key` in place. Returns `false` and does
    /// nothing if the key is absent.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.entries.write().get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every value, in no particular order.
    pub fn values(&self) -> Vec<V> {
        self.entries.read().values().cloned().collect()
    }

    /// Snapshot of every key, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every entry. Readers that arrive afterwards see an empty map.
    pub fn reset(&self) {
        self.entries.write().clear();
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for Registry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.entries.read().len())
            .finish()
    }
}
