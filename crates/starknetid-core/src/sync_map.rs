//! A lock-guarded hash map used for the per-block aggregation collections.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

/// Concurrent map exposing only whole-operation accessors.
///
/// Iteration happens inside [`SyncMap::range`] while the read lock is held;
/// raw iterators never escape.
#[derive(Debug)]
pub struct SyncMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> SyncMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key, value);
    }

    /// Read-modify-write under one write lock. `f` receives the current value.
    pub fn update<F>(&self, key: K, f: F)
    where
        F: FnOnce(Option<V>) -> V,
    {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let next = f(map.remove(&key));
        map.insert(key, next);
    }

    /// Visit every entry; stops at the first error.
    pub fn range<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&K, &V) -> Result<(), E>,
    {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        for (k, v) in map.iter() {
            f(k, v)?;
        }
        Ok(())
    }

    /// Snapshot of all values.
    pub fn values(&self) -> Vec<V> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.values().cloned().collect()
    }

    pub fn reset(&self) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_overwrite() {
        let m = SyncMap::new();
        m.set("a", 1);
        m.set("a", 2);
        assert_eq!(m.get(&"a"), Some(2));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn update_merges() {
        let m: SyncMap<&str, u32> = SyncMap::new();
        m.update("k", |v| v.unwrap_or(0) + 1);
        m.update("k", |v| v.unwrap_or(0) + 1);
        assert_eq!(m.get(&"k"), Some(2));
    }

    #[test]
    fn range_stops_on_error() {
        let m = SyncMap::new();
        m.set(1, 1);
        m.set(2, 2);
        let mut seen = 0;
        let res: Result<(), &str> = m.range(|_, _| {
            seen += 1;
            Err("stop")
        });
        assert!(res.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn reset_empties() {
        let m = SyncMap::new();
        m.set(1, "x");
        m.reset();
        assert!(m.is_empty());
    }
}
