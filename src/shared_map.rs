//! Reader-writer-locked typed map used by every registry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard};

/// A keyed associative container serialized by a reader-writer lock.
///
/// Iteration contract: [`SharedMap::for_each`] and the guard-holding
/// iterators run under the read lock. Visitors and iterator consumers must
/// not call mutating operations on the same map, or they will deadlock.
#[derive(Debug, Default)]
pub struct SharedMap<K, V> {
    data: RwLock<HashMap<K, V>>,
}

impl<K, V> SharedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map.
    pub fn new() -> Self {
        SharedMap {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clone of the value stored under `key`, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read().get(key).cloned()
    }

    /// Insert or overwrite the value under `key`.
    pub fn insert(&self, key: K, value: V) {
        self.write().insert(key, value);
    }

    /// Atomically move the value at `old` to `new`.
    ///
    /// No-op returning `false` when `old` is absent; an existing value at
    /// `new` is overwritten.
    pub fn rename<Q>(&self, old: &Q, new: K) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut data = self.write();
        match data.remove(old) {
            Some(value) => {
                data.insert(new, value);
                true
            }
            None => false,
        }
    }

    /// Remove `key`, reporting whether it existed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.write().remove(key).is_some()
    }

    /// Whether `key` is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read().contains_key(key)
    }

    /// Snapshot of the keys.
    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of the values.
    pub fn values(&self) -> Vec<V> {
        self.read().values().cloned().collect()
    }

    /// Lazy iterator over keys; holds the read lock until dropped.
    pub fn iter_keys(&self) -> MapIter<'_, K, V, K> {
        MapIter::new(self.read(), |k, _| k.clone())
    }

    /// Lazy iterator over values; holds the read lock until dropped.
    pub fn iter_values(&self) -> MapIter<'_, K, V, V> {
        MapIter::new(self.read(), |_, v| v.clone())
    }

    /// Call `visit` for every entry under the read lock.
    ///
    /// Visitor errors do not stop iteration; they aggregate into the
    /// returned vector.
    pub fn for_each<E, F>(&self, mut visit: F) -> Result<(), Vec<E>>
    where
        F: FnMut(&K, &V) -> Result<(), E>,
    {
        let data = self.read();
        let mut errors = Vec::new();
        for (key, value) in data.iter() {
            if let Err(err) = visit(key, value) {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<K, V>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read-lock-holding iterator over a [`SharedMap`].
///
/// Dropping the iterator releases the lock; consumers that hold it across
/// mutating calls on the same map will deadlock.
pub struct MapIter<'a, K, V, T> {
    guard: RwLockReadGuard<'a, HashMap<K, V>>,
    keys: Vec<K>,
    next: usize,
    project: fn(&K, &V) -> T,
}

impl<'a, K, V, T> MapIter<'a, K, V, T>
where
    K: Eq + Hash + Clone,
{
    fn new(guard: RwLockReadGuard<'a, HashMap<K, V>>, project: fn(&K, &V) -> T) -> Self {
        let keys = guard.keys().cloned().collect();
        MapIter {
            guard,
            keys,
            next: 0,
            project,
        }
    }
}

impl<K, V, T> Iterator for MapIter<'_, K, V, T>
where
    K: Eq + Hash + Clone,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let key = self.keys.get(self.next)?;
        self.next += 1;
        let value = self.guard.get(key)?;
        Some((self.project)(key, value))
    }
}
