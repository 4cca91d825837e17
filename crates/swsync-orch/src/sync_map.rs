//! Shared resource tables with explicit reference counting.
//!
//! The resource tables (next-hop groups, neighbors, router interfaces) pair
//! a backend object id with a refcount. Two rules are enforced here rather
//! than at every call site: lookups never create entries, and refcounts
//! never go below zero.

use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncMapError {
    #[error("key not found")]
    KeyNotFound,

    #[error("refcount underflow")]
    Underflow,
}

/// A table value carrying a reference count.
pub trait RefCounted {
    fn ref_count(&self) -> u32;
    fn inc_ref(&mut self) -> u32;
    /// Returns `None` on underflow.
    fn dec_ref(&mut self) -> Option<u32>;
}

/// Map wrapper whose accessors never auto-create entries.
#[derive(Debug, Clone, Default)]
pub struct SyncMap<K, V> {
    inner: HashMap<K, V>,
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.inner.values_mut()
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
    V: RefCounted,
{
    /// Increments the refcount of an existing entry; missing keys are an
    /// error, never an implicit insert.
    pub fn inc_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        self.inner
            .get_mut(key)
            .map(RefCounted::inc_ref)
            .ok_or(SyncMapError::KeyNotFound)
    }

    /// Decrements the refcount of an existing entry, refusing underflow.
    pub fn dec_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        match self.inner.get_mut(key) {
            Some(value) => value.dec_ref().ok_or(SyncMapError::Underflow),
            None => Err(SyncMapError::KeyNotFound),
        }
    }

    pub fn ref_count(&self, key: &K) -> Option<u32> {
        self.inner.get(key).map(RefCounted::ref_count)
    }

    /// Sum of refcounts over all entries. At steady state with balanced
    /// SET/DEL history both this and `len()` are zero.
    pub fn total_refs(&self) -> u64 {
        self.inner
            .values()
            .map(|v| u64::from(v.ref_count()))
            .sum()
    }
}

impl<K, V> FromIterator<(K, V)> for SyncMap<K, V>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Entry {
        refs: u32,
    }

    impl RefCounted for Entry {
        fn ref_count(&self) -> u32 {
            self.refs
        }

        fn inc_ref(&mut self) -> u32 {
            self.refs += 1;
            self.refs
        }

        fn dec_ref(&mut self) -> Option<u32> {
            self.refs = self.refs.checked_sub(1)?;
            Some(self.refs)
        }
    }

    #[test]
    fn lookups_never_create() {
        let mut map: SyncMap<String, Entry> = SyncMap::new();
        assert!(map.get(&"x".to_string()).is_none());
        assert!(map.get_mut(&"x".to_string()).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn refcount_requires_existing_key() {
        let mut map: SyncMap<String, Entry> = SyncMap::new();
        assert_eq!(map.inc_ref(&"x".to_string()), Err(SyncMapError::KeyNotFound));

        map.insert("x".to_string(), Entry { refs: 0 });
        assert_eq!(map.inc_ref(&"x".to_string()), Ok(1));
        assert_eq!(map.inc_ref(&"x".to_string()), Ok(2));
    }

    #[test]
    fn underflow_refused() {
        let mut map: SyncMap<String, Entry> = SyncMap::new();
        map.insert("x".to_string(), Entry { refs: 0 });
        assert_eq!(map.dec_ref(&"x".to_string()), Err(SyncMapError::Underflow));

        map.inc_ref(&"x".to_string()).unwrap();
        assert_eq!(map.dec_ref(&"x".to_string()), Ok(0));
        assert_eq!(map.dec_ref(&"x".to_string()), Err(SyncMapError::Underflow));
    }

    #[test]
    fn total_refs_balances() {
        let mut map: SyncMap<String, Entry> = SyncMap::new();
        map.insert("a".to_string(), Entry { refs: 0 });
        map.insert("b".to_string(), Entry { refs: 0 });
        map.inc_ref(&"a".to_string()).unwrap();
        map.inc_ref(&"b".to_string()).unwrap();
        assert_eq!(map.total_refs(), 2);

        map.dec_ref(&"a".to_string()).unwrap();
        map.dec_ref(&"b".to_string()).unwrap();
        assert_eq!(map.total_refs(), 0);
    }
}
