// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Storage behind the statistical model caches.
//!
//! [`ConcurrentStore`] keeps entries for the lifetime of the process.
//! [`LruStore`] bounds the entry count; once full, the least recently used
//! entry is evicted, and both reads and writes count as a use.

use crate::lock_unpoisoned;
use cached::{Cached, SizedCache};
use scc::HashMap as SccHashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

pub trait BackingStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn put(&self, key: K, value: V);

    /// Runs `update` while holding exclusive access to the entry for `key`.
    /// The closure receives the current value (mutable, so it may be changed
    /// in place) or `None` when absent; a returned value replaces or inserts
    /// the entry.
    fn compute(&self, key: K, update: &mut dyn FnMut(Option<&mut V>) -> Option<V>);

    fn keys(&self) -> Vec<K>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingStoreKind {
    #[default]
    Unbounded,
    Lru { capacity: usize },
}

impl BackingStoreKind {
    pub fn build<K, V>(&self) -> Arc<dyn BackingStore<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        match *self {
            BackingStoreKind::Unbounded => Arc::new(ConcurrentStore::new()),
            BackingStoreKind::Lru { capacity } => Arc::new(LruStore::with_capacity(capacity)),
        }
    }
}

pub struct ConcurrentStore<K, V> {
    map: SccHashMap<K, V>,
}

impl<K: Eq + Hash, V> ConcurrentStore<K, V> {
    pub fn new() -> Self {
        Self {
            map: SccHashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> Default for ConcurrentStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BackingStore<K, V> for ConcurrentStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.map.read(key, |_, value| value.clone())
    }

    fn put(&self, key: K, value: V) {
        self.map
            .entry(key)
            .and_modify(|existing| *existing = value.clone())
            .or_insert(value);
    }

    fn compute(&self, key: K, update: &mut dyn FnMut(Option<&mut V>) -> Option<V>) {
        match self.map.entry(key) {
            scc::hash_map::Entry::Occupied(mut oe) => {
                if let Some(replacement) = update(Some(oe.get_mut())) {
                    *oe.get_mut() = replacement;
                }
            }
            scc::hash_map::Entry::Vacant(ve) => {
                if let Some(value) = update(None) {
                    let _ = ve.insert_entry(value);
                }
            }
        }
    }

    fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        self.map.scan(|key, _| keys.push(key.clone()));
        keys
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn kind(&self) -> &'static str {
        "unbounded"
    }
}

pub struct LruStore<K, V>
where
    K: Eq + Hash + Clone,
{
    cache: Mutex<SizedCache<K, V>>,
}

impl<K: Eq + Hash + Clone, V> LruStore<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(SizedCache::with_size(capacity.max(1))),
        }
    }
}

impl<K, V> BackingStore<K, V> for LruStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        lock_unpoisoned(&self.cache).cache_get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        lock_unpoisoned(&self.cache).cache_set(key, value);
    }

    fn compute(&self, key: K, update: &mut dyn FnMut(Option<&mut V>) -> Option<V>) {
        let mut cache = lock_unpoisoned(&self.cache);
        match cache.cache_get_mut(&key) {
            Some(existing) => {
                if let Some(replacement) = update(Some(existing)) {
                    *existing = replacement;
                }
            }
            None => {
                if let Some(value) = update(None) {
                    cache.cache_set(key, value);
                }
            }
        }
    }

    fn keys(&self) -> Vec<K> {
        lock_unpoisoned(&self.cache).key_order().cloned().collect()
    }

    fn len(&self) -> usize {
        lock_unpoisoned(&self.cache).cache_size()
    }

    fn kind(&self) -> &'static str {
        "lru"
    }
}
