use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

/// Thread-safe string-keyed map split into 64 independently locked shards.
///
/// Every request task touches the cache and the rate table, so a single
/// map-wide lock would serialize the whole proxy. With sharding, two requests
/// only contend when their keys land in the same shard:
///
/// - **Reads**: `read lock` on one shard, clone the value out, release.
/// - **Read-modify-write**: `write lock` on one shard for the whole closure,
///   so the sequence is atomic with respect to other tasks.
///
/// Shard selection uses `ahash` for fast, DoS-resistant hashing.
pub struct ShardedMap<V> {
    shards: Box<[RwLock<HashMap<String, V>>]>,
    hasher: RandomState,
}

impl<V> ShardedMap<V> {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<HashMap<String, V>> {
        let hash = self.hasher.hash_one(key);
        &self.shards[(hash & SHARD_MASK) as usize]
    }

    /// Insert or replace. Returns the previous value, if any.
    pub fn insert(&self, key: String, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Remove the entry only if `pred` holds for it, checked under the same
    /// write lock as the removal.
    pub fn remove_if<F>(&self, key: &str, pred: F) -> bool
    where
        F: FnOnce(&V) -> bool,
    {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(v) if pred(v) => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Run `f` on the entry for `key`, creating it with `init` first if it is
    /// missing. The lookup, creation and mutation happen under one write lock.
    pub fn upsert_with<I, F, R>(&self, key: &str, init: I, f: F) -> R
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V) -> R,
    {
        let mut shard = self.shard(key).write();
        if let Some(value) = shard.get_mut(key) {
            return f(value);
        }
        f(shard.entry(key.to_owned()).or_insert_with(init))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Total number of entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }
}

impl<V: Clone> ShardedMap<V> {
    /// Clone the value out under a read lock.
    pub fn get_cloned(&self, key: &str) -> Option<V> {
        self.shard(key).read().get(key).cloned()
    }
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
