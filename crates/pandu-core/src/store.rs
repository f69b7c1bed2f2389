//! Sharded in-memory map from identity key to expiring state.
//!
//! Each shard is a `parking_lot::Mutex<HashMap<..>>`. Every per-key operation
//! locks exactly one shard for the duration of the caller's closure, which
//! makes operations on one key linearizable. Keys hashed to different shards
//! never contend. Purges and scans visit the shards one at a time, so no call
//! ever holds more than one shard lock.

use crate::key::IdentityKey;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

/// Shard count used by [`ExpiringStateStore::new`].
pub const DEFAULT_SHARDS: usize = 16;

/// Point-in-time occupancy figures for a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total entries across all shards.
    pub entries: usize,
    /// Number of shards.
    pub shards: usize,
    /// Entry count of the fullest shard.
    pub busiest_shard: usize,
}

/// Concurrency-safe keyed state with scan-and-purge support.
///
/// State records never leave the store by reference; callers read or mutate
/// them inside closures, or take clones.
#[derive(Debug)]
pub struct ExpiringStateStore<T> {
    shards: Box<[Mutex<HashMap<IdentityKey, T>>]>,
    hasher: RandomState,
}

impl<T> Default for ExpiringStateStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ExpiringStateStore<T> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a store with `shards` partitions (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &IdentityKey) -> &Mutex<HashMap<IdentityKey, T>> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Apply `apply` to the state for `key`, inserting `factory()` first if
    /// the key is absent. Creation and mutation happen under one lock.
    pub fn update_or_create<R>(
        &self,
        key: &IdentityKey,
        factory: impl FnOnce() -> T,
        apply: impl FnOnce(&mut T) -> R,
    ) -> R {
        let mut shard = self.shard(key).lock();
        if let Some(state) = shard.get_mut(key) {
            return apply(state);
        }
        let state = shard.entry(key.clone()).or_insert_with(factory);
        apply(state)
    }

    /// Return the state for `key`, creating it from `factory` if absent.
    pub fn get_or_create(&self, key: &IdentityKey, factory: impl FnOnce() -> T) -> T
    where
        T: Clone,
    {
        self.update_or_create(key, factory, |state| state.clone())
    }

    /// Apply `apply` to the state for `key` if present.
    pub fn mutate<R>(&self, key: &IdentityKey, apply: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.shard(key).lock().get_mut(key).map(apply)
    }

    /// Run `inspect` against the state for `key` without creating it.
    pub fn read<R>(&self, key: &IdentityKey, inspect: impl FnOnce(&T) -> R) -> Option<R> {
        self.shard(key).lock().get(key).map(inspect)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<T>
    where
        T: Clone,
    {
        self.read(key, T::clone)
    }

    /// Remove `key`. Returns whether an entry existed.
    pub fn delete(&self, key: &IdentityKey) -> bool {
        self.shard(key).lock().remove(key).is_some()
    }

    /// Delete every entry for which `predicate` returns true and return how
    /// many were removed. Shards are locked one at a time.
    pub fn purge_where(&self, mut predicate: impl FnMut(&IdentityKey, &T) -> bool) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|key, state| !predicate(key, state));
            removed += before - shard.len();
        }
        if removed > 0 {
            debug!("purged store entries (removed={removed})");
        }
        removed
    }

    /// Visit every entry, one shard at a time. Entries may change between
    /// shards, so the visit is not a consistent snapshot.
    pub fn for_each(&self, mut visit: impl FnMut(&IdentityKey, &T)) {
        for shard in self.shards.iter() {
            for (key, state) in shard.lock().iter() {
                visit(key, state);
            }
        }
    }

    /// Current entry count.
    pub fn size(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            shards: self.shards.len(),
            ..StoreStats::default()
        };
        for shard in self.shards.iter() {
            let len = shard.lock().len();
            stats.entries += len;
            stats.busiest_shard = stats.busiest_shard.max(len);
        }
        stats
    }
}
