// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Two-tier (memory + persistent) cache keyed by hex UID
//!
//! # Design
//!
//! - Memory tier: bounded LRU, concurrent reads under `parking_lot::RwLock`
//! - Persistent tier: larger, serialized into a [`KeyValueStore`](crate::store::KeyValueStore)
//! - TTL is measured from creation in both tiers; access never extends it
//! - Persistent hits are promoted into memory
//! - A memory entry evicted while still hot (accessed within the grace window)
//!   is written back to the persistent tier by an explicit post-eviction hook
//!
//! The key cache and the full-tag cache are both instances of this type.

mod memory;
mod persistent;
pub mod stats;

pub use memory::{Evicted, MemoryTier};
pub use persistent::{PersistentTier, PAYLOAD_KEY, PAYLOAD_VERSION};
pub use stats::{CacheStatistics, CacheTier, StatsSnapshot, TierStats};

use crate::clock::Clock;
use crate::config::CacheSettings;
use crate::store::KeyValueStore;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of a single-tier lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit { value: V, created_at: DateTime<Utc> },
    Expired,
    Absent,
}

pub struct TwoTierCache<V> {
    name: String,
    memory: MemoryTier<V>,
    persistent: PersistentTier<V>,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    stats: CacheStatistics,
}

impl<V> TwoTierCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Create a cache whose persistent tier lives in `namespace` of `store`
    pub fn new(
        namespace: &str,
        settings: CacheSettings,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stats = CacheStatistics::new();
        Self {
            name: namespace.to_string(),
            memory: MemoryTier::new(settings.memory_capacity),
            persistent: PersistentTier::open(
                store,
                namespace,
                settings.persistent_capacity,
                stats.clone(),
            ),
            settings,
            clock,
            stats,
        }
    }

    /// Look up a key in memory, then in the persistent tier
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let ttl = self.settings.ttl;

        match self.memory.get(key, now, ttl) {
            Lookup::Hit { value, .. } => {
                self.stats.record_hit(CacheTier::Memory);
                trace!(cache = %self.name, key, "memory hit");
                return Some(value);
            }
            Lookup::Expired => {
                if self.memory.remove_expired(key, now, ttl) {
                    self.stats.record_eviction(CacheTier::Memory);
                }
                self.stats.record_miss(CacheTier::Memory);
            }
            Lookup::Absent => self.stats.record_miss(CacheTier::Memory),
        }

        match self.persistent.get(key, now, ttl) {
            Lookup::Hit { value, created_at } => {
                self.stats.record_hit(CacheTier::Persistent);
                self.stats.record_promotion(CacheTier::Memory);
                debug!(cache = %self.name, key, "persistent hit, promoting to memory");
                self.insert_memory(key, value.clone(), created_at, now);
                Some(value)
            }
            Lookup::Expired => {
                if self.persistent.remove_expired(key, now, ttl) {
                    self.stats.record_eviction(CacheTier::Persistent);
                }
                self.stats.record_miss(CacheTier::Persistent);
                None
            }
            Lookup::Absent => {
                self.stats.record_miss(CacheTier::Persistent);
                None
            }
        }
    }

    /// Return the cached value, computing and storing it in both tiers on a miss
    pub fn get_or_insert_with<F>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Store a value in both tiers, stamped with the current time
    pub fn insert(&self, key: &str, value: V) {
        let now = self.clock.now();
        self.persistent.insert(key, value.clone(), now, now);
        self.insert_memory(key, value, now, now);
    }

    /// Drop a key from both tiers; returns whether anything was removed
    pub fn invalidate(&self, key: &str) -> bool {
        let in_memory = self.memory.remove(key);
        let in_persistent = self.persistent.remove(key);

        if in_memory {
            self.stats.record_invalidation(CacheTier::Memory);
        }
        if in_persistent {
            self.stats.record_invalidation(CacheTier::Persistent);
        }
        if in_memory || in_persistent {
            debug!(cache = %self.name, key, "invalidated");
        }

        in_memory || in_persistent
    }

    /// Wipe both tiers
    pub fn clear_all(&self) {
        self.memory.clear();
        self.persistent.clear();
        debug!(cache = %self.name, "cleared");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn persistent_len(&self) -> usize {
        self.persistent.len()
    }

    pub fn contains_in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    pub fn contains_in_persistent(&self, key: &str) -> bool {
        self.persistent.contains(key)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn stats(&self) -> &CacheStatistics {
        &self.stats
    }

    fn insert_memory(&self, key: &str, value: V, created_at: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(evicted) = self.memory.insert(key, value, created_at, now) {
            self.stats.record_eviction(CacheTier::Memory);
            self.on_memory_eviction(evicted, now);
        }
    }

    /// Post-eviction hook: keep hot entries reachable through the persistent tier
    fn on_memory_eviction(&self, evicted: Evicted<V>, now: DateTime<Utc>) {
        let idle = now - evicted.last_accessed_at;
        if idle > self.settings.promotion_grace {
            return;
        }
        if now - evicted.created_at >= self.settings.ttl {
            return;
        }

        trace!(cache = %self.name, key = %evicted.key, "writing back recently used entry");
        self.persistent.insert(
            &evicted.key,
            evicted.value,
            evicted.created_at,
            evicted.last_accessed_at,
        );
        self.stats.record_promotion(CacheTier::Persistent);
    }
}
