// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Bounded in-memory tier with least-recently-used eviction
//!
//! Lookups only take the read lock: access time and recency tick live in
//! atomics inside each entry, so concurrent hits never serialize. Inserts and
//! removals take the write lock.

use super::Lookup;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

struct MemoryEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    last_accessed_ms: AtomicI64,
    tick: AtomicU64,
}

impl<V> MemoryEntry<V> {
    fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_accessed_ms.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }
}

/// Entry pushed out by a capacity eviction, handed to the post-eviction hook
#[derive(Debug, Clone)]
pub struct Evicted<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

pub struct MemoryTier<V> {
    entries: RwLock<HashMap<String, MemoryEntry<V>>>,
    capacity: usize,
    counter: AtomicU64,
}

impl<V: Clone> MemoryTier<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            counter: AtomicU64::new(0),
        }
    }

    /// Look up a key, refreshing its recency on a fresh hit
    pub fn get(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Lookup<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if now - entry.created_at < ttl => {
                entry
                    .last_accessed_ms
                    .store(now.timestamp_millis(), Ordering::Relaxed);
                entry.tick.store(self.next_tick(), Ordering::Relaxed);
                Lookup::Hit {
                    value: entry.value.clone(),
                    created_at: entry.created_at,
                }
            }
            Some(_) => Lookup::Expired,
            None => Lookup::Absent,
        }
    }

    /// Insert or replace an entry
    ///
    /// Returns the least-recently-used entry when the insert had to make room.
    pub fn insert(
        &self,
        key: &str,
        value: V,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Evicted<V>> {
        let mut entries = self.entries.write();

        let evicted = if entries.len() >= self.capacity && !entries.contains_key(key) {
            Self::evict_lru(&mut entries)
        } else {
            None
        };

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                created_at,
                last_accessed_ms: AtomicI64::new(now.timestamp_millis()),
                tick: AtomicU64::new(self.next_tick()),
            },
        );

        evicted
    }

    /// Remove an entry only if it is still past its TTL
    pub fn remove_expired(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
        let mut entries = self.entries.write();
        let expired = entries
            .get(key)
            .map(|entry| now - entry.created_at >= ttl)
            .unwrap_or(false);
        if expired {
            entries.remove(key);
        }
        expired
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn next_tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn evict_lru(entries: &mut HashMap<String, MemoryEntry<V>>) -> Option<Evicted<V>> {
        let oldest_key = entries
            .iter()
            .min_by_key(|(_, entry)| entry.tick.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone())?;

        entries.remove(&oldest_key).map(|entry| Evicted {
            last_accessed_at: entry.last_accessed(),
            key: oldest_key,
            value: entry.value,
            created_at: entry.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_hit_and_miss() {
        let tier = MemoryTier::new(4);
        tier.insert("A", 1u32, t0(), t0());

        assert!(matches!(
            tier.get("A", t0(), Duration::days(1)),
            Lookup::Hit { value: 1, .. }
        ));
        assert!(matches!(
            tier.get("B", t0(), Duration::days(1)),
            Lookup::Absent
        ));
    }

    #[test]
    fn test_ttl_counts_from_creation() {
        let tier = MemoryTier::new(4);
        tier.insert("A", 1u32, t0(), t0());

        // Access near the end of the TTL does not extend it
        let almost = t0() + Duration::hours(23);
        assert!(matches!(tier.get("A", almost, Duration::days(1)), Lookup::Hit { .. }));

        let later = t0() + Duration::days(1);
        assert!(matches!(tier.get("A", later, Duration::days(1)), Lookup::Expired));
        assert!(tier.remove_expired("A", later, Duration::days(1)));
        assert!(tier.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let tier = MemoryTier::new(2);
        assert!(tier.insert("A", 1u32, t0(), t0()).is_none());
        assert!(tier.insert("B", 2u32, t0(), t0()).is_none());

        // Touch A so B becomes least recently used
        tier.get("A", t0(), Duration::days(1));

        let evicted = tier.insert("C", 3u32, t0(), t0()).unwrap();
        assert_eq!(evicted.key, "B");
        assert_eq!(evicted.value, 2);
        assert_eq!(tier.len(), 2);
        assert!(tier.contains("A"));
        assert!(tier.contains("C"));
    }

    #[test]
    fn test_replace_does_not_evict() {
        let tier = MemoryTier::new(2);
        tier.insert("A", 1u32, t0(), t0());
        tier.insert("B", 2u32, t0(), t0());
        assert!(tier.insert("A", 10u32, t0(), t0()).is_none());
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_evicted_carries_last_access() {
        let tier = MemoryTier::new(1);
        tier.insert("A", 1u32, t0(), t0());
        let touched = t0() + Duration::seconds(30);
        tier.get("A", touched, Duration::days(1));

        let evicted = tier.insert("B", 2u32, t0(), touched).unwrap();
        assert_eq!(evicted.last_accessed_at, touched);
        assert_eq!(evicted.created_at, t0());
    }
}
