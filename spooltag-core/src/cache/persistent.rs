// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Persistent tier serialized into a [`KeyValueStore`]
//!
//! The whole tier is one versioned JSON payload:
//!
//! ```text
//! {"version":1,"entries":{"<HEX-UID>":{"value":…,"created_at":…,"last_accessed_at":…}}}
//! ```
//!
//! A payload that fails to parse, or carries an unknown version, is discarded
//! wholesale and the tier starts empty.

use super::stats::{CacheStatistics, CacheTier};
use super::Lookup;
use crate::store::KeyValueStore;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Current payload format version
pub const PAYLOAD_VERSION: u32 = 1;

/// Store key holding the payload within the tier's namespace
pub const PAYLOAD_KEY: &str = "entries";

/// Live entry; the access time is atomic so hits only need the read lock
struct TierEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    last_accessed_ms: AtomicI64,
}

impl<V> TierEntry<V> {
    fn new(value: V, created_at: DateTime<Utc>, last_accessed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            created_at,
            last_accessed_ms: AtomicI64::new(last_accessed_at.timestamp_millis()),
        }
    }

    fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_accessed_ms.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }
}

#[derive(Deserialize)]
struct PersistedEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PersistedEntryRef<'a, V> {
    value: &'a V,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PayloadRef<'a, V> {
    version: u32,
    entries: BTreeMap<&'a str, PersistedEntryRef<'a, V>>,
}

#[derive(Deserialize)]
struct Payload<V> {
    version: u32,
    entries: BTreeMap<String, PersistedEntry<V>>,
}

type Entries<V> = BTreeMap<String, TierEntry<V>>;

pub struct PersistentTier<V> {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    capacity: usize,
    entries: RwLock<Entries<V>>,
    /// Bumped on every mutation, under the write lock
    generation: AtomicU64,
    /// Last generation handed to the store; serializes store writes
    written: Mutex<u64>,
    stats: CacheStatistics,
}

impl<V> PersistentTier<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Open the tier, loading whatever the store currently holds
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
        capacity: usize,
        stats: CacheStatistics,
    ) -> Self {
        let namespace = namespace.into();
        let entries = match Self::load(store.as_ref(), &namespace) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding persistent cache payload: {}", e);
                stats.record_error(CacheTier::Persistent);
                if let Err(e) = store.remove(&namespace, PAYLOAD_KEY) {
                    warn!("Failed to remove corrupted payload: {}", e);
                }
                BTreeMap::new()
            }
        };

        debug!(
            namespace = %namespace,
            entries = entries.len(),
            "Persistent cache tier loaded"
        );

        Self {
            store,
            namespace,
            capacity: capacity.max(1),
            entries: RwLock::new(entries),
            generation: AtomicU64::new(0),
            written: Mutex::new(0),
            stats,
        }
    }

    fn load(store: &dyn KeyValueStore, namespace: &str) -> Result<Entries<V>> {
        let text = match store.get(namespace, PAYLOAD_KEY)? {
            Some(text) => text,
            None => return Ok(BTreeMap::new()),
        };

        let payload: Payload<V> =
            serde_json::from_str(&text).map_err(|e| Error::CacheCorruption {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })?;

        if payload.version != PAYLOAD_VERSION {
            return Err(Error::CacheCorruption {
                namespace: namespace.to_string(),
                reason: format!("unsupported payload version {}", payload.version),
            });
        }

        Ok(payload
            .entries
            .into_iter()
            .map(|(key, e)| (key, TierEntry::new(e.value, e.created_at, e.last_accessed_at)))
            .collect())
    }

    /// Look up a key, refreshing its access time on a fresh hit
    ///
    /// Only takes the read lock. Access-time refreshes are not flushed on
    /// their own; they ride along with the next write.
    pub fn get(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Lookup<V> {
        let entries = self.entries.read();
        match entries.get(key) {
            None => Lookup::Absent,
            Some(entry) if now - entry.created_at >= ttl => Lookup::Expired,
            Some(entry) => {
                entry
                    .last_accessed_ms
                    .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
                Lookup::Hit {
                    value: entry.value.clone(),
                    created_at: entry.created_at,
                }
            }
        }
    }

    /// Insert or replace an entry and flush
    ///
    /// Capacity is enforced by dropping the entries with the oldest access time.
    pub fn insert(
        &self,
        key: &str,
        value: V,
        created_at: DateTime<Utc>,
        last_accessed_at: DateTime<Utc>,
    ) {
        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            TierEntry::new(value, created_at, last_accessed_at),
        );

        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed())
                .map(|(k, _)| k.clone());
            match oldest {
                Some(oldest) => {
                    entries.remove(&oldest);
                    self.stats.record_eviction(CacheTier::Persistent);
                }
                None => break,
            }
        }

        self.flush(entries);
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
            self.flush(entries);
        }
        expired
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.remove(key).is_some();
        if removed {
            self.flush(entries);
        }
        removed
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
        let mut entries = self.entries.write();
        entries.clear();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(entries);

        let mut written = self.written.lock();
        if generation <= *written {
            return;
        }
        *written = generation;
        if let Err(e) = self.store.remove(&self.namespace, PAYLOAD_KEY) {
            warn!(namespace = %self.namespace, "Failed to clear persistent cache: {}", e);
            self.stats.record_error(CacheTier::Persistent);
        }
    }

    /// Snapshot the tier and write it to the store
    ///
    /// Serialization happens under a downgraded (shared) guard and the store
    /// write after every lock on the entries is released. A snapshot older
    /// than the last one written is dropped.
    fn flush(&self, entries: RwLockWriteGuard<'_, Entries<V>>) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let entries = RwLockWriteGuard::downgrade(entries);

        let payload = PayloadRef {
            version: PAYLOAD_VERSION,
            entries: entries
                .iter()
                .map(|(key, entry)| {
                    (
                        key.as_str(),
                        PersistedEntryRef {
                            value: &entry.value,
                            created_at: entry.created_at,
                            last_accessed_at: entry.last_accessed(),
                        },
                    )
                })
                .collect(),
        };
        let text = serde_json::to_string(&payload);
        drop(payload);
        drop(entries);

        let mut written = self.written.lock();
        if generation <= *written {
            return;
        }
        *written = generation;

        let result = text
            .map_err(Error::from)
            .and_then(|text| self.store.put(&self.namespace, PAYLOAD_KEY, &text));

        if let Err(e) = result {
            warn!(namespace = %self.namespace, "Failed to persist cache tier: {}", e);
            self.stats.record_error(CacheTier::Persistent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crossbeam::channel::{bounded, Receiver, Sender};
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration as StdDuration;

    /// Store whose puts block on a gate once armed
    struct GatedStore {
        inner: MemoryStore,
        armed: AtomicBool,
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl KeyValueStore for GatedStore {
        fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
            self.inner.get(namespace, key)
        }

        fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
            if self.armed.swap(false, Ordering::SeqCst) {
                let _ = self.entered.send(());
                let _ = self.gate.recv();
            }
            self.inner.put(namespace, key, value)
        }

        fn remove(&self, namespace: &str, key: &str) -> Result<()> {
            self.inner.remove(namespace, key)
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn open(store: &Arc<MemoryStore>, capacity: usize) -> PersistentTier<String> {
        let store: Arc<dyn KeyValueStore> = store.clone();
        PersistentTier::open(store, "test", capacity, CacheStatistics::new())
    }

    #[test]
    fn test_survives_reopen() {
        let store = Arc::new(MemoryStore::new());
        let tier = open(&store, 10);
        tier.insert("04AABBCC", "value".to_string(), t0(), t0());
        drop(tier);

        let reopened = open(&store, 10);
        assert!(matches!(
            reopened.get("04AABBCC", t0(), Duration::days(30)),
            Lookup::Hit { ref value, .. } if value == "value"
        ));
    }

    #[test]
    fn test_payload_shape() {
        let store = Arc::new(MemoryStore::new());
        let tier = open(&store, 10);
        tier.insert("04AABBCC", "value".to_string(), t0(), t0());

        let text = store.get("test", PAYLOAD_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["entries"]["04AABBCC"]["value"], "value");
        assert!(json["entries"]["04AABBCC"]["created_at"].is_string());
        assert!(json["entries"]["04AABBCC"]["last_accessed_at"].is_string());
    }

    #[test]
    fn test_corrupted_payload_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.put("test", PAYLOAD_KEY, "{not json").unwrap();

        let stats = CacheStatistics::new();
        let dyn_store: Arc<dyn KeyValueStore> = store.clone();
        let tier: PersistentTier<String> =
            PersistentTier::open(dyn_store, "test", 10, stats.clone());

        assert!(tier.is_empty());
        assert_eq!(stats.snapshot().persistent.errors, 1);
        assert_eq!(store.get("test", PAYLOAD_KEY).unwrap(), None);
    }

    #[test]
    fn test_unknown_version_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("test", PAYLOAD_KEY, r#"{"version":99,"entries":{}}"#)
            .unwrap();
        assert!(open(&store, 10).is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_access() {
        let store = Arc::new(MemoryStore::new());
        let tier = open(&store, 2);
        tier.insert("A", "a".to_string(), t0(), t0() + Duration::seconds(10));
        tier.insert("B", "b".to_string(), t0(), t0());
        tier.insert("C", "c".to_string(), t0(), t0() + Duration::seconds(20));

        assert_eq!(tier.len(), 2);
        assert!(tier.contains("A"));
        assert!(!tier.contains("B"));
        assert!(tier.contains("C"));
    }

    #[test]
    fn test_expiry() {
        let store = Arc::new(MemoryStore::new());
        let tier = open(&store, 10);
        tier.insert("A", "a".to_string(), t0(), t0());

        let later = t0() + Duration::days(31);
        assert!(matches!(tier.get("A", later, Duration::days(30)), Lookup::Expired));
        assert!(tier.remove_expired("A", later, Duration::days(30)));
        assert!(tier.is_empty());
    }

    #[test]
    fn test_hit_only_takes_read_lock() {
        let store = Arc::new(MemoryStore::new());
        let tier = Arc::new(open(&store, 10));
        tier.insert("A", "a".to_string(), t0(), t0());

        let held = tier.entries.read();
        let (done_tx, done_rx) = bounded(1);
        {
            let tier = tier.clone();
            thread::spawn(move || {
                let hit = matches!(
                    tier.get("A", t0() + Duration::seconds(5), Duration::days(30)),
                    Lookup::Hit { .. }
                );
                let _ = done_tx.send(hit);
            });
        }
        let hit = done_rx.recv_timeout(StdDuration::from_secs(5));
        drop(held);
        assert_eq!(hit, Ok(true));
    }

    #[test]
    fn test_hit_refreshes_access_for_eviction_and_payload() {
        let store = Arc::new(MemoryStore::new());
        let tier = open(&store, 2);
        tier.insert("A", "a".to_string(), t0(), t0());
        tier.insert("B", "b".to_string(), t0(), t0() + Duration::seconds(1));

        let touched = t0() + Duration::seconds(10);
        assert!(matches!(
            tier.get("A", touched, Duration::days(30)),
            Lookup::Hit { .. }
        ));
        tier.insert("C", "c".to_string(), t0(), t0() + Duration::seconds(20));

        assert!(tier.contains("A"));
        assert!(!tier.contains("B"));

        let text = store.get("test", PAYLOAD_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let persisted: DateTime<Utc> =
            serde_json::from_value(json["entries"]["A"]["last_accessed_at"].clone()).unwrap();
        assert_eq!(persisted, touched);
    }

    #[test]
    fn test_store_write_happens_outside_lock() {
        let (entered_tx, entered_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded(1);
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            armed: AtomicBool::new(false),
            entered: entered_tx,
            gate: gate_rx,
        });
        let dyn_store: Arc<dyn KeyValueStore> = store.clone();
        let tier: Arc<PersistentTier<String>> =
            Arc::new(PersistentTier::open(dyn_store, "test", 10, CacheStatistics::new()));
        tier.insert("A", "a".to_string(), t0(), t0());

        store.armed.store(true, Ordering::SeqCst);
        let writer = {
            let tier = tier.clone();
            thread::spawn(move || tier.insert("B", "b".to_string(), t0(), t0()))
        };
        entered_rx
            .recv_timeout(StdDuration::from_secs(5))
            .expect("writer never reached the store");

        // The writer is parked inside the store; hits still proceed
        let (done_tx, done_rx) = bounded(1);
        {
            let tier = tier.clone();
            thread::spawn(move || {
                let hit = matches!(
                    tier.get("B", t0(), Duration::days(30)),
                    Lookup::Hit { .. }
                );
                let _ = done_tx.send(hit);
            });
        }
        assert_eq!(done_rx.recv_timeout(StdDuration::from_secs(5)), Ok(true));

        // So does a mutation; only its own store write queues behind the parked one
        let remover = {
            let tier = tier.clone();
            thread::spawn(move || tier.remove("A"))
        };
        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while tier.contains("A") && std::time::Instant::now() < deadline {
            thread::sleep(StdDuration::from_millis(5));
        }
        let removed_while_parked = !tier.contains("A");

        gate_tx.send(()).unwrap();
        writer.join().unwrap();
        assert!(remover.join().unwrap());
        assert!(removed_while_parked);

        // The newer snapshot won; the parked one was not written over it
        let reopened: PersistentTier<String> = PersistentTier::open(
            store.clone() as Arc<dyn KeyValueStore>,
            "test",
            10,
            CacheStatistics::new(),
        );
        assert!(!reopened.contains("A"));
        assert!(reopened.contains("B"));
    }
}
