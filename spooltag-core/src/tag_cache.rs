// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Full-tag cache: raw sector images of previously read tags, keyed by UID
//!
//! Lets a repeated tap of the same spool skip the hardware entirely. Entries
//! are dropped whenever a read of that UID fails authentication or faults.
//! Each image is stored with the status of the read that produced it, so a
//! partial read is never served back as complete.

use crate::cache::{CacheStatistics, StatsSnapshot, TwoTierCache};
use crate::clock::Clock;
use crate::config::{CacheSettings, ReaderConfig};
use crate::keys::TagUid;
use crate::reader::ReadStatus;
use crate::store::KeyValueStore;
use crate::tag::RawSectorMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Store namespace of the persistent full-tag tier
pub const TAG_CACHE_NAMESPACE: &str = "tag_cache";

/// A cached tag image and the status of the read it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTag {
    pub raw: RawSectorMap,
    pub status: ReadStatus,
}

pub struct TagCache {
    cache: TwoTierCache<CachedTag>,
}

impl TagCache {
    pub fn new(
        settings: CacheSettings,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: TwoTierCache::new(TAG_CACHE_NAMESPACE, settings, store, clock),
        }
    }

    pub fn from_config(
        config: &ReaderConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(config.tag_cache_settings(), store, clock)
    }

    pub fn get(&self, uid: &TagUid) -> Option<CachedTag> {
        self.cache.get(&uid.to_hex())
    }

    /// Store a raw image with its read status; empty or all-zero images are refused
    pub fn put(&self, uid: &TagUid, raw: &RawSectorMap, status: &ReadStatus) -> bool {
        if !raw.has_data() {
            debug!(uid = %uid, "refusing to cache empty tag image");
            return false;
        }
        let entry = CachedTag {
            raw: raw.clone(),
            status: status.clone(),
        };
        self.cache.insert(&uid.to_hex(), entry);
        true
    }

    pub fn invalidate(&self, uid: &TagUid) -> bool {
        let removed = self.cache.invalidate(&uid.to_hex());
        if removed {
            debug!(uid = %uid, "full-tag cache entry invalidated");
        }
        removed
    }

    pub fn clear_all(&self) {
        self.cache.clear_all();
        info!("Tag cache cleared");
    }

    pub fn memory_len(&self) -> usize {
        self.cache.memory_len()
    }

    pub fn persistent_len(&self) -> usize {
        self.cache.persistent_len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.cache.stats().snapshot()
    }

    pub fn statistics(&self) -> &CacheStatistics {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::tag::MIFARE_CLASSIC;

    fn cache() -> TagCache {
        TagCache::new(
            CacheSettings::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
        )
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = cache();
        let uid: TagUid = "04914CCA5E6480".parse().unwrap();
        let mut raw = RawSectorMap::new(MIFARE_CLASSIC, 1024, 16);
        raw.set_block(1, &[0x41; 16]);

        assert!(cache.put(&uid, &raw, &ReadStatus::Complete));
        let cached = cache.get(&uid).unwrap();
        assert_eq!(cached.raw, raw);
        assert_eq!(cached.status, ReadStatus::Complete);
        assert!(cache.invalidate(&uid));
        assert!(cache.get(&uid).is_none());
        assert!(!cache.invalidate(&uid));
    }

    #[test]
    fn test_empty_image_not_cached() {
        let cache = cache();
        let uid: TagUid = "DEADBEEF".parse().unwrap();
        let empty = RawSectorMap::new(MIFARE_CLASSIC, 1024, 16);
        assert!(!cache.put(&uid, &empty, &ReadStatus::Complete));
        assert_eq!(cache.memory_len(), 0);
    }

    #[test]
    fn test_partial_status_survives_persistent_tier() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let uid: TagUid = "04914CCA5E6480".parse().unwrap();
        let mut raw = RawSectorMap::new(MIFARE_CLASSIC, 1024, 16);
        raw.set_block(1, &[0x41; 16]);
        let partial = ReadStatus::Partial {
            failed_sectors: vec![7],
            failed_blocks: vec![28, 29, 30, 31],
        };

        let cache = TagCache::new(CacheSettings::default(), store.clone(), clock.clone());
        assert!(cache.put(&uid, &raw, &partial));
        drop(cache);

        let reopened = TagCache::new(CacheSettings::default(), store, clock);
        assert_eq!(reopened.get(&uid).unwrap().status, partial);
    }
}
