// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Memoized sector keys per UID
//!
//! Wraps a [`TwoTierCache`] of [`DerivedKeySet`]s: a miss in both tiers runs
//! the key derivation and stores the result in both.

use crate::cache::{CacheStatistics, StatsSnapshot, TwoTierCache};
use crate::clock::Clock;
use crate::config::{CacheSettings, ReaderConfig};
use crate::kdf;
use crate::keys::{DerivedKeySet, TagUid, MIN_UID_LEN};
use crate::preload::PreloadPool;
use crate::store::KeyValueStore;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Store namespace of the persistent key tier
pub const KEY_CACHE_NAMESPACE: &str = "key_cache";

pub struct KeyCache {
    cache: Arc<TwoTierCache<DerivedKeySet>>,
    preloader: PreloadPool,
}

impl KeyCache {
    pub fn new(
        settings: CacheSettings,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        preload_workers: usize,
        preload_queue: usize,
    ) -> Self {
        Self {
            cache: Arc::new(TwoTierCache::new(KEY_CACHE_NAMESPACE, settings, store, clock)),
            preloader: PreloadPool::new(preload_workers, preload_queue),
        }
    }

    pub fn from_config(
        config: &ReaderConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            config.key_cache_settings(),
            store,
            clock,
            config.preload_workers,
            config.preload_queue,
        )
    }

    /// Keys for a UID, derived on first sight and cached afterwards
    pub fn get(&self, uid: &TagUid) -> Result<DerivedKeySet> {
        lookup_or_derive(&self.cache, uid)
    }

    /// Drop cached keys for a UID after an authentication or I/O failure
    pub fn invalidate(&self, uid: &TagUid) -> bool {
        self.cache.invalidate(&uid.to_hex())
    }

    /// Warm the cache in the background; never blocks and never fails
    pub fn preload(&self, uid: &TagUid) -> bool {
        if uid.len() < MIN_UID_LEN {
            return false;
        }

        let cache = Arc::clone(&self.cache);
        let uid = uid.clone();
        self.preloader
            .submit(move || lookup_or_derive(&cache, &uid).map(|_| ()))
    }

    /// Wipe both tiers
    pub fn clear_all(&self) {
        self.cache.clear_all();
        info!("Key cache cleared");
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

    pub fn preloader(&self) -> &PreloadPool {
        &self.preloader
    }

    /// Stop background preloading; queued jobs finish first
    pub fn shutdown(&self) {
        self.preloader.shutdown();
    }
}

fn lookup_or_derive(cache: &TwoTierCache<DerivedKeySet>, uid: &TagUid) -> Result<DerivedKeySet> {
    if uid.len() < MIN_UID_LEN {
        return Err(Error::InvalidUid {
            len: uid.len(),
            min: MIN_UID_LEN,
        });
    }

    cache.get_or_insert_with(&uid.to_hex(), || {
        debug!(uid = %uid, "deriving sector keys");
        kdf::try_derive_keys(uid.as_bytes())
    })
}

/// Explicitly owned holder for a shared [`KeyCache`]
///
/// The first `get_or_init` call builds the cache; later calls get the same
/// instance whatever initializer they pass. `teardown` releases it so the
/// next caller starts fresh.
#[derive(Default)]
pub struct KeyCacheProvider {
    slot: Mutex<Option<Arc<KeyCache>>>,
}

impl KeyCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init<F>(&self, init: F) -> Arc<KeyCache>
    where
        F: FnOnce() -> KeyCache,
    {
        let mut slot = self.slot.lock();
        if let Some(cache) = slot.as_ref() {
            return Arc::clone(cache);
        }

        let cache = Arc::new(init());
        *slot = Some(Arc::clone(&cache));
        cache
    }

    pub fn get(&self) -> Option<Arc<KeyCache>> {
        self.slot.lock().clone()
    }

    /// Release the shared cache; returns false if nothing was initialized
    pub fn teardown(&self) -> bool {
        match self.slot.lock().take() {
            Some(cache) => {
                cache.shutdown();
                true
            }
            None => false,
        }
    }
}
