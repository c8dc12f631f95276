// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Scan pipeline: UID in, decoded record and diagnostics out
//!
//! ```text
//! uid ──► tag cache ──hit──────────────────────────────► report (from_cache)
//!            │ miss
//!            ▼
//!         key cache ──► SectorReader ──► decoder ──► report
//!                          │
//!                          └── auth failure / I/O fault ──► invalidate caches
//! ```
//!
//! The hardware path is blocking. [`TagScanner::scan`] moves it onto the
//! blocking pool and cancels it if the returned future is dropped. The cache
//! lookup runs there too, since a promotion can write to the store.

use crate::clock::Clock;
use crate::config::ReaderConfig;
use crate::decoder::{self, DecodedFilamentRecord};
use crate::diagnostics::{AuthenticationOutcome, ScanDiagnostics};
use crate::key_cache::KeyCache;
use crate::keys::TagUid;
use crate::reader::{ReadStatus, SectorReader};
use crate::store::KeyValueStore;
use crate::tag::RawSectorMap;
use crate::tag_cache::TagCache;
use crate::transport::TagTransport;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub uid: String,
    /// `None` when the image is too short to decode
    pub record: Option<DecodedFilamentRecord>,
    pub raw: RawSectorMap,
    pub outcomes: Vec<AuthenticationOutcome>,
    pub status: ReadStatus,
    pub diagnostics: ScanDiagnostics,
    /// Served from the full-tag cache without touching hardware
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct TagScanner {
    key_cache: Arc<KeyCache>,
    tag_cache: Arc<TagCache>,
    reader: Arc<SectorReader>,
}

impl TagScanner {
    pub fn new(key_cache: Arc<KeyCache>, tag_cache: Arc<TagCache>, reader: SectorReader) -> Self {
        Self {
            key_cache,
            tag_cache,
            reader: Arc::new(reader),
        }
    }

    /// Build both caches over one store
    pub fn from_config(
        config: &ReaderConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let key_cache = KeyCache::from_config(config, Arc::clone(&store), Arc::clone(&clock));
        let tag_cache = TagCache::from_config(config, store, clock);
        Self::new(
            Arc::new(key_cache),
            Arc::new(tag_cache),
            SectorReader::from_config(config),
        )
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.key_cache
    }

    pub fn tag_cache(&self) -> &Arc<TagCache> {
        &self.tag_cache
    }

    /// Start deriving keys for a UID in the background
    pub fn warm(&self, uid: &TagUid) -> bool {
        self.key_cache.preload(uid)
    }

    /// Fast path: answer from the full-tag cache only, never touching hardware
    ///
    /// Blocking: a hit in the persistent tier is promoted to memory, and the
    /// entry it displaces may be written back to the store. Async callers
    /// should go through [`scan`](Self::scan), which runs this on the
    /// blocking pool.
    pub fn lookup_cached(&self, uid: &TagUid) -> Option<ScanReport> {
        let cached = self.tag_cache.get(uid)?;
        debug!(uid = %uid, "served from tag cache");

        let mut diagnostics = ScanDiagnostics::new();
        diagnostics.record_raw_snapshot(cached.raw.as_bytes());
        Some(ScanReport {
            uid: uid.to_hex(),
            record: decoder::decode(&cached.raw),
            raw: cached.raw,
            outcomes: Vec::new(),
            status: cached.status,
            diagnostics,
            from_cache: true,
        })
    }

    /// Run the full hardware pipeline on the calling thread
    pub fn scan_blocking<T: TagTransport + ?Sized>(
        &self,
        uid: &TagUid,
        transport: &mut T,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let mut diagnostics = ScanDiagnostics::new();
        self.scan_blocking_with(uid, transport, cancel, &mut diagnostics)
    }

    /// As [`scan_blocking`](Self::scan_blocking), leaving the trace in
    /// `diagnostics` even when the scan fails
    #[instrument(skip_all, fields(uid = %uid))]
    pub fn scan_blocking_with<T: TagTransport + ?Sized>(
        &self,
        uid: &TagUid,
        transport: &mut T,
        cancel: &CancellationToken,
        diagnostics: &mut ScanDiagnostics,
    ) -> Result<ScanReport> {
        let keys = self.key_cache.get(uid)?;

        let read = match self.reader.read(uid, &keys, transport, diagnostics, cancel) {
            Ok(read) => read,
            Err(e) => {
                if e.invalidates_tag_cache() {
                    self.tag_cache.invalidate(uid);
                }
                if e.is_auth_error() {
                    self.key_cache.invalidate(uid);
                }
                warn!("scan failed: {}", e);
                return Err(e);
            }
        };

        // A faulted block is zero-filled in the image; keep it out of the cache
        if read.io_faults > 0 {
            self.tag_cache.invalidate(uid);
            debug!(io_faults = read.io_faults, "tag image not cached");
        } else if read.authenticated_count() > 0
            && self.tag_cache.put(uid, &read.raw, &read.status)
        {
            debug!("tag image cached");
        }

        let record = decoder::decode(&read.raw);
        if record.is_none() {
            diagnostics.record_error(format!(
                "tag image too short to decode: {} bytes",
                read.raw.len()
            ));
        }

        info!(
            authenticated = read.authenticated_count(),
            decoded = record.is_some(),
            "scan complete"
        );

        Ok(ScanReport {
            uid: read.uid,
            record,
            raw: read.raw,
            outcomes: read.outcomes,
            status: read.status,
            diagnostics: diagnostics.clone(),
            from_cache: false,
        })
    }

    /// Cached fast path, then the hardware pipeline on the blocking pool
    pub async fn scan<T>(&self, uid: TagUid, transport: T) -> Result<ScanReport>
    where
        T: TagTransport + 'static,
    {
        self.scan_with_cancel(uid, transport, CancellationToken::new())
            .await
    }

    /// As [`scan`](Self::scan); cancelling `cancel` or dropping the future
    /// stops the read before the next sector and closes the transport
    pub async fn scan_with_cancel<T>(
        &self,
        uid: TagUid,
        mut transport: T,
        cancel: CancellationToken,
    ) -> Result<ScanReport>
    where
        T: TagTransport + 'static,
    {
        let scanner = self.clone();
        let token = cancel.clone();
        let guard = cancel.drop_guard();

        let result = tokio::task::spawn_blocking(move || {
            if let Some(report) = scanner.lookup_cached(&uid) {
                return Ok(report);
            }
            scanner.scan_blocking(&uid, &mut transport, &token)
        })
        .await;
        guard.disarm();

        match result {
            Ok(report) => report,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::Io(std::io::Error::other(format!(
                "scan task failed: {}",
                e
            )))),
        }
    }
}
