// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! In-memory MIFARE Classic tag
//!
//! Used by tests and by the CLI to replay memory dumps. Blocks can only be
//! read after the owning sector authenticated, as on real hardware.

use super::{TagTransport, TransportError, TransportResult};
use crate::keys::{DerivedKeySet, KeyType, SectorKey, KEY_LEN};
use crate::tag::{
    blocks_in_sector, first_block_of_sector, locate_block, trailer_block_of_sector, BLOCK_SIZE,
    MIFARE_CLASSIC,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const FACTORY_KEY: SectorKey = SectorKey::new([0xFF; KEY_LEN]);

#[derive(Debug, Clone, Copy)]
struct SectorAccess {
    key_a: Option<SectorKey>,
    key_b: Option<SectorKey>,
}

/// Connect/close/auth/read counters shared with the test that built the tag
#[derive(Debug, Default)]
pub struct SessionCounters {
    connects: AtomicU64,
    closes: AtomicU64,
    auth_attempts: AtomicU64,
    reads: AtomicU64,
}

impl SessionCounters {
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    pub fn auth_attempts(&self) -> u64 {
        self.auth_attempts.load(Ordering::Relaxed)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

pub struct SimulatedTag {
    blocks: Vec<[u8; BLOCK_SIZE]>,
    access: Vec<SectorAccess>,
    sector_count: usize,
    failing_blocks: HashSet<usize>,
    fail_connect: bool,
    lost_after_reads: Option<u64>,
    session_open: bool,
    connected: bool,
    authenticated_sector: Option<usize>,
    counters: Arc<SessionCounters>,
}

impl SimulatedTag {
    /// Zero-filled tag whose sectors accept the factory key
    pub fn blank(sector_count: usize) -> Self {
        let total_blocks = first_block_of_sector(sector_count);
        Self {
            blocks: vec![[0u8; BLOCK_SIZE]; total_blocks],
            access: vec![
                SectorAccess {
                    key_a: Some(FACTORY_KEY),
                    key_b: Some(FACTORY_KEY),
                };
                sector_count
            ],
            sector_count,
            failing_blocks: HashSet::new(),
            fail_connect: false,
            lost_after_reads: None,
            session_open: false,
            connected: false,
            authenticated_sector: None,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    /// Tag built from a full memory dump; sector keys come from the trailers
    pub fn from_dump(dump: &[u8]) -> Self {
        let total_blocks = dump.len() / BLOCK_SIZE;
        let mut sector_count = 0;
        while first_block_of_sector(sector_count) + blocks_in_sector(sector_count) <= total_blocks
        {
            sector_count += 1;
        }

        let mut tag = Self::blank(sector_count);
        for (i, block) in tag.blocks.iter_mut().enumerate() {
            block.copy_from_slice(&dump[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]);
        }

        for sector in 0..sector_count {
            let trailer = tag.blocks[trailer_block_of_sector(sector)];
            let mut key_a = [0u8; KEY_LEN];
            let mut key_b = [0u8; KEY_LEN];
            key_a.copy_from_slice(&trailer[..KEY_LEN]);
            key_b.copy_from_slice(&trailer[BLOCK_SIZE - KEY_LEN..]);
            tag.access[sector] = SectorAccess {
                key_a: Some(SectorKey::new(key_a)),
                key_b: Some(SectorKey::new(key_b)),
            };
        }
        tag
    }

    /// Protect sector `i` with derived key `i` as Key-A; Key-B is unusable
    pub fn with_derived_keys(mut self, keys: &DerivedKeySet) -> Self {
        for (sector, access) in self.access.iter_mut().enumerate() {
            *access = SectorAccess {
                key_a: keys.for_sector(sector).copied(),
                key_b: None,
            };
        }
        self
    }

    pub fn with_sector_keys(
        mut self,
        sector: usize,
        key_a: Option<SectorKey>,
        key_b: Option<SectorKey>,
    ) -> Self {
        if let Some(access) = self.access.get_mut(sector) {
            *access = SectorAccess { key_a, key_b };
        }
        self
    }

    /// Make a sector reject every key
    pub fn with_locked_sector(self, sector: usize) -> Self {
        self.with_sector_keys(sector, None, None)
    }

    pub fn with_failing_block(mut self, block: usize) -> Self {
        self.failing_blocks.insert(block);
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Report the tag as lost once `reads` blocks have been read
    pub fn with_tag_lost_after(mut self, reads: u64) -> Self {
        self.lost_after_reads = Some(reads);
        self
    }

    pub fn with_block(mut self, block: usize, bytes: [u8; BLOCK_SIZE]) -> Self {
        if let Some(slot) = self.blocks.get_mut(block) {
            *slot = bytes;
        }
        self
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::Io("not connected".to_string()))
        }
    }
}

impl TagTransport for SimulatedTag {
    fn technology(&self) -> &str {
        MIFARE_CLASSIC
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn total_size_bytes(&self) -> usize {
        self.blocks.len() * BLOCK_SIZE
    }

    fn connect(&mut self) -> TransportResult<()> {
        self.counters.connects.fetch_add(1, Ordering::Relaxed);
        self.session_open = true;
        if self.fail_connect {
            return Err(TransportError::Io("connect refused".to_string()));
        }
        self.connected = true;
        self.authenticated_sector = None;
        Ok(())
    }

    fn close(&mut self) {
        if self.session_open {
            self.counters.closes.fetch_add(1, Ordering::Relaxed);
        }
        self.session_open = false;
        self.connected = false;
        self.authenticated_sector = None;
    }

    fn authenticate_sector(
        &mut self,
        sector: usize,
        key_type: KeyType,
        key: &SectorKey,
    ) -> TransportResult<bool> {
        self.ensure_connected()?;
        self.counters.auth_attempts.fetch_add(1, Ordering::Relaxed);

        let access = self
            .access
            .get(sector)
            .ok_or_else(|| TransportError::Io(format!("no sector {}", sector)))?;
        let expected = match key_type {
            KeyType::A => access.key_a,
            KeyType::B => access.key_b,
        };

        let ok = expected.as_ref() == Some(key);
        self.authenticated_sector = ok.then_some(sector);
        Ok(ok)
    }

    fn read_block(&mut self, block: usize) -> TransportResult<[u8; BLOCK_SIZE]> {
        self.ensure_connected()?;
        let reads = self.counters.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(limit) = self.lost_after_reads {
            if reads >= limit {
                self.connected = false;
                return Err(TransportError::TagLost);
            }
        }

        if self.failing_blocks.contains(&block) {
            return Err(TransportError::Io(format!("read of block {} failed", block)));
        }

        let (sector, _) = locate_block(block);
        if self.authenticated_sector != Some(sector) {
            return Err(TransportError::Io(format!(
                "sector {} not authenticated",
                sector
            )));
        }

        self.blocks
            .get(block)
            .copied()
            .ok_or_else(|| TransportError::Io(format!("no block {}", block)))
    }
}
