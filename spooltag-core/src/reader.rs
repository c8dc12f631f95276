// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Sector-by-sector authentication and read state machine
//!
//! For each sector the reader tries Key-A with every candidate (derived keys
//! in derivation order, then the well-known fallbacks), then Key-B with the
//! same list. Sectors that reject everything are recorded and skipped; a
//! failed block read is zero-filled and recorded. Only a tag that leaves the
//! field aborts the scan early.
//!
//! Outcome classification:
//! - no sector authenticated: [`Error::AuthenticationFailed`]
//! - some sector or block failed: [`ReadStatus::Partial`]
//! - otherwise: [`ReadStatus::Complete`]

use crate::config::ReaderConfig;
use crate::diagnostics::{AuthenticationOutcome, ScanDiagnostics};
use crate::keys::{DerivedKeySet, KeySource, KeyType, SectorKey, TagUid, FALLBACK_KEYS};
use crate::tag::{
    first_block_of_sector, trailer_block_of_sector, RawSectorMap, BLOCK_SIZE,
};
use crate::transport::{TagTransport, TransportError, TransportSession};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Block holding the hotend/bed/drying temperatures
pub const TEMPERATURE_BLOCK: usize = 6;

/// Sector containing [`TEMPERATURE_BLOCK`]
pub const TEMPERATURE_SECTOR: usize = 1;

/// Blocks whose contents are dumped into diagnostics
pub const DIAGNOSTIC_BLOCKS: [usize; 9] = [0, 1, 2, 4, 5, 6, 8, 12, 14];

/// Default cap on scanned sectors (MIFARE Classic 1K)
pub const DEFAULT_MAX_SECTORS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadStatus {
    Complete,
    Partial {
        failed_sectors: Vec<usize>,
        failed_blocks: Vec<usize>,
    },
}

/// Raw result of one hardware read
#[derive(Debug, Clone, Serialize)]
pub struct TagRead {
    pub uid: String,
    pub raw: RawSectorMap,
    pub outcomes: Vec<AuthenticationOutcome>,
    pub status: ReadStatus,
    /// Unexpected block read faults inside authenticated sectors
    pub io_faults: usize,
}

impl TagRead {
    pub fn authenticated_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.authenticated).count()
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.status, ReadStatus::Partial { .. })
    }

    /// Reject partial reads with [`Error::PartialReadFailure`]
    pub fn require_complete(self) -> Result<Self> {
        match &self.status {
            ReadStatus::Complete => Ok(self),
            ReadStatus::Partial {
                failed_sectors,
                failed_blocks,
            } => Err(Error::PartialReadFailure {
                failed_sectors: failed_sectors.len(),
                failed_blocks: failed_blocks.len(),
            }),
        }
    }
}

/// Ordered authentication candidate
struct Candidate<'a> {
    source: KeySource,
    index: usize,
    key: &'a SectorKey,
}

pub struct SectorReader {
    max_sectors: usize,
    fallback_keys: Vec<SectorKey>,
}

impl Default for SectorReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SECTORS)
    }
}

impl SectorReader {
    pub fn new(max_sectors: usize) -> Self {
        Self {
            max_sectors: max_sectors.max(1),
            fallback_keys: FALLBACK_KEYS.to_vec(),
        }
    }

    pub fn from_config(config: &ReaderConfig) -> Self {
        Self::new(config.max_sectors)
    }

    /// Replace the fallback list tried after the derived keys
    pub fn with_fallback_keys(mut self, keys: Vec<SectorKey>) -> Self {
        self.fallback_keys = keys;
        self
    }

    pub fn max_sectors(&self) -> usize {
        self.max_sectors
    }

    /// Authenticate and read every sector of the tag
    ///
    /// `diagnostics` is reset before the hardware is touched. The transport is
    /// connected for the duration of the call and closed on every exit path.
    #[instrument(skip_all, fields(uid = %uid))]
    pub fn read<T: TagTransport + ?Sized>(
        &self,
        uid: &TagUid,
        keys: &DerivedKeySet,
        transport: &mut T,
        diagnostics: &mut ScanDiagnostics,
        cancel: &CancellationToken,
    ) -> Result<TagRead> {
        diagnostics.reset();
        diagnostics.record_derived_keys(keys);

        let mut session = TransportSession::open(transport).map_err(|e| {
            diagnostics.record_error(format!("connect failed: {}", e));
            Error::HardwareIo(e.to_string())
        })?;

        let reported = session.sector_count();
        let sector_count = reported.min(self.max_sectors);
        if sector_count == 0 {
            diagnostics.record_error("transport reported no sectors");
            return Err(Error::HardwareIo("transport reported no sectors".to_string()));
        }
        if reported > sector_count {
            debug!(reported, sector_count, "capping sector count");
        }

        let mut raw = RawSectorMap::new(
            session.technology(),
            session.total_size_bytes(),
            sector_count,
        );
        let mut complete = vec![0u8; first_block_of_sector(sector_count) * BLOCK_SIZE];
        let mut outcomes = Vec::with_capacity(sector_count);
        let mut failed_sectors = Vec::new();
        let mut failed_blocks = Vec::new();
        let mut io_faults = 0;

        for sector in 0..sector_count {
            if cancel.is_cancelled() {
                diagnostics.record_error(format!("cancelled before sector {}", sector));
                return Err(Error::Cancelled);
            }

            let outcome = self.authenticate(&mut *session, sector, keys, diagnostics)?;
            let authenticated = outcome.authenticated;
            if !authenticated {
                failed_sectors.push(sector);
                diagnostics.record_error(format!("sector {}: no key accepted", sector));
            }
            diagnostics.record_outcome(outcome.clone());
            outcomes.push(outcome);

            for block in first_block_of_sector(sector)..trailer_block_of_sector(sector) {
                match session.read_block(block) {
                    Ok(bytes) => {
                        raw.set_block(block, &bytes);
                        let start = block * BLOCK_SIZE;
                        complete[start..start + BLOCK_SIZE].copy_from_slice(&bytes);
                    }
                    Err(TransportError::TagLost) => {
                        diagnostics.record_error(format!("tag lost while reading block {}", block));
                        return Err(Error::HardwareIo(TransportError::TagLost.to_string()));
                    }
                    Err(TransportError::Io(e)) => {
                        if authenticated {
                            io_faults += 1;
                            warn!(block, "block read failed, zero-filling: {}", e);
                        }
                        failed_blocks.push(block);
                        diagnostics.record_error(format!("block {}: {}", block, e));
                    }
                }
            }

            if sector == TEMPERATURE_SECTOR {
                self.check_temperature_block(&raw, authenticated, diagnostics);
            }
        }

        for block in DIAGNOSTIC_BLOCKS {
            if raw.data_offset(block).is_some() {
                diagnostics.record_block_dump(block, &raw.block(block));
            }
        }
        diagnostics.record_raw_snapshot(raw.as_bytes());
        diagnostics.record_complete_snapshot(&complete);

        let authenticated = outcomes.iter().filter(|o| o.authenticated).count();
        if authenticated == 0 {
            warn!(sectors = sector_count, "no sector authenticated");
            return Err(Error::AuthenticationFailed { uid: uid.to_hex() });
        }

        let status = if failed_sectors.is_empty() && failed_blocks.is_empty() {
            ReadStatus::Complete
        } else {
            ReadStatus::Partial {
                failed_sectors,
                failed_blocks,
            }
        };

        info!(
            authenticated,
            sectors = sector_count,
            io_faults,
            partial = matches!(status, ReadStatus::Partial { .. }),
            "tag read finished"
        );

        Ok(TagRead {
            uid: uid.to_hex(),
            raw,
            outcomes,
            status,
            io_faults,
        })
    }

    fn candidates<'a>(&'a self, keys: &'a DerivedKeySet) -> impl Iterator<Item = Candidate<'a>> {
        let derived = keys.keys().iter().enumerate().map(|(index, key)| Candidate {
            source: KeySource::Derived,
            index,
            key,
        });
        let fallback = self.fallback_keys.iter().enumerate().map(|(index, key)| Candidate {
            source: KeySource::Fallback,
            index,
            key,
        });
        derived.chain(fallback)
    }

    fn authenticate<T: TagTransport + ?Sized>(
        &self,
        transport: &mut T,
        sector: usize,
        keys: &DerivedKeySet,
        diagnostics: &mut ScanDiagnostics,
    ) -> Result<AuthenticationOutcome> {
        let mut faults = 0usize;
        let mut last_fault = None;

        for key_type in [KeyType::A, KeyType::B] {
            for candidate in self.candidates(keys) {
                match transport.authenticate_sector(sector, key_type, candidate.key) {
                    Ok(true) => {
                        debug!(
                            sector,
                            key_type = %key_type,
                            source = ?candidate.source,
                            index = candidate.index,
                            "sector authenticated"
                        );
                        return Ok(AuthenticationOutcome::success(
                            sector,
                            key_type,
                            candidate.source,
                            candidate.index,
                        ));
                    }
                    Ok(false) => {}
                    Err(TransportError::TagLost) => {
                        diagnostics.record_error(format!("tag lost authenticating sector {}", sector));
                        return Err(Error::HardwareIo(TransportError::TagLost.to_string()));
                    }
                    Err(TransportError::Io(e)) => {
                        faults += 1;
                        last_fault = Some(e);
                    }
                }
            }
        }

        if let Some(e) = last_fault {
            diagnostics.record_error(format!(
                "sector {}: {} authentication attempt(s) faulted, last: {}",
                sector, faults, e
            ));
        }
        debug!(sector, "sector rejected every key");
        Ok(AuthenticationOutcome::failure(sector))
    }

    fn check_temperature_block(
        &self,
        raw: &RawSectorMap,
        authenticated: bool,
        diagnostics: &mut ScanDiagnostics,
    ) {
        let block = raw.block(TEMPERATURE_BLOCK);
        if block.iter().all(|&b| b == 0) {
            warn!(
                authenticated,
                "temperature block is all zeros, likely an authentication failure"
            );
            diagnostics.record_error(format!(
                "block {} (temperatures) read as all zeros; sector {} likely not authenticated",
                TEMPERATURE_BLOCK, TEMPERATURE_SECTOR
            ));
        }
    }
}
