// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Sector/block layout and the raw per-scan tag image
//!
//! Sectors 0..32 hold 4 blocks, sectors 32..40 hold 16 (MIFARE Classic 4K).
//! The last block of every sector is the trailer holding its keys; trailers
//! are never stored in a [`RawSectorMap`].

use crate::encoding::base64_bytes;
use serde::{Deserialize, Serialize};

/// Bytes per block
pub const BLOCK_SIZE: usize = 16;

/// Technology tag reported for MIFARE Classic tags
pub const MIFARE_CLASSIC: &str = "MifareClassic";

const SMALL_SECTORS: usize = 32;
const SMALL_SECTOR_BLOCKS: usize = 4;
const LARGE_SECTOR_BLOCKS: usize = 16;

/// Number of blocks in a sector, trailer included
pub fn blocks_in_sector(sector: usize) -> usize {
    if sector < SMALL_SECTORS {
        SMALL_SECTOR_BLOCKS
    } else {
        LARGE_SECTOR_BLOCKS
    }
}

/// Absolute index of a sector's first block
pub fn first_block_of_sector(sector: usize) -> usize {
    if sector < SMALL_SECTORS {
        sector * SMALL_SECTOR_BLOCKS
    } else {
        SMALL_SECTORS * SMALL_SECTOR_BLOCKS + (sector - SMALL_SECTORS) * LARGE_SECTOR_BLOCKS
    }
}

/// Absolute index of a sector's trailer block
pub fn trailer_block_of_sector(sector: usize) -> usize {
    first_block_of_sector(sector) + blocks_in_sector(sector) - 1
}

/// Sector containing an absolute block and the block's offset within it
pub fn locate_block(block: usize) -> (usize, usize) {
    let small_blocks = SMALL_SECTORS * SMALL_SECTOR_BLOCKS;
    if block < small_blocks {
        (block / SMALL_SECTOR_BLOCKS, block % SMALL_SECTOR_BLOCKS)
    } else {
        let rel = block - small_blocks;
        (SMALL_SECTORS + rel / LARGE_SECTOR_BLOCKS, rel % LARGE_SECTOR_BLOCKS)
    }
}

pub fn is_trailer_block(block: usize) -> bool {
    let (sector, offset) = locate_block(block);
    offset == blocks_in_sector(sector) - 1
}

/// Data (non-trailer) blocks in the first `sector_count` sectors
pub fn data_blocks_in(sector_count: usize) -> usize {
    (0..sector_count).map(|s| blocks_in_sector(s) - 1).sum()
}

/// Raw bytes of one scan: every data block of every scanned sector, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSectorMap {
    /// Technology reported by the transport
    pub technology: String,

    /// Total memory size reported by the transport
    pub declared_size: usize,

    /// Number of sectors covered by `data`
    pub sector_count: usize,

    /// Data blocks with trailers skipped
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

impl RawSectorMap {
    /// Zero-filled image for `sector_count` sectors
    pub fn new(technology: impl Into<String>, declared_size: usize, sector_count: usize) -> Self {
        Self {
            technology: technology.into(),
            declared_size,
            sector_count,
            data: vec![0u8; data_blocks_in(sector_count) * BLOCK_SIZE],
        }
    }

    /// Wrap already-extracted data blocks (trailers skipped)
    pub fn from_data(
        technology: impl Into<String>,
        declared_size: usize,
        sector_count: usize,
        data: Vec<u8>,
    ) -> Self {
        Self {
            technology: technology.into(),
            declared_size,
            sector_count,
            data,
        }
    }

    /// Build from a full memory dump that includes trailer blocks
    ///
    /// A trailing partial sector is ignored.
    pub fn from_full_dump(dump: &[u8]) -> Self {
        let total_blocks = dump.len() / BLOCK_SIZE;
        let mut sector_count = 0;
        while first_block_of_sector(sector_count) + blocks_in_sector(sector_count) <= total_blocks
        {
            sector_count += 1;
        }

        let mut map = Self::new(MIFARE_CLASSIC, dump.len(), sector_count);
        for sector in 0..sector_count {
            let first = first_block_of_sector(sector);
            for block in first..trailer_block_of_sector(sector) {
                let start = block * BLOCK_SIZE;
                let mut bytes = [0u8; BLOCK_SIZE];
                bytes.copy_from_slice(&dump[start..start + BLOCK_SIZE]);
                map.set_block(block, &bytes);
            }
        }
        map
    }

    /// Position of an absolute block within `data`, skipping trailers
    pub fn data_offset(&self, block: usize) -> Option<usize> {
        if is_trailer_block(block) {
            return None;
        }
        let (sector, offset) = locate_block(block);
        if sector >= self.sector_count {
            return None;
        }
        let index = data_blocks_in(sector) + offset;
        let start = index * BLOCK_SIZE;
        (start + BLOCK_SIZE <= self.data.len()).then_some(start)
    }

    /// Copy of an absolute block; trailers and out-of-range blocks read as zeros
    pub fn block(&self, block: usize) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        if let Some(start) = self.data_offset(block) {
            out.copy_from_slice(&self.data[start..start + BLOCK_SIZE]);
        }
        out
    }

    /// Overwrite an absolute data block; returns false for trailers or out of range
    pub fn set_block(&mut self, block: usize, bytes: &[u8; BLOCK_SIZE]) -> bool {
        match self.data_offset(block) {
            Some(start) => {
                self.data[start..start + BLOCK_SIZE].copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether any byte is non-zero
    pub fn has_data(&self) -> bool {
        self.data.iter().any(|&b| b != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_1k() {
        assert_eq!(first_block_of_sector(1), 4);
        assert_eq!(trailer_block_of_sector(0), 3);
        assert_eq!(trailer_block_of_sector(15), 63);
        assert!(is_trailer_block(7));
        assert!(!is_trailer_block(6));
        assert_eq!(locate_block(6), (1, 2));
        assert_eq!(data_blocks_in(16), 48);
    }

    #[test]
    fn test_layout_4k() {
        assert_eq!(first_block_of_sector(32), 128);
        assert_eq!(blocks_in_sector(32), 16);
        assert_eq!(trailer_block_of_sector(32), 143);
        assert_eq!(locate_block(144), (33, 0));
        assert_eq!(data_blocks_in(40), 32 * 3 + 8 * 15);
    }

    #[test]
    fn test_block_translation_skips_trailers() {
        let mut map = RawSectorMap::new(MIFARE_CLASSIC, 1024, 16);
        assert_eq!(map.len(), 48 * BLOCK_SIZE);

        assert!(map.set_block(4, &[0xAA; BLOCK_SIZE]));
        assert!(!map.set_block(3, &[0xBB; BLOCK_SIZE]));
        assert_eq!(map.data_offset(4), Some(3 * BLOCK_SIZE));
        assert_eq!(map.block(4), [0xAA; BLOCK_SIZE]);
        assert_eq!(map.block(3), [0; BLOCK_SIZE]);
        assert_eq!(map.block(500), [0; BLOCK_SIZE]);
    }

    #[test]
    fn test_from_full_dump() {
        let mut dump = vec![0u8; 1024];
        dump[16..32].copy_from_slice(&[0x11; 16]); // block 1
        dump[48..64].copy_from_slice(&[0xFF; 16]); // trailer 3
        dump[64..80].copy_from_slice(&[0x22; 16]); // block 4

        let map = RawSectorMap::from_full_dump(&dump);
        assert_eq!(map.sector_count, 16);
        assert_eq!(map.declared_size, 1024);
        assert_eq!(map.block(1), [0x11; 16]);
        assert_eq!(map.block(4), [0x22; 16]);
        assert!(!map.as_bytes().contains(&0xFF));
    }

    #[test]
    fn test_serde_uses_base64() {
        let map = RawSectorMap::new(MIFARE_CLASSIC, 1024, 1);
        let json = serde_json::to_value(&map).unwrap();
        assert!(json["data"].is_string());
        let back: RawSectorMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
