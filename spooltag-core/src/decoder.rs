// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Filament record decoder
//!
//! Every field is read through [`FieldReader`], whose primitives never fail:
//! reads past the end of a block or of the buffer come back zero-filled, and
//! malformed fields fall back to a default instead of raising.

use crate::encoding::encode_hex;
use crate::tag::{RawSectorMap, BLOCK_SIZE};
use crate::{Error, Result};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Data blocks of sectors 0..=4, trailers excluded
pub const MIN_DATA_LEN: usize = 15 * BLOCK_SIZE;

/// Filament diameter assumed when the tag carries none
pub const DEFAULT_DIAMETER_MM: f32 = 1.75;

/// Sentinel for an unparseable production date
pub const UNKNOWN_DATE: &str = "Unknown";

const MAX_DIAMETER_MM: f32 = 10.0;
const TAG_DATE_FORMAT: &str = "%Y_%m_%d_%H_%M";
const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFilamentRecord {
    pub variant_id: String,
    pub material_id: String,
    pub filament_type: String,
    pub detailed_filament_type: String,
    /// `#RRGGBB`, alpha dropped
    pub color: String,
    pub color_alpha: u8,
    pub spool_weight_g: u16,
    pub diameter_mm: f32,
    pub drying_temp_c: u16,
    pub drying_time_h: u16,
    pub bed_temp_type: u16,
    pub bed_temp_c: u16,
    pub max_hotend_temp_c: u16,
    pub min_hotend_temp_c: u16,
    pub nozzle_diameter_mm: f32,
    pub tray_uid: String,
    pub spool_width_mm: f32,
    pub production_date: String,
    pub length_m: u16,
    pub color_count: u16,
    /// Second color of multi-color spools
    pub second_color: Option<String>,
}

/// Total accessors over absolute block numbers
pub struct FieldReader<'a> {
    raw: &'a RawSectorMap,
}

impl<'a> FieldReader<'a> {
    pub fn new(raw: &'a RawSectorMap) -> Self {
        Self { raw }
    }

    /// `len` bytes of a block starting at `offset`; out-of-range bytes are zero
    pub fn bytes(&self, block: usize, offset: usize, len: usize) -> Vec<u8> {
        let data = self.raw.block(block);
        let mut out = vec![0u8; len];
        if offset < BLOCK_SIZE {
            let available = (BLOCK_SIZE - offset).min(len);
            out[..available].copy_from_slice(&data[offset..offset + available]);
        }
        out
    }

    fn array<const N: usize>(&self, block: usize, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes(block, offset, N));
        out
    }

    pub fn u8(&self, block: usize, offset: usize) -> u8 {
        self.array::<1>(block, offset)[0]
    }

    pub fn u16_le(&self, block: usize, offset: usize) -> u16 {
        u16::from_le_bytes(self.array(block, offset))
    }

    pub fn u32_le(&self, block: usize, offset: usize) -> u32 {
        u32::from_le_bytes(self.array(block, offset))
    }

    /// IEEE-754 single precision, little-endian
    pub fn f32_le(&self, block: usize, offset: usize) -> f32 {
        f32::from_le_bytes(self.array(block, offset))
    }

    /// Fixed-length string with trailing NULs trimmed
    pub fn string(&self, block: usize, offset: usize, len: usize) -> String {
        let bytes = self.bytes(block, offset, len);
        String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string()
    }

    pub fn hex(&self, block: usize, offset: usize, len: usize) -> String {
        encode_hex(&self.bytes(block, offset, len))
    }
}

/// `YYYY_MM_DD_HH_MM` to `YYYY-MM-DD HH:MM`, or [`UNKNOWN_DATE`]
pub fn parse_production_date(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw.trim(), TAG_DATE_FORMAT)
        .map(|dt| dt.format(DISPLAY_DATE_FORMAT).to_string())
        .unwrap_or_else(|_| UNKNOWN_DATE.to_string())
}

fn rgb(r: u8, g: u8, b: u8) -> String {
    format!("#{:02X}{:02X}{:02X}", r, g, b)
}

fn diameter_or_default(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 && value <= MAX_DIAMETER_MM {
        value
    } else {
        DEFAULT_DIAMETER_MM
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Decode a raw tag image, returning `None` if it is too short
pub fn decode(raw: &RawSectorMap) -> Option<DecodedFilamentRecord> {
    try_decode(raw).ok()
}

pub fn try_decode(raw: &RawSectorMap) -> Result<DecodedFilamentRecord> {
    if raw.len() < MIN_DATA_LEN {
        return Err(Error::InsufficientData {
            required: MIN_DATA_LEN,
            actual: raw.len(),
        });
    }

    let r = FieldReader::new(raw);
    let color = r.bytes(5, 0, 4);
    let color_count = r.u16_le(16, 2);
    // Stored as A, B, G, R
    let second = r.bytes(16, 4, 4);
    let second_color = (color_count >= 2).then(|| rgb(second[3], second[2], second[1]));

    Ok(DecodedFilamentRecord {
        variant_id: r.string(1, 0, 8),
        material_id: r.string(1, 8, 8),
        filament_type: r.string(2, 0, BLOCK_SIZE),
        detailed_filament_type: r.string(4, 0, BLOCK_SIZE),
        color: rgb(color[0], color[1], color[2]),
        color_alpha: color[3],
        spool_weight_g: r.u16_le(5, 4),
        diameter_mm: diameter_or_default(r.f32_le(5, 8)),
        drying_temp_c: r.u16_le(6, 0),
        drying_time_h: r.u16_le(6, 2),
        bed_temp_type: r.u16_le(6, 4),
        bed_temp_c: r.u16_le(6, 6),
        max_hotend_temp_c: r.u16_le(6, 8),
        min_hotend_temp_c: r.u16_le(6, 10),
        nozzle_diameter_mm: finite_or_zero(r.f32_le(8, 12)),
        tray_uid: r.hex(9, 0, BLOCK_SIZE),
        spool_width_mm: f32::from(r.u16_le(10, 4)) / 100.0,
        production_date: parse_production_date(&r.string(12, 0, BLOCK_SIZE)),
        length_m: r.u16_le(14, 4),
        color_count,
        second_color,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::MIFARE_CLASSIC;

    fn minimal() -> RawSectorMap {
        RawSectorMap::new(MIFARE_CLASSIC, 1024, 5)
    }

    fn block(bytes: &[u8]) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        out[..bytes.len()].copy_from_slice(bytes);
        out
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let raw = RawSectorMap::from_data(MIFARE_CLASSIC, 1024, 5, vec![0xAB; MIN_DATA_LEN - 1]);
        assert!(decode(&raw).is_none());
        assert!(matches!(
            try_decode(&raw),
            Err(Error::InsufficientData { required: 240, actual: 239 })
        ));
    }

    #[test]
    fn test_all_zero_minimum_buffer() {
        let raw = minimal();
        assert_eq!(raw.len(), MIN_DATA_LEN);

        let record = decode(&raw).unwrap();
        assert_eq!(record.diameter_mm, DEFAULT_DIAMETER_MM);
        assert_eq!(record.drying_temp_c, 0);
        assert_eq!(record.bed_temp_c, 0);
        assert_eq!(record.max_hotend_temp_c, 0);
        assert_eq!(record.min_hotend_temp_c, 0);
        assert_eq!(record.color, "#000000");
        assert_eq!(record.production_date, UNKNOWN_DATE);
        assert!(record.second_color.is_none());
    }

    #[test]
    fn test_color_ignores_alpha() {
        for alpha in [0x00, 0x7F, 0xFF] {
            let mut raw = minimal();
            raw.set_block(5, &block(&[0xFF, 0x00, 0x00, alpha]));
            let record = decode(&raw).unwrap();
            assert_eq!(record.color, "#FF0000");
            assert_eq!(record.color_alpha, alpha);
        }
    }

    #[test]
    fn test_realistic_tag() {
        let mut raw = RawSectorMap::new(MIFARE_CLASSIC, 1024, 16);
        raw.set_block(1, &block(b"A00-K0\0\0GFA00\0\0\0"));
        raw.set_block(2, &block(b"PLA"));
        raw.set_block(4, &block(b"PLA Basic"));

        let mut b5 = vec![0x00, 0xAE, 0x42, 0xFF];
        b5.extend_from_slice(&1000u16.to_le_bytes());
        b5.extend_from_slice(&[0, 0]);
        b5.extend_from_slice(&1.75f32.to_le_bytes());
        raw.set_block(5, &block(&b5));

        let temps: Vec<u8> = [55u16, 8, 1, 35, 230, 190]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        raw.set_block(6, &block(&temps));

        let mut b8 = vec![0u8; 12];
        b8.extend_from_slice(&0.4f32.to_le_bytes());
        raw.set_block(8, &block(&b8));
        raw.set_block(9, &[0x5A; 16]);
        raw.set_block(10, &block(&[0, 0, 0, 0, 0x32, 0x19]));
        raw.set_block(12, &block(b"2024_05_18_10_42"));
        raw.set_block(14, &block(&[0, 0, 0, 0, 0x4A, 0x01]));
        raw.set_block(16, &block(&[0, 0, 2, 0, 0xFF, 0x33, 0x22, 0x11]));

        let record = decode(&raw).unwrap();
        assert_eq!(record.variant_id, "A00-K0");
        assert_eq!(record.material_id, "GFA00");
        assert_eq!(record.filament_type, "PLA");
        assert_eq!(record.detailed_filament_type, "PLA Basic");
        assert_eq!(record.color, "#00AE42");
        assert_eq!(record.spool_weight_g, 1000);
        assert_eq!(record.diameter_mm, 1.75);
        assert_eq!(record.drying_temp_c, 55);
        assert_eq!(record.drying_time_h, 8);
        assert_eq!(record.bed_temp_c, 35);
        assert_eq!(record.max_hotend_temp_c, 230);
        assert_eq!(record.min_hotend_temp_c, 190);
        assert!((record.nozzle_diameter_mm - 0.4).abs() < f32::EPSILON);
        assert_eq!(record.tray_uid, "5A".repeat(16));
        assert!((record.spool_width_mm - 64.5).abs() < 1e-4);
        assert_eq!(record.production_date, "2024-05-18 10:42");
        assert_eq!(record.length_m, 330);
        assert_eq!(record.color_count, 2);
        assert_eq!(record.second_color.as_deref(), Some("#112233"));
    }

    #[test]
    fn test_bad_diameter_defaults() {
        for value in [f32::NAN, f32::INFINITY, -1.0, 0.0, 250.0] {
            let mut raw = minimal();
            let mut b5 = vec![0u8; 8];
            b5.extend_from_slice(&value.to_le_bytes());
            raw.set_block(5, &block(&b5));
            assert_eq!(decode(&raw).unwrap().diameter_mm, DEFAULT_DIAMETER_MM);
        }
    }

    #[test]
    fn test_field_reader_is_total() {
        let raw = minimal();
        let r = FieldReader::new(&raw);
        assert_eq!(r.bytes(200, 0, 4), vec![0; 4]);
        assert_eq!(r.bytes(1, 14, 4), vec![0; 4]);
        assert_eq!(r.bytes(1, 40, 2), vec![0; 2]);
        assert_eq!(r.u32_le(3, 0), 0);
        assert_eq!(r.string(999, 0, 16), "");
    }

    #[test]
    fn test_date_parsing() {
        assert_eq!(parse_production_date("2023_12_01_08_05"), "2023-12-01 08:05");
        assert_eq!(parse_production_date("2023_13_01_08_05"), UNKNOWN_DATE);
        assert_eq!(parse_production_date("garbage"), UNKNOWN_DATE);
        assert_eq!(parse_production_date(""), UNKNOWN_DATE);
    }
}
