// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Tag identifiers and sector authentication keys

use crate::encoding::{decode_base64, decode_hex, encode_base64, encode_hex};
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a single sector key in bytes
pub const KEY_LEN: usize = 6;

/// Number of keys derived per tag, one per sector of a 1K tag
pub const DERIVED_KEY_COUNT: usize = 16;

/// Minimum UID length accepted for key derivation
pub const MIN_UID_LEN: usize = 4;

/// Unique identifier broadcast by a tag
///
/// The canonical form is upper-case hex without separators; that string is
/// the lookup key for every cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagUid(Vec<u8>);

impl TagUid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical hex string used as cache key
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl fmt::Display for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TagUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex(s)?;
        if bytes.is_empty() {
            return Err(Error::InvalidUid {
                len: 0,
                min: MIN_UID_LEN,
            });
        }
        Ok(Self(bytes))
    }
}

impl From<&[u8]> for TagUid {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Six-byte sector authentication key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorKey(pub [u8; KEY_LEN]);

impl SectorKey {
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl fmt::Debug for SectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectorKey({})", self.to_hex())
    }
}

impl fmt::Display for SectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Which of the two per-sector credentials was used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    A,
    B,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::A => f.write_str("A"),
            KeyType::B => f.write_str("B"),
        }
    }
}

/// Origin of the key that opened a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    Derived,
    Fallback,
}

/// Well-known keys tried after the derived set, in order
pub const FALLBACK_KEYS: [SectorKey; 13] = [
    // Factory default
    SectorKey::new([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
    SectorKey::new([0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
    // MAD and NDEF defaults
    SectorKey::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]),
    SectorKey::new([0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]),
    SectorKey::new([0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7]),
    // Transport and vendor configuration defaults
    SectorKey::new([0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD]),
    SectorKey::new([0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A]),
    SectorKey::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
    SectorKey::new([0x71, 0x4C, 0x5C, 0x88, 0x6E, 0x97]),
    SectorKey::new([0x58, 0x7E, 0xE5, 0xF9, 0x35, 0x0F]),
    SectorKey::new([0xA0, 0x47, 0x8C, 0xC3, 0x90, 0x91]),
    SectorKey::new([0x53, 0x3C, 0xB6, 0xC7, 0x23, 0xF6]),
    SectorKey::new([0x8F, 0xD0, 0xA4, 0xF2, 0x56, 0xE9]),
];

/// Ordered set of exactly sixteen derived sector keys
///
/// Immutable once built. Persisted as base64 of the 96 concatenated key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKeySet {
    keys: [SectorKey; DERIVED_KEY_COUNT],
}

impl DerivedKeySet {
    /// Build from exactly `DERIVED_KEY_COUNT * KEY_LEN` bytes of key material
    pub fn from_material(material: &[u8]) -> Result<Self> {
        if material.len() != DERIVED_KEY_COUNT * KEY_LEN {
            return Err(Error::Serialization(format!(
                "Key material must be {} bytes, got {}",
                DERIVED_KEY_COUNT * KEY_LEN,
                material.len()
            )));
        }

        let mut keys = [SectorKey([0u8; KEY_LEN]); DERIVED_KEY_COUNT];
        for (key, chunk) in keys.iter_mut().zip(material.chunks_exact(KEY_LEN)) {
            key.0.copy_from_slice(chunk);
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[SectorKey] {
        &self.keys
    }

    /// Key derived for a given sector, if the sector is in range
    pub fn for_sector(&self, sector: usize) -> Option<&SectorKey> {
        self.keys.get(sector)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Concatenated key material
    pub fn to_material(&self) -> Vec<u8> {
        self.keys.iter().flat_map(|k| k.0).collect()
    }

    pub fn to_hex_strings(&self) -> Vec<String> {
        self.keys.iter().map(SectorKey::to_hex).collect()
    }
}

impl fmt::Debug for DerivedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys.iter()).finish()
    }
}

impl Serialize for DerivedKeySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_base64(&self.to_material()))
    }
}

impl<'de> Deserialize<'de> for DerivedKeySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let material = decode_base64(&encoded).map_err(serde::de::Error::custom)?;
        DerivedKeySet::from_material(&material).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_parsing() {
        let uid: TagUid = "04:91:4c:ca:5e:64:80".parse().unwrap();
        assert_eq!(uid.len(), 7);
        assert_eq!(uid.to_hex(), "04914CCA5E6480");
        assert_eq!(uid.to_string(), "04914CCA5E6480");
        assert!("".parse::<TagUid>().is_err());
        assert!("XYZ".parse::<TagUid>().is_err());
    }

    #[test]
    fn test_key_set_from_material() {
        let material: Vec<u8> = (0..96).collect();
        let set = DerivedKeySet::from_material(&material).unwrap();
        assert_eq!(set.len(), DERIVED_KEY_COUNT);
        assert_eq!(set.keys()[1].0, [6, 7, 8, 9, 10, 11]);
        assert_eq!(set.to_material(), material);
        assert!(DerivedKeySet::from_material(&material[..90]).is_err());
    }

    #[test]
    fn test_key_set_serde() {
        let material: Vec<u8> = (0..96).map(|i| (i * 7) as u8).collect();
        let set = DerivedKeySet::from_material(&material).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let back: DerivedKeySet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);

        let truncated = format!("\"{}\"", encode_base64(&material[..12]));
        assert!(serde_json::from_str::<DerivedKeySet>(&truncated).is_err());
    }

    #[test]
    fn test_fallback_keys_start_with_factory_default() {
        assert_eq!(FALLBACK_KEYS[0].to_hex(), "FFFFFFFFFFFF");
        assert_eq!(FALLBACK_KEYS[1].to_hex(), "000000000000");
    }
}
