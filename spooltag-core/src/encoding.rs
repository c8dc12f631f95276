// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Hex and base64 helpers shared by diagnostics and persisted payloads

use crate::{Error, Result};
use base64::Engine;

/// Encode bytes to upper-case hexadecimal string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hexadecimal string to bytes, ignoring spaces, colons and dashes
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();
    hex::decode(&cleaned).map_err(|e| Error::Serialization(format!("Invalid hex: {}", e)))
}

/// Encode bytes to base64 string
pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode base64 string to bytes
pub fn decode_base64(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| Error::Serialization(format!("Invalid base64: {}", e)))
}

/// Serde adapter storing `Vec<u8>` fields as base64 strings
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_base64(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encoding() {
        let hex = encode_hex(&[0x04, 0x91, 0x4c]);
        assert_eq!(hex, "04914C");
        assert_eq!(decode_hex("04:91:4c").unwrap(), vec![0x04, 0x91, 0x4c]);
        assert_eq!(decode_hex("04 91 4C").unwrap(), vec![0x04, 0x91, 0x4c]);
        assert!(decode_hex("0G").is_err());
    }

    #[test]
    fn test_base64_encoding() {
        let data = b"hello world";
        let b64 = encode_base64(data);
        assert_eq!(decode_base64(&b64).unwrap(), data);
        assert!(decode_base64("***").is_err());
    }
}
