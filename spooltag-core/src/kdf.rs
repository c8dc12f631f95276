// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Sector key derivation from the tag UID
//!
//! Keys are produced by HKDF-SHA256 (RFC 5869): the UID is the input key
//! material, a fixed 16-byte master secret is the salt, and a single 96-byte
//! expansion under the `"RFID-A\0"` context is sliced into sixteen 6-byte keys.
//! Key `i` belongs to sector `i`.

use crate::keys::{DerivedKeySet, SectorKey, DERIVED_KEY_COUNT, KEY_LEN, MIN_UID_LEN};
use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Salt used in the extract phase
pub const MASTER_SECRET: [u8; 16] = [
    0x9a, 0x75, 0x9c, 0xf2, 0xc4, 0xf7, 0xca, 0xff, 0x22, 0x2c, 0xb9, 0x76, 0x9b, 0x41, 0xbc, 0x96,
];

/// Context label for the expand phase
pub const KEY_A_CONTEXT: &[u8] = b"RFID-A\0";

const HASH_LEN: usize = 32;

/// HKDF-SHA256 extract + expand
///
/// Output longer than 255 hash blocks is rejected as RFC 5869 requires.
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    if len > 255 * HASH_LEN {
        return Err(Error::Config(format!(
            "HKDF output length {} exceeds {}",
            len,
            255 * HASH_LEN
        )));
    }

    // HKDF-Extract: PRK = HMAC(salt, IKM)
    let mut mac = HmacSha256::new_from_slice(salt)
        .map_err(|e| Error::Config(format!("HMAC init failed: {}", e)))?;
    mac.update(ikm);
    let prk = mac.finalize().into_bytes();

    // HKDF-Expand: T(i) = HMAC(PRK, T(i-1) || info || i)
    let mut output = Vec::with_capacity(len + HASH_LEN);
    let mut t: Vec<u8> = Vec::new();
    let mut counter = 1u8;

    while output.len() < len {
        let mut mac = HmacSha256::new_from_slice(&prk)
            .map_err(|e| Error::Config(format!("HMAC init failed: {}", e)))?;
        mac.update(&t);
        mac.update(info);
        mac.update(&[counter]);
        t = mac.finalize().into_bytes().to_vec();
        output.extend_from_slice(&t);
        counter = counter.wrapping_add(1);
    }

    output.truncate(len);
    Ok(output)
}

/// Derive the sixteen sector keys for a UID
///
/// Fails with `InvalidUid` when the UID is shorter than four bytes.
pub fn try_derive_keys(uid: &[u8]) -> Result<DerivedKeySet> {
    if uid.len() < MIN_UID_LEN {
        return Err(Error::InvalidUid {
            len: uid.len(),
            min: MIN_UID_LEN,
        });
    }

    let material = hkdf_sha256(&MASTER_SECRET, uid, KEY_A_CONTEXT, DERIVED_KEY_COUNT * KEY_LEN)?;
    DerivedKeySet::from_material(&material)
}

/// Derive keys, returning an empty list instead of an error for unusable UIDs
pub fn derive_keys(uid: &[u8]) -> Vec<SectorKey> {
    match try_derive_keys(uid) {
        Ok(set) => set.keys().to_vec(),
        Err(e) => {
            tracing::debug!("Key derivation skipped: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode_hex, encode_hex};

    #[test]
    fn test_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();
        let okm = hkdf_sha256(&salt, &ikm, &info, 42).unwrap();
        assert_eq!(
            encode_hex(&okm),
            "3CB25F25FAACD57A90434F64D0362F2A2D2D0A90CF1A5A4C5DB02D56ECC4C5BF34007208D5B887185865"
        );
    }

    #[test]
    fn test_reference_uid_vector() {
        let uid = decode_hex("04914CCA5E6480").unwrap();
        let set = try_derive_keys(&uid).unwrap();
        assert_eq!(set.keys()[0].to_hex(), "9DE777C91084");
        assert_eq!(set.keys()[1].to_hex(), "BA9822C509D5");
        assert_eq!(set.keys()[15].to_hex(), "93E0DFFF52DD");
    }

    #[test]
    fn test_four_byte_uid() {
        let set = try_derive_keys(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(set.keys()[0].to_hex(), "045C6DC690E9");
        assert_eq!(set.keys()[15].to_hex(), "46CF8B20C176");
    }

    #[test]
    fn test_short_uid_yields_no_keys() {
        for len in 0..MIN_UID_LEN {
            let uid = vec![0xAB; len];
            assert!(derive_keys(&uid).is_empty());
            assert!(matches!(
                try_derive_keys(&uid),
                Err(Error::InvalidUid { .. })
            ));
        }
    }

    #[test]
    fn test_output_shape_and_determinism() {
        let uid = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let first = derive_keys(&uid);
        let second = derive_keys(&uid);
        assert_eq!(first.len(), DERIVED_KEY_COUNT);
        assert_eq!(first, second);
    }

    #[test]
    fn test_hkdf_rejects_oversized_output() {
        assert!(hkdf_sha256(b"salt", b"ikm", b"", 255 * 32 + 1).is_err());
    }
}
