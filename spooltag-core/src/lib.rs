// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! SpoolTag Core Library
//!
//! Reads the MIFARE Classic tags embedded in filament spools: derives the
//! per-tag sector keys from the UID, authenticates and reads every sector
//! while tolerating partial failure, and decodes the manufacturer layout into
//! a typed record. Derived keys and raw tag images are cached across scans.
//!
//! # Architecture
//!
//! - `kdf`: HKDF-SHA256 key derivation from the tag UID
//! - `cache`: generic two-tier (memory + persistent) cache with TTL and LRU
//! - `key_cache` / `tag_cache`: the two cache instances used by a scan
//! - `transport`: blocking hardware seam and an in-memory simulated tag
//! - `reader`: sector authentication/read state machine
//! - `decoder`: total byte-layout decoder
//! - `diagnostics`: per-scan trace for troubleshooting
//! - `scanner`: the end-to-end pipeline tying the above together
//! - `config`, `store`, `clock`, `encoding`, `error`: supporting concerns
//!
//! # Design Principles
//!
//! 1. **Total decoding**: malformed tag data degrades to defaults, never panics
//! 2. **Graceful degradation**: one bad sector or block never aborts a scan
//! 3. **Explicit capabilities**: caches, stores and clocks are injected, not global
//! 4. **Testability**: hardware sits behind a trait with a simulated implementation

pub mod cache;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod diagnostics;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod key_cache;
pub mod keys;
pub mod preload;
pub mod reader;
pub mod scanner;
pub mod store;
pub mod tag;
pub mod tag_cache;
pub mod transport;

pub use decoder::DecodedFilamentRecord;
pub use diagnostics::{AuthenticationOutcome, ScanDiagnostics};
pub use error::{Error, Result};
pub use keys::{DerivedKeySet, TagUid};
pub use scanner::{ScanReport, TagScanner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
