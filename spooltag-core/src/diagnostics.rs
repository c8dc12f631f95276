// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Per-scan troubleshooting trace
//!
//! One collector belongs to one scan at a time: the reader takes it by
//! `&mut` and resets it before touching hardware.

use crate::encoding::encode_hex;
use crate::keys::{DerivedKeySet, KeySource, KeyType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Result of authenticating one sector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationOutcome {
    pub sector: usize,
    pub authenticated: bool,
    /// Credential that opened the sector
    pub key_type: Option<KeyType>,
    pub key_source: Option<KeySource>,
    /// Position of the winning key within its source list
    pub key_index: Option<usize>,
}

impl AuthenticationOutcome {
    pub fn success(sector: usize, key_type: KeyType, key_source: KeySource, key_index: usize) -> Self {
        Self {
            sector,
            authenticated: true,
            key_type: Some(key_type),
            key_source: Some(key_source),
            key_index: Some(key_index),
        }
    }

    pub fn failure(sector: usize) -> Self {
        Self {
            sector,
            authenticated: false,
            key_type: None,
            key_source: None,
            key_index: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanDiagnostics {
    outcomes: Vec<AuthenticationOutcome>,
    block_dumps: BTreeMap<usize, String>,
    derived_keys: Vec<String>,
    raw_snapshot: Option<String>,
    complete_snapshot: Option<String>,
    errors: Vec<String>,
}

impl ScanDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything recorded by a previous scan
    pub fn reset(&mut self) {
        self.outcomes.clear();
        self.block_dumps.clear();
        self.derived_keys.clear();
        self.raw_snapshot = None;
        self.complete_snapshot = None;
        self.errors.clear();
    }

    pub fn record_outcome(&mut self, outcome: AuthenticationOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn record_block_dump(&mut self, block: usize, bytes: &[u8]) {
        self.block_dumps.insert(block, encode_hex(bytes));
    }

    pub fn record_derived_keys(&mut self, keys: &DerivedKeySet) {
        self.derived_keys = keys.to_hex_strings();
    }

    /// Data blocks as handed to the decoder
    pub fn record_raw_snapshot(&mut self, bytes: &[u8]) {
        self.raw_snapshot = Some(encode_hex(bytes));
    }

    /// Every block read including trailers
    pub fn record_complete_snapshot(&mut self, bytes: &[u8]) {
        self.complete_snapshot = Some(encode_hex(bytes));
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn outcomes(&self) -> &[AuthenticationOutcome] {
        &self.outcomes
    }

    pub fn authenticated_sectors(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| o.authenticated)
            .map(|o| o.sector)
            .collect()
    }

    pub fn failed_sectors(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.authenticated)
            .map(|o| o.sector)
            .collect()
    }

    /// Key type that opened each authenticated sector
    pub fn key_types(&self) -> BTreeMap<usize, KeyType> {
        self.outcomes
            .iter()
            .filter_map(|o| o.key_type.map(|t| (o.sector, t)))
            .collect()
    }

    pub fn block_dumps(&self) -> &BTreeMap<usize, String> {
        &self.block_dumps
    }

    pub fn derived_keys(&self) -> &[String] {
        &self.derived_keys
    }

    pub fn raw_snapshot(&self) -> Option<&str> {
        self.raw_snapshot.as_deref()
    }

    pub fn complete_snapshot(&self) -> Option<&str> {
        self.complete_snapshot.as_deref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Multi-line report for support logs
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Authenticated sectors: {:?}", self.authenticated_sectors());
        let _ = writeln!(out, "Failed sectors: {:?}", self.failed_sectors());

        for (sector, key_type) in self.key_types() {
            let _ = writeln!(out, "  sector {:>2}: key {}", sector, key_type);
        }
        for (block, dump) in &self.block_dumps {
            let _ = writeln!(out, "  block {:>2}: {}", block, dump);
        }
        for error in &self.errors {
            let _ = writeln!(out, "  error: {}", error);
        }
        out
    }
}
