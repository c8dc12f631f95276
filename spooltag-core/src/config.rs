// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Configuration management for the reader core

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for `max_sectors` (MIFARE Classic 4K)
pub const MAX_SECTOR_LIMIT: usize = 40;

/// Capacity and lifetime settings for one two-tier cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub memory_capacity: usize,
    pub persistent_capacity: usize,
    pub ttl: chrono::Duration,
    pub promotion_grace: chrono::Duration,
}

impl CacheSettings {
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.memory_capacity == 0 {
            return Err(Error::Config(format!("{}: memory capacity must be > 0", name)));
        }

        if self.persistent_capacity < self.memory_capacity {
            return Err(Error::Config(format!(
                "{}: persistent capacity must be >= memory capacity",
                name
            )));
        }

        if self.ttl <= chrono::Duration::zero() {
            return Err(Error::Config(format!("{}: TTL must be > 0", name)));
        }

        Ok(())
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_capacity: default_key_memory_capacity(),
            persistent_capacity: default_key_persistent_capacity(),
            ttl: chrono::Duration::days(default_ttl_days() as i64),
            promotion_grace: chrono::Duration::seconds(default_promotion_grace_secs() as i64),
        }
    }
}

/// Reader core configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReaderConfig {
    /// Key cache in-memory tier capacity
    #[serde(default = "default_key_memory_capacity")]
    pub key_memory_capacity: usize,

    /// Key cache persistent tier capacity
    #[serde(default = "default_key_persistent_capacity")]
    pub key_persistent_capacity: usize,

    /// Key cache TTL in days, measured from creation
    #[serde(default = "default_ttl_days")]
    pub key_ttl_days: u64,

    /// Evicted entries accessed within this window are written to the persistent tier
    #[serde(default = "default_promotion_grace_secs")]
    pub promotion_grace_secs: u64,

    /// Full-tag cache in-memory tier capacity
    #[serde(default = "default_tag_memory_capacity")]
    pub tag_memory_capacity: usize,

    /// Full-tag cache persistent tier capacity
    #[serde(default = "default_tag_persistent_capacity")]
    pub tag_persistent_capacity: usize,

    /// Full-tag cache TTL in days
    #[serde(default = "default_ttl_days")]
    pub tag_ttl_days: u64,

    /// Conservative cap on sectors scanned regardless of what hardware reports
    #[serde(default = "default_max_sectors")]
    pub max_sectors: usize,

    /// Background preload worker threads
    #[serde(default = "default_preload_workers")]
    pub preload_workers: usize,

    /// Pending preload requests before new ones are dropped
    #[serde(default = "default_preload_queue")]
    pub preload_queue: usize,

    /// Directory for the file-backed persistent store (memory-only when unset)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            key_memory_capacity: default_key_memory_capacity(),
            key_persistent_capacity: default_key_persistent_capacity(),
            key_ttl_days: default_ttl_days(),
            promotion_grace_secs: default_promotion_grace_secs(),
            tag_memory_capacity: default_tag_memory_capacity(),
            tag_persistent_capacity: default_tag_persistent_capacity(),
            tag_ttl_days: default_ttl_days(),
            max_sectors: default_max_sectors(),
            preload_workers: default_preload_workers(),
            preload_queue: default_preload_queue(),
            state_dir: None,
        }
    }
}

impl ReaderConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("SPOOLTAG_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, days) in [
            ("key_ttl_days", self.key_ttl_days),
            ("tag_ttl_days", self.tag_ttl_days),
        ] {
            if ttl_from_days(days).is_none() {
                return Err(Error::Config(format!("{} is out of range: {}", name, days)));
            }
        }

        if grace_from_secs(self.promotion_grace_secs).is_none() {
            return Err(Error::Config(format!(
                "promotion_grace_secs is out of range: {}",
                self.promotion_grace_secs
            )));
        }

        self.key_cache_settings().validate("key cache")?;
        self.tag_cache_settings().validate("tag cache")?;

        if self.max_sectors == 0 || self.max_sectors > MAX_SECTOR_LIMIT {
            return Err(Error::Config(format!(
                "max_sectors must be between 1 and {}",
                MAX_SECTOR_LIMIT
            )));
        }

        if self.preload_workers == 0 {
            return Err(Error::Config("preload_workers must be > 0".to_string()));
        }

        if self.preload_queue == 0 {
            return Err(Error::Config("preload_queue must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn key_cache_settings(&self) -> CacheSettings {
        CacheSettings {
            memory_capacity: self.key_memory_capacity,
            persistent_capacity: self.key_persistent_capacity,
            ttl: ttl_from_days(self.key_ttl_days).unwrap_or(chrono::Duration::MAX),
            promotion_grace: self.promotion_grace(),
        }
    }

    pub fn tag_cache_settings(&self) -> CacheSettings {
        CacheSettings {
            memory_capacity: self.tag_memory_capacity,
            persistent_capacity: self.tag_persistent_capacity,
            ttl: ttl_from_days(self.tag_ttl_days).unwrap_or(chrono::Duration::MAX),
            promotion_grace: self.promotion_grace(),
        }
    }

    /// Out-of-range values saturate; `validate` rejects them
    pub fn promotion_grace(&self) -> chrono::Duration {
        grace_from_secs(self.promotion_grace_secs).unwrap_or(chrono::Duration::MAX)
    }
}

fn ttl_from_days(days: u64) -> Option<chrono::Duration> {
    i64::try_from(days).ok().and_then(chrono::Duration::try_days)
}

fn grace_from_secs(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

// Default value functions
fn default_key_memory_capacity() -> usize {
    5_000
}

fn default_key_persistent_capacity() -> usize {
    20_000
}

fn default_ttl_days() -> u64 {
    30
}

fn default_promotion_grace_secs() -> u64 {
    60
}

fn default_tag_memory_capacity() -> usize {
    256
}

fn default_tag_persistent_capacity() -> usize {
    2_048
}

fn default_max_sectors() -> usize {
    16
}

fn default_preload_workers() -> usize {
    2
}

fn default_preload_queue() -> usize {
    64
}
