// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Error types for the tag reader core
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tag reading operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// UID too short to derive sector keys
    #[error("Invalid UID: expected at least {min} bytes, got {len}")]
    InvalidUid { len: usize, min: usize },

    /// Not a single sector accepted any candidate key
    #[error("Authentication failed for tag {uid}: no sector accepted any key")]
    AuthenticationFailed { uid: String },

    /// Some sectors or blocks could not be read, at least one sector authenticated
    #[error("Partial read: {failed_sectors} sector(s) and {failed_blocks} block(s) failed")]
    PartialReadFailure {
        failed_sectors: usize,
        failed_blocks: usize,
    },

    /// Buffer shorter than the decoder's minimum layout
    #[error("Insufficient tag data: need {required} bytes, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Transport fault during authentication or reading
    #[error("Hardware I/O error: {0}")]
    HardwareIo(String),

    /// Persistent cache payload could not be parsed
    #[error("Cache corruption in namespace '{namespace}': {reason}")]
    CacheCorruption { namespace: String, reason: String },

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persistent store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Scan was cancelled before completion
    #[error("Scan cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the failure is transient and the user should simply tap again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::HardwareIo(_) | Error::PartialReadFailure { .. } | Error::Cancelled
        )
    }

    /// Check if error indicates the tag rejected every key
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::AuthenticationFailed { .. })
    }

    /// Whether cached full-tag data for the UID must be dropped after this error
    pub fn invalidates_tag_cache(&self) -> bool {
        matches!(self, Error::AuthenticationFailed { .. } | Error::HardwareIo(_))
    }
}

// Conversions for common error types
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
