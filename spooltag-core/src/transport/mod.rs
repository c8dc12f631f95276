// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Blocking hardware transport consumed by the reader
//!
//! Any operation may fail. [`TransportError::Io`] is a fault of that one
//! operation; [`TransportError::TagLost`] means the tag left the field and the
//! session cannot continue.

mod simulated;

pub use simulated::{SessionCounters, SimulatedTag};

use crate::keys::{KeyType, SectorKey};
use crate::tag::BLOCK_SIZE;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("I/O fault: {0}")]
    Io(String),

    #[error("Tag left the field")]
    TagLost,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

pub trait TagTransport: Send {
    /// Technology name, e.g. `"MifareClassic"`
    fn technology(&self) -> &str;

    /// Sectors the hardware reports
    fn sector_count(&self) -> usize;

    /// Memory size the hardware reports, in bytes
    fn total_size_bytes(&self) -> usize;

    fn connect(&mut self) -> TransportResult<()>;

    /// Release the hardware session; must be safe to call more than once
    fn close(&mut self);

    /// Try one key against a sector; `Ok(false)` means the key was rejected
    fn authenticate_sector(
        &mut self,
        sector: usize,
        key_type: KeyType,
        key: &SectorKey,
    ) -> TransportResult<bool>;

    /// Read one block by absolute index
    fn read_block(&mut self, block: usize) -> TransportResult<[u8; BLOCK_SIZE]>;
}

impl<T: TagTransport + ?Sized> TagTransport for Box<T> {
    fn technology(&self) -> &str {
        (**self).technology()
    }

    fn sector_count(&self) -> usize {
        (**self).sector_count()
    }

    fn total_size_bytes(&self) -> usize {
        (**self).total_size_bytes()
    }

    fn connect(&mut self) -> TransportResult<()> {
        (**self).connect()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn authenticate_sector(
        &mut self,
        sector: usize,
        key_type: KeyType,
        key: &SectorKey,
    ) -> TransportResult<bool> {
        (**self).authenticate_sector(sector, key_type, key)
    }

    fn read_block(&mut self, block: usize) -> TransportResult<[u8; BLOCK_SIZE]> {
        (**self).read_block(block)
    }
}

/// Connected transport that closes itself when dropped
///
/// Dropping the session on any path (success, error, cancellation, panic)
/// releases the hardware.
pub struct TransportSession<'a, T: TagTransport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: TagTransport + ?Sized> TransportSession<'a, T> {
    pub fn open(transport: &'a mut T) -> TransportResult<Self> {
        if let Err(e) = transport.connect() {
            transport.close();
            return Err(e);
        }
        Ok(Self { transport })
    }
}

impl<T: TagTransport + ?Sized> Deref for TransportSession<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: TagTransport + ?Sized> DerefMut for TransportSession<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport
    }
}

impl<T: TagTransport + ?Sized> Drop for TransportSession<'_, T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}
