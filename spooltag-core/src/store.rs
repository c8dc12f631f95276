// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Persistent key-value stores backing the persistent cache tier
//!
//! The cache treats stored values as opaque strings; the store only needs to
//! round-trip them per `(namespace, key)`.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// String key-value storage grouped by namespace
pub trait KeyValueStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
    fn remove(&self, namespace: &str, key: &str) -> Result<()>;
}

/// Process-local store, used for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .read()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        self.values
            .write()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// Directory-backed store: `<root>/<namespace>/<key>.json`
///
/// Writes go to a temporary file first and are renamed into place so a crash
/// never leaves a half-written payload behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        validate_segment(namespace)?;
        validate_segment(key)?;
        Ok(self.root.join(namespace).join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let path = self.path_for(namespace, key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("read {}: {}", path.display(), e))),
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(namespace, key)?;
        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!(".{}.tmp", key));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("rename {}: {}", path.display(), e)))
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let path = self.path_for(namespace, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("remove {}: {}", path.display(), e))),
        }
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    let ok = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !segment.starts_with('.');

    if ok {
        Ok(())
    } else {
        Err(Error::Storage(format!("Invalid store path segment '{}'", segment)))
    }
}
