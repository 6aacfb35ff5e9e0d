// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-addressable storage backends for the settings store.
//!
//! A [`Storage`] behaves like an EEPROM emulation: it is opened with
//! [`Storage::begin`], read and written by offset, made durable with
//! [`Storage::commit`] and released with [`Storage::end`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::StorageError;

/// Default storage capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A fixed-capacity, byte-addressable storage device.
pub trait Storage: Send {
    /// Opens the storage for a sequence of reads and writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OpenFailed`] if the device is unavailable.
    fn begin(&mut self) -> Result<(), StorageError>;

    /// Returns the total capacity in bytes.
    fn capacity(&self) -> usize;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Malformed`] if the range is out of bounds.
    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, StorageError>;

    /// Writes `bytes` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CapacityExceeded`] if the range is out of bounds.
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;

    /// Makes pending writes durable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CommitFailed`] if the data could not be persisted.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Releases the storage.
    fn end(&mut self);
}

fn check_read_range(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::Malformed(format!(
            "read of {len} bytes at offset {offset} exceeds capacity {capacity}"
        ))),
    }
}

fn check_write_range(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::CapacityExceeded {
            required: offset.saturating_add(len),
            available: capacity,
        }),
    }
}

// ============================================================================
// StorageStats - Shared write/commit counters
// ============================================================================

/// Counters shared between a [`MemoryStorage`] and its observers.
///
/// Clones share the same counters, so a test can keep a handle after moving
/// the storage into a store.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    writes: AtomicUsize,
    bytes_written: AtomicUsize,
    commits: AtomicUsize,
}

impl StorageStats {
    /// Number of write calls.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::Relaxed)
    }

    /// Number of bytes written.
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.inner.bytes_written.load(Ordering::Relaxed)
    }

    /// Number of commits.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::Relaxed)
    }

    fn record_write(&self, len: usize) {
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_written.fetch_add(len, Ordering::Relaxed);
    }

    fn record_commit(&self) {
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// MemoryStorage
// ============================================================================

/// Volatile in-memory storage, zero-filled on creation.
///
/// # Examples
///
/// ```
/// use smartthing::store::{MemoryStorage, Storage};
///
/// let mut storage = MemoryStorage::new(64);
/// let stats = storage.stats();
///
/// storage.begin().unwrap();
/// storage.write(0, b"abc").unwrap();
/// storage.commit().unwrap();
///
/// assert_eq!(storage.read(0, 3).unwrap(), b"abc");
/// assert_eq!(stats.commits(), 1);
/// ```
#[derive(Debug)]
pub struct MemoryStorage {
    data: Vec<u8>,
    stats: StorageStats,
    available: bool,
}

impl MemoryStorage {
    /// Creates a zero-filled storage of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            stats: StorageStats::default(),
            available: true,
        }
    }

    /// Creates a storage that fails to open.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(DEFAULT_CAPACITY)
        }
    }

    /// Returns a handle to the write and commit counters.
    #[must_use]
    pub fn stats(&self) -> StorageStats {
        self.stats.clone()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Storage for MemoryStorage {
    fn begin(&mut self) -> Result<(), StorageError> {
        if self.available {
            Ok(())
        } else {
            Err(StorageError::OpenFailed("memory storage unavailable".into()))
        }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, StorageError> {
        check_read_range(offset, len, self.data.len())?;
        Ok(self.data[offset..offset + len].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_write_range(offset, bytes.len(), self.data.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.stats.record_write(bytes.len());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.stats.record_commit();
        Ok(())
    }

    fn end(&mut self) {}
}

// ============================================================================
// FileStorage
// ============================================================================

/// EEPROM emulation backed by a file.
///
/// The file is loaded into a buffer on [`Storage::begin`]. A missing file
/// reads as zero-filled storage. [`Storage::commit`] writes the buffer to a
/// temporary sibling file and renames it over the original.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    capacity: usize,
    buffer: Option<Vec<u8>>,
}

impl FileStorage {
    /// Creates a file storage with [`DEFAULT_CAPACITY`].
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_capacity(path, DEFAULT_CAPACITY)
    }

    /// Creates a file storage with the given capacity.
    #[must_use]
    pub fn with_capacity(path: impl AsRef<Path>, capacity: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            capacity,
            buffer: None,
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn buffer(&self) -> Result<&Vec<u8>, StorageError> {
        self.buffer
            .as_ref()
            .ok_or_else(|| StorageError::OpenFailed("storage is not open".into()))
    }
}

impl Storage for FileStorage {
    fn begin(&mut self) -> Result<(), StorageError> {
        let mut data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(StorageError::OpenFailed(format!(
                    "{}: {e}",
                    self.path.display()
                )));
            }
        };
        data.resize(self.capacity, 0);
        self.buffer = Some(data);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, StorageError> {
        check_read_range(offset, len, self.capacity)?;
        Ok(self.buffer()?[offset..offset + len].to_vec())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_write_range(offset, bytes.len(), self.capacity)?;
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| StorageError::OpenFailed("storage is not open".into()))?;
        buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let buffer = self
            .buffer()
            .map_err(|e| StorageError::CommitFailed(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, buffer)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| StorageError::CommitFailed(format!("{}: {e}", self.path.display())))?;
        tracing::trace!(path = %self.path.display(), "Committed storage file");
        Ok(())
    }

    fn end(&mut self) {
        self.buffer = None;
    }
}
