// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Length-prefixed partition layout on top of a [`Storage`].
//!
//! ```text
//! offset 0                15
//! | n0 | n1 | n2 | n3 | n4 | payload0 | payload1 | ... | payload4 |
//! ```
//!
//! Each `nX` is a three-digit ASCII length. Payloads are packed in
//! partition order directly after the header.

use parking_lot::Mutex;

use super::Partition;
use super::storage::Storage;
use crate::error::StorageError;

/// Width of one length field.
pub const LENGTH_FIELD_SIZE: usize = 3;
/// Size of the header holding every length field.
pub const HEADER_SIZE: usize = LENGTH_FIELD_SIZE * Partition::COUNT;
/// Largest payload a single partition can hold.
pub const MAX_PARTITION_LEN: usize = 999;

type Lengths = [usize; Partition::COUNT];

/// Partitioned settings store.
///
/// All operations take an internal lock, so the store can be shared between
/// tasks behind an `Arc`.
pub struct ConfigStore {
    storage: Mutex<Box<dyn Storage>>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Parses one length field; anything but three ASCII digits reads as zero.
fn parse_length(field: &[u8]) -> usize {
    if field.len() == LENGTH_FIELD_SIZE && field.iter().all(u8::is_ascii_digit) {
        field
            .iter()
            .fold(0, |acc, digit| acc * 10 + usize::from(digit - b'0'))
    } else {
        0
    }
}

fn parse_header(header: &[u8]) -> Lengths {
    let mut lengths = [0; Partition::COUNT];
    for (slot, field) in lengths.iter_mut().zip(header.chunks(LENGTH_FIELD_SIZE)) {
        *slot = parse_length(field);
    }
    lengths
}

fn format_header(lengths: &Lengths) -> String {
    lengths.iter().map(|len| format!("{len:03}")).collect()
}

fn escape_dump(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Single pass, so `\\n` decodes to a backslash followed by `n`.
fn unescape_dump(dump: &str) -> String {
    let mut out = String::with_capacity(dump.len());
    let mut chars = dump.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

impl ConfigStore {
    /// Creates a store over the given storage backend.
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Mutex::new(Box::new(storage)),
        }
    }

    /// Returns the capacity of the underlying storage.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.lock().capacity()
    }

    /// Runs `f` with the storage opened, closing it afterwards.
    fn with_storage<T>(
        &self,
        f: impl FnOnce(&mut dyn Storage) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut storage = self.storage.lock();
        storage.begin()?;
        let result = f(&mut **storage);
        storage.end();
        result
    }

    fn read_lengths(storage: &dyn Storage) -> Result<Lengths, StorageError> {
        let header = storage.read(0, HEADER_SIZE)?;
        let lengths = parse_header(&header);
        let used = HEADER_SIZE + lengths.iter().sum::<usize>();
        if used > storage.capacity() {
            return Err(StorageError::Malformed(format!(
                "header declares {used} bytes, capacity is {}",
                storage.capacity()
            )));
        }
        Ok(lengths)
    }

    fn offset_of(lengths: &Lengths, partition: Partition) -> usize {
        HEADER_SIZE + lengths[..partition.index()].iter().sum::<usize>()
    }

    /// Reads the payload of one partition.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OpenFailed`] if the storage cannot be opened
    /// and [`StorageError::Malformed`] if the header points past the storage
    /// or the payload is not valid UTF-8.
    pub fn read(&self, partition: Partition) -> Result<String, StorageError> {
        self.with_storage(|storage| {
            let lengths = Self::read_lengths(storage)?;
            let offset = Self::offset_of(&lengths, partition);
            let bytes = storage.read(offset, lengths[partition.index()])?;
            String::from_utf8(bytes).map_err(|e| {
                StorageError::Malformed(format!("{partition} partition is not UTF-8: {e}"))
            })
        })
    }

    /// Replaces the payload of one partition and commits.
    ///
    /// Later partitions are shifted to stay packed. Writing the value already
    /// stored touches nothing and does not commit.
    ///
    /// Returns the number of bytes stored for the partition.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CapacityExceeded`] if the payload is longer
    /// than [`MAX_PARTITION_LEN`] or the packed layout would not fit.
    pub fn write(&self, partition: Partition, data: &str) -> Result<usize, StorageError> {
        let payload = data.as_bytes();
        self.with_storage(|storage| {
            let mut lengths = Self::read_lengths(storage)?;
            let index = partition.index();
            let offset = Self::offset_of(&lengths, partition);
            let old_len = lengths[index];

            if old_len == payload.len() && storage.read(offset, old_len)? == payload {
                tracing::trace!(%partition, "Partition unchanged, skipping write");
                return Ok(old_len);
            }

            if payload.len() > MAX_PARTITION_LEN {
                return Err(StorageError::CapacityExceeded {
                    required: payload.len(),
                    available: MAX_PARTITION_LEN,
                });
            }
            let used = HEADER_SIZE + lengths.iter().sum::<usize>();
            let required = used - old_len + payload.len();
            if required > storage.capacity() {
                return Err(StorageError::CapacityExceeded {
                    required,
                    available: storage.capacity(),
                });
            }

            let tail_len: usize = lengths[index + 1..].iter().sum();
            let tail = storage.read(offset + old_len, tail_len)?;

            storage.write(offset, payload)?;
            storage.write(offset + payload.len(), &tail)?;
            lengths[index] = payload.len();
            storage.write(0, format_header(&lengths).as_bytes())?;
            storage.commit()?;

            tracing::debug!(%partition, len = payload.len(), "Partition written");
            Ok(payload.len())
        })
    }

    /// Dumps the used region as an opaque string.
    ///
    /// Length fields that are not numeric are exported as `000`. Backslashes,
    /// newlines and tabs are escaped as `\\`, `\n` and `\t`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OpenFailed`] if the storage cannot be opened.
    pub fn export(&self) -> Result<String, StorageError> {
        self.with_storage(|storage| {
            let lengths = Self::read_lengths(storage)?;
            let body = storage.read(HEADER_SIZE, lengths.iter().sum())?;

            let mut dump = format_header(&lengths);
            dump.push_str(&String::from_utf8_lossy(&body));
            Ok(escape_dump(&dump))
        })
    }

    /// Replaces the stored data with a dump produced by [`ConfigStore::export`].
    ///
    /// The store is left untouched when the dump is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidDump`] if the dump is shorter than the
    /// header, looks like JSON, has a non-numeric header, or does not match
    /// its declared lengths or the storage capacity.
    pub fn import(&self, dump: &str) -> Result<(), StorageError> {
        if dump.len() < HEADER_SIZE {
            return Err(StorageError::InvalidDump(format!(
                "dump is {} bytes, header alone needs {HEADER_SIZE}",
                dump.len()
            )));
        }
        if dump.starts_with('{') || dump.starts_with('[') {
            return Err(StorageError::InvalidDump(
                "dump looks like JSON, expected a raw settings dump".into(),
            ));
        }

        let data = unescape_dump(dump);
        let bytes = data.as_bytes();
        let Some(header) = bytes.get(..HEADER_SIZE) else {
            return Err(StorageError::InvalidDump("dump is shorter than the header".into()));
        };
        if !header.iter().all(u8::is_ascii_digit) {
            return Err(StorageError::InvalidDump("header must be numeric".into()));
        }

        let declared = HEADER_SIZE + parse_header(header).iter().sum::<usize>();
        if declared != bytes.len() {
            return Err(StorageError::InvalidDump(format!(
                "header declares {declared} bytes, dump holds {}",
                bytes.len()
            )));
        }

        self.with_storage(|storage| {
            if declared > storage.capacity() {
                return Err(StorageError::InvalidDump(format!(
                    "dump needs {declared} bytes, capacity is {}",
                    storage.capacity()
                )));
            }
            storage.write(0, bytes)?;
            storage.commit()?;
            tracing::info!(len = declared, "Settings imported");
            Ok(())
        })
    }

    /// Zeroes the whole storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened or committed.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.with_storage(|storage| {
            let zeros = vec![0; storage.capacity()];
            storage.write(0, &zeros)?;
            storage.commit()?;
            tracing::info!("Settings cleared");
            Ok(())
        })
    }
}
