// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent configuration store.
//!
//! The device keeps its whole configuration in one small byte array split
//! into five [`Partition`]s. [`ConfigStore`] handles the raw layout;
//! [`crate::Settings`] gives each partition a typed codec.

mod config_store;
pub mod escape;
mod storage;

use std::fmt;

pub use config_store::{ConfigStore, HEADER_SIZE, LENGTH_FIELD_SIZE, MAX_PARTITION_LEN};
pub use storage::{DEFAULT_CAPACITY, FileStorage, MemoryStorage, Storage, StorageStats};

/// One of the five slots of the settings store, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Device name.
    Name,
    /// Wi-Fi credentials and mode.
    Wifi,
    /// Free-form key/value configuration.
    Config,
    /// Serialized rule set.
    Rules,
    /// Per-action call delays.
    ActionSchedule,
}

impl Partition {
    /// Number of partitions.
    pub const COUNT: usize = 5;

    /// All partitions in storage order.
    pub const ALL: [Partition; Self::COUNT] = [
        Self::Name,
        Self::Wifi,
        Self::Config,
        Self::Rules,
        Self::ActionSchedule,
    ];

    /// Returns the stable slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Name => 0,
            Self::Wifi => 1,
            Self::Config => 2,
            Self::Rules => 3,
            Self::ActionSchedule => 4,
        }
    }

    /// Returns a short lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Wifi => "wifi",
            Self::Config => "config",
            Self::Rules => "rules",
            Self::ActionSchedule => "action_schedule",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_storage_order() {
        for (expected, partition) in Partition::ALL.iter().enumerate() {
            assert_eq!(partition.index(), expected);
        }
    }
}
