// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed access to the settings partitions.
//!
//! Reads never fail: a storage error is logged and the partition's default
//! is returned, so a device with broken flash still boots. Writes report
//! their errors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::store::escape::{decode_map, encode_map, join_fields, split_fields};
use crate::store::{ConfigStore, Partition, Storage};

/// Config key holding the notification gateway address.
pub const GATEWAY_CONFIG_KEY: &str = "gtw";
/// Config key holding the remote logger address.
pub const LOGGER_ADDRESS_CONFIG_KEY: &str = "laddr";
/// Name used when none is stored.
pub const DEFAULT_DEVICE_NAME: &str = "smartthing";
/// Longest accepted device name, in bytes.
pub const DEVICE_NAME_MAX_LEN: usize = 15;

/// Wi-Fi operating mode, stored by its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiMode {
    /// Join an existing network.
    #[default]
    Sta,
    /// Host an access point.
    Ap,
    /// Join a network, falling back to an access point.
    StaToAp,
}

impl WifiMode {
    /// Returns the stored numeric code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Sta => 1,
            Self::Ap => 2,
            Self::StaToAp => 5,
        }
    }

    /// Parses a stored numeric code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Sta),
            2 => Some(Self::Ap),
            5 => Some(Self::StaToAp),
            _ => None,
        }
    }
}

impl fmt::Display for WifiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for WifiMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| ValidationError::invalid("mode", format!("unknown wifi mode '{s}'")))
    }
}

/// Wi-Fi credentials as stored in the `WiFi` partition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WifiSettings {
    /// Network name.
    pub ssid: String,
    /// Network password.
    pub password: String,
    /// Operating mode.
    pub mode: WifiMode,
}

impl WifiSettings {
    fn encode(&self) -> String {
        let mode = self.mode.to_string();
        join_fields(&[self.ssid.as_str(), self.password.as_str(), mode.as_str()])
    }

    fn decode(raw: &str) -> Option<Self> {
        let fields = split_fields(raw);
        match fields.as_slice() {
            [ssid, password, mode] => Some(Self {
                ssid: ssid.clone(),
                password: password.clone(),
                mode: mode.parse().ok()?,
            }),
            _ => None,
        }
    }
}

/// Typed facade over a [`ConfigStore`].
#[derive(Debug)]
pub struct Settings {
    store: ConfigStore,
    config_cache: RwLock<Option<BTreeMap<String, String>>>,
}

impl Settings {
    /// Creates settings over an existing store.
    #[must_use]
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            config_cache: RwLock::new(None),
        }
    }

    /// Creates settings directly over a storage backend.
    pub fn with_storage(storage: impl Storage + 'static) -> Self {
        Self::new(ConfigStore::new(storage))
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn read_or_default(&self, partition: Partition) -> String {
        self.store.read(partition).unwrap_or_else(|e| {
            tracing::error!(%partition, error = %e, "Failed to read settings partition");
            String::new()
        })
    }

    // ========================================================================
    // Name
    // ========================================================================

    /// Returns the device name, or [`DEFAULT_DEVICE_NAME`] if none is stored.
    #[must_use]
    pub fn name(&self) -> String {
        let name = self.read_or_default(Partition::Name);
        if name.is_empty() {
            DEFAULT_DEVICE_NAME.to_string()
        } else {
            name
        }
    }

    /// Stores the device name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the name is empty or longer than
    /// [`DEVICE_NAME_MAX_LEN`], or a storage error.
    pub fn set_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ValidationError::missing("name").into());
        }
        if name.len() > DEVICE_NAME_MAX_LEN {
            return Err(ValidationError::invalid(
                "name",
                format!("longer than {DEVICE_NAME_MAX_LEN} bytes"),
            )
            .into());
        }
        self.store.write(Partition::Name, name)?;
        tracing::info!(name, "Device name updated");
        Ok(())
    }

    // ========================================================================
    // WiFi
    // ========================================================================

    /// Returns the stored Wi-Fi settings, if any.
    #[must_use]
    pub fn wifi(&self) -> Option<WifiSettings> {
        let raw = self.read_or_default(Partition::Wifi);
        if raw.is_empty() {
            return None;
        }
        let wifi = WifiSettings::decode(&raw);
        if wifi.is_none() {
            tracing::warn!("Stored wifi settings are malformed, ignoring");
        }
        wifi
    }

    /// Stores Wi-Fi settings.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the SSID is empty, or a storage error.
    pub fn set_wifi(&self, wifi: &WifiSettings) -> Result<()> {
        if wifi.ssid.is_empty() {
            return Err(ValidationError::missing("ssid").into());
        }
        self.store.write(Partition::Wifi, &wifi.encode())?;
        Ok(())
    }

    /// Removes the stored Wi-Fi settings.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn drop_wifi(&self) -> Result<()> {
        self.store.write(Partition::Wifi, "")?;
        Ok(())
    }

    // ========================================================================
    // Config
    // ========================================================================

    /// Reloads the config map from storage into the cache.
    pub fn load_config(&self) -> BTreeMap<String, String> {
        let map = decode_map(&self.read_or_default(Partition::Config));
        *self.config_cache.write() = Some(map.clone());
        map
    }

    /// Returns the config map, loading it on first use.
    #[must_use]
    pub fn config(&self) -> BTreeMap<String, String> {
        if let Some(map) = self.config_cache.read().as_ref() {
            return map.clone();
        }
        self.load_config()
    }

    /// Returns one config value.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<String> {
        if let Some(map) = self.config_cache.read().as_ref() {
            return map.get(key).cloned();
        }
        self.load_config().remove(key)
    }

    /// Returns the notification gateway address, if configured.
    #[must_use]
    pub fn gateway(&self) -> Option<String> {
        self.config_value(GATEWAY_CONFIG_KEY)
            .filter(|gateway| !gateway.is_empty())
    }

    /// Replaces the whole config map.
    ///
    /// # Errors
    ///
    /// Returns a storage error; the cache is left unchanged in that case.
    pub fn set_config(&self, config: BTreeMap<String, String>) -> Result<()> {
        self.store.write(Partition::Config, &encode_map(&config))?;
        *self.config_cache.write() = Some(config);
        Ok(())
    }

    /// Sets one config value.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        let mut config = self.config();
        config.insert(key.to_string(), value.to_string());
        self.set_config(config)
    }

    /// Removes every config value.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn drop_config(&self) -> Result<()> {
        self.set_config(BTreeMap::new())
    }

    // ========================================================================
    // Rules
    // ========================================================================

    /// Returns the serialized rule set.
    #[must_use]
    pub fn rules(&self) -> String {
        self.read_or_default(Partition::Rules)
    }

    /// Stores the serialized rule set.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn set_rules(&self, rules: &str) -> Result<()> {
        self.store.write(Partition::Rules, rules)?;
        Ok(())
    }

    // ========================================================================
    // Action schedule
    // ========================================================================

    /// Returns the action name to call delay (milliseconds) map.
    ///
    /// Entries with a non-numeric delay are skipped.
    #[must_use]
    pub fn action_schedule(&self) -> BTreeMap<String, u64> {
        decode_map(&self.read_or_default(Partition::ActionSchedule))
            .into_iter()
            .filter_map(|(name, delay)| match delay.parse() {
                Ok(delay) => Some((name, delay)),
                Err(_) => {
                    tracing::warn!(action = %name, delay = %delay, "Ignoring malformed action delay");
                    None
                }
            })
            .collect()
    }

    /// Stores the action schedule.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn set_action_schedule(&self, schedule: &BTreeMap<String, u64>) -> Result<()> {
        let encoded: BTreeMap<String, String> = schedule
            .iter()
            .map(|(name, delay)| (name.clone(), delay.to_string()))
            .collect();
        self.store
            .write(Partition::ActionSchedule, &encode_map(&encoded))?;
        Ok(())
    }

    // ========================================================================
    // Whole store
    // ========================================================================

    /// Exports every partition as one opaque string.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn export(&self) -> Result<String> {
        Ok(self.store.export()?)
    }

    /// Imports a dump produced by [`Settings::export`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the dump is rejected.
    pub fn import(&self, dump: &str) -> Result<()> {
        self.store.import(dump)?;
        *self.config_cache.write() = None;
        Ok(())
    }

    /// Erases every partition.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        *self.config_cache.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;

    fn settings() -> Settings {
        Settings::with_storage(MemoryStorage::default())
    }

    #[test]
    fn name_defaults_and_validates() {
        let settings = settings();
        assert_eq!(settings.name(), DEFAULT_DEVICE_NAME);

        settings.set_name("kitchen").unwrap();
        assert_eq!(settings.name(), "kitchen");

        assert!(settings.set_name("").is_err());
        assert!(settings.set_name("a-name-that-is-far-too-long").is_err());
        assert_eq!(settings.name(), "kitchen");
    }

    #[test]
    fn wifi_with_delimiters_round_trips() {
        let settings = settings();
        assert_eq!(settings.wifi(), None);

        let wifi = WifiSettings {
            ssid: "home;net".into(),
            password: "p|a;ss".into(),
            mode: WifiMode::StaToAp,
        };
        settings.set_wifi(&wifi).unwrap();
        assert_eq!(settings.wifi(), Some(wifi));

        settings.drop_wifi().unwrap();
        assert_eq!(settings.wifi(), None);
    }

    #[test]
    fn config_values_are_cached_and_persisted() {
        let settings = settings();
        assert_eq!(settings.gateway(), None);

        settings.set_config_value(GATEWAY_CONFIG_KEY, "10.0.0.1").unwrap();
        settings.set_config_value(LOGGER_ADDRESS_CONFIG_KEY, "10.0.0.2:7878").unwrap();
        assert_eq!(settings.gateway().as_deref(), Some("10.0.0.1"));

        // A fresh load reads the same map back from storage
        let reloaded = settings.load_config();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get(LOGGER_ADDRESS_CONFIG_KEY).map(String::as_str),
            Some("10.0.0.2:7878")
        );

        settings.drop_config().unwrap();
        assert_eq!(settings.gateway(), None);
    }

    #[test]
    fn action_schedule_round_trips() {
        let settings = settings();
        let mut schedule = BTreeMap::new();
        schedule.insert("led_on".to_string(), 1500);
        schedule.insert("led_off".to_string(), 60_000);

        settings.set_action_schedule(&schedule).unwrap();
        assert_eq!(settings.action_schedule(), schedule);
    }

    #[test]
    fn unavailable_storage_degrades_to_defaults() {
        let settings = Settings::with_storage(MemoryStorage::unavailable());
        assert_eq!(settings.name(), DEFAULT_DEVICE_NAME);
        assert_eq!(settings.wifi(), None);
        assert!(settings.config().is_empty());
        assert_eq!(settings.rules(), "");
        assert!(settings.set_rules("[]").is_err());
    }

    #[test]
    fn import_invalidates_config_cache() {
        let source = settings();
        source.set_config_value(GATEWAY_CONFIG_KEY, "192.168.0.10").unwrap();
        let dump = source.export().unwrap();

        let target = settings();
        assert_eq!(target.gateway(), None);
        target.import(&dump).unwrap();
        assert_eq!(target.gateway().as_deref(), Some("192.168.0.10"));
    }
}
