// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of every observable on the device.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{DeviceState, Observable, ObservableKind, ObservableValue, Sensor, SensorKind};
use crate::error::RuleError;

/// Hardware pin access used by digital and analog sensors.
pub trait PinReader: Send + Sync {
    /// Reads a digital pin.
    fn digital_read(&self, pin: u8) -> bool;

    /// Reads an analog pin.
    fn analog_read(&self, pin: u8) -> u16;
}

/// Registry of sensors and device states.
///
/// Observables are registered once at startup and live for the whole
/// program; there is no removal. Names are unique within a type class.
///
/// # Examples
///
/// ```
/// use smartthing::ObservableRegistry;
///
/// let registry = ObservableRegistry::new();
/// registry.register_sensor("temperature", || 21).unwrap();
/// registry.register_device_state("mode", || "auto".to_string()).unwrap();
///
/// assert!(registry.register_sensor("temperature", || 0).is_err());
/// assert_eq!(registry.find_sensor("temperature").unwrap().sample(), 21);
/// ```
#[derive(Default)]
pub struct ObservableRegistry {
    sensors: RwLock<Vec<Arc<Sensor>>>,
    device_states: RwLock<Vec<Arc<DeviceState>>>,
}

impl std::fmt::Debug for ObservableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableRegistry")
            .field("sensors", &self.sensors.read().len())
            .field("device_states", &self.device_states.read().len())
            .finish()
    }
}

fn insert<T: ObservableValue>(
    list: &RwLock<Vec<Arc<Observable<T>>>>,
    observable: Observable<T>,
) -> Result<Arc<Observable<T>>, RuleError> {
    let mut list = list.write();
    if list.iter().any(|o| o.name() == observable.name()) {
        return Err(RuleError::ObservableAlreadyExists(observable.name().to_string()));
    }
    tracing::debug!(
        kind = %T::KIND,
        name = %observable.name(),
        "Registering observable"
    );
    let observable = Arc::new(observable);
    list.push(Arc::clone(&observable));
    Ok(observable)
}

fn find<T>(list: &RwLock<Vec<Arc<Observable<T>>>>, name: &str) -> Option<Arc<Observable<T>>> {
    list.read().iter().find(|o| o.name == name).cloned()
}

impl ObservableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a sensor backed by a closure.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableAlreadyExists`] if the name is taken.
    pub fn register_sensor(
        &self,
        name: impl Into<String>,
        provider: impl Fn() -> i16 + Send + Sync + 'static,
    ) -> Result<Arc<Sensor>, RuleError> {
        insert(
            &self.sensors,
            Observable::new(name, Some(SensorKind::Custom), provider),
        )
    }

    /// Registers a sensor reading `0` or `1` from a digital pin.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableAlreadyExists`] if the name is taken.
    pub fn register_digital_sensor(
        &self,
        name: impl Into<String>,
        pin: u8,
        reader: Arc<dyn PinReader>,
    ) -> Result<Arc<Sensor>, RuleError> {
        insert(
            &self.sensors,
            Observable::new(name, Some(SensorKind::Digital), move || {
                i16::from(reader.digital_read(pin))
            }),
        )
    }

    /// Registers a sensor reading an analog pin.
    ///
    /// Readings above `i16::MAX` saturate.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableAlreadyExists`] if the name is taken.
    pub fn register_analog_sensor(
        &self,
        name: impl Into<String>,
        pin: u8,
        reader: Arc<dyn PinReader>,
    ) -> Result<Arc<Sensor>, RuleError> {
        insert(
            &self.sensors,
            Observable::new(name, Some(SensorKind::Analog), move || {
                i16::try_from(reader.analog_read(pin)).unwrap_or(i16::MAX)
            }),
        )
    }

    /// Registers a device state backed by a closure.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableAlreadyExists`] if the name is taken.
    pub fn register_device_state(
        &self,
        name: impl Into<String>,
        provider: impl Fn() -> String + Send + Sync + 'static,
    ) -> Result<Arc<DeviceState>, RuleError> {
        insert(&self.device_states, Observable::new(name, None, provider))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Finds a sensor by name.
    #[must_use]
    pub fn find_sensor(&self, name: &str) -> Option<Arc<Sensor>> {
        find(&self.sensors, name)
    }

    /// Finds a device state by name.
    #[must_use]
    pub fn find_device_state(&self, name: &str) -> Option<Arc<DeviceState>> {
        find(&self.device_states, name)
    }

    /// Returns every sensor in registration order.
    #[must_use]
    pub fn sensors(&self) -> Vec<Arc<Sensor>> {
        self.sensors.read().clone()
    }

    /// Returns every device state in registration order.
    #[must_use]
    pub fn device_states(&self) -> Vec<Arc<DeviceState>> {
        self.device_states.read().clone()
    }

    /// Returns the type class of a registered name, sensors first.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<ObservableKind> {
        if self.find_sensor(name).is_some() {
            Some(ObservableKind::Sensor)
        } else if self.find_device_state(name).is_some() {
            Some(ObservableKind::DeviceState)
        } else {
            None
        }
    }

    /// Returns the number of registered observables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sensors.read().len() + self.device_states.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // JSON
    // ========================================================================

    /// Lists every observable as `{name, type}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let sensors = self.sensors.read();
        let states = self.device_states.read();
        Value::Array(
            sensors
                .iter()
                .map(|s| s.to_json())
                .chain(states.iter().map(|s| s.to_json()))
                .collect(),
        )
    }

    /// Samples every observable: `{"sensor": {name: value}, "state": {...}}`.
    #[must_use]
    pub fn values_json(&self) -> Value {
        let sensors: Map<String, Value> = self
            .sensors()
            .iter()
            .map(|s| (s.name().to_string(), s.sample().to_json()))
            .collect();
        let states: Map<String, Value> = self
            .device_states()
            .iter()
            .map(|s| (s.name().to_string(), s.sample().to_json()))
            .collect();
        let mut values = Map::new();
        values.insert(ObservableKind::Sensor.as_str().to_string(), Value::Object(sensors));
        values.insert(ObservableKind::DeviceState.as_str().to_string(), Value::Object(states));
        Value::Object(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU16, Ordering};

    struct FakePins {
        analog: AtomicU16,
    }

    impl PinReader for FakePins {
        fn digital_read(&self, pin: u8) -> bool {
            pin % 2 == 1
        }

        fn analog_read(&self, _pin: u8) -> u16 {
            self.analog.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn duplicate_names_are_rejected_per_type_class() {
        let registry = ObservableRegistry::new();
        registry.register_sensor("x", || 1).unwrap();
        assert_eq!(
            registry.register_sensor("x", || 2).unwrap_err(),
            RuleError::ObservableAlreadyExists("x".into())
        );
        // The first registration wins.
        assert_eq!(registry.find_sensor("x").unwrap().sample(), 1);

        // Same name in the other type class is fine.
        registry.register_device_state("x", || "on".into()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.kind_of("x"), Some(ObservableKind::Sensor));
    }

    #[test]
    fn pin_sensors_read_through_reader() {
        let pins = Arc::new(FakePins {
            analog: AtomicU16::new(512),
        });
        let registry = ObservableRegistry::new();
        registry
            .register_digital_sensor("button", 3, pins.clone())
            .unwrap();
        registry
            .register_analog_sensor("pot", 0, pins.clone())
            .unwrap();

        assert_eq!(registry.find_sensor("button").unwrap().sample(), 1);
        assert_eq!(registry.find_sensor("pot").unwrap().sample(), 512);

        pins.analog.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(registry.find_sensor("pot").unwrap().sample(), i16::MAX);
    }

    #[test]
    fn values_json_samples_everything() {
        let registry = ObservableRegistry::new();
        registry.register_sensor("t", || 20).unwrap();
        registry.register_device_state("mode", || "eco".into()).unwrap();

        assert_eq!(
            registry.values_json(),
            json!({"sensor": {"t": 20}, "state": {"mode": "eco"}})
        );
        assert_eq!(registry.to_json().as_array().unwrap().len(), 2);
    }
}
