// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Observables: named data sources rules can watch.
//!
//! There are two type classes:
//!
//! - [`Sensor`]s produce `i16` readings (custom closures, digital pins or
//!   analog pins)
//! - [`DeviceState`]s produce text

mod registry;
mod value;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Value, json};

pub use registry::{ObservableRegistry, PinReader};
pub use value::ObservableValue;

use crate::error::{RuleError, ValidationError};

/// Type class of an observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservableKind {
    /// Numeric sensor.
    Sensor,
    /// Textual device state.
    DeviceState,
}

impl ObservableKind {
    /// Returns the wire name (`sensor` or `state`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::DeviceState => "state",
        }
    }
}

impl fmt::Display for ObservableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservableKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(Self::Sensor),
            "state" => Ok(Self::DeviceState),
            other => Err(RuleError::UnknownObservableType(other.to_string())),
        }
    }
}

/// How a sensor obtains its reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// User-supplied closure.
    Custom,
    /// Digital pin, reads `0` or `1`.
    Digital,
    /// Analog pin.
    Analog,
}

impl SensorKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Digital => "digital",
            Self::Analog => "analog",
        }
    }
}

type Provider<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// A named data source.
pub struct Observable<T> {
    name: String,
    sensor_kind: Option<SensorKind>,
    provider: Provider<T>,
}

/// Numeric observable.
pub type Sensor = Observable<i16>;
/// Textual observable.
pub type DeviceState = Observable<String>;

impl<T: ObservableValue> Observable<T> {
    pub(crate) fn new(
        name: impl Into<String>,
        sensor_kind: Option<SensorKind>,
        provider: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            sensor_kind,
            provider: Arc::new(provider),
        }
    }

    /// Returns the observable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type class.
    #[must_use]
    pub fn kind(&self) -> ObservableKind {
        T::KIND
    }

    /// Returns the sensor sub-kind, `None` for device states.
    #[must_use]
    pub fn sensor_kind(&self) -> Option<SensorKind> {
        self.sensor_kind
    }

    /// Reads the current value.
    #[must_use]
    pub fn sample(&self) -> T {
        (self.provider)()
    }

    /// Returns `{name, type}` plus the sensor sub-kind when present.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut json = json!({ "name": self.name, "type": self.kind().as_str() });
        if let Some(sensor_kind) = self.sensor_kind {
            json["sensorType"] = Value::from(sensor_kind.as_str());
        }
        json
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("name", &self.name)
            .field("sensor_kind", &self.sensor_kind)
            .finish_non_exhaustive()
    }
}

/// Reference to an observable as it appears in rule descriptors:
/// `{"type": "sensor", "name": "temperature"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableRef {
    /// Type class.
    pub kind: ObservableKind,
    /// Observable name.
    pub name: String,
}

impl ObservableRef {
    /// Creates a reference.
    #[must_use]
    pub fn new(kind: ObservableKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parses `{type, name}`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a field is missing, or
    /// [`RuleError::UnknownObservableType`] for an unknown type.
    pub fn from_json(value: &Value) -> crate::Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::missing("observable.type"))?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ValidationError::missing("observable.name"))?;
        Ok(Self::new(kind.parse()?, name))
    }

    /// Serializes as `{type, name}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ "type": self.kind.as_str(), "name": self.name })
    }
}
