// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `SmartThing` - Rule engine and persistent settings for small connected
//! devices.
//!
//! A device exposes named observables: numeric **sensors** and textual
//! **device states**. Users attach callbacks to them at runtime; whenever a
//! polled value changes, every matching callback runs.
//!
//! # Supported Features
//!
//! - **Callbacks**: HTTP requests, local actions, gateway notifications and
//!   in-process closures
//! - **Conditions**: trigger value with `eq`/`neq`/`gte`/`lte`, or a change
//!   threshold for sensors
//! - **Templates**: `{v}` and config keys substituted into urls, payloads
//!   and messages
//! - **Persistence**: five length-prefixed partitions (name, `WiFi`, config,
//!   rules, action schedule) with export and import
//! - **Action scheduler**: call actions periodically, schedule persisted
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use smartthing::store::FileStorage;
//! use smartthing::{
//!     ActionRegistry, DeviceIdentity, DispatchConfig, ObservableRegistry, Runtime, Settings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> smartthing::Result<()> {
//!     let settings = Arc::new(Settings::with_storage(FileStorage::new("eeprom.bin")));
//!
//!     let registry = Arc::new(ObservableRegistry::new());
//!     registry.register_sensor("light", || 420)?;
//!     registry.register_device_state("door", || "closed".to_string())?;
//!
//!     let actions = Arc::new(ActionRegistry::new().with_settings(Arc::clone(&settings)));
//!     actions.add("lamp_on", "Turn lamp on", || Ok(()))?;
//!
//!     let runtime = Runtime::start(
//!         settings,
//!         registry,
//!         actions,
//!         DispatchConfig::default(),
//!         DeviceIdentity::new("lamp", "192.168.1.30"),
//!     )?;
//!
//!     // Turn the lamp on when it gets dark
//!     let response = runtime.api().create(&json!({
//!         "observable": {"type": "sensor", "name": "light"},
//!         "callback": {
//!             "type": "action",
//!             "action": "lamp_on",
//!             "triggerEnabled": true,
//!             "trigger": 100,
//!             "compareType": "lte",
//!         },
//!     }));
//!     assert_eq!(response.status, 201);
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## System Callbacks
//!
//! Firmware code can attach closures that users cannot edit or delete:
//!
//! ```
//! use std::sync::Arc;
//! use smartthing::{DispatchContext, ObservableRegistry, RuleEngine};
//!
//! let registry = Arc::new(ObservableRegistry::new());
//! registry.register_device_state("door", || "open".to_string()).unwrap();
//!
//! let mut engine = RuleEngine::new(registry, DispatchContext::detached());
//! engine
//!     .add_state_callback("door", |state| println!("door is {state}"), None)
//!     .unwrap();
//! engine.check();
//! ```

pub mod actions;
pub mod callback;
pub mod dispatch;
pub mod error;
pub mod observable;
pub mod rest;
mod runtime;
pub mod settings;
pub mod store;
pub mod watcher;

pub use actions::{ActionInfo, ActionInvoker, ActionRegistry, NoActions};
pub use callback::{
    Callback, CallbackType, CallbackVariant, CompareOp, HttpMethod, NotificationSeverity,
};
pub use dispatch::{
    DeviceIdentity, DispatchConfig, DispatchContext, LoadReport, RuleEngine, SharedRuleEngine,
};
pub use error::{ActionError, Error, Result, RuleError, StorageError, ValidationError};
pub use observable::{
    ObservableKind, ObservableRef, ObservableRegistry, ObservableValue, PinReader, SensorKind,
};
pub use rest::{ApiResponse, RulesApi};
pub use runtime::Runtime;
pub use settings::{Settings, WifiMode, WifiSettings};
pub use watcher::Watcher;
