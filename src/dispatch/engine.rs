// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The rule engine: every watcher on the device, their CRUD operations and
//! the persisted rule set.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::DispatchContext;
use crate::callback::Callback;
use crate::error::{Error, Result, RuleError, ValidationError};
use crate::observable::{
    Observable, ObservableKind, ObservableRef, ObservableRegistry, ObservableValue,
};
use crate::watcher::Watcher;

/// A [`RuleEngine`] shared between the check loop and request handlers.
pub type SharedRuleEngine = Arc<Mutex<RuleEngine>>;

/// Watchers and callbacks captured by [`RuleEngine::snapshot`].
#[derive(Debug, Clone)]
pub struct RulesSnapshot {
    sensor_watchers: Vec<Watcher<i16>>,
    state_watchers: Vec<Watcher<String>>,
    callbacks_count: usize,
}

/// Outcome of [`RuleEngine::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Callbacks restored.
    pub loaded: usize,
    /// Callbacks skipped because their observable is not registered.
    pub missing_observables: usize,
    /// Entries or callbacks skipped because they could not be built.
    pub invalid: usize,
    /// Whether the cleaned rule set was written back.
    pub resaved: bool,
}

// ============================================================================
// Generic watcher list helpers
// ============================================================================

fn position<T: ObservableValue>(watchers: &[Watcher<T>], name: &str) -> Option<usize> {
    watchers.iter().position(|w| w.observable().name() == name)
}

fn attach<T: ObservableValue>(
    watchers: &mut Vec<Watcher<T>>,
    observable: Arc<Observable<T>>,
    callback: Callback<T>,
) -> std::result::Result<i32, RuleError> {
    let index = position(watchers, observable.name()).unwrap_or_else(|| {
        tracing::debug!(kind = %T::KIND, name = %observable.name(), "Creating watcher");
        watchers.push(Watcher::new(observable));
        watchers.len() - 1
    });
    let result = watchers[index].add_callback(callback);
    if result.is_err() && watchers[index].is_empty() {
        watchers.remove(index);
    }
    result
}

fn patch_in<T: ObservableValue>(
    watchers: &mut [Watcher<T>],
    name: &str,
    id: i32,
    patch: &Value,
) -> Result<()> {
    let index = position(watchers, name).ok_or(RuleError::CallbackNotFound(id))?;
    let callback = watchers[index]
        .callback_mut(id)
        .ok_or(RuleError::CallbackNotFound(id))?;
    if callback.is_read_only() {
        return Err(RuleError::ReadOnlyViolation(id).into());
    }
    callback.apply_patch(patch)
}

fn detach<T: ObservableValue>(
    watchers: &mut Vec<Watcher<T>>,
    name: &str,
    id: i32,
) -> std::result::Result<(), RuleError> {
    let index = position(watchers, name).ok_or(RuleError::CallbackNotFound(id))?;
    watchers[index].remove_callback(id)?;
    if watchers[index].is_empty() {
        watchers.remove(index);
        tracing::debug!(kind = %T::KIND, name, "Removed empty watcher");
    }
    Ok(())
}

fn fire<T: ObservableValue>(
    watchers: &[Watcher<T>],
    name: &str,
    id: i32,
    value: Option<&str>,
    ctx: &DispatchContext,
) -> Result<()> {
    let watcher = position(watchers, name)
        .map(|index| &watchers[index])
        .ok_or(RuleError::CallbackNotFound(id))?;
    let callback = watcher.callback(id).ok_or(RuleError::CallbackNotFound(id))?;
    let value = match value.filter(|v| !v.is_empty()) {
        Some(raw) => T::from_json(&Value::from(raw)).ok_or_else(|| {
            ValidationError::invalid("value", format!("'{raw}' is not a {} value", T::KIND))
        })?,
        None => watcher.observable().sample(),
    };
    tracing::info!(kind = %T::KIND, name, id, value = ?value, "Calling callback manually");
    callback.call(&value, ctx);
    Ok(())
}

fn callbacks_json<T: ObservableValue>(watchers: &[Watcher<T>], name: &str) -> Value {
    position(watchers, name).map_or_else(
        || Value::Array(Vec::new()),
        |index| Value::Array(watchers[index].callbacks_json(false, false)),
    )
}

/// Parses a callback id given as number or numeric string.
fn parse_id(value: Option<&Value>) -> std::result::Result<i32, ValidationError> {
    let value = value.ok_or_else(|| ValidationError::missing("id"))?;
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.and_then(|id| i32::try_from(id).ok())
        .ok_or_else(|| ValidationError::invalid("id", "expected an integer"))
}

// ============================================================================
// RuleEngine
// ============================================================================

/// Owns every watcher and keeps the persisted rule set in sync.
///
/// Mutations do not save on their own; call [`RuleEngine::save`] after a
/// successful change.
///
/// Lambda callbacks run while the engine is borrowed and must not lock a
/// [`SharedRuleEngine`] themselves.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use smartthing::{DispatchContext, ObservableKind, ObservableRef, ObservableRegistry, RuleEngine};
///
/// let registry = Arc::new(ObservableRegistry::new());
/// registry.register_sensor("temperature", || 21).unwrap();
///
/// let mut engine = RuleEngine::new(registry, DispatchContext::detached());
/// let id = engine
///     .create(
///         &ObservableRef::new(ObservableKind::Sensor, "temperature"),
///         &json!({"type": "action", "action": "fan_on"}),
///     )
///     .unwrap();
///
/// assert_eq!(id, 1);
/// assert_eq!(engine.total_callbacks(), 1);
/// ```
#[derive(Debug)]
pub struct RuleEngine {
    registry: Arc<ObservableRegistry>,
    context: DispatchContext,
    sensor_watchers: Vec<Watcher<i16>>,
    state_watchers: Vec<Watcher<String>>,
    callbacks_count: usize,
}

impl RuleEngine {
    /// Creates an engine without any rule.
    #[must_use]
    pub fn new(registry: Arc<ObservableRegistry>, context: DispatchContext) -> Self {
        Self {
            registry,
            context,
            sensor_watchers: Vec::new(),
            state_watchers: Vec::new(),
            callbacks_count: 0,
        }
    }

    /// Wraps the engine for sharing between tasks.
    #[must_use]
    pub fn into_shared(self) -> SharedRuleEngine {
        Arc::new(Mutex::new(self))
    }

    /// Returns the observable registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ObservableRegistry> {
        &self.registry
    }

    /// Returns the dispatch context handed to callbacks.
    #[must_use]
    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    /// Returns the number of user callbacks.
    #[must_use]
    pub fn total_callbacks(&self) -> usize {
        self.callbacks_count
    }

    /// Returns the number of live watchers.
    #[must_use]
    pub fn watchers_count(&self) -> usize {
        self.sensor_watchers.len() + self.state_watchers.len()
    }

    /// Returns the sensor watchers.
    #[must_use]
    pub fn sensor_watchers(&self) -> &[Watcher<i16>] {
        &self.sensor_watchers
    }

    /// Returns the device state watchers.
    #[must_use]
    pub fn state_watchers(&self) -> &[Watcher<String>] {
        &self.state_watchers
    }

    /// Captures every watcher and callback, system callbacks included.
    #[must_use]
    pub fn snapshot(&self) -> RulesSnapshot {
        RulesSnapshot {
            sensor_watchers: self.sensor_watchers.clone(),
            state_watchers: self.state_watchers.clone(),
            callbacks_count: self.callbacks_count,
        }
    }

    /// Puts back the rules captured by [`RuleEngine::snapshot`].
    pub fn restore(&mut self, snapshot: RulesSnapshot) {
        self.sensor_watchers = snapshot.sensor_watchers;
        self.state_watchers = snapshot.state_watchers;
        self.callbacks_count = snapshot.callbacks_count;
        tracing::debug!(callbacks = self.callbacks_count, "Rules restored from snapshot");
    }

    fn ensure_registered(&self, observable: &ObservableRef) -> std::result::Result<(), RuleError> {
        let found = match observable.kind {
            ObservableKind::Sensor => self.registry.find_sensor(&observable.name).is_some(),
            ObservableKind::DeviceState => {
                self.registry.find_device_state(&observable.name).is_some()
            }
        };
        if found {
            Ok(())
        } else {
            Err(not_found(observable))
        }
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Builds a callback from `descriptor` and attaches it to `observable`.
    ///
    /// Returns the callback id.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableNotFound`], a [`ValidationError`] for a
    /// bad descriptor, or an id allocation error.
    pub fn create(&mut self, observable: &ObservableRef, descriptor: &Value) -> Result<i32> {
        let id = match observable.kind {
            ObservableKind::Sensor => {
                let sensor = self
                    .registry
                    .find_sensor(&observable.name)
                    .ok_or_else(|| not_found(observable))?;
                attach(
                    &mut self.sensor_watchers,
                    sensor,
                    Callback::from_json(descriptor)?,
                )?
            }
            ObservableKind::DeviceState => {
                let state = self
                    .registry
                    .find_device_state(&observable.name)
                    .ok_or_else(|| not_found(observable))?;
                attach(
                    &mut self.state_watchers,
                    state,
                    Callback::from_json(descriptor)?,
                )?
            }
        };
        self.callbacks_count += 1;
        tracing::info!(
            kind = %observable.kind,
            name = %observable.name,
            id,
            "Callback created"
        );
        Ok(id)
    }

    /// Like [`RuleEngine::create`], for a request body of the form
    /// `{"observable": {type, name}, "callback": {...}}`.
    ///
    /// # Errors
    ///
    /// See [`RuleEngine::create`].
    pub fn create_from_request(&mut self, body: &Value) -> Result<i32> {
        let (observable, callback) = split_request(body)?;
        self.create(&observable, callback)
    }

    /// Attaches a read-only closure to a sensor.
    ///
    /// With a trigger the closure only runs when the new value equals it.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableNotFound`] for unknown sensors.
    pub fn add_sensor_callback(
        &mut self,
        name: &str,
        f: impl Fn(&i16) + Send + Sync + 'static,
        trigger: Option<i16>,
    ) -> Result<()> {
        let sensor = self
            .registry
            .find_sensor(name)
            .ok_or_else(|| not_found(&ObservableRef::new(ObservableKind::Sensor, name)))?;
        let mut callback = Callback::lambda(f);
        if let Some(trigger) = trigger {
            callback = callback.with_trigger(trigger);
        }
        attach(&mut self.sensor_watchers, sensor, callback)?;
        Ok(())
    }

    /// Attaches a read-only closure to a device state.
    ///
    /// With a trigger the closure only runs when the new value equals it.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableNotFound`] for unknown states.
    pub fn add_state_callback(
        &mut self,
        name: &str,
        f: impl Fn(&String) + Send + Sync + 'static,
        trigger: Option<String>,
    ) -> Result<()> {
        let state = self
            .registry
            .find_device_state(name)
            .ok_or_else(|| not_found(&ObservableRef::new(ObservableKind::DeviceState, name)))?;
        let mut callback = Callback::lambda(f);
        if let Some(trigger) = trigger {
            callback = callback.with_trigger(trigger);
        }
        attach(&mut self.state_watchers, state, callback)?;
        Ok(())
    }

    /// Applies the fields present in `patch` to a callback.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableNotFound`],
    /// [`RuleError::CallbackNotFound`], [`RuleError::ReadOnlyViolation`] or
    /// a [`ValidationError`]; nothing is changed on error.
    pub fn update(&mut self, observable: &ObservableRef, id: i32, patch: &Value) -> Result<()> {
        self.ensure_registered(observable)?;
        match observable.kind {
            ObservableKind::Sensor => patch_in(&mut self.sensor_watchers, &observable.name, id, patch),
            ObservableKind::DeviceState => {
                patch_in(&mut self.state_watchers, &observable.name, id, patch)
            }
        }?;
        tracing::info!(kind = %observable.kind, name = %observable.name, id, "Callback updated");
        Ok(())
    }

    /// Like [`RuleEngine::update`], for a request body of the form
    /// `{"observable": {type, name}, "callback": {"id": ..., ...}}`.
    ///
    /// # Errors
    ///
    /// See [`RuleEngine::update`].
    pub fn update_from_request(&mut self, body: &Value) -> Result<()> {
        let (observable, callback) = split_request(body)?;
        let id = parse_id(callback.get("id"))?;
        self.update(&observable, id, callback)
    }

    /// Removes a callback, and its watcher if it was the last one.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableNotFound`],
    /// [`RuleError::CallbackNotFound`] or [`RuleError::ReadOnlyViolation`].
    pub fn delete(&mut self, observable: &ObservableRef, id: i32) -> Result<()> {
        self.ensure_registered(observable)?;
        match observable.kind {
            ObservableKind::Sensor => detach(&mut self.sensor_watchers, &observable.name, id),
            ObservableKind::DeviceState => detach(&mut self.state_watchers, &observable.name, id),
        }?;
        self.callbacks_count = self.callbacks_count.saturating_sub(1);
        tracing::info!(kind = %observable.kind, name = %observable.name, id, "Callback deleted");
        Ok(())
    }

    /// Runs one callback now with `value`, or with a fresh sample when
    /// `value` is `None` or empty.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableNotFound`],
    /// [`RuleError::CallbackNotFound`], or a [`ValidationError`] if `value`
    /// does not parse.
    pub fn call_callback(
        &self,
        observable: &ObservableRef,
        id: i32,
        value: Option<&str>,
    ) -> Result<()> {
        self.ensure_registered(observable)?;
        match observable.kind {
            ObservableKind::Sensor => {
                fire(&self.sensor_watchers, &observable.name, id, value, &self.context)
            }
            ObservableKind::DeviceState => {
                fire(&self.state_watchers, &observable.name, id, value, &self.context)
            }
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Polls every watcher once.
    pub fn check(&mut self) {
        for watcher in &mut self.sensor_watchers {
            watcher.poll(&self.context);
        }
        for watcher in &mut self.state_watchers {
            watcher.poll(&self.context);
        }
    }

    // ========================================================================
    // JSON
    // ========================================================================

    /// Serializes every rule as `[{observable, callbacks}]`.
    ///
    /// Watchers without anything to serialize are omitted.
    #[must_use]
    pub fn to_json(&self, ignore_read_only: bool, short: bool) -> Value {
        Value::Array(
            self.sensor_watchers
                .iter()
                .filter_map(|w| w.to_json(ignore_read_only, short))
                .chain(
                    self.state_watchers
                        .iter()
                        .filter_map(|w| w.to_json(ignore_read_only, short)),
                )
                .collect(),
        )
    }

    /// Serializes the callbacks of one observable; empty when it has no
    /// watcher.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ObservableNotFound`] for unknown observables.
    pub fn observable_callbacks_json(&self, observable: &ObservableRef) -> Result<Value> {
        self.ensure_registered(observable)?;
        Ok(match observable.kind {
            ObservableKind::Sensor => callbacks_json(&self.sensor_watchers, &observable.name),
            ObservableKind::DeviceState => callbacks_json(&self.state_watchers, &observable.name),
        })
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Writes the user rules to the `Rules` partition.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn save(&self) -> Result<()> {
        let rules = self.to_json(true, true).to_string();
        self.context.settings().set_rules(&rules)?;
        tracing::debug!(len = rules.len(), "Rules saved");
        Ok(())
    }

    /// Restores the rules stored in the `Rules` partition.
    ///
    /// Loading is permissive: entries that cannot be restored are logged
    /// and skipped. When an entry was invalid, the surviving rules are
    /// written back so the broken entry does not come back on next boot.
    pub fn load(&mut self) -> LoadReport {
        let mut report = LoadReport::default();
        let raw = self.context.settings().rules();
        if raw.trim().is_empty() {
            tracing::debug!("No stored rules");
            return report;
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => {
                for entry in &entries {
                    self.load_entry(entry, &mut report);
                }
            }
            Ok(_) => {
                tracing::warn!("Stored rules are not a JSON array, discarding");
                report.invalid += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stored rules are not valid JSON, discarding");
                report.invalid += 1;
            }
        }

        if report.invalid > 0 {
            match self.save() {
                Ok(()) => report.resaved = true,
                Err(e) => tracing::error!(error = %e, "Failed to save cleaned rules"),
            }
        }
        tracing::info!(
            loaded = report.loaded,
            missing = report.missing_observables,
            invalid = report.invalid,
            "Rules loaded"
        );
        report
    }

    fn load_entry(&mut self, entry: &Value, report: &mut LoadReport) {
        let observable = match ObservableRef::from_json(&entry["observable"]) {
            Ok(observable) => observable,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping stored rule with bad observable");
                report.invalid += 1;
                return;
            }
        };
        let Some(callbacks) = entry.get("callbacks").and_then(Value::as_array) else {
            tracing::warn!(name = %observable.name, "Skipping stored rule without callbacks");
            report.invalid += 1;
            return;
        };

        for descriptor in callbacks {
            match self.create(&observable, descriptor) {
                Ok(_) => report.loaded += 1,
                Err(Error::Rule(RuleError::ObservableNotFound { .. })) => {
                    tracing::warn!(
                        kind = %observable.kind,
                        name = %observable.name,
                        "Skipping stored callback for unregistered observable"
                    );
                    report.missing_observables += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %observable.kind,
                        name = %observable.name,
                        error = %e,
                        "Skipping stored callback that failed to build"
                    );
                    report.invalid += 1;
                }
            }
        }
    }
}

fn not_found(observable: &ObservableRef) -> RuleError {
    RuleError::ObservableNotFound {
        kind: observable.kind.to_string(),
        name: observable.name.clone(),
    }
}

fn split_request(body: &Value) -> Result<(ObservableRef, &Value)> {
    let observable = body
        .get("observable")
        .ok_or_else(|| ValidationError::missing("observable"))?;
    let callback = body
        .get("callback")
        .filter(|c| c.is_object())
        .ok_or_else(|| ValidationError::missing("callback"))?;
    Ok((ObservableRef::from_json(observable)?, callback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI16, AtomicUsize, Ordering};

    use serde_json::json;

    use crate::actions::ActionRegistry;
    use crate::dispatch::OutboundQueue;
    use crate::settings::Settings;
    use crate::store::{MemoryStorage, StorageStats};

    struct Fixture {
        engine: RuleEngine,
        level: Arc<AtomicI16>,
        mode: Arc<Mutex<String>>,
        settings: Arc<Settings>,
        stats: StorageStats,
        fired: Arc<AtomicUsize>,
    }

    fn sensor() -> ObservableRef {
        ObservableRef::new(ObservableKind::Sensor, "level")
    }

    fn state() -> ObservableRef {
        ObservableRef::new(ObservableKind::DeviceState, "mode")
    }

    fn fixture_with(settings: Arc<Settings>, stats: StorageStats) -> Fixture {
        let level = Arc::new(AtomicI16::new(0));
        let mode = Arc::new(Mutex::new("idle".to_string()));
        let registry = Arc::new(ObservableRegistry::new());
        let source = Arc::clone(&level);
        registry
            .register_sensor("level", move || source.load(Ordering::SeqCst))
            .unwrap();
        let source = Arc::clone(&mode);
        registry
            .register_device_state("mode", move || source.lock().clone())
            .unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let actions = ActionRegistry::new();
        let counter = Arc::clone(&fired);
        actions
            .add("count", "Count", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let (outbound, _) = OutboundQueue::channel(4);
        let ctx = DispatchContext::new(Arc::new(actions), outbound, Arc::clone(&settings));
        Fixture {
            engine: RuleEngine::new(registry, ctx),
            level,
            mode,
            settings,
            stats,
            fired,
        }
    }

    fn fixture() -> Fixture {
        let storage = MemoryStorage::default();
        let stats = storage.stats();
        fixture_with(Arc::new(Settings::with_storage(storage)), stats)
    }

    fn count_action() -> Value {
        json!({"type": "action", "action": "count"})
    }

    #[test]
    fn create_requires_registered_observable() {
        let mut f = fixture();
        let err = f
            .engine
            .create(&ObservableRef::new(ObservableKind::Sensor, "nope"), &count_action())
            .unwrap_err();
        assert!(matches!(err, Error::Rule(RuleError::ObservableNotFound { .. })));
        assert_eq!(f.engine.watchers_count(), 0);
    }

    #[test]
    fn invalid_descriptor_leaves_no_watcher() {
        let mut f = fixture();
        assert!(f.engine.create(&sensor(), &json!({"type": "http"})).is_err());
        assert_eq!(f.engine.watchers_count(), 0);
        assert_eq!(f.engine.total_callbacks(), 0);
    }

    #[test]
    fn check_fires_action_callbacks() {
        let mut f = fixture();
        f.engine
            .create(
                &sensor(),
                &json!({"type": "action", "action": "count", "triggerEnabled": true, "trigger": 10, "compareType": "gte"}),
            )
            .unwrap();

        for v in [0, 5, 10, 11, 11, 3] {
            f.level.store(v, Ordering::SeqCst);
            f.engine.check();
        }
        assert_eq!(f.fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn state_callbacks_fire_on_text_change() {
        let mut f = fixture();
        f.engine
            .create(
                &state(),
                &json!({"type": "action", "action": "count", "triggerEnabled": true, "trigger": "heating"}),
            )
            .unwrap();

        f.engine.check();
        *f.mode.lock() = "heating".into();
        f.engine.check();
        *f.mode.lock() = "idle".into();
        f.engine.check();
        assert_eq!(f.fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn text_ordering_is_rejected() {
        let mut f = fixture();
        let err = f
            .engine
            .create(&state(), &json!({"type": "action", "action": "count", "compareType": "gte"}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref e) if e.field() == "compareType"));
    }

    #[test]
    fn restore_undoes_changes_since_snapshot() {
        let mut f = fixture();
        let kept = f.engine.create(&sensor(), &count_action()).unwrap();
        f.engine.add_sensor_callback("level", |_| {}, None).unwrap();
        let before = f.engine.to_json(false, true);
        let snapshot = f.engine.snapshot();

        f.engine.create(&state(), &count_action()).unwrap();
        f.engine
            .update(&sensor(), kept, &json!({"trigger": 4, "compareType": "lte"}))
            .unwrap();
        f.engine.delete(&sensor(), kept).unwrap();
        assert_eq!(f.engine.total_callbacks(), 1);

        f.engine.restore(snapshot);
        assert_eq!(f.engine.to_json(false, true), before);
        assert_eq!(f.engine.total_callbacks(), 1);
        assert_eq!(f.engine.watchers_count(), 1);
        assert_eq!(f.engine.sensor_watchers()[0].callbacks().len(), 2);
    }

    #[test]
    fn deleting_last_callback_removes_watcher() {
        let mut f = fixture();
        let first = f.engine.create(&sensor(), &count_action()).unwrap();
        let second = f.engine.create(&sensor(), &count_action()).unwrap();
        assert_eq!((first, second), (1, 2));

        f.engine.delete(&sensor(), first).unwrap();
        assert_eq!(f.engine.watchers_count(), 1);
        f.engine.delete(&sensor(), second).unwrap();
        assert_eq!(f.engine.watchers_count(), 0);
        assert_eq!(f.engine.total_callbacks(), 0);

        // A fresh watcher starts a fresh id sequence
        assert_eq!(f.engine.create(&sensor(), &count_action()).unwrap(), 1);
    }

    #[test]
    fn system_callbacks_are_protected() {
        let mut f = fixture();
        f.engine.add_sensor_callback("level", |_| {}, None).unwrap();

        let err = f.engine.delete(&sensor(), -1).unwrap_err();
        assert!(matches!(err, Error::Rule(RuleError::ReadOnlyViolation(-1))));
        let err = f
            .engine
            .update(&sensor(), -1, &json!({"triggerDisabled": true}))
            .unwrap_err();
        assert!(matches!(err, Error::Rule(RuleError::ReadOnlyViolation(-1))));
        assert_eq!(f.engine.watchers_count(), 1);
        assert_eq!(f.engine.total_callbacks(), 0);
    }

    #[test]
    fn system_callback_with_trigger() {
        let mut f = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        f.engine
            .add_state_callback(
                "mode",
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                Some("off".into()),
            )
            .unwrap();

        f.engine.check();
        for mode in ["on", "off", "on"] {
            *f.mode.lock() = mode.into();
            f.engine.check();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_changes_only_given_fields() {
        let mut f = fixture();
        let id = f
            .engine
            .create(&sensor(), &json!({"type": "http", "url": "host/a", "method": "POST"}))
            .unwrap();

        f.engine
            .update(&sensor(), id, &json!({"url": "host/b"}))
            .unwrap();
        let callbacks = f.engine.observable_callbacks_json(&sensor()).unwrap();
        assert_eq!(callbacks[0]["url"], "host/b");
        assert_eq!(callbacks[0]["method"], "POST");

        let err = f.engine.update(&sensor(), 42, &json!({})).unwrap_err();
        assert!(matches!(err, Error::Rule(RuleError::CallbackNotFound(42))));
    }

    #[test]
    fn request_bodies() {
        let mut f = fixture();
        let id = f
            .engine
            .create_from_request(&json!({
                "observable": {"type": "sensor", "name": "level"},
                "callback": count_action(),
            }))
            .unwrap();
        f.engine
            .update_from_request(&json!({
                "observable": {"type": "sensor", "name": "level"},
                "callback": {"id": id.to_string(), "threshold": 4},
            }))
            .unwrap();
        assert_eq!(f.engine.sensor_watchers()[0].callbacks()[0].threshold(), Some(4));

        let err = f
            .engine
            .update_from_request(&json!({
                "observable": {"type": "sensor", "name": "level"},
                "callback": {"threshold": 4},
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingField(ref field)) if field == "id"));

        let err = f
            .engine
            .create_from_request(&json!({"observable": {"type": "pin", "name": "x"}, "callback": {}}))
            .unwrap_err();
        assert!(matches!(err, Error::Rule(RuleError::UnknownObservableType(_))));
    }

    #[test]
    fn manual_call_uses_given_or_sampled_value() {
        let mut f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = f.engine.create(&sensor(), &count_action()).unwrap();
        let sink = Arc::clone(&seen);
        f.engine
            .add_sensor_callback("level", move |v| sink.lock().push(*v), None)
            .unwrap();

        f.engine.call_callback(&sensor(), id, Some("12")).unwrap();
        assert_eq!(f.fired.load(Ordering::SeqCst), 1);

        f.level.store(8, Ordering::SeqCst);
        f.engine.call_callback(&sensor(), -1, None).unwrap();
        assert_eq!(*seen.lock(), vec![8]);

        let err = f.engine.call_callback(&sensor(), id, Some("hot")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn json_lists_both_type_classes() {
        let mut f = fixture();
        f.engine.create(&sensor(), &count_action()).unwrap();
        f.engine.create(&state(), &count_action()).unwrap();
        f.engine.add_sensor_callback("level", |_| {}, None).unwrap();

        let all = f.engine.to_json(false, false);
        assert_eq!(all.as_array().unwrap().len(), 2);
        assert_eq!(all[0]["callbacks"].as_array().unwrap().len(), 2);

        let persisted = f.engine.to_json(true, true);
        assert_eq!(persisted[0]["callbacks"].as_array().unwrap().len(), 1);
        assert_eq!(persisted[1]["observable"], json!({"type": "state", "name": "mode"}));
    }

    #[test]
    fn save_and_load_restore_rules() {
        let mut f = fixture();
        f.engine
            .create(&sensor(), &json!({"type": "action", "action": "count", "threshold": 2}))
            .unwrap();
        f.engine
            .create(&state(), &json!({"type": "notification", "message": "mode {v}", "id": 7}))
            .unwrap();
        f.engine.add_sensor_callback("level", |_| {}, None).unwrap();
        f.engine.save().unwrap();

        let mut restored = fixture_with(Arc::clone(&f.settings), f.stats.clone());
        let writes = f.stats.writes();
        let report = restored.engine.load();

        assert_eq!(report.loaded, 2);
        assert!(!report.resaved);
        assert_eq!(f.stats.writes(), writes);
        assert_eq!(restored.engine.to_json(true, true), f.engine.to_json(true, true));
    }

    #[test]
    fn load_drops_broken_entries_and_resaves() {
        let f = fixture();
        f.settings
            .set_rules(
                &json!([
                    {"observable": {"type": "sensor", "name": "level"}, "callbacks": [
                        {"id": 1, "type": "action", "action": "count"},
                        {"id": 2, "type": "teleport"},
                        {"id": 1, "type": "action", "action": "count"},
                    ]},
                    {"observable": {"type": "sensor", "name": "gone"}, "callbacks": [
                        {"id": 1, "type": "action", "action": "count"},
                    ]},
                    {"callbacks": []},
                ])
                .to_string(),
            )
            .unwrap();

        let mut f = fixture_with(Arc::clone(&f.settings), f.stats.clone());
        let report = f.engine.load();
        assert_eq!(
            report,
            LoadReport {
                loaded: 1,
                missing_observables: 1,
                invalid: 3,
                resaved: true,
            }
        );

        let stored: Value = serde_json::from_str(&f.settings.rules()).unwrap();
        assert_eq!(stored, f.engine.to_json(true, true));
    }

    #[test]
    fn load_ignores_empty_partition() {
        let mut f = fixture();
        assert_eq!(f.engine.load(), LoadReport::default());
    }
}
