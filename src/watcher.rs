// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Change detection for a single observable.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::callback::{Callback, SYSTEM_CALLBACK_ID};
use crate::dispatch::DispatchContext;
use crate::error::RuleError;
use crate::observable::{Observable, ObservableValue};

/// Number of ids tried before callback id allocation gives up.
pub const MAX_ID_PROBES: usize = 20;

/// A detected change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent<T> {
    /// Value seen on the previous poll.
    pub previous: T,
    /// Value seen now.
    pub current: T,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The value differs from the previous poll.
    Changed(ChangeEvent<T>),
    /// First poll, or same value as before.
    NoChange,
}

/// Watches one observable and fires its callbacks when the value changes.
///
/// The first poll only records a baseline. Callbacks run in attachment order.
#[derive(Debug, Clone)]
pub struct Watcher<T> {
    observable: Arc<Observable<T>>,
    last_value: Option<T>,
    callbacks: Vec<Callback<T>>,
    id_sequence: i32,
}

impl<T: ObservableValue> Watcher<T> {
    /// Creates an unarmed watcher.
    #[must_use]
    pub fn new(observable: Arc<Observable<T>>) -> Self {
        Self {
            observable,
            last_value: None,
            callbacks: Vec::new(),
            id_sequence: 0,
        }
    }

    /// Returns the watched observable.
    #[must_use]
    pub fn observable(&self) -> &Arc<Observable<T>> {
        &self.observable
    }

    /// Returns the value seen on the last poll.
    #[must_use]
    pub fn last_value(&self) -> Option<&T> {
        self.last_value.as_ref()
    }

    /// Returns the attached callbacks in order.
    #[must_use]
    pub fn callbacks(&self) -> &[Callback<T>] {
        &self.callbacks
    }

    /// Returns `true` if no callback is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Returns the callback with `id`.
    #[must_use]
    pub fn callback(&self, id: i32) -> Option<&Callback<T>> {
        self.callbacks.iter().find(|cb| cb.id() == Some(id))
    }

    /// Returns the callback with `id` mutably.
    pub fn callback_mut(&mut self, id: i32) -> Option<&mut Callback<T>> {
        self.callbacks.iter_mut().find(|cb| cb.id() == Some(id))
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Samples the observable and compares against the last value.
    ///
    /// Does not fire callbacks; see [`Watcher::poll`].
    pub fn detect(&mut self) -> PollOutcome<T> {
        let current = self.observable.sample();
        match self.last_value.replace(current.clone()) {
            Some(previous) if previous != current => {
                PollOutcome::Changed(ChangeEvent { previous, current })
            }
            _ => PollOutcome::NoChange,
        }
    }

    /// Samples the observable and, on change, calls every accepting
    /// callback in order.
    pub fn poll(&mut self, ctx: &DispatchContext) -> PollOutcome<T> {
        let outcome = self.detect();
        if let PollOutcome::Changed(event) = &outcome {
            tracing::trace!(
                observable = %self.observable.name(),
                previous = ?event.previous,
                current = ?event.current,
                "Observable changed"
            );
            for callback in &self.callbacks {
                if callback.accept(&event.previous, &event.current) {
                    callback.call(&event.current, ctx);
                }
            }
        }
        outcome
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    fn next_id(&mut self) -> Result<i32, RuleError> {
        for _ in 0..MAX_ID_PROBES {
            self.id_sequence = if self.id_sequence == i32::MAX {
                1
            } else {
                self.id_sequence + 1
            };
            if self.callback(self.id_sequence).is_none() {
                return Ok(self.id_sequence);
            }
        }
        Err(RuleError::IdExhausted)
    }

    /// Attaches a callback and returns its id.
    ///
    /// Read-only callbacks always get [`SYSTEM_CALLBACK_ID`]. Callbacks
    /// without an id get the next free one from this watcher's sequence.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::DuplicateId`] if the requested id is taken and
    /// [`RuleError::IdExhausted`] if no free id was found.
    pub fn add_callback(&mut self, mut callback: Callback<T>) -> Result<i32, RuleError> {
        let id = if callback.is_read_only() {
            SYSTEM_CALLBACK_ID
        } else {
            match callback.id() {
                Some(id) if self.callback(id).is_some() => return Err(RuleError::DuplicateId(id)),
                Some(id) => id,
                None => self.next_id()?,
            }
        };
        callback.set_id(id);
        self.callbacks.push(callback);
        tracing::debug!(
            observable = %self.observable.name(),
            id,
            "Callback attached"
        );
        Ok(id)
    }

    /// Detaches and returns the callback with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::CallbackNotFound`] if no such callback exists
    /// and [`RuleError::ReadOnlyViolation`] for system callbacks.
    pub fn remove_callback(&mut self, id: i32) -> Result<Callback<T>, RuleError> {
        let index = self
            .callbacks
            .iter()
            .position(|cb| cb.id() == Some(id) && !cb.is_read_only())
            .ok_or_else(|| {
                if self.callbacks.iter().any(|cb| cb.id() == Some(id)) {
                    RuleError::ReadOnlyViolation(id)
                } else {
                    RuleError::CallbackNotFound(id)
                }
            })?;
        tracing::debug!(observable = %self.observable.name(), id, "Callback removed");
        Ok(self.callbacks.remove(index))
    }

    // ========================================================================
    // JSON
    // ========================================================================

    /// Serializes the callbacks, optionally skipping read-only ones.
    #[must_use]
    pub fn callbacks_json(&self, ignore_read_only: bool, short: bool) -> Vec<Value> {
        self.callbacks
            .iter()
            .filter(|cb| !(ignore_read_only && cb.is_read_only()))
            .map(|cb| cb.to_json(short))
            .collect()
    }

    /// Serializes as `{observable, callbacks}`, or `None` when nothing is
    /// left to serialize.
    #[must_use]
    pub fn to_json(&self, ignore_read_only: bool, short: bool) -> Option<Value> {
        let callbacks = self.callbacks_json(ignore_read_only, short);
        if callbacks.is_empty() {
            return None;
        }
        Some(json!({
            "observable": {
                "type": T::KIND.as_str(),
                "name": self.observable.name(),
            },
            "callbacks": callbacks,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI16, AtomicUsize, Ordering};

    use crate::callback::CompareOp;
    use crate::dispatch::DispatchContext;
    use crate::observable::ObservableRegistry;

    struct Fixture {
        value: Arc<AtomicI16>,
        watcher: Watcher<i16>,
        ctx: DispatchContext,
    }

    fn fixture() -> Fixture {
        let value = Arc::new(AtomicI16::new(0));
        let registry = ObservableRegistry::new();
        let source = Arc::clone(&value);
        let sensor = registry
            .register_sensor("s", move || source.load(Ordering::SeqCst))
            .unwrap();
        Fixture {
            value,
            watcher: Watcher::new(sensor),
            ctx: DispatchContext::detached(),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Callback<i16>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let cb = Callback::lambda(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, cb)
    }

    #[test]
    fn first_sample_is_baseline() {
        let mut f = fixture();
        let (count, cb) = counter();
        f.watcher.add_callback(cb).unwrap();

        f.value.store(42, Ordering::SeqCst);
        assert_eq!(f.watcher.poll(&f.ctx), PollOutcome::NoChange);
        assert_eq!(f.watcher.last_value(), Some(&42));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fires_only_on_change() {
        let mut f = fixture();
        let (count, cb) = counter();
        f.watcher.add_callback(cb).unwrap();

        for v in [5, 5, 7, 7, 7, 2] {
            f.value.store(v, Ordering::SeqCst);
            f.watcher.poll(&f.ctx);
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn change_event_carries_both_values() {
        let mut f = fixture();
        f.watcher.detect();
        f.value.store(3, Ordering::SeqCst);
        assert_eq!(
            f.watcher.detect(),
            PollOutcome::Changed(ChangeEvent {
                previous: 0,
                current: 3
            })
        );
    }

    #[test]
    fn trigger_gates_callbacks_in_order() {
        let mut f = fixture();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        f.watcher
            .add_callback(
                Callback::lambda(move |v: &i16| first.lock().push(("gte10", *v)))
                    .with_trigger(10)
                    .with_compare(CompareOp::Gte),
            )
            .unwrap();
        let second = Arc::clone(&order);
        f.watcher
            .add_callback(Callback::lambda(move |v: &i16| second.lock().push(("any", *v))))
            .unwrap();

        for v in [0, 9, 10, 11] {
            f.value.store(v, Ordering::SeqCst);
            f.watcher.poll(&f.ctx);
        }
        assert_eq!(
            *order.lock(),
            vec![("any", 9), ("gte10", 10), ("any", 10), ("gte10", 11), ("any", 11)]
        );
    }

    #[test]
    fn ids_are_allocated_from_sequence() {
        let mut f = fixture();
        assert_eq!(f.watcher.add_callback(Callback::action("a")).unwrap(), 1);
        assert_eq!(f.watcher.add_callback(Callback::action("b").with_id(3)).unwrap(), 3);
        assert_eq!(f.watcher.add_callback(Callback::action("c")).unwrap(), 2);
        // 3 is taken, so the sequence skips it
        assert_eq!(f.watcher.add_callback(Callback::action("d")).unwrap(), 4);
    }

    #[test]
    fn explicit_duplicate_id_is_rejected() {
        let mut f = fixture();
        f.watcher.add_callback(Callback::action("a").with_id(5)).unwrap();
        assert_eq!(
            f.watcher.add_callback(Callback::action("b").with_id(5)),
            Err(RuleError::DuplicateId(5))
        );
    }

    #[test]
    fn allocation_gives_up_after_probe_budget() {
        let mut f = fixture();
        for id in 1..=20 {
            f.watcher.add_callback(Callback::action("x").with_id(id)).unwrap();
        }
        assert_eq!(
            f.watcher.add_callback(Callback::action("y")),
            Err(RuleError::IdExhausted)
        );
        // The next attempt resumes past the probed range
        assert_eq!(f.watcher.add_callback(Callback::action("z")).unwrap(), 21);
    }

    #[test]
    fn read_only_callbacks_share_system_id() {
        let mut f = fixture();
        assert_eq!(f.watcher.add_callback(Callback::lambda(|_| {})).unwrap(), -1);
        assert_eq!(f.watcher.add_callback(Callback::lambda(|_| {})).unwrap(), -1);

        assert_eq!(
            f.watcher.remove_callback(-1).unwrap_err(),
            RuleError::ReadOnlyViolation(-1)
        );
        assert_eq!(
            f.watcher.remove_callback(8).unwrap_err(),
            RuleError::CallbackNotFound(8)
        );
        assert_eq!(f.watcher.callbacks().len(), 2);
    }

    #[test]
    fn json_skips_read_only_when_asked() {
        let mut f = fixture();
        f.watcher.add_callback(Callback::lambda(|_| {})).unwrap();
        assert!(f.watcher.to_json(true, true).is_none());

        f.watcher.add_callback(Callback::action("a")).unwrap();
        let json = f.watcher.to_json(true, true).unwrap();
        assert_eq!(json["observable"], json!({"type": "sensor", "name": "s"}));
        assert_eq!(json["callbacks"].as_array().unwrap().len(), 1);
        assert_eq!(f.watcher.callbacks_json(false, true).len(), 2);
    }
}
