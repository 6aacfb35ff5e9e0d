// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types an observable can produce.

use std::fmt::Debug;

use serde_json::Value;

use super::ObservableKind;
use crate::callback::CompareOp;

/// A value produced by an observable and compared by callbacks.
///
/// Implemented for `i16` (sensors) and `String` (device states).
pub trait ObservableValue: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Type class of observables producing this value.
    const KIND: ObservableKind;

    /// Comparison operators callbacks on this type may use.
    const SUPPORTED_OPS: &'static [CompareOp];

    /// Whether callbacks on this type accept a change threshold.
    const SUPPORTS_THRESHOLD: bool = false;

    /// Evaluates `self <op> trigger`.
    fn compare(&self, op: CompareOp, trigger: &Self) -> bool;

    /// Absolute distance between two values, used by change thresholds.
    fn distance(&self, _other: &Self) -> Option<u32> {
        None
    }

    /// Parses a value from a JSON descriptor field.
    ///
    /// Numbers and numeric strings are both accepted for sensors, since
    /// form-based clients send everything as text.
    fn from_json(value: &Value) -> Option<Self>;

    /// Serializes the value into JSON.
    fn to_json(&self) -> Value;

    /// Renders the value for template substitution.
    fn render(&self) -> String;
}

impl ObservableValue for i16 {
    const KIND: ObservableKind = ObservableKind::Sensor;
    const SUPPORTED_OPS: &'static [CompareOp] =
        &[CompareOp::Eq, CompareOp::Neq, CompareOp::Gte, CompareOp::Lte];
    const SUPPORTS_THRESHOLD: bool = true;

    fn compare(&self, op: CompareOp, trigger: &Self) -> bool {
        match op {
            CompareOp::Eq => self == trigger,
            CompareOp::Neq => self != trigger,
            CompareOp::Gte => self >= trigger,
            CompareOp::Lte => self <= trigger,
        }
    }

    fn distance(&self, other: &Self) -> Option<u32> {
        Some(u32::from(self.abs_diff(*other)))
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().and_then(|n| i16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::from(*self)
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl ObservableValue for String {
    const KIND: ObservableKind = ObservableKind::DeviceState;
    const SUPPORTED_OPS: &'static [CompareOp] = &[CompareOp::Eq, CompareOp::Neq];

    fn compare(&self, op: CompareOp, trigger: &Self) -> bool {
        match op {
            CompareOp::Eq => self == trigger,
            CompareOp::Neq => self != trigger,
            // Ordering is undefined for text; such callbacks are rejected
            // when built.
            CompareOp::Gte | CompareOp::Lte => false,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn render(&self) -> String {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensor_values_parse_from_numbers_and_text() {
        assert_eq!(i16::from_json(&json!(42)), Some(42));
        assert_eq!(i16::from_json(&json!(" -7 ")), Some(-7));
        assert_eq!(i16::from_json(&json!(40_000)), None);
        assert_eq!(i16::from_json(&json!("abc")), None);
        assert_eq!(i16::from_json(&json!(null)), None);
    }

    #[test]
    fn sensor_comparisons() {
        assert!(10_i16.compare(CompareOp::Gte, &10));
        assert!(!9_i16.compare(CompareOp::Gte, &10));
        assert!(3_i16.compare(CompareOp::Lte, &3));
        assert!(3_i16.compare(CompareOp::Neq, &4));
        assert_eq!(5_i16.distance(&-5), Some(10));
    }

    #[test]
    fn text_ordering_never_matches() {
        let value = "on".to_string();
        assert!(value.compare(CompareOp::Eq, &"on".to_string()));
        assert!(!value.compare(CompareOp::Gte, &"a".to_string()));
        assert!(!String::SUPPORTED_OPS.contains(&CompareOp::Lte));
    }
}
