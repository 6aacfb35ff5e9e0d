// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing of callback descriptor fields.
//!
//! A descriptor is first parsed into a [`CallbackPatch`], which validates
//! every present field, and only then applied. A rejected patch never leaves
//! a callback half-updated.

use serde_json::{Map, Value};

use super::{CallbackType, CompareOp, HttpMethod, NotificationSeverity};
use crate::error::ValidationError;
use crate::observable::ObservableValue;

/// Validated set of field updates for a callback.
///
/// `None` means "field absent, leave unchanged". For the nullable fields
/// `trigger` and `threshold`, `Some(None)` clears the value.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackPatch<T> {
    pub(crate) trigger_enabled: Option<bool>,
    pub(crate) trigger: Option<Option<T>>,
    pub(crate) compare: Option<CompareOp>,
    pub(crate) threshold: Option<Option<i16>>,
    pub(crate) url: Option<String>,
    pub(crate) method: Option<HttpMethod>,
    pub(crate) payload: Option<String>,
    pub(crate) action: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) severity: Option<NotificationSeverity>,
}

impl<T> Default for CallbackPatch<T> {
    fn default() -> Self {
        Self {
            trigger_enabled: None,
            trigger: None,
            compare: None,
            threshold: None,
            url: None,
            method: None,
            payload: None,
            action: None,
            message: None,
            severity: None,
        }
    }
}

fn parse_bool(field: &str, value: &Value) -> Result<bool, ValidationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        Value::Number(n) => Ok(n.as_i64() != Some(0)),
        _ => Err(ValidationError::invalid(field, "expected a boolean")),
    }
}

fn parse_text(field: &str, value: &Value) -> Result<String, ValidationError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::invalid(field, "expected a string"))
}

fn parse_required_text(field: &str, value: &Value) -> Result<String, ValidationError> {
    let text = parse_text(field, value)?;
    if text.trim().is_empty() {
        return Err(ValidationError::missing(field));
    }
    Ok(text)
}

fn parse_enum<E: std::str::FromStr<Err = ValidationError>>(
    field: &str,
    value: &Value,
) -> Result<E, ValidationError> {
    parse_text(field, value)?.parse()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl<T: ObservableValue> CallbackPatch<T> {
    /// Parses the fields of `obj` that apply to a callback of type `kind`.
    ///
    /// Fields belonging to other callback types are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first invalid field.
    pub fn parse(obj: &Map<String, Value>, kind: CallbackType) -> Result<Self, ValidationError> {
        let mut patch = Self::default();

        if let Some(value) = obj.get("triggerEnabled") {
            patch.trigger_enabled = Some(parse_bool("triggerEnabled", value)?);
        }
        if let Some(value) = obj.get("triggerDisabled") {
            patch.trigger_enabled = Some(!parse_bool("triggerDisabled", value)?);
        }

        if let Some(value) = obj.get("trigger") {
            patch.trigger = Some(match T::from_json(value) {
                Some(trigger) => Some(trigger),
                None if is_blank(value) => None,
                None => return Err(ValidationError::invalid("trigger", "wrong value type")),
            });
        }
        // Without an explicit flag, a trigger value switches the trigger on
        if patch.trigger_enabled.is_none() {
            if let Some(value) = obj.get("trigger") {
                patch.trigger_enabled = Some(!is_blank(value));
            }
        }

        if let Some(value) = obj.get("compareType") {
            let op: CompareOp = parse_enum("compareType", value)?;
            if !T::SUPPORTED_OPS.contains(&op) {
                return Err(ValidationError::invalid(
                    "compareType",
                    format!("'{op}' is not supported for {} observables", T::KIND),
                ));
            }
            patch.compare = Some(op);
        }

        if let Some(value) = obj.get("threshold") {
            if !T::SUPPORTS_THRESHOLD {
                return Err(ValidationError::invalid(
                    "threshold",
                    format!("not supported for {} observables", T::KIND),
                ));
            }
            patch.threshold = Some(if is_blank(value) {
                None
            } else {
                let threshold = i16::from_json(value)
                    .filter(|t| *t >= 0)
                    .ok_or_else(|| ValidationError::invalid("threshold", "expected a number >= 0"))?;
                Some(threshold)
            });
        }

        match kind {
            CallbackType::Http => {
                if let Some(value) = obj.get("url") {
                    patch.url = Some(parse_required_text("url", value)?);
                }
                if let Some(value) = obj.get("method").filter(|v| !is_blank(v)) {
                    patch.method = Some(parse_enum("method", value)?);
                }
                if let Some(value) = obj.get("payload") {
                    patch.payload = Some(if value.is_null() {
                        String::new()
                    } else {
                        parse_text("payload", value)?
                    });
                }
            }
            CallbackType::Action => {
                if let Some(value) = obj.get("action") {
                    patch.action = Some(parse_required_text("action", value)?);
                }
            }
            CallbackType::Notification => {
                if let Some(value) = obj.get("message") {
                    patch.message = Some(parse_required_text("message", value)?);
                }
                if let Some(value) = obj.get("notificationType").filter(|v| !is_blank(v)) {
                    patch.severity = Some(parse_enum("notificationType", value)?);
                }
            }
            CallbackType::Lambda => {}
        }

        Ok(patch)
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse<T: ObservableValue>(value: Value, kind: CallbackType) -> Result<CallbackPatch<T>, ValidationError> {
        CallbackPatch::parse(value.as_object().unwrap(), kind)
    }

    #[test]
    fn trigger_flags_accept_both_spellings() {
        let patch = parse::<i16>(json!({"triggerEnabled": true}), CallbackType::Http).unwrap();
        assert_eq!(patch.trigger_enabled, Some(true));

        let patch = parse::<i16>(json!({"triggerDisabled": "true"}), CallbackType::Http).unwrap();
        assert_eq!(patch.trigger_enabled, Some(false));
    }

    #[test]
    fn trigger_value_sets_flag_when_absent() {
        let patch = parse::<i16>(json!({"trigger": 30}), CallbackType::Action).unwrap();
        assert_eq!(patch.trigger_enabled, Some(true));

        let patch = parse::<i16>(json!({"trigger": null}), CallbackType::Action).unwrap();
        assert_eq!(patch.trigger_enabled, Some(false));

        let patch = parse::<String>(json!({"trigger": ""}), CallbackType::Action).unwrap();
        assert_eq!(patch.trigger_enabled, Some(false));

        let patch = parse::<i16>(json!({"trigger": 30, "triggerEnabled": false}), CallbackType::Action)
            .unwrap();
        assert_eq!(patch.trigger_enabled, Some(false));

        let patch = parse::<i16>(json!({"compareType": "lte"}), CallbackType::Action).unwrap();
        assert_eq!(patch.trigger_enabled, None);
    }

    #[test]
    fn trigger_must_match_value_type() {
        let patch = parse::<i16>(json!({"trigger": "15"}), CallbackType::Action).unwrap();
        assert_eq!(patch.trigger, Some(Some(15)));

        let err = parse::<i16>(json!({"trigger": "high"}), CallbackType::Action).unwrap_err();
        assert_eq!(err.field(), "trigger");

        let patch = parse::<i16>(json!({"trigger": ""}), CallbackType::Action).unwrap();
        assert_eq!(patch.trigger, Some(None));

        // An empty string is a legitimate state value
        let patch = parse::<String>(json!({"trigger": ""}), CallbackType::Action).unwrap();
        assert_eq!(patch.trigger, Some(Some(String::new())));
    }

    #[test]
    fn text_rejects_ordering_and_threshold() {
        let err = parse::<String>(json!({"compareType": "gte"}), CallbackType::Http).unwrap_err();
        assert_eq!(err.field(), "compareType");

        let err = parse::<String>(json!({"threshold": 3}), CallbackType::Http).unwrap_err();
        assert_eq!(err.field(), "threshold");
    }

    #[test]
    fn threshold_must_be_non_negative() {
        let patch = parse::<i16>(json!({"threshold": "5"}), CallbackType::Http).unwrap();
        assert_eq!(patch.threshold, Some(Some(5)));
        assert!(parse::<i16>(json!({"threshold": -1}), CallbackType::Http).is_err());
        let patch = parse::<i16>(json!({"threshold": ""}), CallbackType::Http).unwrap();
        assert_eq!(patch.threshold, Some(None));
    }

    #[test]
    fn variant_fields_are_validated_per_type() {
        let err = parse::<i16>(json!({"url": "  "}), CallbackType::Http).unwrap_err();
        assert_eq!(err, ValidationError::missing("url"));

        // url is not a field of action callbacks
        let patch = parse::<i16>(json!({"url": ""}), CallbackType::Action).unwrap();
        assert!(patch.is_empty());

        let patch =
            parse::<i16>(json!({"message": "hot", "notificationType": "error"}), CallbackType::Notification)
                .unwrap();
        assert_eq!(patch.message.as_deref(), Some("hot"));
        assert_eq!(patch.severity, Some(NotificationSeverity::Error));
    }
}
