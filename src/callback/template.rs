// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Placeholder rendering and callback form templates.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use super::{CompareOp, HttpMethod, NotificationSeverity};
use crate::actions::ActionInfo;
use crate::observable::{ObservableKind, ObservableValue};

/// Placeholder replaced with the triggering value.
pub const VALUE_PLACEHOLDER: &str = "v";

/// Replaces `{v}` with `value` and any other `{key}` with the config value
/// for `key` (empty when unset).
///
/// Only word characters form a key, so JSON braces in payloads are copied
/// literally, and so is an empty `{}`. An unterminated `{` is copied literally too.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use smartthing::callback::render_template;
///
/// let mut config = BTreeMap::new();
/// config.insert("room".to_string(), "hall".to_string());
///
/// let out = render_template("{\"{room}\": {v}}", "300", &config);
/// assert_eq!(out, "{\"hall\": 300}");
/// ```
#[must_use]
pub fn render_template(input: &str, value: &str, config: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut key: Option<String> = None;

    for c in input.chars() {
        match (c, key.as_mut()) {
            ('{', pending) => {
                if let Some(pending) = pending {
                    out.push('{');
                    out.push_str(pending);
                }
                key = Some(String::new());
            }
            ('}', Some(pending)) => {
                if pending.is_empty() {
                    out.push_str("{}");
                } else if pending == VALUE_PLACEHOLDER {
                    out.push_str(value);
                } else if let Some(replacement) = config.get(pending.as_str()) {
                    out.push_str(replacement);
                }
                key = None;
            }
            (c, Some(pending)) if c.is_alphanumeric() || c == '_' => pending.push(c),
            (c, Some(pending)) => {
                out.push('{');
                out.push_str(pending);
                out.push(c);
                key = None;
            }
            (c, None) => out.push(c),
        }
    }
    if let Some(pending) = key {
        out.push('{');
        out.push_str(&pending);
    }
    out
}

fn compare_values<T: ObservableValue>() -> Vec<&'static str> {
    T::SUPPORTED_OPS.iter().map(|op| op.as_str()).collect()
}

fn default_section<T: ObservableValue>() -> Value {
    let mut section = json!({
        "triggerEnabled": { "type": "checkbox", "label": "Enable trigger" },
        "trigger": { "label": "Trigger value" },
        "compareType": {
            "label": "Compare type",
            "values": compare_values::<T>(),
            "default": CompareOp::default().as_str(),
        },
    });
    if T::SUPPORTS_THRESHOLD {
        section["threshold"] = json!({ "label": "Threshold", "type": "number" });
    }
    section
}

/// Returns the form schema for every callback type available on
/// observables of type `T`.
///
/// The `action` section is only present when at least one action exists.
#[must_use]
pub fn templates_for<T: ObservableValue>(actions: &[ActionInfo]) -> Value {
    let methods: Vec<&str> = HttpMethod::ALL.iter().map(|m| m.as_str()).collect();
    let severities: Vec<&str> = NotificationSeverity::ALL
        .iter()
        .map(|s| s.as_str())
        .collect();

    let mut templates = json!({
        "default": default_section::<T>(),
        "http": {
            "url": { "required": true },
            "method": { "values": methods, "default": HttpMethod::default().as_str() },
            "payload": {},
        },
        "notification": {
            "message": { "required": true },
            "notificationType": {
                "values": severities,
                "default": NotificationSeverity::default().as_str(),
            },
        },
    });

    if !actions.is_empty() {
        let values: Map<String, Value> = actions
            .iter()
            .map(|a| (a.name.clone(), Value::from(a.caption.clone())))
            .collect();
        templates["action"] = json!({ "action": { "required": true, "values": values } });
    }
    templates
}

/// Returns the templates for an observable type class.
#[must_use]
pub fn templates(kind: ObservableKind, actions: &[ActionInfo]) -> Value {
    match kind {
        ObservableKind::Sensor => templates_for::<i16>(actions),
        ObservableKind::DeviceState => templates_for::<String>(actions),
    }
}
