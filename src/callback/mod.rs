// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callbacks fired when a watched observable changes.
//!
//! A [`Callback`] pairs a trigger condition with one of four effects:
//!
//! - **lambda**: an in-process closure, always read-only
//! - **http**: an outbound HTTP request
//! - **action**: a locally registered action
//! - **notification**: a push notification sent through the gateway
//!
//! User callbacks are built from JSON descriptors with
//! [`Callback::from_json`] and edited with [`Callback::apply_patch`].
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use smartthing::callback::{Callback, CallbackType};
//!
//! let callback = Callback::<i16>::from_json(&json!({
//!     "type": "http",
//!     "url": "192.168.1.20/alarm?level={v}",
//!     "triggerEnabled": true,
//!     "trigger": 30,
//!     "compareType": "gte",
//! }))
//! .unwrap();
//!
//! assert_eq!(callback.callback_type(), CallbackType::Http);
//! assert!(callback.accept(&10, &31));
//! assert!(!callback.accept(&10, &29));
//! ```

mod compare;
mod patch;
mod template;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value, json};

pub use compare::{CompareOp, HttpMethod, NotificationSeverity};
pub use patch::CallbackPatch;
pub use template::{VALUE_PLACEHOLDER, render_template, templates, templates_for};

use crate::dispatch::{DispatchContext, OutboundJob, RequestTracker};
use crate::error::{Result, ValidationError};
use crate::observable::ObservableValue;

/// Id reported by read-only system callbacks.
pub const SYSTEM_CALLBACK_ID: i32 = -1;

/// Closure invoked by lambda callbacks.
pub type LambdaFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Discriminant of [`CallbackVariant`], as used in descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackType {
    /// In-process closure.
    Lambda,
    /// Outbound HTTP request.
    Http,
    /// Local action.
    Action,
    /// Push notification.
    Notification,
}

impl CallbackType {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lambda => "lambda",
            Self::Http => "http",
            Self::Action => "action",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for CallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackType {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lambda" => Ok(Self::Lambda),
            "http" => Ok(Self::Http),
            "action" => Ok(Self::Action),
            "notification" => Ok(Self::Notification),
            other => Err(ValidationError::invalid(
                "type",
                format!("unknown callback type '{other}'"),
            )),
        }
    }
}

// ============================================================================
// Variants
// ============================================================================

/// Sends an HTTP request with the triggering value substituted into the
/// url and payload.
#[derive(Debug, Clone)]
pub struct HttpCallback {
    url: String,
    method: HttpMethod,
    payload: String,
    tracker: RequestTracker,
}

impl HttpCallback {
    /// Creates a `GET` callback without payload.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            method: HttpMethod::default(),
            payload: String::new(),
            tracker: RequestTracker::default(),
        }
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the payload template.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Returns the url template.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Returns the payload template.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Returns the in-flight tracker.
    #[must_use]
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    fn send(&self, value: &str, ctx: &DispatchContext) {
        if !self.tracker.try_begin() {
            tracing::debug!(url = %self.url, "Previous request still in flight, dropping trigger");
            return;
        }
        let config = ctx.settings().config();
        let url = with_scheme(&render_template(
            &self.url,
            &urlencoding::encode(value),
            &config,
        ));
        let payload = render_template(&self.payload, value, &config);

        tracing::debug!(method = %self.method, url = %url, "Queueing callback request");
        ctx.outbound().submit(OutboundJob {
            method: self.method,
            url,
            body: (!payload.is_empty()).then_some(payload),
            tracker: self.tracker.clone(),
        });
    }
}

/// Prepends `http://` to a url without scheme.
fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Calls a locally registered action by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCallback {
    action: String,
}

impl ActionCallback {
    /// Creates an action callback.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }

    /// Returns the action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }
}

/// Posts a notification to the gateway configured under
/// [`crate::settings::GATEWAY_CONFIG_KEY`].
#[derive(Debug, Clone)]
pub struct NotificationCallback {
    message: String,
    severity: NotificationSeverity,
    tracker: RequestTracker,
}

impl NotificationCallback {
    /// Creates an `info` notification.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: NotificationSeverity::default(),
            tracker: RequestTracker::default(),
        }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: NotificationSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Returns the message template.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the severity.
    #[must_use]
    pub fn severity(&self) -> NotificationSeverity {
        self.severity
    }

    /// Returns the in-flight tracker.
    #[must_use]
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    fn send(&self, value: &str, ctx: &DispatchContext) {
        let settings = ctx.settings();
        let Some(gateway) = settings.gateway() else {
            tracing::debug!("No gateway configured, skipping notification");
            return;
        };
        if !self.tracker.try_begin() {
            tracing::debug!("Previous notification still in flight, dropping trigger");
            return;
        }

        let message = render_template(&self.message, value, &settings.config());
        let identity = ctx.identity();
        let body = json!({
            "device": {
                "name": settings.name(),
                "type": identity.device_type,
                "ip": identity.ip,
            },
            "notification": {
                "message": message,
                "type": self.severity.as_str(),
            },
        });

        ctx.outbound().submit(OutboundJob {
            method: HttpMethod::Post,
            url: format!("http://{gateway}/api/notification"),
            body: Some(body.to_string()),
            tracker: self.tracker.clone(),
        });
    }
}

/// The effect of a callback.
pub enum CallbackVariant<T> {
    /// In-process closure.
    Lambda(LambdaFn<T>),
    /// Outbound HTTP request.
    Http(HttpCallback),
    /// Local action.
    Action(ActionCallback),
    /// Push notification.
    Notification(NotificationCallback),
}

impl<T> CallbackVariant<T> {
    /// Returns the discriminant.
    #[must_use]
    pub fn callback_type(&self) -> CallbackType {
        match self {
            Self::Lambda(_) => CallbackType::Lambda,
            Self::Http(_) => CallbackType::Http,
            Self::Action(_) => CallbackType::Action,
            Self::Notification(_) => CallbackType::Notification,
        }
    }
}

impl<T> Clone for CallbackVariant<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Lambda(f) => Self::Lambda(Arc::clone(f)),
            Self::Http(http) => Self::Http(http.clone()),
            Self::Action(action) => Self::Action(action.clone()),
            Self::Notification(n) => Self::Notification(n.clone()),
        }
    }
}

impl<T> fmt::Debug for CallbackVariant<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lambda(_) => f.write_str("Lambda(..)"),
            Self::Http(http) => f.debug_tuple("Http").field(http).finish(),
            Self::Action(action) => f.debug_tuple("Action").field(action).finish(),
            Self::Notification(n) => f.debug_tuple("Notification").field(n).finish(),
        }
    }
}

// ============================================================================
// Callback
// ============================================================================

/// A trigger condition plus an effect, attached to one watcher.
///
/// Clones share the request tracker of HTTP callbacks.
#[derive(Debug, Clone)]
pub struct Callback<T> {
    id: Option<i32>,
    read_only: bool,
    trigger_enabled: bool,
    trigger: Option<T>,
    compare: CompareOp,
    threshold: Option<i16>,
    variant: CallbackVariant<T>,
}

impl<T: ObservableValue> Callback<T> {
    /// Creates a callback that fires on every change.
    #[must_use]
    pub fn new(variant: CallbackVariant<T>) -> Self {
        Self {
            id: None,
            read_only: false,
            trigger_enabled: false,
            trigger: None,
            compare: CompareOp::default(),
            threshold: None,
            variant,
        }
    }

    /// Creates a read-only closure callback.
    #[must_use]
    pub fn lambda(f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self::new(CallbackVariant::Lambda(Arc::new(f))).read_only()
    }

    /// Creates an HTTP callback.
    #[must_use]
    pub fn http(http: HttpCallback) -> Self {
        Self::new(CallbackVariant::Http(http))
    }

    /// Creates an action callback.
    #[must_use]
    pub fn action(name: impl Into<String>) -> Self {
        Self::new(CallbackVariant::Action(ActionCallback::new(name)))
    }

    /// Creates a notification callback.
    #[must_use]
    pub fn notification(notification: NotificationCallback) -> Self {
        Self::new(CallbackVariant::Notification(notification))
    }

    /// Requests a specific id.
    #[must_use]
    pub fn with_id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }

    /// Enables the trigger with the given value.
    #[must_use]
    pub fn with_trigger(mut self, trigger: T) -> Self {
        self.trigger_enabled = true;
        self.trigger = Some(trigger);
        self
    }

    /// Sets the comparison used by the trigger.
    #[must_use]
    pub fn with_compare(mut self, compare: CompareOp) -> Self {
        self.compare = compare;
        self
    }

    /// Sets the change threshold used while the trigger is disabled.
    #[must_use]
    pub fn with_threshold(mut self, threshold: i16) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Marks the callback as a read-only system callback.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the id, `None` until attached to a watcher.
    #[must_use]
    pub fn id(&self) -> Option<i32> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i32) {
        self.id = Some(id);
    }

    /// Returns `true` for system callbacks.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns whether the trigger is enabled.
    #[must_use]
    pub fn trigger_enabled(&self) -> bool {
        self.trigger_enabled
    }

    /// Returns the trigger value.
    #[must_use]
    pub fn trigger(&self) -> Option<&T> {
        self.trigger.as_ref()
    }

    /// Returns the trigger comparison.
    #[must_use]
    pub fn compare(&self) -> CompareOp {
        self.compare
    }

    /// Returns the change threshold.
    #[must_use]
    pub fn threshold(&self) -> Option<i16> {
        self.threshold
    }

    /// Returns the effect.
    #[must_use]
    pub fn variant(&self) -> &CallbackVariant<T> {
        &self.variant
    }

    /// Returns the effect discriminant.
    #[must_use]
    pub fn callback_type(&self) -> CallbackType {
        self.variant.callback_type()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Decides whether a change from `previous` to `current` fires this
    /// callback.
    ///
    /// With the trigger disabled every change is accepted, unless a positive
    /// threshold is set and the change is not larger than it. With the
    /// trigger enabled, `current` is compared against the trigger value.
    #[must_use]
    pub fn accept(&self, previous: &T, current: &T) -> bool {
        if !self.trigger_enabled {
            return match (self.threshold, previous.distance(current)) {
                (Some(threshold), Some(distance)) if threshold > 0 => {
                    distance > u32::from(threshold.unsigned_abs())
                }
                _ => true,
            };
        }
        self.trigger
            .as_ref()
            .is_some_and(|trigger| current.compare(self.compare, trigger))
    }

    /// Performs the effect with `value`.
    ///
    /// Network effects are queued and never block.
    pub fn call(&self, value: &T, ctx: &DispatchContext) {
        match &self.variant {
            CallbackVariant::Lambda(f) => f(value),
            CallbackVariant::Action(action) => {
                if let Err(e) = ctx.actions().call_action(action.action()) {
                    tracing::warn!(action = %action.action(), error = %e, "Callback action failed");
                }
            }
            CallbackVariant::Http(http) => http.send(&value.render(), ctx),
            CallbackVariant::Notification(n) => n.send(&value.render(), ctx),
        }
    }

    // ========================================================================
    // JSON
    // ========================================================================

    /// Builds a user callback from a JSON descriptor.
    ///
    /// The descriptor carries `type` plus the fields of that type (`url`,
    /// `method`, `payload` for http; `action` for action; `message`,
    /// `notificationType` for notification) and the common trigger fields.
    /// Lambda callbacks cannot be described in JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the missing or invalid field.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ValidationError::invalid("callback", "expected an object"))?;
        let kind: CallbackType = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::missing("type"))?
            .parse()?;

        let required = match kind {
            CallbackType::Http => "url",
            CallbackType::Action => "action",
            CallbackType::Notification => "message",
            CallbackType::Lambda => {
                return Err(ValidationError::invalid(
                    "type",
                    "lambda callbacks cannot be created from a descriptor",
                )
                .into());
            }
        };
        if !obj.contains_key(required) {
            return Err(ValidationError::missing(required).into());
        }

        let variant = match kind {
            CallbackType::Http => CallbackVariant::Http(HttpCallback::new("")),
            CallbackType::Action => CallbackVariant::Action(ActionCallback::new("")),
            _ => CallbackVariant::Notification(NotificationCallback::new("")),
        };
        let mut callback = Self::new(variant);
        callback.id = parse_id(obj)?;
        callback.apply(CallbackPatch::parse(obj, kind)?)?;
        Ok(callback)
    }

    /// Updates the fields present in `value`.
    ///
    /// Either every field is applied or, on error, none is.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first invalid field.
    pub fn apply_patch(&mut self, value: &Value) -> Result<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| ValidationError::invalid("callback", "expected an object"))?;
        let patch = CallbackPatch::parse(obj, self.callback_type())?;
        self.apply(patch)?;
        Ok(())
    }

    /// Applies an already parsed patch.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] for `trigger` if the patch
    /// would leave the trigger enabled without a value.
    pub fn apply(&mut self, patch: CallbackPatch<T>) -> std::result::Result<(), ValidationError> {
        let trigger_enabled = patch.trigger_enabled.unwrap_or(self.trigger_enabled);
        let has_trigger = match &patch.trigger {
            Some(trigger) => trigger.is_some(),
            None => self.trigger.is_some(),
        };
        if trigger_enabled && !has_trigger {
            return Err(ValidationError::missing("trigger"));
        }

        self.trigger_enabled = trigger_enabled;
        if let Some(trigger) = patch.trigger {
            self.trigger = trigger;
        }
        if let Some(compare) = patch.compare {
            self.compare = compare;
        }
        if let Some(threshold) = patch.threshold {
            self.threshold = threshold;
        }

        match &mut self.variant {
            CallbackVariant::Http(http) => {
                if let Some(url) = patch.url {
                    http.url = url.trim().to_string();
                }
                if let Some(method) = patch.method {
                    http.method = method;
                }
                if let Some(payload) = patch.payload {
                    http.payload = payload;
                }
            }
            CallbackVariant::Action(action) => {
                if let Some(name) = patch.action {
                    action.action = name;
                }
            }
            CallbackVariant::Notification(n) => {
                if let Some(message) = patch.message {
                    n.message = message;
                }
                if let Some(severity) = patch.severity {
                    n.severity = severity;
                }
            }
            CallbackVariant::Lambda(_) => {}
        }
        Ok(())
    }

    /// Serializes the callback.
    ///
    /// The short form is what gets persisted; the full form adds runtime
    /// details such as the last HTTP status.
    #[must_use]
    pub fn to_json(&self, short: bool) -> Value {
        let mut json = json!({
            "id": self.id.unwrap_or(SYSTEM_CALLBACK_ID),
            "type": self.callback_type().as_str(),
            "readonly": self.read_only,
            "triggerDisabled": !self.trigger_enabled,
            "compareType": self.compare.as_str(),
        });
        if let Some(trigger) = &self.trigger {
            json["trigger"] = trigger.to_json();
        }
        if let Some(threshold) = self.threshold {
            json["threshold"] = Value::from(threshold);
        }

        match &self.variant {
            CallbackVariant::Http(http) => {
                json["url"] = Value::from(http.url.as_str());
                json["method"] = Value::from(http.method.as_str());
                json["payload"] = Value::from(http.payload.as_str());
                if !short {
                    json["lastResponseCode"] = http.tracker.last_status().map_or(Value::Null, Value::from);
                }
            }
            CallbackVariant::Action(action) => {
                json["action"] = Value::from(action.action.as_str());
            }
            CallbackVariant::Notification(n) => {
                json["message"] = Value::from(n.message.as_str());
                json["notificationType"] = Value::from(n.severity.as_str());
            }
            CallbackVariant::Lambda(_) => {}
        }
        json
    }
}

/// Parses the optional `id` field; negative ids mean "allocate one".
fn parse_id(obj: &Map<String, Value>) -> std::result::Result<Option<i32>, ValidationError> {
    let Some(value) = obj.get("id") else {
        return Ok(None);
    };
    let id = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_i64(),
        Value::String(s) if s.is_empty() => return Ok(None),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    match id.map(i32::try_from) {
        Some(Ok(id)) if id >= 0 => Ok(Some(id)),
        Some(Ok(_)) => Ok(None),
        _ => Err(ValidationError::invalid("id", "expected an integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn build<T: ObservableValue>(value: Value) -> Result<Callback<T>> {
        Callback::from_json(&value)
    }

    fn validation_field<T: std::fmt::Debug>(result: Result<T>) -> String {
        match result {
            Err(Error::Validation(e)) => e.field().to_string(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn builder_requires_variant_fields() {
        assert_eq!(validation_field(build::<i16>(json!({"type": "http"}))), "url");
        assert_eq!(validation_field(build::<i16>(json!({"type": "action"}))), "action");
        assert_eq!(
            validation_field(build::<i16>(json!({"type": "notification"}))),
            "message"
        );
        assert_eq!(validation_field(build::<i16>(json!({"type": "mqtt"}))), "type");
        assert_eq!(validation_field(build::<i16>(json!({"url": "x"}))), "type");
        assert_eq!(validation_field(build::<i16>(json!({"type": "lambda"}))), "type");
    }

    #[test]
    fn enabled_trigger_needs_a_value() {
        let result = build::<i16>(json!({"type": "action", "action": "led", "triggerEnabled": true}));
        assert_eq!(validation_field(result), "trigger");
    }

    #[test]
    fn builder_reads_common_fields() {
        let cb = build::<i16>(json!({
            "id": "4",
            "type": "http",
            "url": " http://host/x ",
            "method": "post",
            "payload": "{\"v\": {v}}",
            "triggerDisabled": false,
            "trigger": 12,
            "compareType": "lte",
            "readonly": true,
        }))
        .unwrap();

        assert_eq!(cb.id(), Some(4));
        assert!(!cb.is_read_only());
        assert!(cb.trigger_enabled());
        assert_eq!(cb.trigger(), Some(&12));
        assert_eq!(cb.compare(), CompareOp::Lte);
        let CallbackVariant::Http(http) = cb.variant() else {
            panic!("expected http variant");
        };
        assert_eq!(http.url(), "http://host/x");
        assert_eq!(http.method(), HttpMethod::Post);
    }

    #[test]
    fn negative_id_means_unassigned() {
        let cb = build::<i16>(json!({"id": -1, "type": "action", "action": "a"})).unwrap();
        assert_eq!(cb.id(), None);
        assert!(build::<i16>(json!({"id": "x", "type": "action", "action": "a"})).is_err());
    }

    #[test]
    fn disabled_trigger_accepts_every_change() {
        let cb = Callback::<i16>::action("a");
        assert!(cb.accept(&1, &2));
        assert!(cb.accept(&2, &1));
    }

    #[test]
    fn gte_trigger() {
        let cb = Callback::<i16>::action("a")
            .with_trigger(10)
            .with_compare(CompareOp::Gte);
        assert!(!cb.accept(&0, &9));
        assert!(cb.accept(&9, &10));
        assert!(cb.accept(&10, &11));
    }

    #[test]
    fn threshold_filters_small_changes() {
        let cb = Callback::<i16>::action("a").with_threshold(5);
        assert!(!cb.accept(&100, &105));
        assert!(cb.accept(&100, &106));
        assert!(cb.accept(&100, &94));

        // Thresholds only apply while the trigger is disabled
        let cb = cb.with_trigger(50).with_compare(CompareOp::Gte);
        assert!(cb.accept(&100, &101));
    }

    #[test]
    fn text_trigger_equality() {
        let cb = Callback::<String>::action("a").with_trigger("on".to_string());
        assert!(cb.accept(&"off".to_string(), &"on".to_string()));
        assert!(!cb.accept(&"on".to_string(), &"idle".to_string()));
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut cb = build::<i16>(json!({"type": "http", "url": "host/a"})).unwrap();

        let result = cb.apply_patch(&json!({"url": "host/b", "compareType": "between"}));
        assert!(result.is_err());
        let CallbackVariant::Http(http) = cb.variant() else {
            panic!("expected http variant");
        };
        assert_eq!(http.url(), "host/a");

        cb.apply_patch(&json!({"url": "host/b", "triggerEnabled": true, "trigger": 3}))
            .unwrap();
        assert!(cb.trigger_enabled());
        let CallbackVariant::Http(http) = cb.variant() else {
            panic!("expected http variant");
        };
        assert_eq!(http.url(), "host/b");
    }

    #[test]
    fn patch_cannot_clear_trigger_while_enabled() {
        let mut cb = Callback::<i16>::action("a").with_trigger(1);
        assert!(cb.apply_patch(&json!({"trigger": null, "triggerEnabled": true})).is_err());
        assert_eq!(cb.trigger(), Some(&1));
        assert!(cb.trigger_enabled());

        cb.apply_patch(&json!({"trigger": null})).unwrap();
        assert_eq!(cb.trigger(), None);
        assert!(!cb.trigger_enabled());
    }

    #[test]
    fn trigger_value_without_flag_enables_trigger() {
        let cb = build::<i16>(json!({
            "type": "action",
            "action": "alarm",
            "trigger": 30,
            "compareType": "gte",
        }))
        .unwrap();
        assert!(cb.trigger_enabled());
        assert!(!cb.accept(&0, &5));
        assert!(cb.accept(&29, &30));

        let cb = build::<i16>(json!({"type": "action", "action": "alarm", "trigger": ""})).unwrap();
        assert!(!cb.trigger_enabled());
        assert!(cb.accept(&0, &5));

        // An explicit flag wins over the value
        let cb = build::<i16>(json!({
            "type": "action",
            "action": "alarm",
            "trigger": 30,
            "triggerDisabled": true,
        }))
        .unwrap();
        assert!(!cb.trigger_enabled());
        assert_eq!(cb.trigger(), Some(&30));

        let cb = build::<String>(json!({"type": "action", "action": "alarm", "trigger": "on"})).unwrap();
        assert!(cb.accept(&"off".to_string(), &"on".to_string()));
        assert!(!cb.accept(&"on".to_string(), &"idle".to_string()));
    }

    #[test]
    fn short_json_omits_runtime_fields() {
        let cb = Callback::<i16>::http(HttpCallback::new("host/x").with_method(HttpMethod::Put))
            .with_id(2)
            .with_trigger(7);

        let short = cb.to_json(true);
        assert_eq!(
            short,
            json!({
                "id": 2,
                "type": "http",
                "readonly": false,
                "triggerDisabled": false,
                "compareType": "eq",
                "trigger": 7,
                "url": "host/x",
                "method": "PUT",
                "payload": "",
            })
        );
        assert!(cb.to_json(false).get("lastResponseCode").is_some());
    }

    #[test]
    fn json_descriptor_rebuilds_same_callback() {
        let cb = Callback::<String>::notification(
            NotificationCallback::new("door is {v}").with_severity(NotificationSeverity::Warning),
        )
        .with_id(9)
        .with_trigger("open".to_string())
        .with_compare(CompareOp::Neq);

        let rebuilt = Callback::<String>::from_json(&cb.to_json(true)).unwrap();
        assert_eq!(rebuilt.to_json(true), cb.to_json(true));
    }

    #[test]
    fn lambda_is_read_only_system_callback() {
        let cb = Callback::<i16>::lambda(|_| {});
        assert!(cb.is_read_only());
        assert_eq!(cb.to_json(true)["id"], SYSTEM_CALLBACK_ID);
        assert_eq!(cb.to_json(true)["type"], "lambda");
    }

    #[test]
    fn scheme_is_added_when_missing() {
        assert_eq!(with_scheme("host/path"), "http://host/path");
        assert_eq!(with_scheme("https://host"), "https://host");
    }
}
