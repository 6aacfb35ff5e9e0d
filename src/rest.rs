// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport-agnostic handlers for the rules REST endpoints.
//!
//! Each handler returns an [`ApiResponse`] that an HTTP server can send as
//! is. Failures carry `{"error": "..."}` with the status given by
//! [`Error::status_code`].

use std::sync::Arc;

use serde_json::{Value, json};

use crate::actions::ActionInvoker;
use crate::callback::templates;
use crate::dispatch::{RuleEngine, SharedRuleEngine};
use crate::error::{Error, Result, ValidationError};
use crate::observable::{ObservableKind, ObservableRef};

/// Status and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body; `Null` means no body.
    pub body: Value,
}

impl ApiResponse {
    /// `200 OK` with `body`.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// `201 Created` with `body`.
    #[must_use]
    pub fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    /// Error response for `error`.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self {
            status: error.status_code(),
            body: json!({ "error": error.to_string() }),
        }
    }

    /// Returns `true` for `2xx` statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<Result<Self>> for ApiResponse {
    fn from(result: Result<Self>) -> Self {
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, status = e.status_code(), "Request failed");
            Self::from_error(&e)
        })
    }
}

fn observable_ref(kind: Option<&str>, name: Option<&str>) -> Result<ObservableRef> {
    let kind: ObservableKind = kind
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ValidationError::missing("type"))?
        .parse()?;
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ValidationError::missing("name"))?;
    Ok(ObservableRef::new(kind, name))
}

fn parse_id(id: &str) -> Result<i32> {
    id.trim()
        .parse()
        .map_err(|_| ValidationError::invalid("id", format!("'{id}' is not an integer")).into())
}

/// Rules endpoints over a shared [`RuleEngine`](crate::RuleEngine).
///
/// Every successful mutation is persisted before answering.
#[derive(Clone)]
pub struct RulesApi {
    engine: SharedRuleEngine,
    actions: Arc<dyn ActionInvoker>,
}

impl std::fmt::Debug for RulesApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesApi").finish_non_exhaustive()
    }
}

impl RulesApi {
    /// Creates the handlers.
    #[must_use]
    pub fn new(engine: SharedRuleEngine, actions: Arc<dyn ActionInvoker>) -> Self {
        Self { engine, actions }
    }

    /// Runs `change` and persists the result. When saving fails the rules
    /// go back to their state before `change`.
    fn change_and_save<T>(&self, change: impl FnOnce(&mut RuleEngine) -> Result<T>) -> Result<T> {
        let mut engine = self.engine.lock();
        let snapshot = engine.snapshot();
        let value = change(&mut *engine)?;
        if let Err(e) = engine.save() {
            engine.restore(snapshot);
            tracing::warn!(error = %e, "Rules not saved, change reverted");
            return Err(e);
        }
        Ok(value)
    }

    /// `GET /rules`: callbacks of one observable when `kind` and `name`
    /// are given, otherwise every rule.
    #[must_use]
    pub fn list(&self, kind: Option<&str>, name: Option<&str>) -> ApiResponse {
        if kind.is_none() && name.is_none() {
            return ApiResponse::ok(self.engine.lock().to_json(false, false));
        }
        let result = observable_ref(kind, name)
            .and_then(|observable| self.engine.lock().observable_callbacks_json(&observable))
            .map(ApiResponse::ok);
        result.into()
    }

    /// `POST /rules`: body `{observable: {type, name}, callback: {...}}`.
    ///
    /// Answers `201 {"id": n}`. Like `PUT` and `DELETE`, the change is
    /// undone when the rules cannot be saved.
    #[must_use]
    pub fn create(&self, body: &Value) -> ApiResponse {
        let result = self
            .change_and_save(|engine| engine.create_from_request(body))
            .map(|id| ApiResponse::created(json!({ "id": id })));
        result.into()
    }

    /// `PUT /rules`: body `{observable: {type, name}, callback: {id, ...}}`
    /// with only the fields to change.
    #[must_use]
    pub fn update(&self, body: &Value) -> ApiResponse {
        let result = self
            .change_and_save(|engine| engine.update_from_request(body))
            .map(|()| ApiResponse::ok(Value::Null));
        result.into()
    }

    /// `DELETE /rules?type=..&name=..&id=..`.
    #[must_use]
    pub fn delete(&self, kind: Option<&str>, name: Option<&str>, id: Option<&str>) -> ApiResponse {
        let result = (|| {
            let observable = observable_ref(kind, name)?;
            let id = parse_id(id.ok_or_else(|| ValidationError::missing("id"))?)?;
            self.change_and_save(|engine| engine.delete(&observable, id))?;
            Ok(ApiResponse::ok(Value::Null))
        })();
        result.into()
    }

    /// `GET /rules/templates?type=..`: field schema for building
    /// callbacks.
    #[must_use]
    pub fn templates(&self, kind: Option<&str>) -> ApiResponse {
        let result = kind
            .ok_or_else(|| ValidationError::missing("type").into())
            .and_then(|kind| kind.parse::<ObservableKind>().map_err(Error::from))
            .map(|kind| ApiResponse::ok(templates(kind, &self.actions.actions_info())));
        result.into()
    }

    /// `GET /rules/test?type=..&name=..&id=..&value=..`: runs one callback
    /// now, with `value` or the current sample.
    #[must_use]
    pub fn test(
        &self,
        kind: Option<&str>,
        name: Option<&str>,
        id: Option<&str>,
        value: Option<&str>,
    ) -> ApiResponse {
        let result = (|| {
            let observable = observable_ref(kind, name)?;
            let id = parse_id(id.ok_or_else(|| ValidationError::missing("id"))?)?;
            self.engine.lock().call_callback(&observable, id, value)?;
            Ok(ApiResponse::ok(Value::Null))
        })();
        result.into()
    }
}
