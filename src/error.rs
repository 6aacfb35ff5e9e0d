// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `SmartThing` library.
//!
//! The hierarchy mirrors the layers of the crate: rule bookkeeping
//! ([`RuleError`]), input validation ([`ValidationError`]), the persistent
//! settings store ([`StorageError`]) and local actions ([`ActionError`]).

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised while managing watchers and callbacks.
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),

    /// A rule descriptor or request field is missing or invalid.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Error raised by the persistent settings store.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Error raised while invoking a local action.
    #[error("action error: {0}")]
    Action(#[from] ActionError),

    /// A JSON document could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The outbound HTTP client could not be created.
    #[cfg(feature = "http")]
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns the HTTP status code a REST surface should answer with.
    ///
    /// Input and lookup problems map to `4xx`, storage and transport
    /// failures to `5xx`.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Rule(RuleError::ObservableNotFound { .. } | RuleError::CallbackNotFound(_)) => {
                404
            }
            Self::Rule(RuleError::ReadOnlyViolation(_)) => 403,
            Self::Rule(RuleError::DuplicateId(_) | RuleError::ObservableAlreadyExists(_)) => 409,
            Self::Rule(RuleError::IdExhausted) => 503,
            Self::Rule(RuleError::UnknownObservableType(_)) | Self::Validation(_) | Self::Json(_) => {
                400
            }
            Self::Storage(StorageError::InvalidDump(_)) => 400,
            Self::Storage(_) => 500,
            Self::Action(ActionError::NotFound(_)) => 404,
            Self::Action(ActionError::AlreadyExists(_)) => 409,
            Self::Action(ActionError::Failed { .. }) => 500,
            #[cfg(feature = "http")]
            Self::Http(_) => 502,
        }
    }
}

/// Errors related to watcher and callback bookkeeping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// No observable with this name is registered for the type class.
    #[error("{kind} observable '{name}' not found")]
    ObservableNotFound {
        /// Type class of the observable (`sensor` or `state`).
        kind: String,
        /// Name that was looked up.
        name: String,
    },

    /// An observable with this name is already registered.
    #[error("observable '{0}' already exists")]
    ObservableAlreadyExists(String),

    /// No callback with this id is attached to the observable.
    #[error("callback {0} not found")]
    CallbackNotFound(i32),

    /// A callback with this id is already attached to the observable.
    #[error("callback id {0} is already in use")]
    DuplicateId(i32),

    /// No free callback id was found within the probe budget.
    #[error("no free callback id available")]
    IdExhausted,

    /// The callback is a system callback and cannot be changed.
    #[error("callback {0} is read-only")]
    ReadOnlyViolation(i32),

    /// The observable type class is neither `sensor` nor `state`.
    #[error("unknown observable type: {0}")]
    UnknownObservableType(String),
}

/// Errors related to request and descriptor validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A field is present but its value is not acceptable.
    #[error("invalid {field}: {message}")]
    InvalidField {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::MissingField`].
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Shorthand for [`ValidationError::InvalidField`].
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the name of the field the error refers to.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField(field) | Self::InvalidField { field, .. } => field,
        }
    }
}

/// Errors related to the persistent settings store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The storage backend could not be opened.
    #[error("failed to open storage: {0}")]
    OpenFailed(String),

    /// The write would not fit into the storage.
    #[error("storage capacity exceeded: {required} bytes required, {available} available")]
    CapacityExceeded {
        /// Bytes the write needs.
        required: usize,
        /// Bytes the store can hold for it.
        available: usize,
    },

    /// The persisted header points outside the storage.
    #[error("malformed persisted data: {0}")]
    Malformed(String),

    /// Pending writes could not be committed.
    #[error("failed to commit storage: {0}")]
    CommitFailed(String),

    /// An imported dump was rejected.
    #[error("invalid settings dump: {0}")]
    InvalidDump(String),
}

/// Errors related to local actions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// No action with this name is registered.
    #[error("action '{0}' not found")]
    NotFound(String),

    /// An action with this name is already registered.
    #[error("action '{0}' already exists")]
    AlreadyExists(String),

    /// The action handler reported a failure.
    #[error("action '{name}' failed: {message}")]
    Failed {
        /// Name of the action.
        name: String,
        /// Failure reported by the handler.
        message: String,
    },
}

/// A specialized `Result` type for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_errors_map_to_client_status() {
        let not_found: Error = RuleError::CallbackNotFound(3).into();
        assert_eq!(not_found.status_code(), 404);

        let read_only: Error = RuleError::ReadOnlyViolation(-1).into();
        assert_eq!(read_only.status_code(), 403);

        let duplicate: Error = RuleError::DuplicateId(1).into();
        assert_eq!(duplicate.status_code(), 409);
    }

    #[test]
    fn storage_errors_map_to_server_status() {
        let err: Error = StorageError::CapacityExceeded {
            required: 2000,
            available: 1024,
        }
        .into();
        assert_eq!(err.status_code(), 500);

        let dump: Error = StorageError::InvalidDump("too short".into()).into();
        assert_eq!(dump.status_code(), 400);
    }

    #[test]
    fn validation_error_exposes_field() {
        let err = ValidationError::invalid("compareType", "unsupported");
        assert_eq!(err.field(), "compareType");
        assert_eq!(err.to_string(), "invalid compareType: unsupported");
        assert_eq!(ValidationError::missing("url").field(), "url");
    }
}
