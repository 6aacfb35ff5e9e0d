// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Enumerated option types used by callback descriptors.

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Comparison between a new value and a callback trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareOp {
    /// Equal.
    #[default]
    Eq,
    /// Not equal.
    Neq,
    /// Greater than or equal.
    Gte,
    /// Less than or equal.
    Lte,
}

impl CompareOp {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gte => "gte",
            Self::Lte => "lte",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            other => Err(ValidationError::invalid(
                "compareType",
                format!("unknown comparison '{other}'"),
            )),
        }
    }
}

/// HTTP method of an HTTP callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    /// GET.
    #[default]
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl HttpMethod {
    /// Every supported method.
    pub const ALL: [HttpMethod; 5] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
    ];

    /// Returns the method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::invalid("method", format!("unsupported method '{s}'")))
    }
}

#[cfg(feature = "http")]
impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Delete => Self::DELETE,
        }
    }
}

/// Severity of a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationSeverity {
    /// Informational.
    #[default]
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

impl NotificationSeverity {
    /// Every severity.
    pub const ALL: [NotificationSeverity; 3] = [Self::Info, Self::Warning, Self::Error];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NotificationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationSeverity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| {
                ValidationError::invalid("notificationType", format!("unknown severity '{s}'"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_op_parses_wire_names() {
        assert_eq!("gte".parse::<CompareOp>(), Ok(CompareOp::Gte));
        assert_eq!(CompareOp::Lte.to_string(), "lte");
        assert!("gt".parse::<CompareOp>().is_err());
    }

    #[test]
    fn http_method_is_case_insensitive() {
        assert_eq!("patch".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
        assert_eq!("POST".parse::<HttpMethod>(), Ok(HttpMethod::Post));
        assert_eq!(
            "HEAD".parse::<HttpMethod>().unwrap_err().field(),
            "method"
        );
    }

    #[test]
    fn severity_parses() {
        assert_eq!(
            "warning".parse::<NotificationSeverity>(),
            Ok(NotificationSeverity::Warning)
        );
        assert!("fatal".parse::<NotificationSeverity>().is_err());
    }
}
