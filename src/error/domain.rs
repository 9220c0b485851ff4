//! Domain-specific error types for wtfhttpd

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Structured route compilation error domain
///
/// Raised per file while building the route table. A bad file is skipped and
/// reported; only [`RouteError::Walk`] aborts the whole rebuild.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("{file}: {reason}")]
    InvalidName { file: String, reason: String },
    #[error("{file}: duplicate route {method} {pattern} (already registered by {existing})")]
    Duplicate {
        file: String,
        method: String,
        pattern: String,
        existing: String,
    },
    #[error("walking {path}: {reason}")]
    Walk { path: PathBuf, reason: String },
}

impl RouteError {
    pub fn invalid_name(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            file: file.into(),
            reason: reason.into(),
        }
    }

    pub fn walk(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Walk {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Source file this error refers to, if any
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::InvalidName { file, .. } | Self::Duplicate { file, .. } => Some(file),
            Self::Walk { .. } => None,
        }
    }
}

/// Structured request-context error domain
#[derive(Debug, Error, Clone)]
pub enum ContextError {
    #[error("Malformed request body: {0}")]
    MalformedBody(String),
    #[error("Error populating {relation}: {detail}")]
    Relation { relation: String, detail: String },
}

impl ContextError {
    pub fn malformed_body(detail: impl Into<String>) -> Self {
        Self::MalformedBody(detail.into())
    }

    pub fn relation(relation: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self::Relation {
            relation: relation.into(),
            detail: detail.to_string(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MalformedBody(_))
    }
}

/// One failed field check reported by a structural validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub field: String,
    pub rule: String,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(field: impl Into<String>, rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}' failed on the '{}' rule: {}",
            self.field, self.rule, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_route_display() {
        let err = RouteError::Duplicate {
            file: "users/index.sql".to_string(),
            method: "ANY".to_string(),
            pattern: "/users/".to_string(),
            existing: "users.sql".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "users/index.sql: duplicate route ANY /users/ (already registered by users.sql)"
        );
        assert_eq!(err.file(), Some("users/index.sql"));
    }

    #[test]
    fn test_validation_failure_display() {
        let failure = ValidationFailure::new("email", "email", "not an address");
        assert_eq!(
            failure.to_string(),
            "field 'email' failed on the 'email' rule: not an address"
        );
    }
}
