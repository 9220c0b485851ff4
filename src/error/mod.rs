//! Error types for wtfhttpd
//!
//! This module defines the main error type used throughout the engine and maps
//! every failure onto exactly one HTTP status, so the dispatch layer can turn
//! any error into a plain-text response without inspecting it further.

use axum::http::StatusCode;
use thiserror::Error;

mod domain;

pub use domain::{ContextError, RouteError, ValidationFailure};

/// Result type alias for wtfhttpd operations
pub type Result<T> = std::result::Result<T, WtfError>;

/// Main error type for wtfhttpd
#[derive(Error, Debug)]
pub enum WtfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("Validation failed: {}", format_failures(.0))]
    Validation(Vec<ValidationFailure>),

    #[error("Error executing SQL (statement {index}): {message}")]
    Statement { index: usize, message: String },

    #[error("{message}")]
    Abort { status: u16, message: String },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid template path: {0}")]
    TemplatePath(String),

    #[error("Error rendering template: {0}")]
    Template(String),

    #[error("Error committing transaction: {0}")]
    Commit(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool exhausted after {0}ms")]
    PoolExhausted(u64),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(String),
}

fn format_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl WtfError {
    /// Create a configuration error for a specific setting
    pub fn config(setting: &str, reason: impl Into<String>) -> Self {
        WtfError::Config(format!("{}: {}", setting, reason.into()))
    }

    /// Create a server error with operation context
    pub fn server(operation: &str, detail: impl Into<String>) -> Self {
        WtfError::Server(format!("{}: {}", operation, detail.into()))
    }

    /// Wrap an engine error raised while running statement `index`.
    ///
    /// Messages carrying the `HTTP_ERROR:<status>[:<message>]` marker become
    /// [`WtfError::Abort`] so scripts can choose their own failure status.
    pub fn statement(index: usize, err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi, _) = &err {
            if ffi.code == rusqlite::ErrorCode::OperationInterrupted {
                return WtfError::Cancelled;
            }
        }
        let message = err.to_string();
        match parse_abort(&message) {
            Some((status, detail)) => WtfError::Abort {
                status,
                message: detail,
            },
            None => WtfError::Statement { index, message },
        }
    }

    /// Map this error to the HTTP status returned to the client
    pub fn status_code(&self) -> StatusCode {
        match self {
            WtfError::Context(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            WtfError::Validation(_) | WtfError::TemplatePath(_) => StatusCode::BAD_REQUEST,
            WtfError::Abort { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            WtfError::PoolExhausted(_) | WtfError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            WtfError::Io(_)
            | WtfError::Config(_)
            | WtfError::Route(_)
            | WtfError::Context(_)
            | WtfError::Statement { .. }
            | WtfError::Script(_)
            | WtfError::Template(_)
            | WtfError::Commit(_)
            | WtfError::Database(_)
            | WtfError::Serialization(_)
            | WtfError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true if the failure was caused by the request rather than the server
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Marker prefix recognised in engine error messages
pub const ABORT_MARKER: &str = "HTTP_ERROR:";

/// Extract `(status, message)` from an engine message carrying [`ABORT_MARKER`].
fn parse_abort(message: &str) -> Option<(u16, String)> {
    let start = message.find(ABORT_MARKER)?;
    let rest = &message[start + ABORT_MARKER.len()..];
    let (code, detail) = match rest.split_once(':') {
        Some((code, detail)) => (code, detail.trim().to_string()),
        None => (rest, String::new()),
    };
    let status: u16 = code.trim().parse().ok()?;
    if !(100..=599).contains(&status) {
        return None;
    }
    let detail = if detail.is_empty() {
        StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Request aborted")
            .to_string()
    } else {
        detail
    };
    Some((status, detail))
}
