//! Function-registration hook for SQLite connections
//!
//! Every connection the pool opens passes through [`ExtensionSet::register_all`].
//! Extensions that need shared state (a cache, an HTTP client) own it behind an
//! `Arc` and are handed to the engine at startup.

use std::sync::Arc;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::error::ABORT_MARKER;

/// A set of SQL functions installed on each new connection
pub trait Extension: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn register(&self, conn: &Connection) -> rusqlite::Result<()>;
}

/// Ordered collection of extensions applied to every pooled connection
#[derive(Clone, Default)]
pub struct ExtensionSet {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionSet {
    /// The built-in functions every deployment gets
    pub fn builtin() -> Self {
        let mut set = Self::default();
        set.add(Arc::new(AbortFunction));
        set
    }

    pub fn add(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.push(extension);
    }

    pub fn with(mut self, extension: Arc<dyn Extension>) -> Self {
        self.add(extension);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub fn register_all(&self, conn: &Connection) -> rusqlite::Result<()> {
        for extension in &self.extensions {
            extension.register(conn)?;
            tracing::trace!(extension = extension.name(), "Registered SQL extension");
        }
        Ok(())
    }
}

/// `wtf_abort(status [, message])`: fail the request with an HTTP status.
pub struct AbortFunction;

impl Extension for AbortFunction {
    fn name(&self) -> &str {
        "wtf_abort"
    }

    fn register(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.create_scalar_function(
            "wtf_abort",
            -1,
            FunctionFlags::SQLITE_UTF8,
            |ctx| -> rusqlite::Result<Option<i64>> {
                let status: i64 = ctx.get(0)?;
                let message: String = if ctx.len() > 1 {
                    ctx.get::<Option<String>>(1)?.unwrap_or_default()
                } else {
                    String::new()
                };
                Err(rusqlite::Error::UserFunctionError(
                    format!("{}{}:{}", ABORT_MARKER, status, message).into(),
                ))
            },
        )
    }
}
