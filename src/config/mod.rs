//! Configuration module for wtfhttpd
//!
//! This module is organized into submodules:
//! - `defaults` - Default constants and values
//! - `args` - CLI argument definitions
//! - `file` - TOML configuration file
//! - `merge` - File/CLI merging

mod args;
mod defaults;
pub mod file;
mod merge;

pub use args::ServerArgs;
pub use defaults::*;
pub use file::ConfigFile;
pub use merge::merge_config_with_args;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WtfError};
use crate::value::BlobEncoding;

/// Complete server configuration.
///
/// | Field | Source flag | Default |
/// |-------|-------------|---------|
/// | `http_addr` | `--host`, `--port` | `127.0.0.1:8080` |
/// | `log_level` | `--log-level` | `info` |
/// | `admin_enabled` | `--enable-admin` | `false` |
/// | `engine` | see [`EngineConfig`] | |
/// | `database` | see [`DatabaseConfig`] | |
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub http_addr: SocketAddr,

    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,

    /// Serve the /_wtf introspection endpoints
    pub admin_enabled: bool,

    /// Request execution settings
    pub engine: EngineConfig,

    /// SQLite settings
    pub database: DatabaseConfig,
}

/// Settings consumed by the request-execution engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory walked for route scripts; templates resolve relative to it
    pub web_root: PathBuf,

    /// Environment variables with this prefix populate `env_vars`
    pub env_prefix: String,

    /// Flatten `application/json` bodies into `request_json`
    pub json_body: bool,

    /// Rendering of BLOB result cells
    pub blob_encoding: BlobEncoding,

    /// Requests with larger bodies are rejected
    pub max_body_bytes: usize,
}

impl EngineConfig {
    /// Engine settings with defaults for everything but the content root
    pub fn new(web_root: impl Into<PathBuf>) -> Self {
        Self {
            web_root: web_root.into(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            json_body: DEFAULT_JSON_BODY,
            blob_encoding: BlobEncoding::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// SQLite connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,

    /// Number of pooled connections
    pub pool_size: usize,

    /// SQLite busy timeout
    pub busy_timeout: Duration,

    /// Wait for a pooled connection before failing the request
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
        }
    }

    /// True for a private in-memory database
    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }
}

impl ServerConfig {
    /// Build and validate the configuration from parsed arguments
    pub fn from_args(args: ServerArgs) -> Result<Self> {
        let http_addr: SocketAddr = format!("{}:{}", args.host, args.port)
            .parse()
            .map_err(|e| WtfError::Config(format!("Invalid HTTP address: {}", e)))?;

        if args.web_root.as_os_str().is_empty() {
            return Err(WtfError::config("web_root", "must not be empty"));
        }
        if args.pool_size == 0 {
            return Err(WtfError::config("pool_size", "must be at least 1"));
        }
        let blob_encoding: BlobEncoding = args.blob_encoding.parse()?;

        let mut database = DatabaseConfig {
            path: args.db,
            pool_size: args.pool_size,
            busy_timeout: Duration::from_millis(args.busy_timeout_ms),
            acquire_timeout: Duration::from_millis(args.acquire_timeout_ms),
        };
        // Every in-memory connection is its own database.
        if database.is_memory() {
            database.pool_size = 1;
        }

        Ok(Self {
            http_addr,
            log_level: args.log_level,
            admin_enabled: args.enable_admin,
            engine: EngineConfig {
                web_root: args.web_root,
                env_prefix: args.env_prefix,
                json_body: !args.no_json_body,
                blob_encoding,
                max_body_bytes: args.max_body_bytes,
            },
            database,
        })
    }
}
