//! Command-line arguments for the wtfhttpd server
//!
//! This module defines the CLI arguments structure using clap.

use clap::{CommandFactory, Parser};
use std::path::PathBuf;

use super::defaults::*;

/// Command-line arguments for the wtfhttpd server
#[derive(Parser, Debug, Clone)]
#[command(name = "wtfhttpd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve a directory of annotated SQL files as HTTP handlers")]
pub struct ServerArgs {
    /// Path to configuration file (TOML format)
    /// If not specified, looks for wtf.toml in the current directory
    #[arg(short, long, env = "WTF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Generate example configuration file and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Interface to bind the HTTP listener to
    #[arg(long, env = "WTF_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// HTTP port
    #[arg(short, long, env = "WTF_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SQLite database file (":memory:" for a private in-memory database)
    #[arg(long, env = "WTF_DB", default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Directory holding route scripts and templates
    #[arg(long, env = "WTF_WEB_ROOT", default_value = DEFAULT_WEB_ROOT)]
    pub web_root: PathBuf,

    /// Only environment variables starting with this prefix are exposed in `env_vars`
    #[arg(long, env = "WTF_ENV_PREFIX", default_value = DEFAULT_ENV_PREFIX)]
    pub env_prefix: String,

    /// Do not flatten JSON request bodies into `request_json`
    #[arg(long, env = "WTF_NO_JSON_BODY")]
    pub no_json_body: bool,

    /// How BLOB result cells are rendered: "text" (lossy UTF-8) or "base64"
    #[arg(long, env = "WTF_BLOB_ENCODING", default_value = DEFAULT_BLOB_ENCODING)]
    pub blob_encoding: String,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "WTF_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Number of pooled SQLite connections
    #[arg(long, env = "WTF_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// SQLite busy timeout in milliseconds
    #[arg(long, env = "WTF_BUSY_TIMEOUT_MS", default_value_t = DEFAULT_BUSY_TIMEOUT_MS)]
    pub busy_timeout_ms: u64,

    /// How long a request waits for a pooled connection, in milliseconds
    #[arg(long, env = "WTF_ACQUIRE_TIMEOUT_MS", default_value_t = DEFAULT_ACQUIRE_TIMEOUT_MS)]
    pub acquire_timeout_ms: u64,

    /// Serve the /_wtf introspection endpoints (route listing, reload)
    #[arg(long, env = "WTF_ENABLE_ADMIN")]
    pub enable_admin: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WTF_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

impl ServerArgs {
    /// Environment variables the server reads its own settings from
    pub fn setting_env_names() -> Vec<String> {
        Self::command()
            .get_arguments()
            .filter_map(|arg| arg.get_env())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            config: None,
            generate_config: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: PathBuf::from(DEFAULT_DB_PATH),
            web_root: PathBuf::from(DEFAULT_WEB_ROOT),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            no_json_body: !DEFAULT_JSON_BODY,
            blob_encoding: DEFAULT_BLOB_ENCODING.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            enable_admin: DEFAULT_ENABLE_ADMIN,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}
