//! Default constants for wtfhttpd configuration
//!
//! These constants define the default values used throughout the configuration
//! system when no explicit value is provided.

/// Default interface to bind
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Default SQLite database file
pub const DEFAULT_DB_PATH: &str = "wtf.db";

/// Default content root holding route scripts and templates
pub const DEFAULT_WEB_ROOT: &str = "webroot";

/// Default prefix selecting which environment variables reach `env_vars`
pub const DEFAULT_ENV_PREFIX: &str = "WTF_";

/// Default for flattening JSON request bodies into `request_json`
pub const DEFAULT_JSON_BODY: bool = true;

/// Default BLOB cell encoding ("text" or "base64")
pub const DEFAULT_BLOB_ENCODING: &str = "text";

/// Default maximum request body size (2 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Default number of pooled SQLite connections
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default SQLite busy timeout in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default time to wait for a pooled connection in milliseconds
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default for serving the `/_wtf` introspection endpoints
pub const DEFAULT_ENABLE_ADMIN: bool = false;

/// Default configuration file name searched in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "wtf.toml";
