//! Configuration file support for wtfhttpd
//!
//! This module provides TOML configuration file parsing. Values from the file
//! are merged under command-line arguments by [`super::merge_config_with_args`].
//!
//! ## Priority Order
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values
//!
//! ## Example Configuration
//!
//! ```toml
//! # wtf.toml
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! log_level = "info"
//!
//! [database]
//! path = "wtf.db"
//! pool_size = 4
//!
//! [content]
//! web_root = "webroot"
//! env_prefix = "WTF_"
//! json_body = true
//!
//! [admin]
//! enabled = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::defaults::DEFAULT_CONFIG_FILE;
use crate::error::{Result, WtfError};

/// Root configuration structure for TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Listener configuration
    pub server: ServerSection,

    /// SQLite configuration
    pub database: DatabaseSection,

    /// Content root and request handling
    pub content: ContentSection,

    /// Introspection endpoints
    pub admin: AdminSection,
}

/// Server section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Interface to bind
    pub host: Option<String>,

    /// HTTP port
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Database section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// SQLite database file
    pub path: Option<PathBuf>,

    /// Number of pooled connections
    pub pool_size: Option<usize>,

    /// Busy timeout in milliseconds
    pub busy_timeout_ms: Option<u64>,

    /// Wait for a pooled connection in milliseconds
    pub acquire_timeout_ms: Option<u64>,
}

/// Content section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSection {
    /// Directory holding route scripts and templates
    pub web_root: Option<PathBuf>,

    /// Environment variable prefix filter
    pub env_prefix: Option<String>,

    /// Flatten JSON request bodies into `request_json`
    pub json_body: Option<bool>,

    /// BLOB rendering ("text" or "base64")
    pub blob_encoding: Option<String>,

    /// Maximum accepted request body size in bytes
    pub max_body_bytes: Option<usize>,
}

/// Admin section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    /// Serve the /_wtf endpoints
    pub enabled: Option<bool>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WtfError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            WtfError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Try to load `wtf.toml` from the working directory
    pub fn load_default() -> Option<Self> {
        let path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !path.exists() {
            return None;
        }
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to load config from {:?}: {}", path, e);
                None
            }
        }
    }

    /// Generate an example configuration file
    pub fn generate_example() -> String {
        r#"# wtfhttpd configuration file
# Copy to wtf.toml and customize as needed
#
# Configuration priority (highest to lowest):
# 1. Command-line arguments
# 2. Environment variables (WTF_*)
# 3. This configuration file
# 4. Default values

[server]
host = "127.0.0.1"
port = 8080

# Log level (trace, debug, info, warn, error)
log_level = "info"

[database]
# SQLite database file (":memory:" for a private in-memory database)
path = "wtf.db"
pool_size = 4
busy_timeout_ms = 5000
acquire_timeout_ms = 10000

[content]
# Directory of route scripts (*.sql) and templates
web_root = "webroot"

# Only variables starting with this prefix are visible in env_vars
env_prefix = "WTF_"

# Flatten application/json bodies into request_json
json_body = true

# BLOB cells in results: "text" (lossy UTF-8) or "base64"
blob_encoding = "text"

max_body_bytes = 2097152

[admin]
# Serve /_wtf/health, /_wtf/routes and /_wtf/reload
enabled = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.server.host.is_none());
        assert!(config.content.web_root.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
            [server]
            port = 9090

            [database]
            path = "/var/lib/wtf/site.db"

            [content]
            web_root = "site"
            json_body = false
        "#;
        let config: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, Some(9090));
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/wtf/site.db"))
        );
        assert_eq!(config.content.web_root, Some(PathBuf::from("site")));
        assert_eq!(config.content.json_body, Some(false));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wtf.toml");
        std::fs::write(&path, "[server\nport = 1").unwrap();
        let err = ConfigFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_generate_example_is_valid_toml() {
        let example = ConfigFile::generate_example();
        let config: ConfigFile = toml::from_str(&example).unwrap();
        assert_eq!(config.server.port, Some(8080));
        assert_eq!(config.content.env_prefix, Some("WTF_".to_string()));
        assert_eq!(config.admin.enabled, Some(false));
    }
}
