//! Configuration merging utilities
//!
//! This module merges configuration from files with command-line arguments,
//! where CLI arguments take precedence.

use super::args::ServerArgs;
use super::defaults::*;
use super::file::ConfigFile;

/// Merge configuration file values with CLI arguments.
/// CLI arguments take precedence over config file values.
/// Only applies config file values where CLI uses defaults.
pub fn merge_config_with_args(mut args: ServerArgs, config: &ConfigFile) -> ServerArgs {
    macro_rules! apply_if_default {
        ($field:ident, $config_val:expr, $default:expr) => {
            if let Some(val) = $config_val {
                if args.$field == $default {
                    args.$field = val;
                }
            }
        };
    }

    macro_rules! apply_if_default_string {
        ($field:ident, $config_val:expr, $default:expr) => {
            if let Some(ref val) = $config_val {
                if args.$field == $default {
                    args.$field = val.clone();
                }
            }
        };
    }

    // Server section
    apply_if_default_string!(host, config.server.host, DEFAULT_HOST);
    apply_if_default!(port, config.server.port, DEFAULT_PORT);
    apply_if_default_string!(log_level, config.server.log_level, DEFAULT_LOG_LEVEL);

    // Database section
    if let Some(ref path) = config.database.path {
        if args.db == std::path::Path::new(DEFAULT_DB_PATH) {
            args.db = path.clone();
        }
    }
    apply_if_default!(pool_size, config.database.pool_size, DEFAULT_POOL_SIZE);
    apply_if_default!(
        busy_timeout_ms,
        config.database.busy_timeout_ms,
        DEFAULT_BUSY_TIMEOUT_MS
    );
    apply_if_default!(
        acquire_timeout_ms,
        config.database.acquire_timeout_ms,
        DEFAULT_ACQUIRE_TIMEOUT_MS
    );

    // Content section
    if let Some(ref root) = config.content.web_root {
        if args.web_root == std::path::Path::new(DEFAULT_WEB_ROOT) {
            args.web_root = root.clone();
        }
    }
    apply_if_default_string!(env_prefix, config.content.env_prefix, DEFAULT_ENV_PREFIX);
    if let Some(json_body) = config.content.json_body {
        if args.no_json_body == !DEFAULT_JSON_BODY {
            args.no_json_body = !json_body;
        }
    }
    apply_if_default_string!(
        blob_encoding,
        config.content.blob_encoding,
        DEFAULT_BLOB_ENCODING
    );
    apply_if_default!(
        max_body_bytes,
        config.content.max_body_bytes,
        DEFAULT_MAX_BODY_BYTES
    );

    // Admin section
    apply_if_default!(enable_admin, config.admin.enabled, DEFAULT_ENABLE_ADMIN);

    args
}
