//! wtfhttpd - annotated SQL files as HTTP handlers

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wtfhttpd::config::{merge_config_with_args, ConfigFile};
use wtfhttpd::{Result, Server, ServerArgs, ServerConfig, WtfError};

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("wtfhttpd failed: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let mut args = ServerArgs::parse();

    if args.generate_config {
        println!("{}", ConfigFile::generate_example());
        return Ok(());
    }

    let config_file = if let Some(ref path) = args.config {
        match ConfigFile::load(path) {
            Ok(config) => {
                eprintln!("Loaded configuration from {:?}", path);
                Some(config)
            }
            Err(e) => {
                eprintln!("Error loading configuration file: {}", e);
                return Err(e);
            }
        }
    } else {
        ConfigFile::load_default()
    };

    // CLI and environment take precedence over the file
    if let Some(ref config) = config_file {
        args = merge_config_with_args(args, config);
    }

    let log_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter)
        .init();

    if config_file.is_some() {
        info!("Configuration loaded from file");
    }

    let config = match ServerConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to create configuration");
            return Err(e);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| WtfError::server("create Tokio runtime", e.to_string()))?;

    runtime.block_on(async {
        info!(
            addr = %config.http_addr,
            web_root = %config.engine.web_root.display(),
            db = %config.database.path.display(),
            "Starting wtfhttpd"
        );
        let server = Server::new(config)?;
        server.run().await
    })
}
