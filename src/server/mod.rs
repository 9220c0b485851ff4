//! HTTP server for wtfhttpd
//!
//! [`Server`] opens the engine from a [`ServerConfig`] and serves it with
//! axum until a shutdown signal arrives.

pub mod http;
mod shutdown;

pub use http::{build_router, incoming_request, start_http_server, AppState};
pub use shutdown::shutdown_signal;

use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::db::ExtensionSet;
use crate::engine::Engine;
use crate::error::Result;

/// A configured engine bound to its listen address
pub struct Server {
    config: ServerConfig,
    engine: Arc<Engine>,
}

impl Server {
    /// Open the database and build the first route table
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_extensions(config, ExtensionSet::builtin())
    }

    /// Like [`Server::new`] with extra SQL functions on every connection
    pub fn with_extensions(config: ServerConfig, extensions: ExtensionSet) -> Result<Self> {
        info!(extensions = ?extensions.names(), "Opening engine");
        let engine = Arc::new(Engine::open(&config, extensions)?);
        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let state = AppState::new(Arc::clone(&self.engine), self.config.admin_enabled);
        start_http_server(self.config.http_addr, state).await?;
        info!("Server stopped");
        Ok(())
    }
}
