#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # wtfhttpd
//!
//! Serve a directory of annotated SQL files as HTTP handlers over an embedded
//! SQLite database.
//!
//! ## How a request is served
//!
//! - The file tree under the web root is compiled into a route table:
//!   `users/{id}.get.sql` answers `GET /users/{id}/`, `users/index.sql`
//!   answers any method on `/users/`.
//! - Each request runs in one transaction. Request data is exposed as
//!   temporary tables (`query_params`, `request_headers`, `request_json`, ...)
//!   and as `:name` parameters.
//! - Statements run in order. `-- @wtf-store`, `-- @wtf-validate` and
//!   `-- @wtf-capture` comments control where results go.
//! - Scripts shape the response by writing to `response_meta` (status,
//!   headers, `wtf-tpl` template) and `response_cookies`.
//!
//! ```sql
//! -- users/{id}.get.sql
//! -- @wtf-validate id required,numeric
//! -- @wtf-store user
//! SELECT id, name FROM users WHERE id = :id;
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve ./webroot with wtf.db on 127.0.0.1:8080
//! $ ./wtfhttpd
//!
//! # Custom root and port, with the /_wtf endpoints
//! $ ./wtfhttpd --web-root site --port 3000 --enable-admin
//! ```
//!
//! ## Library Usage
//!
//! ```no_run
//! use wtfhttpd::{CancelFlag, Database, DatabaseConfig, Engine, EngineConfig, ExtensionSet};
//! use wtfhttpd::{Dispatch, IncomingRequest};
//! use axum::http::Method;
//!
//! fn main() -> wtfhttpd::Result<()> {
//!     let db = Database::open(DatabaseConfig::new("app.db"), ExtensionSet::builtin())?;
//!     let engine = Engine::new(EngineConfig::new("webroot"), db);
//!     engine.rebuild_routes()?;
//!
//!     let request = IncomingRequest::new(Method::GET, "/hello/?name=Ada");
//!     if let Dispatch::Handled(plan) = engine.dispatch(request, &CancelFlag::new())? {
//!         println!("{} {:?}", plan.status, plan.body);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod request;
pub mod response;
pub mod routing;
pub mod script;
pub mod server;
pub mod value;

pub use config::{DatabaseConfig, EngineConfig, ServerArgs, ServerConfig};
pub use db::{CancelFlag, Database, Extension, ExtensionSet};
pub use engine::{Dispatch, Engine};
pub use error::{Result, WtfError};
pub use executor::{Buckets, ResultSet, SchemaValidator, StructuralValidator};
pub use request::{IncomingRequest, VariableMap};
pub use response::{JinjaRenderer, ResponsePlan, TemplateRenderer};
pub use routing::{Method, RouteEntry, RouteTable};
pub use server::Server;
pub use value::{BlobEncoding, Value};
