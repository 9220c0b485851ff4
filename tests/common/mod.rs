//! Shared fixtures for wtfhttpd integration tests
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use wtfhttpd::server::{build_router, AppState};
use wtfhttpd::{Database, DatabaseConfig, Engine, EngineConfig, ExtensionSet};

/// Schema every test database starts with
pub const SCHEMA: &str = "
CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
INSERT INTO users (name, email) VALUES ('Ada', 'ada@example.com'), ('Grace', NULL);
";

/// A web root on disk with an engine serving it
pub struct TestSite {
    pub root: TempDir,
    pub engine: Arc<Engine>,
    _data: TempDir,
}

impl TestSite {
    /// Write `files` under a fresh web root and build the route table
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self::with_config(files, |_| {})
    }

    pub fn with_config(files: &[(&str, &str)], configure: impl FnOnce(&mut EngineConfig)) -> Self {
        let root = tempfile::tempdir().expect("failed to create web root");
        for (name, body) in files {
            write_file(root.path(), name, body);
        }

        let data = tempfile::tempdir().expect("failed to create data dir");
        let db = Database::open(
            DatabaseConfig::new(data.path().join("site.db")),
            ExtensionSet::builtin(),
        )
        .expect("failed to open database");
        db.with_connection(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .expect("failed to create schema");

        let mut config = EngineConfig::new(root.path());
        configure(&mut config);
        let engine = Engine::new(config, db).with_environment(vec![
            ("WTF_SITE".to_string(), "test".to_string()),
        ]);
        engine.rebuild_routes().expect("failed to build routes");

        Self {
            root,
            engine: Arc::new(engine),
            _data: data,
        }
    }

    pub fn router(&self) -> Router {
        build_router(AppState::new(Arc::clone(&self.engine), false))
    }

    pub fn admin_router(&self) -> Router {
        build_router(AppState::new(Arc::clone(&self.engine), true))
    }

    pub fn write(&self, name: &str, body: &str) {
        write_file(self.root.path(), name, body);
    }

    /// Run a scalar query against the site database
    pub fn scalar(&self, sql: &str) -> i64 {
        self.engine
            .database()
            .with_connection(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .expect("scalar query failed")
    }
}

fn write_file(root: &Path, name: &str, body: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create directory");
    }
    fs::write(path, body).expect("failed to write file");
}

/// Status, headers and body of a response
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("body is not JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Send one request through the router
pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.expect("request failed");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(app: Router, uri: &str) -> TestResponse {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", "example.com")
        .body(Body::empty())
        .expect("invalid request");
    send(app, request).await
}

pub async fn post(app: Router, uri: &str, content_type: &str, body: impl Into<Body>) -> TestResponse {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("host", "example.com")
        .header("content-type", content_type)
        .body(body.into())
        .expect("invalid request");
    send(app, request).await
}
