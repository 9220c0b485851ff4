//! Transient request relations
//!
//! Created as `TEMP` tables inside the request transaction, populated from the
//! request, and dropped before the transaction concludes. Rolling back the
//! transaction also discards them, so a failed request never leaks tables
//! onto a pooled connection.

use rusqlite::{params, Connection};
use tracing::debug;

use super::json::{flatten, ROOT};
use super::{IncomingRequest, VariableMap, IMPLEMENTATION_MARKER};
use crate::config::EngineConfig;
use crate::error::{ContextError, Result};

/// Every relation created per request, in creation order
pub const RELATION_NAMES: &[&str] = &[
    "query_params",
    "env_vars",
    "request_meta",
    "request_headers",
    "request_form",
    "path_params",
    "request_json",
    "response_meta",
    "response_cookies",
];

const CREATE_RELATIONS: &str = "
CREATE TEMPORARY TABLE query_params (name TEXT, value TEXT);
CREATE TEMPORARY TABLE env_vars (name TEXT, value TEXT);
CREATE TEMPORARY TABLE request_meta (name TEXT, value TEXT);
CREATE TEMPORARY TABLE request_headers (name TEXT, value TEXT);
CREATE TEMPORARY TABLE request_form (name TEXT, value TEXT);
CREATE TEMPORARY TABLE path_params (name TEXT, value TEXT);
CREATE TEMPORARY TABLE request_json (path TEXT PRIMARY KEY NOT NULL, value ANY, type TEXT NOT NULL, json TEXT);
CREATE TEMPORARY TABLE response_meta (name TEXT PRIMARY KEY, value TEXT);
CREATE TEMPORARY TABLE response_cookies (
    name TEXT NOT NULL,
    value TEXT NOT NULL DEFAULT '',
    path TEXT DEFAULT '/',
    max_age INTEGER,
    expires TEXT,
    domain TEXT,
    secure INTEGER NOT NULL DEFAULT 0,
    http_only INTEGER NOT NULL DEFAULT 1,
    same_site TEXT DEFAULT 'Lax'
);
";

/// Handle to the relations created for one request
#[derive(Debug)]
pub struct TransientRelations {
    _private: (),
}

impl TransientRelations {
    /// Create every relation; fails if any already exists on this connection
    pub fn create(conn: &Connection) -> Result<Self> {
        conn.execute_batch(CREATE_RELATIONS)
            .map_err(|e| ContextError::relation("transient relations", e))?;
        Ok(Self { _private: () })
    }

    /// Drop every relation
    pub fn teardown(self, conn: &Connection) -> Result<()> {
        for name in RELATION_NAMES {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS temp.{}", name))
                .map_err(|e| ContextError::relation(*name, e))?;
        }
        Ok(())
    }
}

/// Everything derived from one request before the first statement runs
#[derive(Debug)]
pub struct RequestContext {
    pub variables: VariableMap,
    pub relations: TransientRelations,
}

impl RequestContext {
    /// Populate the relations and variable map for `request`.
    ///
    /// Must run inside an open transaction on `conn`; never commits or rolls back.
    pub fn build(
        conn: &Connection,
        request: &IncomingRequest,
        environment: &[(String, String)],
        config: &EngineConfig,
    ) -> Result<Self> {
        let relations = TransientRelations::create(conn)?;

        let query = request.query_pairs();
        let form = request.form_fields();

        insert_pairs(conn, "query_params", &query)?;
        insert_pairs(conn, "request_headers", &request.headers)?;
        let env: Vec<(String, String)> = environment
            .iter()
            .filter(|(name, _)| name.starts_with(&config.env_prefix))
            .cloned()
            .collect();
        insert_pairs(conn, "env_vars", &env)?;
        insert_pairs(conn, "path_params", &request.path_params)?;
        if request.is_urlencoded() || request.is_multipart() {
            insert_pairs(conn, "request_form", &form)?;
        }

        if config.json_body && request.is_json() && !request.body.is_empty() {
            insert_json(conn, &request.body)?;
        }

        let meta = [
            ("method".to_string(), request.method.to_string()),
            ("path".to_string(), request.path.clone()),
            (
                "remote_addr".to_string(),
                request.remote_addr.clone().unwrap_or_default(),
            ),
            ("protocol".to_string(), request.protocol.clone()),
            (
                "content_length".to_string(),
                request.content_length().to_string(),
            ),
            ("request_uri".to_string(), request.request_uri()),
            ("wtf".to_string(), IMPLEMENTATION_MARKER.to_string()),
        ];
        insert_pairs(conn, "request_meta", &meta)?;

        let variables = VariableMap::layered(&request.path_params, &form, &query);
        debug!(
            variables = variables.len(),
            headers = request.headers.len(),
            "Built request context"
        );

        Ok(Self {
            variables,
            relations,
        })
    }
}

fn insert_pairs(conn: &Connection, relation: &str, pairs: &[(String, String)]) -> Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let mut stmt = conn
        .prepare_cached(&format!(
            "INSERT INTO temp.{} (name, value) VALUES (?1, ?2)",
            relation
        ))
        .map_err(|e| ContextError::relation(relation, e))?;
    for (name, value) in pairs {
        stmt.execute(params![name, value])
            .map_err(|e| ContextError::relation(relation, e))?;
    }
    Ok(())
}

fn insert_json(conn: &Connection, body: &[u8]) -> Result<()> {
    let document: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ContextError::malformed_body(e.to_string()))?;
    let mut stmt = conn
        .prepare_cached("INSERT INTO temp.request_json (path, value, type, json) VALUES (?1, ?2, ?3, ?4)")
        .map_err(|e| ContextError::relation("request_json", e))?;
    for row in flatten(ROOT, &document) {
        stmt.execute(params![row.path, row.value, row.kind.as_str(), row.raw_json])
            .map_err(|e| ContextError::relation("request_json", e))?;
    }
    Ok(())
}
