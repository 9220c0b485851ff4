//! Response assembly
//!
//! After the last statement succeeds the assembler reads `response_meta` and
//! `response_cookies`, then renders the body: a template when `wtf-tpl` is
//! set, JSON otherwise. Everything is buffered so a render failure can still
//! roll back and answer with a clean error.
//!
//! ## JSON shape
//!
//! | Buckets | Body |
//! |---|---|
//! | none | `{}` |
//! | only `ctx` | the `ctx` rows |
//! | anything else | object of every bucket except `ctx` |

mod cookies;
mod template;

pub use cookies::{parse_expiry, read_cookies, CookieSpec, SameSite};
pub use template::{check_template_path, JinjaRenderer, TemplateRenderer};

use std::collections::BTreeMap;

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{ContextError, Result};
use crate::executor::{Buckets, ResultSet, DEFAULT_BUCKET};
use crate::value::Value;

/// `response_meta` name selecting a template
pub const TEMPLATE_KEY: &str = "wtf-tpl";
/// `response_meta` name selecting the status code
pub const STATUS_KEY: &str = "status";

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Settings a script wrote to `response_meta`
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub template: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            template: None,
            headers: Vec::new(),
        }
    }
}

impl ResponseMeta {
    pub fn read(conn: &Connection) -> Result<Self> {
        let relation = |e: rusqlite::Error| ContextError::relation("response_meta", e);
        let mut stmt = conn
            .prepare("SELECT name, value FROM temp.response_meta ORDER BY rowid")
            .map_err(relation)?;
        let mut rows = stmt.query([]).map_err(relation)?;

        let mut meta = Self::default();
        while let Some(row) = rows.next().map_err(relation)? {
            let name = Value::from_ref(row.get_ref(0).map_err(relation)?).to_string();
            let value = Value::from_ref(row.get_ref(1).map_err(relation)?).to_string();
            meta.apply(name, value);
        }
        Ok(meta)
    }

    fn apply(&mut self, name: String, value: String) {
        if name.eq_ignore_ascii_case(STATUS_KEY) {
            match value.trim().parse::<u16>() {
                Ok(code @ 100..=599) => {
                    if let Ok(status) = StatusCode::from_u16(code) {
                        self.status = status;
                    }
                }
                _ => debug!(status = %value, "Ignoring out-of-range status"),
            }
        } else if name.eq_ignore_ascii_case(TEMPLATE_KEY) {
            self.template = Some(value).filter(|v| !v.trim().is_empty());
        } else {
            self.headers.push((name, value));
        }
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct ResponsePlan {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<CookieSpec>,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl ResponsePlan {
    /// Header set by the script, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Builds a [`ResponsePlan`] from the request's relations and buckets
pub struct ResponseAssembler<'a> {
    renderer: &'a dyn TemplateRenderer,
}

impl<'a> ResponseAssembler<'a> {
    pub fn new(renderer: &'a dyn TemplateRenderer) -> Self {
        Self { renderer }
    }

    /// Must run before the transient relations are torn down.
    ///
    /// `host` is the request host, used for cookies without a domain.
    pub fn assemble(&self, conn: &Connection, buckets: &Buckets, host: Option<&str>) -> Result<ResponsePlan> {
        let meta = ResponseMeta::read(conn)?;
        let cookies = read_cookies(conn, host)?;

        let (content_type, body) = match meta.template.as_deref() {
            Some(name) => {
                let name = check_template_path(name)?;
                let html = self.renderer.render(name, buckets)?;
                (HTML_CONTENT_TYPE, Bytes::from(html))
            }
            None => (JSON_CONTENT_TYPE, Bytes::from(json_body(buckets)?)),
        };

        Ok(ResponsePlan {
            status: meta.status,
            headers: meta.headers,
            cookies,
            content_type,
            body,
        })
    }
}

/// Serialize buckets following the bucket rule, newline terminated
pub fn json_body(buckets: &Buckets) -> Result<Vec<u8>> {
    let mut body = match (buckets.len(), buckets.get(DEFAULT_BUCKET)) {
        (1, Some(ctx)) => serde_json::to_vec(ctx)?,
        _ => {
            let visible: BTreeMap<&str, &ResultSet> = buckets
                .iter()
                .filter(|(name, _)| name.as_str() != DEFAULT_BUCKET)
                .map(|(name, set)| (name.as_str(), set))
                .collect();
            serde_json::to_vec(&visible)?
        }
    };
    body.push(b'\n');
    Ok(body)
}

impl IntoResponse for ResponsePlan {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));

        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Dropping invalid response header"),
            }
        }

        for cookie in &self.cookies {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(_) => warn!(cookie = %cookie.name, "Dropping unencodable cookie"),
            }
        }
        response
    }
}
