//! Request context: the data a route script can see
//!
//! - `variables` - named parameters bound into every statement
//! - `relations` - per-request `TEMP` tables (`query_params`, `request_json`, ...)
//! - `json` - JSON body flattening

mod json;
mod relations;
mod variables;

pub use json::{flatten, JsonRow, JsonType, ROOT as JSON_ROOT};
pub use relations::{RequestContext, TransientRelations, RELATION_NAMES};
pub use variables::VariableMap;

use axum::body::Bytes;
use axum::http::Method;

/// Marker stored in `request_meta` under the name `wtf`
pub const IMPLEMENTATION_MARKER: &str = "100%";

/// Transport-independent view of one HTTP request
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    /// Raw (still percent-encoded) path
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub protocol: String,
    pub remote_addr: Option<String>,
    /// Header name/value pairs in arrival order; names in canonical form
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Path parameters extracted by the router
    pub path_params: Vec<(String, String)>,
    /// Text fields of a multipart body, decoded by the transport
    pub multipart_fields: Vec<(String, String)>,
}

impl IncomingRequest {
    /// Request for `uri` (`/path?query`) with no headers or body
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            protocol: "HTTP/1.1".to_string(),
            remote_addr: None,
            headers: Vec::new(),
            body: Bytes::new(),
            path_params: Vec::new(),
            multipart_fields: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((canonical_header_name(name), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path_params(mut self, params: Vec<(String, String)>) -> Self {
        self.path_params = params;
        self
    }

    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_value("Content-Type")
    }

    /// Declared length, or the buffered body size when undeclared
    pub fn content_length(&self) -> i64 {
        self.header_value("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.body.len() as i64)
    }

    /// Path plus query, as sent on the request line
    pub fn request_uri(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Host header without any port
    pub fn host(&self) -> Option<&str> {
        let host = self.header_value("Host")?;
        if let Some(rest) = host.strip_prefix('[') {
            return rest.split_once(']').map(|(addr, _)| addr);
        }
        Some(host.split(':').next().unwrap_or(host))
    }

    /// Decoded query parameters in order
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match &self.query {
            Some(query) => url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.contains("application/json"))
    }

    pub fn is_urlencoded(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.starts_with("multipart/form-data"))
    }

    /// Body form fields; empty unless the body is form-encoded or multipart
    pub fn form_fields(&self) -> Vec<(String, String)> {
        if self.is_urlencoded() {
            url::form_urlencoded::parse(&self.body).into_owned().collect()
        } else if self.is_multipart() {
            self.multipart_fields.clone()
        } else {
            Vec::new()
        }
    }
}

/// Canonical MIME header form: `content-type` becomes `Content-Type`
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
