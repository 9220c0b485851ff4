//! Outbound cookies read from `response_cookies`

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use tracing::warn;

use crate::error::{ContextError, Result};
use crate::value::Value;

const SELECT_COOKIES: &str = "SELECT name, value, path, max_age, expires, domain, secure, http_only, same_site \
     FROM temp.response_cookies ORDER BY rowid";

/// `SameSite` attribute; unknown spellings fall back to `Lax`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// One `Set-Cookie` header
#[derive(Debug, Clone, PartialEq)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub max_age: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl CookieSpec {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: Some("/".to_string()),
            max_age: None,
            expires: None,
            domain: None,
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

impl fmt::Display for CookieSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, sanitize_value(&self.value))?;
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            write!(f, "; Path={}", path)?;
        }
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            write!(f, "; Domain={}", domain.trim_start_matches('.'))?;
        }
        if let Some(expires) = self.expires {
            write!(f, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        match self.max_age {
            Some(age) if age > 0 => write!(f, "; Max-Age={}", age)?,
            Some(age) if age < 0 => f.write_str("; Max-Age=0")?,
            _ => {}
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        write!(f, "; SameSite={}", self.same_site.as_str())
    }
}

/// Drop bytes a cookie value cannot carry; quote values with spaces or commas
fn sanitize_value(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|&c| (' '..='~').contains(&c) && c != '"' && c != ';' && c != '\\')
        .collect();
    if cleaned.contains(' ') || cleaned.contains(',') {
        format!("\"{}\"", cleaned)
    } else {
        cleaned
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}

/// Parse an expiry given as RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or unix seconds
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Integer(i) => *i != 0,
        Value::Real(r) => *r != 0.0,
        Value::Boolean(b) => *b,
        Value::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Value::Blob(b) => !b.is_empty(),
    }
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Read every row of `response_cookies`.
///
/// Rows without a domain fall back to `default_domain` (the request host).
/// Rows with an invalid name are skipped.
pub fn read_cookies(conn: &Connection, default_domain: Option<&str>) -> Result<Vec<CookieSpec>> {
    let relation = |e: rusqlite::Error| ContextError::relation("response_cookies", e);
    let mut stmt = conn.prepare(SELECT_COOKIES).map_err(relation)?;
    let mut rows = stmt.query([]).map_err(relation)?;

    let mut cookies = Vec::new();
    while let Some(row) = rows.next().map_err(relation)? {
        let cell = |i: usize| row.get_ref(i).map(Value::from_ref).map_err(relation);

        let name = cell(0)?.to_string();
        if !valid_name(&name) {
            warn!(cookie = %name, "Skipping cookie with invalid name");
            continue;
        }
        let mut cookie = CookieSpec::new(name, cell(1)?.to_string());
        cookie.path = text(cell(2)?);
        cookie.max_age = match cell(3)? {
            Value::Integer(i) => Some(i),
            Value::Real(r) => Some(r as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        };
        if let Some(raw) = text(cell(4)?).filter(|s| !s.trim().is_empty()) {
            cookie.expires = parse_expiry(&raw);
            if cookie.expires.is_none() {
                warn!(cookie = %cookie.name, expires = %raw, "Ignoring unparseable cookie expiry");
            }
        }
        cookie.domain = text(cell(5)?)
            .filter(|d| !d.is_empty())
            .or_else(|| default_domain.map(str::to_string));
        cookie.secure = truthy(&cell(6)?);
        cookie.http_only = truthy(&cell(7)?);
        cookie.same_site = text(cell(8)?)
            .map(|s| SameSite::parse(&s))
            .unwrap_or_default();
        cookies.push(cookie);
    }
    Ok(cookies)
}
