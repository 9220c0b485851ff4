//! Path-pattern compiler
//!
//! Turns a script's path relative to the content root into an HTTP method and
//! an exact-match URL pattern:
//!
//! | File | Route |
//! |------|-------|
//! | `index.get.sql` | `GET /` |
//! | `users/index.sql` | `ANY /users/` |
//! | `users/{id}.get.sql` | `GET /users/{id}/` |
//! | `about.sql` | `ANY /about/` |
//!
//! Every pattern ends in a separator followed by the end-of-path marker `{$}`,
//! so `/users/` never matches `/users/5/`.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path};

use axum::http;
use percent_encoding::percent_decode_str;
use serde::Serialize;

use crate::error::RouteError;

/// Extension of routable scripts
pub const SCRIPT_EXTENSION: &str = "sql";

/// Reserved end-of-path token
pub const END_MARKER: &str = "{$}";

/// Base filename that contributes no path segment
const INDEX_NAME: &str = "index";

/// HTTP method a route answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Any,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Method named by a filename token such as the `get` in `users.get.sql`
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "get" => Some(Method::Get),
            "post" => Some(Method::Post),
            "put" => Some(Method::Put),
            "patch" => Some(Method::Patch),
            "delete" => Some(Method::Delete),
            "options" => Some(Method::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Any => "ANY",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// True if a request with `method` may be served by this route.
    /// `GET` routes also answer `HEAD`.
    pub fn accepts(&self, method: &http::Method) -> bool {
        match self {
            Method::Any => true,
            Method::Get => method == http::Method::GET || method == http::Method::HEAD,
            Method::Post => method == http::Method::POST,
            Method::Put => method == http::Method::PUT,
            Method::Patch => method == http::Method::PATCH,
            Method::Delete => method == http::Method::DELETE,
            Method::Options => method == http::Method::OPTIONS,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of a [`PathPattern`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// Ordered literal and parameter segments, always matched exactly
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Build a pattern from raw segments, validating parameter syntax.
    /// `file` is only used in error messages.
    pub fn from_segments<'a>(
        file: &str,
        raw: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, RouteError> {
        let mut segments: Vec<Segment> = Vec::new();
        for part in raw {
            let segment = parse_segment(file, part)?;
            if let Segment::Param(name) = &segment {
                let duplicate = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(n) if n == name));
                if duplicate {
                    return Err(RouteError::invalid_name(
                        file,
                        format!("duplicate path parameter {{{}}}", name),
                    ));
                }
            }
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parameter names in left-to-right order
    pub fn param_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Pattern in host-router form, e.g. `/users/{id}/{$}`
    pub fn mux_pattern(&self) -> String {
        format!("{}{}", self, END_MARKER)
    }

    /// Identity used for collision detection; parameter names do not matter
    pub fn shape(&self) -> String {
        let mut out = String::from("/");
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(_) => out.push_str("{}"),
            }
            out.push('/');
        }
        out
    }

    /// Match a request path, returning the decoded path parameters
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let inner = path.strip_prefix('/')?;
        let inner = if self.segments.is_empty() {
            if !inner.is_empty() {
                return None;
            }
            inner
        } else {
            inner.strip_suffix('/')?
        };

        let parts: Vec<&str> = if inner.is_empty() {
            Vec::new()
        } else {
            inner.split('/').collect()
        };
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Vec::new();
        for (segment, raw) in self.segments.iter().zip(parts) {
            let decoded = percent_decode_str(raw).decode_utf8_lossy();
            match segment {
                Segment::Literal(text) => {
                    if *text != decoded {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if decoded.is_empty() {
                        return None;
                    }
                    params.push((name.clone(), decoded.into_owned()));
                }
            }
        }
        Some(params)
    }

    /// Order by specificity: at the first position where the patterns differ
    /// in kind, a literal beats a parameter.
    pub fn specificity_cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.segments.iter().zip(&other.segments) {
            match (a, b) {
                (Segment::Literal(_), Segment::Param(_)) => return Ordering::Greater,
                (Segment::Param(_), Segment::Literal(_)) => return Ordering::Less,
                _ => {}
            }
        }
        self.segments.len().cmp(&other.segments.len())
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "{}/", text)?,
                Segment::Param(name) => write!(f, "{{{}}}/", name)?,
            }
        }
        Ok(())
    }
}

fn parse_segment(file: &str, part: &str) -> Result<Segment, RouteError> {
    if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
        if inner == "$" {
            return Err(RouteError::invalid_name(
                file,
                "{$} is reserved as the end-of-path marker",
            ));
        }
        if inner.ends_with("...") {
            return Err(RouteError::invalid_name(
                file,
                format!("multi-segment parameter {{{}}} is not supported", inner),
            ));
        }
        if !is_identifier(inner) {
            return Err(RouteError::invalid_name(
                file,
                format!("invalid path parameter name {:?}", inner),
            ));
        }
        return Ok(Segment::Param(inner.to_string()));
    }
    if part.contains('{') || part.contains('}') {
        return Err(RouteError::invalid_name(
            file,
            format!("bad parameter segment {:?}", part),
        ));
    }
    Ok(Segment::Literal(part.to_string()))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Result of compiling one script path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRoute {
    pub method: Method,
    pub pattern: PathPattern,
    /// Path relative to the content root with `/` separators
    pub source_file: String,
}

/// Compile a path relative to the content root.
///
/// Returns `Ok(None)` for files that are not route scripts.
pub fn compile(relative: &Path) -> Result<Option<CompiledRoute>, RouteError> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(os) => match os.to_str() {
                Some(s) => parts.push(s),
                None => {
                    return Err(RouteError::invalid_name(
                        relative.to_string_lossy(),
                        "path is not valid UTF-8",
                    ))
                }
            },
            Component::CurDir => {}
            _ => {
                return Err(RouteError::invalid_name(
                    relative.to_string_lossy(),
                    "path must be relative to the content root",
                ))
            }
        }
    }
    let source_file = parts.join("/");

    let Some((file_name, dirs)) = parts.split_last() else {
        return Ok(None);
    };
    let Some(stem) = file_name
        .strip_suffix(SCRIPT_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
    else {
        return Ok(None);
    };

    let (method, base) = match stem.rsplit_once('.') {
        Some((base, token)) => match Method::from_token(token) {
            Some(method) => (method, base),
            None => (Method::Any, stem),
        },
        None => (Method::Any, stem),
    };

    let mut raw: Vec<&str> = dirs.to_vec();
    if !base.is_empty() && base != INDEX_NAME {
        raw.push(base);
    }
    let pattern = PathPattern::from_segments(&source_file, raw)?;

    Ok(Some(CompiledRoute {
        method,
        pattern,
        source_file,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_str(path: &str) -> CompiledRoute {
        compile(Path::new(path)).unwrap().unwrap()
    }

    #[test]
    fn test_root_index_get() {
        let route = compile_str("index.get.sql");
        assert_eq!(route.method, Method::Get);
        assert_eq!(route.pattern.to_string(), "/");
        assert_eq!(route.pattern.mux_pattern(), "/{$}");
        assert!(route.pattern.param_names().is_empty());
    }

    #[test]
    fn test_nested_index_any() {
        let route = compile_str("users/index.sql");
        assert_eq!(route.method, Method::Any);
        assert_eq!(route.pattern.to_string(), "/users/");
        assert_eq!(route.source_file, "users/index.sql");
    }

    #[test]
    fn test_param_file() {
        let route = compile_str("users/{id}.get.sql");
        assert_eq!(route.method, Method::Get);
        assert_eq!(route.pattern.to_string(), "/users/{id}/");
        assert_eq!(route.pattern.param_names(), vec!["id"]);
    }

    #[test]
    fn test_params_in_directories_keep_order() {
        let route = compile_str("orgs/{org}/members/{member}.delete.sql");
        assert_eq!(route.method, Method::Delete);
        assert_eq!(route.pattern.param_names(), vec!["org", "member"]);
        assert_eq!(route.pattern.mux_pattern(), "/orgs/{org}/members/{member}/{$}");
    }

    #[test]
    fn test_unknown_second_extension_is_part_of_name() {
        let route = compile_str("report.csv.sql");
        assert_eq!(route.method, Method::Any);
        assert_eq!(route.pattern.to_string(), "/report.csv/");
    }

    #[test]
    fn test_non_scripts_are_ignored() {
        assert_eq!(compile(Path::new("page.tpl")).unwrap(), None);
        assert_eq!(compile(Path::new("style.css")).unwrap(), None);
        assert_eq!(compile(Path::new("notes.SQL")).unwrap(), None);
    }

    #[test]
    fn test_compile_is_deterministic() {
        assert_eq!(compile_str("a/{b}/c.post.sql"), compile_str("a/{b}/c.post.sql"));
    }

    #[test]
    fn test_reserved_end_marker_rejected() {
        let err = compile(Path::new("{$}.sql")).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_bad_parameter_segments_rejected() {
        assert!(compile(Path::new("{}.sql")).is_err());
        assert!(compile(Path::new("a{b}.sql")).is_err());
        assert!(compile(Path::new("{rest...}.sql")).is_err());
        assert!(compile(Path::new("{1x}.sql")).is_err());
        assert!(compile(Path::new("{id}/{id}.sql")).is_err());
    }

    #[test]
    fn test_match_exact_only() {
        let pattern = compile_str("users/index.sql").pattern;
        assert_eq!(pattern.matches("/users/"), Some(vec![]));
        assert_eq!(pattern.matches("/users"), None);
        assert_eq!(pattern.matches("/users/5/"), None);
    }

    #[test]
    fn test_match_root() {
        let pattern = compile_str("index.sql").pattern;
        assert_eq!(pattern.matches("/"), Some(vec![]));
        assert_eq!(pattern.matches("/x/"), None);
    }

    #[test]
    fn test_match_decodes_params() {
        let pattern = compile_str("tags/{tag}.get.sql").pattern;
        assert_eq!(
            pattern.matches("/tags/hello%20world/"),
            Some(vec![("tag".to_string(), "hello world".to_string())])
        );
        assert_eq!(pattern.matches("/tags//"), None);
    }

    #[test]
    fn test_specificity_prefers_literals() {
        let literal = compile_str("users/me.sql").pattern;
        let param = compile_str("users/{id}.sql").pattern;
        assert_eq!(literal.specificity_cmp(&param), Ordering::Greater);
        assert_eq!(param.specificity_cmp(&literal), Ordering::Less);
        assert_eq!(literal.shape(), "/users/me/");
        assert_eq!(param.shape(), "/users/{}/");
    }

    #[test]
    fn test_get_accepts_head() {
        assert!(Method::Get.accepts(&http::Method::HEAD));
        assert!(!Method::Post.accepts(&http::Method::GET));
        assert!(Method::Any.accepts(&http::Method::PATCH));
    }
}
