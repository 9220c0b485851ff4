//! Route table: built by walking the content root, then read-only
//!
//! A table is never modified after [`RouteTable::build`] returns. Reloading
//! builds a fresh table and publishes it in one pointer swap.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::http;
use serde::Serialize;
use tracing::{debug, warn};

use super::pattern::{self, Method, PathPattern};
use crate::error::{Result, RouteError};

/// A compiled, dispatchable route
#[derive(Debug)]
pub struct Route {
    pub method: Method,
    pub pattern: PathPattern,
    /// Path relative to the content root with `/` separators
    pub source_file: String,
    /// Script text read at build time
    pub script: Arc<str>,
}

impl Route {
    pub fn param_names(&self) -> Vec<&str> {
        self.pattern.param_names()
    }

    pub fn entry(&self) -> RouteEntry {
        RouteEntry {
            method: self.method,
            pattern: self.pattern.to_string(),
            file: self.source_file.clone(),
        }
    }
}

/// Enumeration record for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub method: Method,
    pub pattern: String,
    pub file: String,
}

/// Outcome of looking up a request
#[derive(Debug)]
pub enum RouteMatch {
    Found {
        route: Arc<Route>,
        params: Vec<(String, String)>,
    },
    /// The path only matches with a trailing separator
    Redirect(String),
    /// The path matches but no route accepts the method
    MethodNotAllowed(Vec<&'static str>),
    NotFound,
}

/// Immutable set of routes plus the files rejected while building it
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    rejected: Vec<RouteError>,
}

impl RouteTable {
    /// Walk `root` and compile every route script below it.
    ///
    /// Badly named or colliding files are skipped and kept in [`Self::rejected`].
    /// A walk or read failure aborts the build.
    pub fn build(root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        walk(root, root, &mut files)?;
        files.sort();

        let mut table = RouteTable::default();
        let mut seen: HashMap<(Method, String), String> = HashMap::new();

        for relative in files {
            let compiled = match pattern::compile(Path::new(&relative)) {
                Ok(Some(compiled)) => compiled,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Skipping route file");
                    table.rejected.push(e);
                    continue;
                }
            };

            let key = (compiled.method, compiled.pattern.shape());
            if let Some(existing) = seen.get(&key) {
                let err = RouteError::Duplicate {
                    file: compiled.source_file.clone(),
                    method: compiled.method.to_string(),
                    pattern: compiled.pattern.to_string(),
                    existing: existing.clone(),
                };
                warn!(error = %err, "Skipping route file");
                table.rejected.push(err);
                continue;
            }

            let bytes = fs::read(root.join(&relative))
                .map_err(|e| RouteError::walk(root.join(&relative), e))?;
            let script = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let err = RouteError::invalid_name(&compiled.source_file, "script is not valid UTF-8");
                    warn!(error = %err, "Skipping route file");
                    table.rejected.push(err);
                    continue;
                }
            };

            debug!(
                method = %compiled.method,
                pattern = %compiled.pattern,
                file = %compiled.source_file,
                "Registered route"
            );
            seen.insert(key, compiled.source_file.clone());
            table.routes.push(Arc::new(Route {
                method: compiled.method,
                pattern: compiled.pattern,
                source_file: compiled.source_file,
                script: Arc::from(script),
            }));
        }

        Ok(table)
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn rejected(&self) -> &[RouteError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `(method, pattern, source file)` for every route, in build order
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.routes.iter().map(|r| r.entry()).collect()
    }

    /// Find the route serving `method` and `path`.
    ///
    /// Among matching routes the most specific pattern wins, then a
    /// method-specific route beats an `ANY` route.
    pub fn lookup(&self, method: &http::Method, path: &str) -> RouteMatch {
        let candidates: Vec<(&Arc<Route>, Vec<(String, String)>)> = self
            .routes
            .iter()
            .filter_map(|route| route.pattern.matches(path).map(|params| (route, params)))
            .collect();

        if candidates.is_empty() {
            if !path.ends_with('/') {
                let with_slash = format!("{}/", path);
                if self.routes.iter().any(|r| r.pattern.matches(&with_slash).is_some()) {
                    return RouteMatch::Redirect(with_slash);
                }
            }
            return RouteMatch::NotFound;
        }

        let best = candidates
            .iter()
            .filter(|(route, _)| route.method.accepts(method))
            .max_by(|(a, _), (b, _)| {
                a.pattern
                    .specificity_cmp(&b.pattern)
                    .then_with(|| (a.method != Method::Any).cmp(&(b.method != Method::Any)))
            });

        match best {
            Some((route, params)) => RouteMatch::Found {
                route: Arc::clone(route),
                params: params.clone(),
            },
            None => {
                let mut allowed: Vec<&'static str> = Vec::new();
                for (route, _) in &candidates {
                    allowed.push(route.method.as_str());
                    if route.method == Method::Get {
                        allowed.push("HEAD");
                    }
                }
                allowed.sort_unstable();
                allowed.dedup();
                RouteMatch::MethodNotAllowed(allowed)
            }
        }
    }
}

/// Collect file paths below `dir`, relative to `root`, with `/` separators
fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::result::Result<(), RouteError> {
    let entries = fs::read_dir(dir).map_err(|e| RouteError::walk(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| RouteError::walk(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| RouteError::walk(&path, e))?;
        // Symlinked directories are not descended; symlinked files resolve to their target
        let is_file = if file_type.is_symlink() {
            fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false)
        } else {
            file_type.is_file()
        };
        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if is_file {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| RouteError::walk(&path, e))?;
            out.push(
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
    }
    Ok(())
}
