//! Template rendering for routes that set `wtf-tpl`

use std::path::{Component, Path, PathBuf};

use minijinja::Environment;

use crate::error::{Result, WtfError};
use crate::executor::Buckets;

/// Renders a template with the request's buckets as context
pub trait TemplateRenderer: Send + Sync {
    /// `name` is relative to the content root and already checked by
    /// [`check_template_path`]
    fn render(&self, name: &str, context: &Buckets) -> Result<String>;
}

/// Reject absolute names and names with a `..` segment
pub fn check_template_path(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(WtfError::TemplatePath("empty template name".to_string()));
    }
    let path = Path::new(trimmed);
    let escapes = trimmed.starts_with('/')
        || trimmed.starts_with('\\')
        || path.is_absolute()
        || trimmed.split(['/', '\\']).any(|segment| segment == "..")
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(WtfError::TemplatePath(trimmed.to_string()));
    }
    Ok(trimmed)
}

/// Jinja-syntax templates loaded from the content root.
///
/// Templates are read on every render, so edits show up without a rebuild.
/// Files ending in `.html` are auto-escaped.
#[derive(Debug, Clone)]
pub struct JinjaRenderer {
    root: PathBuf,
}

impl JinjaRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateRenderer for JinjaRenderer {
    fn render(&self, name: &str, context: &Buckets) -> Result<String> {
        let name = check_template_path(name)?;
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(&self.root));
        let template = env
            .get_template(name)
            .map_err(|e| WtfError::Template(format!("{}: {}", name, e)))?;
        template
            .render(context)
            .map_err(|e| WtfError::Template(format!("{}: {}", name, e)))
    }
}
