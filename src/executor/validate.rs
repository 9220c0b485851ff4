//! Structural validation of request variables
//!
//! `-- @wtf-validate <field> <rules>` attaches a comma-separated rule list to
//! a field. [`SchemaValidator`] compiles each field's rules into a JSON Schema
//! and checks the variable map against it with `jsonschema`.

use jsonschema::Validator;
use serde_json::{json, Map, Value as Json};

use crate::error::{Result, ValidationFailure, WtfError};
use crate::request::VariableMap;

/// Checks variables against `(field, rules)` pairs; an empty result passes
pub trait StructuralValidator: Send + Sync {
    fn validate(
        &self,
        variables: &VariableMap,
        rules: &[(String, String)],
    ) -> Result<Vec<ValidationFailure>>;
}

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const URL_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s]+$";
const UUID_PATTERN: &str =
    r"^[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}$";
const NUMERIC_PATTERN: &str = r"^[-+]?[0-9]+(\.[0-9]+)?$";
const ALPHA_PATTERN: &str = r"^[A-Za-z]+$";
const ALPHANUM_PATTERN: &str = r"^[A-Za-z0-9]+$";

/// JSON Schema backed validator
#[derive(Debug, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    /// Schema checking a single field of the variable object
    pub fn compile_rules(field: &str, rules: &str) -> Result<Json> {
        let mut constraints = Map::new();
        let mut required = false;
        let mut patterns = Vec::new();

        for rule in rules.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let (name, arg) = match rule.split_once('=') {
                Some((name, arg)) => (name, Some(arg)),
                None => (rule, None),
            };
            match (name, arg) {
                ("required", None) => required = true,
                ("min", Some(n)) => {
                    let n = parse_bound(field, rule, n)?;
                    constraints.insert("minLength".into(), json!(n));
                    constraints.insert("minimum".into(), json!(n));
                }
                ("max", Some(n)) => {
                    let n = parse_bound(field, rule, n)?;
                    constraints.insert("maxLength".into(), json!(n));
                    constraints.insert("maximum".into(), json!(n));
                }
                ("len", Some(n)) => {
                    let n = parse_bound(field, rule, n)?;
                    constraints.insert("minLength".into(), json!(n));
                    constraints.insert("maxLength".into(), json!(n));
                }
                ("email", None) => patterns.push(EMAIL_PATTERN),
                ("url", None) => patterns.push(URL_PATTERN),
                ("uuid", None) => patterns.push(UUID_PATTERN),
                ("numeric", None) => patterns.push(NUMERIC_PATTERN),
                ("alpha", None) => patterns.push(ALPHA_PATTERN),
                ("alphanum", None) => patterns.push(ALPHANUM_PATTERN),
                ("oneof", Some(choices)) => {
                    let mut allowed: Vec<Json> = Vec::new();
                    for choice in choices.split_whitespace() {
                        allowed.push(json!(choice));
                        if let Ok(i) = choice.parse::<i64>() {
                            allowed.push(json!(i));
                        } else if let Ok(f) = choice.parse::<f64>() {
                            allowed.push(json!(f));
                        }
                    }
                    constraints.insert("enum".into(), Json::Array(allowed));
                }
                _ => {
                    return Err(WtfError::Script(format!(
                        "unknown validation rule '{}' for field '{}'",
                        rule, field
                    )))
                }
            }
        }

        if required {
            constraints.insert("not".into(), json!({ "enum": ["", null] }));
        }
        match patterns.len() {
            0 => {}
            1 => {
                constraints.insert("pattern".into(), json!(patterns[0]));
            }
            _ => {
                let all: Vec<Json> = patterns.iter().map(|p| json!({ "pattern": p })).collect();
                constraints.insert("allOf".into(), Json::Array(all));
            }
        }

        let mut properties = Map::new();
        properties.insert(field.to_string(), Json::Object(constraints));
        let mut schema = json!({
            "type": "object",
            "properties": Json::Object(properties),
        });
        if required {
            schema["required"] = json!([field]);
        }
        Ok(schema)
    }
}

fn parse_bound(field: &str, rule: &str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| {
        WtfError::Script(format!(
            "invalid validation rule '{}' for field '{}': expected a non-negative integer",
            rule, field
        ))
    })
}

impl StructuralValidator for SchemaValidator {
    fn validate(
        &self,
        variables: &VariableMap,
        rules: &[(String, String)],
    ) -> Result<Vec<ValidationFailure>> {
        let instance = variables.to_json();
        let mut failures = Vec::new();
        for (field, rule) in rules {
            let schema = Self::compile_rules(field, rule)?;
            let validator = Validator::new(&schema)
                .map_err(|e| WtfError::Script(format!("rule for field '{}': {}", field, e)))?;
            failures.extend(
                validator
                    .iter_errors(&instance)
                    .map(|e| ValidationFailure::new(field.as_str(), rule.as_str(), e.to_string())),
            );
        }
        Ok(failures)
    }
}
