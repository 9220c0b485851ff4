//! Statement executor
//!
//! Runs a parsed script statement by statement inside the caller's
//! transaction. Each statement:
//!
//! 1. checks its `validate` directives against the variable map
//! 2. executes with every `:name` parameter bound from the variable map
//! 3. stores its rows in a bucket (`store <name>`, else `ctx`), replacing
//!    whatever an earlier statement put there
//! 4. applies its `capture` directives to the variable map
//!
//! The first failure aborts the run. The caller owns the transaction and is
//! responsible for rolling it back.

mod results;
mod validate;

pub use results::{Buckets, ResultSet, DEFAULT_BUCKET};
pub use validate::{SchemaValidator, StructuralValidator};

use std::time::Instant;

use rusqlite::Connection;
use tracing::debug;

use crate::db::CancelFlag;
use crate::error::{Result, WtfError};
use crate::request::VariableMap;
use crate::script::{DirectiveKind, ParsedStatement};
use crate::value::{BlobEncoding, Value};

/// Second `capture` parameter selecting scalar mode
const CAPTURE_SINGLE: &str = "single";

/// Executes parsed statements against one connection
pub struct StatementExecutor<'a> {
    conn: &'a Connection,
    validator: &'a dyn StructuralValidator,
    blob_encoding: BlobEncoding,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> StatementExecutor<'a> {
    pub fn new(
        conn: &'a Connection,
        validator: &'a dyn StructuralValidator,
        blob_encoding: BlobEncoding,
    ) -> Self {
        Self {
            conn,
            validator,
            blob_encoding,
            cancel: None,
        }
    }

    /// Stop between statements once `flag` is set
    pub fn with_cancel(mut self, flag: &'a CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run every statement in order, returning the final buckets
    pub fn run(&self, statements: &[ParsedStatement], variables: &mut VariableMap) -> Result<Buckets> {
        let mut buckets = Buckets::new();
        for (index, statement) in statements.iter().enumerate() {
            self.run_statement(index, statement, variables, &mut buckets)?;
        }
        Ok(buckets)
    }

    fn run_statement(
        &self,
        index: usize,
        statement: &ParsedStatement,
        variables: &mut VariableMap,
        buckets: &mut Buckets,
    ) -> Result<()> {
        if self.cancel.is_some_and(CancelFlag::is_cancelled) {
            return Err(WtfError::Cancelled);
        }

        let rules = validation_rules(statement);
        if !rules.is_empty() {
            let failures = self.validator.validate(variables, &rules)?;
            if !failures.is_empty() {
                return Err(WtfError::Validation(failures));
            }
        }

        let store = statement
            .directives_of(DirectiveKind::Store)
            .find_map(|d| d.param(0));

        let result = if statement.is_noop() {
            ResultSet::default()
        } else {
            let start = Instant::now();
            let result = self.execute(index, &statement.text, variables)?;
            debug!(
                statement = index,
                rows = result.len(),
                bucket = store.unwrap_or(DEFAULT_BUCKET),
                elapsed_us = start.elapsed().as_micros() as u64,
                "Executed statement"
            );
            result
        };

        for capture in statement.directives_of(DirectiveKind::Capture) {
            let Some(name) = capture.param(0) else {
                return Err(WtfError::Script(format!(
                    "statement {}: capture directive needs a variable name",
                    index
                )));
            };
            let value = if capture.param(1) == Some(CAPTURE_SINGLE) {
                result.scalar()
            } else {
                Value::Text(serde_json::to_string(&result)?)
            };
            variables.set(name, value);
        }

        match store {
            Some(bucket) => {
                buckets.insert(bucket.to_string(), result);
            }
            None if !statement.is_noop() => {
                buckets.insert(DEFAULT_BUCKET.to_string(), result);
            }
            None => {}
        }
        Ok(())
    }

    /// Execute one SQL statement with named parameters bound from `variables`
    pub fn execute(&self, index: usize, sql: &str, variables: &VariableMap) -> Result<ResultSet> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| WtfError::statement(index, e))?;

        let names: Vec<Option<String>> = (1..=stmt.parameter_count())
            .map(|i| stmt.parameter_name(i).map(str::to_string))
            .collect();
        for (i, name) in names.iter().enumerate() {
            let position = i + 1;
            let name = match name {
                Some(name) if !name.starts_with('?') => name,
                _ => {
                    return Err(WtfError::Statement {
                        index,
                        message: format!(
                            "positional parameter {} is not supported; use :name",
                            position
                        ),
                    })
                }
            };
            let value = variables.get(&name[1..]).ok_or_else(|| WtfError::Statement {
                index,
                message: format!("missing named parameter {}", name),
            })?;
            stmt.raw_bind_parameter(position, value)
                .map_err(|e| WtfError::statement(index, e))?;
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();
        let mut result = ResultSet::new(columns);

        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next().map_err(|e| WtfError::statement(index, e))? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let cell = row.get_ref(i).map_err(|e| WtfError::statement(index, e))?;
                cells.push(Value::from_ref(cell).coerce_blob(self.blob_encoding));
            }
            result.rows.push(cells);
        }
        Ok(result)
    }
}

/// `(field, rules)` pairs from the statement's `validate` directives
fn validation_rules(statement: &ParsedStatement) -> Vec<(String, String)> {
    statement
        .directives_of(DirectiveKind::Validate)
        .filter_map(|d| {
            let field = d.param(0)?;
            Some((field.to_string(), d.params[1..].join(" ")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_script;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, avatar BLOB);
             INSERT INTO users (name, avatar) VALUES ('Ada', x'6869'), ('Linus', NULL);",
        )
        .unwrap();
        conn
    }

    fn run(conn: &Connection, script: &str, variables: &mut VariableMap) -> Result<Buckets> {
        let validator = SchemaValidator::new();
        StatementExecutor::new(conn, &validator, BlobEncoding::Text)
            .run(&parse_script(script), variables)
    }

    fn json(buckets: &Buckets) -> serde_json::Value {
        serde_json::to_value(buckets).unwrap()
    }

    #[test]
    fn test_default_bucket_and_binding() {
        let conn = conn();
        let mut vars = VariableMap::new();
        vars.set("name", Value::from("Ada"));
        let buckets = run(&conn, "SELECT :name AS greeting;", &mut vars).unwrap();
        assert_eq!(json(&buckets), serde_json::json!({"ctx": [{"greeting": "Ada"}]}));
    }

    #[test]
    fn test_store_overwrites_same_bucket() {
        let conn = conn();
        let script = "-- @wtf-store users\nSELECT name FROM users ORDER BY id;\n\
                      -- @wtf-store users\nSELECT name FROM users WHERE id = 2;";
        let buckets = run(&conn, script, &mut VariableMap::new()).unwrap();
        assert_eq!(json(&buckets), serde_json::json!({"users": [{"name": "Linus"}]}));
    }

    #[test]
    fn test_capture_single_and_set() {
        let conn = conn();
        let script = "-- @wtf-capture uid single\nSELECT id FROM users WHERE name = 'Linus';\n\
                      -- @wtf-capture names\nSELECT name FROM users ORDER BY id;\n\
                      -- @wtf-store out\nSELECT :uid AS uid, :names AS names;";
        let mut vars = VariableMap::new();
        let buckets = run(&conn, script, &mut vars).unwrap();
        assert_eq!(vars.get("uid"), Some(&Value::Integer(2)));
        assert_eq!(
            buckets["out"].get(0, "names"),
            Some(&Value::from(r#"[{"name":"Ada"},{"name":"Linus"}]"#))
        );
        assert_eq!(buckets["out"].get(0, "uid"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_capture_single_on_empty_result_is_null() {
        let conn = conn();
        let script = "-- @wtf-capture uid single\nSELECT id FROM users WHERE name = 'nobody';";
        let mut vars = VariableMap::new();
        run(&conn, script, &mut vars).unwrap();
        assert_eq!(vars.get("uid"), Some(&Value::Null));
    }

    #[test]
    fn test_blob_coerced_to_text() {
        let conn = conn();
        let buckets = run(&conn, "SELECT avatar FROM users WHERE id = 1;", &mut VariableMap::new()).unwrap();
        assert_eq!(buckets["ctx"].scalar(), Value::from("hi"));

        let validator = SchemaValidator::new();
        let result = StatementExecutor::new(&conn, &validator, BlobEncoding::Base64)
            .execute(0, "SELECT avatar FROM users WHERE id = 1", &VariableMap::new())
            .unwrap();
        assert_eq!(result.scalar(), Value::from("aGk="));
    }

    #[test]
    fn test_validation_failure_stops_before_sql() {
        let conn = conn();
        let script = "-- @wtf-validate name required,min=2\nINSERT INTO users (name) VALUES (:name);";
        let mut vars = VariableMap::new();
        vars.set("name", Value::from("A"));
        let err = run(&conn, script, &mut vars).unwrap_err();
        assert!(matches!(err, WtfError::Validation(ref f) if f.len() == 1));
        let count: i64 = conn
            .query_row("SELECT count(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_missing_parameter_is_statement_error() {
        let conn = conn();
        let err = run(&conn, "SELECT :nope;", &mut VariableMap::new()).unwrap_err();
        match err {
            WtfError::Statement { index, message } => {
                assert_eq!(index, 0);
                assert!(message.contains(":nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_positional_parameter_rejected() {
        let conn = conn();
        let err = run(&conn, "SELECT ?;", &mut VariableMap::new()).unwrap_err();
        assert!(matches!(err, WtfError::Statement { .. }));
    }

    #[test]
    fn test_sql_error_surfaces_index_and_message() {
        let conn = conn();
        let err = run(&conn, "SELECT 1;\nSELECT * FROM missing;", &mut VariableMap::new()).unwrap_err();
        match err {
            WtfError::Statement { index, message } => {
                assert_eq!(index, 1);
                assert!(message.contains("no such table"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_directive_only_statement_is_noop() {
        let conn = conn();
        let script = "SELECT 1 AS one;\n-- @wtf-validate id required\n;";
        let mut vars = VariableMap::new();
        vars.set("id", Value::from("5"));
        let buckets = run(&conn, script, &mut vars).unwrap();
        assert_eq!(json(&buckets), serde_json::json!({"ctx": [{"one": 1}]}));
    }

    #[test]
    fn test_cancelled_flag_stops_run() {
        let conn = conn();
        let validator = SchemaValidator::new();
        let flag = CancelFlag::new();
        flag.cancel();
        let err = StatementExecutor::new(&conn, &validator, BlobEncoding::Text)
            .with_cancel(&flag)
            .run(&parse_script("SELECT 1;"), &mut VariableMap::new())
            .unwrap_err();
        assert!(matches!(err, WtfError::Cancelled));
    }
}
