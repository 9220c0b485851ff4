//! JSON body flattening
//!
//! Every node of the document becomes one row. Containers get a placeholder
//! value plus their own serialization. Object members are visited in the order
//! of serde_json's map (sorted by key unless `preserve_order` is enabled);
//! array elements always in index order.

use serde::Serialize;

use crate::value::Value;

/// Root path of a flattened document
pub const ROOT: &str = "$";

const OBJECT_PLACEHOLDER: &str = "[object]";
const ARRAY_PLACEHOLDER: &str = "[array]";

/// JSON node type as stored in `request_json.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Null => "null",
        }
    }
}

/// One flattened node
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRow {
    pub path: String,
    pub value: Value,
    pub kind: JsonType,
    /// Serialization of containers; `None` for scalars
    pub raw_json: Option<String>,
}

/// Flatten `value` starting at `prefix`
pub fn flatten(prefix: &str, value: &serde_json::Value) -> Vec<JsonRow> {
    let mut rows = Vec::new();
    flatten_into(prefix.to_string(), value, &mut rows);
    rows
}

fn flatten_into(path: String, value: &serde_json::Value, rows: &mut Vec<JsonRow>) {
    match value {
        serde_json::Value::Object(map) => {
            rows.push(JsonRow {
                path: path.clone(),
                value: Value::from(OBJECT_PLACEHOLDER),
                kind: JsonType::Object,
                raw_json: Some(value.to_string()),
            });
            for (key, member) in map {
                flatten_into(format!("{}.{}", path, key), member, rows);
            }
        }
        serde_json::Value::Array(items) => {
            rows.push(JsonRow {
                path: path.clone(),
                value: Value::from(ARRAY_PLACEHOLDER),
                kind: JsonType::Array,
                raw_json: Some(value.to_string()),
            });
            for (index, item) in items.iter().enumerate() {
                flatten_into(format!("{}[{}]", path, index), item, rows);
            }
        }
        scalar => {
            let kind = match scalar {
                serde_json::Value::String(_) => JsonType::String,
                serde_json::Value::Number(_) => JsonType::Number,
                serde_json::Value::Bool(_) => JsonType::Boolean,
                _ => JsonType::Null,
            };
            rows.push(JsonRow {
                path,
                value: Value::from_json(scalar),
                kind,
                raw_json: None,
            });
        }
    }
}
