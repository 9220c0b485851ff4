//! Value coercion between SQLite cells and request/response data
//!
//! [`Value`] is the single dynamic value type carried through variable
//! binding, result rows, JSON serialization and template contexts.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Serialize, Serializer};

use crate::error::WtfError;

/// A dynamically typed cell or variable
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Copy a borrowed engine cell into an owned value
    pub fn from_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }

    /// Replace a BLOB with its textual rendering; other variants pass through
    pub fn coerce_blob(self, encoding: BlobEncoding) -> Self {
        match self {
            Value::Blob(bytes) => Value::Text(encoding.encode(&bytes)),
            other => other,
        }
    }

    /// Convert a JSON scalar; objects and arrays become their serialization
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(v) => serde_json::Value::from(*v),
            Value::Real(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(bytes) => {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Text(s) => f.write_str(s),
            Value::Blob(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Integer(v) => serializer.serialize_i64(*v),
            Value::Real(v) => serializer.serialize_f64(*v),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Blob(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

/// How BLOB cells are turned into text before leaving the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlobEncoding {
    /// Lossy UTF-8 decoding; invalid sequences become U+FFFD
    #[default]
    Text,
    /// Standard base64 with padding
    Base64,
}

impl BlobEncoding {
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            BlobEncoding::Text => String::from_utf8_lossy(bytes).into_owned(),
            BlobEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

impl FromStr for BlobEncoding {
    type Err = WtfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(BlobEncoding::Text),
            "base64" => Ok(BlobEncoding::Base64),
            other => Err(WtfError::config(
                "blob_encoding",
                format!("expected \"text\" or \"base64\", got {:?}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_blob_coerced_to_lossy_text() {
        let value = Value::Blob(b"hello".to_vec()).coerce_blob(BlobEncoding::Text);
        assert_eq!(value, Value::Text("hello".to_string()));

        let invalid = Value::Blob(vec![0x66, 0xff, 0x6f]).coerce_blob(BlobEncoding::Text);
        assert_eq!(invalid, Value::Text("f\u{fffd}o".to_string()));
    }

    #[test]
    fn test_blob_coerced_to_base64() {
        let value = Value::Blob(vec![0, 1, 2, 255]).coerce_blob(BlobEncoding::Base64);
        assert_eq!(value, Value::Text("AAEC/w==".to_string()));
    }

    #[test]
    fn test_non_blob_passes_through() {
        assert_eq!(
            Value::Integer(7).coerce_blob(BlobEncoding::Base64),
            Value::Integer(7)
        );
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Value::from_json(&serde_json::json!(1)), Value::Integer(1));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Real(1.5));
        assert_eq!(Value::from_json(&serde_json::json!(true)), Value::Boolean(true));
        assert_eq!(Value::from_json(&serde_json::json!(null)), Value::Null);
        assert_eq!(
            Value::from_json(&serde_json::json!([1, 2])),
            Value::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn test_serialize_to_json() {
        let row = vec![
            Value::Null,
            Value::Integer(3),
            Value::Real(0.5),
            Value::Boolean(false),
            Value::Text("x".to_string()),
        ];
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"[null,3,0.5,false,"x"]"#
        );
    }

    #[test]
    fn test_round_trip_through_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        let params = [
            Value::Integer(42),
            Value::Real(2.5),
            Value::Boolean(true),
            Value::Text("abc".to_string()),
            Value::Null,
        ];
        let mut stmt = conn.prepare("SELECT ?1, ?2, ?3, ?4, ?5").unwrap();
        let values: Vec<Value> = stmt
            .query_row(rusqlite::params_from_iter(params.iter()), |row| {
                Ok((0..5).map(|i| Value::from_ref(row.get_ref(i).unwrap())).collect())
            })
            .unwrap();
        assert_eq!(
            values,
            vec![
                Value::Integer(42),
                Value::Real(2.5),
                Value::Integer(1),
                Value::Text("abc".to_string()),
                Value::Null,
            ]
        );
    }

    #[test]
    fn test_blob_encoding_from_str() {
        assert_eq!("TEXT".parse::<BlobEncoding>().unwrap(), BlobEncoding::Text);
        assert_eq!("base64".parse::<BlobEncoding>().unwrap(), BlobEncoding::Base64);
        assert!("hex".parse::<BlobEncoding>().is_err());
    }
}
