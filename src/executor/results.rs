//! Result sets and buckets

use std::collections::{BTreeMap, HashSet};

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::value::Value;

/// Bucket that receives results without a `store` directive
pub const DEFAULT_BUCKET: &str = "ctx";

/// Named result sets accumulated over one request
pub type Buckets = BTreeMap<String, ResultSet>;

/// Rows returned by one statement, cells already coerced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, `Null` when there are no rows
    pub fn scalar(&self) -> Value {
        self.rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Cell of `row` under column `name`; the last column with that name wins
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.columns.iter().rposition(|c| c == name)?;
        self.rows.get(row)?.get(index)
    }

    /// Column indexes that survive de-duplication, in column order
    fn visible_columns(&self) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut visible: Vec<usize> = (0..self.columns.len())
            .rev()
            .filter(|&i| seen.insert(self.columns[i].as_str()))
            .collect();
        visible.reverse();
        visible
    }
}

struct RowView<'a> {
    columns: &'a [String],
    visible: &'a [usize],
    row: &'a [Value],
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.visible.len()))?;
        for &i in self.visible {
            map.serialize_entry(&self.columns[i], &self.row.get(i).unwrap_or(&Value::Null))?;
        }
        map.end()
    }
}

/// Serializes as an array of `{column: value}` objects
impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let visible = self.visible_columns();
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowView {
                columns: &self.columns,
                visible: &visible,
                row,
            })?;
        }
        seq.end()
    }
}
