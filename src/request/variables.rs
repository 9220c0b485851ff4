//! Variable map bound as named statement parameters

use std::collections::{BTreeMap, HashMap};

use crate::value::Value;

const ARRAY_SUFFIX: &str = "[]";

/// Named values visible to `:name` parameters.
///
/// Sources are layered: path parameters, then body form fields, then query
/// parameters. A key set by an earlier layer is never overwritten by a later
/// one. `tag[]=a&tag[]=b` becomes `tag = '["a","b"]'`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableMap {
    values: BTreeMap<String, Value>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from its three sources in precedence order
    pub fn layered(
        path: &[(String, String)],
        form: &[(String, String)],
        query: &[(String, String)],
    ) -> Self {
        let mut map = Self::new();
        for (name, value) in path {
            map.insert_if_absent(name, Value::from(value.as_str()));
        }
        map.add_layer(form);
        map.add_layer(query);
        map
    }

    /// Add a lower-precedence source, grouping repeated keys
    pub fn add_layer(&mut self, pairs: &[(String, String)]) {
        let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            let (name, value) = (name.as_str(), value.as_str());
            match index.get(name) {
                Some(&slot) => grouped[slot].1.push(value),
                None => {
                    index.insert(name, grouped.len());
                    grouped.push((name, vec![value]));
                }
            }
        }

        for (name, values) in grouped {
            match name.strip_suffix(ARRAY_SUFFIX) {
                Some(base) if !base.is_empty() => {
                    if !self.values.contains_key(base) {
                        let json = serde_json::Value::from(
                            values.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                        );
                        self.values
                            .insert(base.to_string(), Value::Text(json.to_string()));
                    }
                }
                _ => {
                    if let Some(first) = values.first() {
                        self.insert_if_absent(name, Value::from(*first));
                    }
                }
            }
        }
    }

    /// Set `name` unless a higher-precedence source already did
    pub fn insert_if_absent(&mut self, name: &str, value: Value) {
        self.values.entry(name.to_string()).or_insert(value);
    }

    /// Set `name` unconditionally (captures)
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// JSON object view, used by the structural validator
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_path_beats_form_beats_query() {
        let map = VariableMap::layered(
            &pairs(&[("id", "1")]),
            &pairs(&[("id", "2"), ("name", "form")]),
            &pairs(&[("id", "3"), ("name", "query"), ("page", "4")]),
        );
        assert_eq!(map.get("id"), Some(&Value::from("1")));
        assert_eq!(map.get("name"), Some(&Value::from("form")));
        assert_eq!(map.get("page"), Some(&Value::from("4")));
    }

    #[test]
    fn test_array_suffix_collapses_to_json() {
        let map = VariableMap::layered(&[], &[], &pairs(&[("tag[]", "a"), ("tag[]", "b")]));
        assert_eq!(map.get("tag"), Some(&Value::from(r#"["a","b"]"#)));
        assert!(!map.contains("tag[]"));
    }

    #[test]
    fn test_array_respects_precedence() {
        let map = VariableMap::layered(
            &pairs(&[("tag", "path")]),
            &pairs(&[("tag[]", "x")]),
            &pairs(&[("tag[]", "y")]),
        );
        assert_eq!(map.get("tag"), Some(&Value::from("path")));
    }

    #[test]
    fn test_repeated_plain_key_uses_first_value() {
        let map = VariableMap::layered(&[], &[], &pairs(&[("q", "first"), ("q", "second")]));
        assert_eq!(map.get("q"), Some(&Value::from("first")));
    }

    #[test]
    fn test_many_distinct_keys() {
        let query: Vec<(String, String)> = (0..200_000)
            .map(|i| (format!("k{i}"), "v".to_string()))
            .chain([("k7".to_string(), "late".to_string())])
            .collect();
        let started = std::time::Instant::now();
        let map = VariableMap::layered(&[], &[], &query);
        assert_eq!(map.len(), 200_000);
        assert_eq!(map.get("k7"), Some(&Value::from("v")));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_set_overrides() {
        let mut map = VariableMap::layered(&pairs(&[("id", "1")]), &[], &[]);
        map.set("id", Value::Integer(9));
        assert_eq!(map.get("id"), Some(&Value::Integer(9)));
    }

    #[test]
    fn test_to_json() {
        let mut map = VariableMap::new();
        map.set("n", Value::Integer(2));
        map.set("s", Value::from("x"));
        assert_eq!(map.to_json(), serde_json::json!({"n": 2, "s": "x"}));
    }
}
