//! Variable storage owned by a single execution.
//!
//! Values are kept as strings. Structured values are stored as their JSON text and
//! only parsed when a template walks into them, so handlers never need to agree on a
//! richer value model.

use indexmap::IndexMap;
use serde_json::Value;

/// Insertion-ordered variable set of one run.
///
/// A sub-workflow never shares this mapping with its parent; it receives a fresh
/// context seeded from an explicit input mapping.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    variables: IndexMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from initial key/value pairs.
    pub fn with_variables<I, K, V>(variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            variables: variables.into_iter().map(|(key, value)| (key.into(), value.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Stores a JSON value as compact JSON text (strings are stored raw).
    pub fn set_json(&mut self, name: impl Into<String>, value: &Value) {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.variables.insert(name.into(), text);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.variables.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Read-only view of the underlying map.
    pub fn variables(&self) -> &IndexMap<String, String> {
        &self.variables
    }

    /// Parses a variable as JSON. Returns `None` when undefined or not valid JSON.
    pub fn get_json(&self, name: &str) -> Option<Value> {
        self.get(name).and_then(|text| serde_json::from_str(text).ok())
    }
}
