use crate::{NodeError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Run-scoped mutable store visible to every node of a top-level run.
///
/// The engine enforces no schema; keys are an application convention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedStore {
    data: BTreeMap<String, Value>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value or fail with [`NodeError::MissingShared`].
    pub fn require(&self, key: &str) -> Result<&Value, NodeError> {
        self.data
            .get(key)
            .ok_or_else(|| NodeError::MissingShared(key.to_string()))
    }

    /// Get a string value, failing if it is missing or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str, NodeError> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: key.to_string(),
            expected: "string".to_string(),
            actual: value.type_name().to_string(),
        })
    }

    /// Insert a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    /// Append to the array stored at `key`, creating it when absent.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), NodeError> {
        let key = key.into();
        match self.data.entry(key.clone()).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(items) => {
                items.push(value.into());
                Ok(())
            }
            other => Err(NodeError::InvalidInputType {
                field: key,
                expected: "array".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Snapshot of the whole store as an object value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.data
    }
}

impl From<BTreeMap<String, Value>> for SharedStore {
    fn from(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SharedStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
