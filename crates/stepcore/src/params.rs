//! Parameter contexts.
//!
//! A [`Params`] is an ordered stack of immutable layers. Lookups walk the
//! stack from the innermost (last) layer outwards, so a child's keys shadow
//! its ancestors'. Layers are shared through `Arc`, so overlaying is cheap and
//! never mutates the parent context.

use crate::{NodeError, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single parameter dictionary.
pub type ParamMap = BTreeMap<String, Value>;

/// Immutable, layered parameter context for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Params {
    layers: Vec<Arc<ParamMap>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: ParamMap) -> Self {
        Self::new().with_layer(Arc::new(map))
    }

    /// Return a child context with `layer` applied on top. Empty layers are skipped.
    pub fn with_layer(&self, layer: Arc<ParamMap>) -> Self {
        if layer.is_empty() {
            return self.clone();
        }
        let mut layers = self.layers.clone();
        layers.push(layer);
        Self { layers }
    }

    /// Convenience for [`Params::with_layer`] with an owned map.
    pub fn overlay(&self, layer: ParamMap) -> Self {
        self.with_layer(Arc::new(layer))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    pub fn require(&self, key: &str) -> Result<&Value, NodeError> {
        self.get(key)
            .ok_or_else(|| NodeError::MissingParam(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of non-empty layers in the stack.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Collapse the stack into one map, applying layers child-last.
    pub fn flatten(&self) -> ParamMap {
        let mut merged = ParamMap::new();
        for layer in &self.layers {
            for (key, value) in layer.iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

/// Build a [`ParamMap`] from key/value pairs.
pub fn param_map<K, V, I>(pairs: I) -> ParamMap
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
