use crate::{Action, GraphError, NodeError, Params, SharedStore, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Static configuration handed to node factories.
pub type ConfigMap = BTreeMap<String, Value>;

/// Core trait for a unit of work with a prep → exec → post lifecycle.
///
/// Only `post` receives mutable access to the shared store. `exec` sees
/// nothing but the prep result and its [`ExecContext`], which keeps it safe
/// to retry.
#[async_trait]
pub trait Node: Send + Sync {
    /// Display name used in logs, events and diagrams.
    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Actions this node may return. Empty means "any label".
    fn actions(&self) -> &[&str] {
        &[]
    }

    async fn prep(&self, _shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    async fn exec(&self, _prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    /// Called once every attempt has failed. The default gives up.
    async fn exec_fallback(
        &self,
        _prep: &Value,
        error: NodeError,
        _ctx: &ExecContext,
    ) -> Result<Value, NodeError> {
        Err(error)
    }

    async fn post(
        &self,
        _shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        _exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        Ok(None)
    }
}

/// A node whose exec phase runs once per item produced by prep.
#[async_trait]
pub trait BatchNode: Send + Sync {
    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn actions(&self) -> &[&str] {
        &[]
    }

    async fn prep(&self, _shared: &SharedStore, _params: &Params) -> Result<Vec<Value>, NodeError> {
        Ok(Vec::new())
    }

    async fn exec(&self, item: &Value, ctx: &ExecContext) -> Result<Value, NodeError>;

    async fn exec_fallback(
        &self,
        _item: &Value,
        error: NodeError,
        _ctx: &ExecContext,
    ) -> Result<Value, NodeError> {
        Err(error)
    }

    /// Receives the items and their results, index-aligned.
    async fn post(
        &self,
        _shared: &mut SharedStore,
        _params: &Params,
        _items: Vec<Value>,
        _results: Vec<Value>,
    ) -> Result<Option<Action>, NodeError> {
        Ok(None)
    }
}

/// Per-attempt information passed to `exec` and `exec_fallback`.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Zero-based attempt number, always below `max_retries`.
    pub current_retry: u32,
    pub max_retries: u32,
    /// Position of the item inside a batch, if any.
    pub item_index: Option<usize>,
    pub params: Params,
}

impl ExecContext {
    pub fn is_last_attempt(&self) -> bool {
        self.current_retry + 1 >= self.max_retries
    }
}

/// How many times exec is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub max_retries: u32,
    #[serde(default, rename = "wait_ms", with = "duration_ms")]
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self { max_retries, wait }
    }

    pub fn validate(&self, node: &str) -> Result<(), GraphError> {
        if self.max_retries == 0 {
            return Err(GraphError::InvalidRetryPolicy {
                node: node.to_string(),
                reason: "max_retries must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            wait: Duration::ZERO,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(wait: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(wait.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Everything a factory needs to build a node from a flow spec.
#[derive(Debug, Clone)]
pub struct NodeInit<'a> {
    pub name: &'a str,
    pub config: &'a ConfigMap,
    pub retry: RetryPolicy,
}

impl<'a> NodeInit<'a> {
    /// Get config value or return error
    pub fn require_config(&self, key: &str) -> Result<&'a Value, NodeError> {
        self.config
            .get(key)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", key)))
    }

    pub fn require_config_str(&self, key: &str) -> Result<&'a str, NodeError> {
        self.require_config(key)?
            .as_str()
            .ok_or_else(|| NodeError::Configuration(format!("Config '{}' must be a string", key)))
    }

    /// Get config with default
    pub fn get_config_or(&self, key: &str, default: Value) -> Value {
        self.config.get(key).cloned().unwrap_or(default)
    }

    pub fn config_str_or(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }
}
