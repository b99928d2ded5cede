//! Routing nodes: they decide the next action from the shared store.

use async_trait::async_trait;
use stepcore::{Action, Node, NodeError, NodeInit, Params, RetryPolicy, SharedStore, Value};
use stepruntime::{ConfigDefinition, NodeFactory, NodeMetadata, Runnable};

const BRANCH_ACTIONS: &[&str] = &["true", "false"];
const COUNTER_ACTIONS: &[&str] = &["continue", "done"];

/// Routes `"true"` when a shared key equals the configured value.
///
/// Without `equals` the key is tested for truthiness: present, not null,
/// not `false`, not zero and not an empty string.
pub struct BranchNode {
    name: String,
    key: String,
    equals: Option<Value>,
    retry: RetryPolicy,
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[async_trait]
impl Node for BranchNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn actions(&self) -> &[&str] {
        BRANCH_ACTIONS
    }

    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        Ok(shared.get(&self.key).cloned().unwrap_or(Value::Null))
    }

    async fn post(
        &self,
        _shared: &mut SharedStore,
        _params: &Params,
        prep: Value,
        _exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        let matched = match &self.equals {
            Some(expected) => &prep == expected,
            None => truthy(&prep),
        };
        tracing::debug!(node = %self.name, key = %self.key, matched, "branch evaluated");
        Ok(Some(if matched { "true" } else { "false" }.into()))
    }
}

pub struct BranchNodeFactory;

impl NodeFactory for BranchNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        Ok(Box::new(BranchNode {
            name: init.name.to_string(),
            key: init.require_config_str("key")?.to_string(),
            equals: init.config.get("equals").cloned(),
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "control.branch"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route on a shared value".to_string(),
            category: "control".to_string(),
            config: vec![
                ConfigDefinition::required("key", "Shared key to test"),
                ConfigDefinition::optional("equals", "Value to compare against; truthiness when absent"),
            ],
            actions: BRANCH_ACTIONS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Increments a shared counter, routing `"continue"` until it reaches `limit`.
pub struct CounterNode {
    name: String,
    key: String,
    limit: f64,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for CounterNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn actions(&self) -> &[&str] {
        COUNTER_ACTIONS
    }

    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        match shared.get(&self.key) {
            None => Ok(Value::from(0i64)),
            Some(value @ Value::Number(_)) => Ok(value.clone()),
            Some(other) => Err(NodeError::InvalidInputType {
                field: self.key.clone(),
                expected: "number".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        prep: Value,
        _exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        let count = prep.as_f64().unwrap_or(0.0) + 1.0;
        shared.set(self.key.clone(), count);
        Ok(Some(if count < self.limit { "continue" } else { "done" }.into()))
    }
}

pub struct CounterNodeFactory;

impl NodeFactory for CounterNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        let limit = init
            .require_config("limit")?
            .as_f64()
            .ok_or_else(|| NodeError::Configuration("Config 'limit' must be a number".to_string()))?;

        Ok(Box::new(CounterNode {
            name: init.name.to_string(),
            key: init.config_str_or("key", "counter"),
            limit,
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "control.counter"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Count loop iterations and stop at a limit".to_string(),
            category: "control".to_string(),
            config: vec![
                ConfigDefinition::optional("key", "Shared counter key (default: counter)"),
                ConfigDefinition::required("limit", "Count at which to route \"done\""),
            ],
            actions: COUNTER_ACTIONS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&Value::from("")));
        assert!(!truthy(&Value::from(0i64)));
        assert!(truthy(&Value::from("yes")));
        assert!(truthy(&Value::Array(vec![Value::Null])));
    }
}
