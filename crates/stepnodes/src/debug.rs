use async_trait::async_trait;
use stepcore::{ExecContext, Node, NodeError, NodeInit, Params, RetryPolicy, SharedStore, Value};
use stepruntime::{ConfigDefinition, NodeFactory, NodeMetadata, Runnable};

/// Logs one shared key, or the whole store, for debugging
pub struct DebugNode {
    name: String,
    key: Option<String>,
    message: Option<String>,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for DebugNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        Ok(match &self.key {
            Some(key) => shared.get(key).cloned().unwrap_or(Value::Null),
            None => shared.to_value(),
        })
    }

    async fn exec(&self, prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let message = self.message.as_deref().unwrap_or("(no message)");
        match &self.key {
            Some(key) => tracing::info!(node = %self.name, key = %key, value = %prep, "DEBUG: {}", message),
            None => tracing::info!(node = %self.name, shared = %prep, "DEBUG: {}", message),
        }
        Ok(prep.clone())
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        Ok(Box::new(DebugNode {
            name: init.name.to_string(),
            key: init.config.get("key").and_then(Value::as_str).map(str::to_string),
            message: init.config.get("message").and_then(Value::as_str).map(str::to_string),
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs a shared value (or the whole store) for debugging".to_string(),
            category: "debug".to_string(),
            config: vec![
                ConfigDefinition::optional("key", "Shared key to log; all keys when absent"),
                ConfigDefinition::optional("message", "Text logged alongside the value"),
            ],
            actions: vec![],
        }
    }
}
