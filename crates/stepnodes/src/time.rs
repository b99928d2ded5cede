use async_trait::async_trait;
use stepcore::{ExecContext, Node, NodeError, NodeInit, RetryPolicy, Value};
use stepruntime::{ConfigDefinition, NodeFactory, NodeMetadata, Runnable};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode {
    name: String,
    delay: Duration,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for DelayNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn exec(&self, _prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        tracing::debug!(node = %self.name, delay_ms = self.delay.as_millis() as u64, "delaying");
        sleep(self.delay).await;
        Ok(Value::Null)
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        // Default to 1 second if not specified
        let delay_ms = init
            .get_config_or("delay_ms", Value::from(1000i64))
            .as_f64()
            .filter(|ms| *ms >= 0.0)
            .ok_or_else(|| {
                NodeError::Configuration("Config 'delay_ms' must be a non-negative number".to_string())
            })?;

        Ok(Box::new(DelayNode {
            name: init.name.to_string(),
            delay: Duration::from_millis(delay_ms as u64),
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            config: vec![ConfigDefinition::optional("delay_ms", "Milliseconds to sleep (default: 1000)")],
            actions: vec![],
        }
    }
}
