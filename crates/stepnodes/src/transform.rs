use async_trait::async_trait;
use stepcore::{Action, ExecContext, Node, NodeError, NodeInit, Params, RetryPolicy, SharedStore, Value};
use stepruntime::{ConfigDefinition, NodeFactory, NodeMetadata, Runnable};

/// Input and output keys shared by the JSON transforms.
struct Keys {
    input: String,
    output: String,
}

impl Keys {
    fn from_init(init: &NodeInit<'_>, input: &str, output: &str) -> Self {
        Self {
            input: init.config_str_or("input", input),
            output: init.config_str_or("output", output),
        }
    }

    fn config() -> Vec<ConfigDefinition> {
        vec![
            ConfigDefinition::optional("input", "Shared key to read"),
            ConfigDefinition::optional("output", "Shared key to write"),
        ]
    }
}

/// Parse a JSON string from the shared store
pub struct JsonParseNode {
    name: String,
    keys: Keys,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for JsonParseNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        let input = shared.require(&self.keys.input)?;
        match input {
            Value::String(_) => Ok(input.clone()),
            other => Err(NodeError::InvalidInputType {
                field: self.keys.input.clone(),
                expected: "string".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    async fn exec(&self, prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let text = prep.as_str().unwrap_or_default();
        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;
        Ok(Value::from(parsed))
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        shared.set(self.keys.output.clone(), exec);
        Ok(None)
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        Ok(Box::new(JsonParseNode {
            name: init.name.to_string(),
            keys: Keys::from_init(init, "json", "parsed"),
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string (input: json, output: parsed)".to_string(),
            category: "transform".to_string(),
            config: Keys::config(),
            actions: vec![],
        }
    }
}

/// Stringify a shared value to JSON
pub struct JsonStringifyNode {
    name: String,
    keys: Keys,
    pretty: bool,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for JsonStringifyNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        shared.require(&self.keys.input).cloned()
    }

    async fn exec(&self, prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let json = if self.pretty {
            serde_json::to_string_pretty(prep)
        } else {
            serde_json::to_string(prep)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;
        Ok(Value::String(json))
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        shared.set(self.keys.output.clone(), exec);
        Ok(None)
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        Ok(Box::new(JsonStringifyNode {
            name: init.name.to_string(),
            keys: Keys::from_init(init, "value", "json"),
            pretty: init.get_config_or("pretty", Value::Bool(false)).as_bool().unwrap_or(false),
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> NodeMetadata {
        let mut config = Keys::config();
        config.push(ConfigDefinition::optional("pretty", "Pretty-print the output"));
        NodeMetadata {
            description: "Convert value to JSON string (input: value, output: json)".to_string(),
            category: "transform".to_string(),
            config,
            actions: vec![],
        }
    }
}
