use async_trait::async_trait;
use stepcore::{Action, ExecContext, Node, NodeError, NodeInit, Params, RetryPolicy, SharedStore, Value};
use stepruntime::{ConfigDefinition, NodeFactory, NodeMetadata, Runnable};

/// Where `shared.set` takes its value from.
enum Source {
    Literal(Value),
    Param(String),
}

/// Writes a value into the shared store
///
/// The value is either the literal `value` config or, with `from_param`, the
/// named parameter from the node's parameter context. With `append` the value
/// is pushed onto a list instead of replacing the key.
pub struct SetSharedNode {
    name: String,
    key: String,
    source: Source,
    append: bool,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for SetSharedNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prep(&self, _shared: &SharedStore, params: &Params) -> Result<Value, NodeError> {
        match &self.source {
            Source::Literal(value) => Ok(value.clone()),
            Source::Param(param) => params.require(param).cloned(),
        }
    }

    async fn exec(&self, prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        Ok(prep.clone())
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        if self.append {
            shared.push(self.key.clone(), exec)?;
        } else {
            shared.set(self.key.clone(), exec);
        }
        Ok(None)
    }
}

pub struct SetSharedNodeFactory;

impl NodeFactory for SetSharedNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        let source = match init.config.get("from_param") {
            Some(param) => Source::Param(
                param
                    .as_str()
                    .ok_or_else(|| NodeError::Configuration("Config 'from_param' must be a string".to_string()))?
                    .to_string(),
            ),
            None => Source::Literal(init.require_config("value")?.clone()),
        };

        Ok(Box::new(SetSharedNode {
            name: init.name.to_string(),
            key: init.require_config_str("key")?.to_string(),
            source,
            append: init.get_config_or("append", Value::Bool(false)).as_bool().unwrap_or(false),
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "shared.set"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Write a literal or parameter value to a shared key".to_string(),
            category: "shared".to_string(),
            config: vec![
                ConfigDefinition::required("key", "Shared key to write"),
                ConfigDefinition::optional("value", "Literal value; required unless from_param is set"),
                ConfigDefinition::optional("from_param", "Take the value from this parameter instead"),
                ConfigDefinition::optional("append", "Push onto a list instead of replacing"),
            ],
            actions: vec![],
        }
    }
}
