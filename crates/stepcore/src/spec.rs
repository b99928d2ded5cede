use crate::{Action, ConfigMap, FlowError, ParamMap, RetryPolicy, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Declarative flow definition, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Id of the start node; the first node when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    /// Parameters this flow overlays for everything it runs.
    #[serde(default, skip_serializing_if = "ParamMap::is_empty")]
    pub params: ParamMap,
}

impl FlowSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            start: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            params: ParamMap::new(),
        }
    }

    /// Read a spec from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn add_node(&mut self, node: NodeSpec) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, from: impl Into<String>, action: impl Into<Action>, to: impl Into<String>) {
        self.edges.push(EdgeSpec {
            from: from.into(),
            action: action.into(),
            to: to.into(),
        });
    }

    /// Connect with the `"default"` action.
    pub fn chain(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.connect(from, Action::default(), to);
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a flow
///
/// Exactly one of `node_type` or `flow` describes what runs. Adding
/// `batch_params` to a nested flow turns it into a batch flow over those
/// parameter dictionaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub config: ConfigMap,
    #[serde(default, skip_serializing_if = "ParamMap::is_empty")]
    pub params: ParamMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<Box<FlowSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_params: Option<Vec<ParamMap>>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: Some(node_type.into()),
            name: None,
            config: ConfigMap::new(),
            params: ParamMap::new(),
            retry: None,
            flow: None,
            batch_params: None,
        }
    }

    /// A node that runs a nested flow.
    pub fn sub_flow(id: impl Into<String>, flow: FlowSpec) -> Self {
        Self {
            node_type: None,
            flow: Some(Box::new(flow)),
            ..Self::new(id, "")
        }
    }

    /// A node that runs a nested flow once per parameter dictionary.
    pub fn batch_flow(id: impl Into<String>, flow: FlowSpec, batches: Vec<ParamMap>) -> Self {
        Self {
            batch_params: Some(batches),
            ..Self::sub_flow(id, flow)
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retry(mut self, max_retries: u32, wait_ms: u64) -> Self {
        self.retry = Some(RetryPolicy::new(
            max_retries,
            std::time::Duration::from_millis(wait_ms),
        ));
        self
    }

    /// Name shown in logs: the explicit name, else the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Action-labeled edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    #[serde(default)]
    pub action: Action,
    pub to: String,
}
