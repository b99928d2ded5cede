use crate::runnable::Runnable;
use std::collections::BTreeMap;
use std::sync::Arc;
use stepcore::{GraphError, NodeError, NodeInit};

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node with given name, config and retry policy
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, config keys, actions)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub config: Vec<ConfigDefinition>,
    /// Actions the node can return; empty when it only returns "default".
    pub actions: Vec<String>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            config: Vec::new(),
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ConfigDefinition {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Registry of available node types
#[derive(Default)]
pub struct NodeRegistry {
    factories: BTreeMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node factory, replacing any previous one for the same type
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::debug!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a node instance from a node type and its init settings
    pub fn create_node(
        &self,
        node_type: &str,
        init: &NodeInit<'_>,
    ) -> Result<Box<dyn Runnable>, GraphError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| GraphError::UnknownNodeType(node_type.to_string()))?;

        factory
            .create(init)
            .map_err(|source| GraphError::NodeCreation {
                node: init.name.to_string(),
                source,
            })
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}
