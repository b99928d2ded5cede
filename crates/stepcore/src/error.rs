use crate::Action;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a node's own phases.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing shared key: {0}")]
    MissingShared(String),

    #[error("Missing parameter: {0}")]
    MissingParam(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Failure reported by an external compute provider; the cause is kept.
    #[error("Compute provider failed: {message}")]
    Compute {
        message: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl NodeError {
    /// Wrap an arbitrary compute error, preserving it as the source.
    pub fn compute<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        NodeError::Compute {
            message: err.to_string(),
            source: Arc::new(err),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed(message.into())
    }
}

/// Errors detected while building a flow graph.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Node '{node}' already has a successor for action '{action}'")]
    DuplicateSuccessor { node: String, action: Action },

    #[error("Node '{node}' does not declare action '{action}' (declared: {declared:?})")]
    UndeclaredAction {
        node: String,
        action: Action,
        declared: Vec<String>,
    },

    #[error("Node not found: {0}")]
    UnknownNode(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Flow '{0}' has no nodes")]
    EmptyFlow(String),

    #[error("Invalid retry policy for node '{node}': {reason}")]
    InvalidRetryPolicy { node: String, reason: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Failed to create node '{node}': {source}")]
    NodeCreation {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("Invalid flow spec: {0}")]
    InvalidSpec(String),
}

/// Fatal errors surfaced from a run.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node '{node}' failed in prep: {source}")]
    Prep {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("Node '{node}' failed after {attempts} attempt(s){}: {source}", item_suffix(.item))]
    Exec {
        node: String,
        attempts: u32,
        item: Option<usize>,
        #[source]
        source: NodeError,
    },

    #[error("Node '{node}' failed in post: {source}")]
    Post {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("Node '{node}' returned undeclared action '{action}'")]
    UndeclaredAction { node: String, action: Action },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Name of the node that failed, when the error came from a node phase.
    pub fn node(&self) -> Option<&str> {
        match self {
            FlowError::Prep { node, .. }
            | FlowError::Exec { node, .. }
            | FlowError::Post { node, .. }
            | FlowError::UndeclaredAction { node, .. } => Some(node),
            _ => None,
        }
    }
}

fn item_suffix(item: &Option<usize>) -> String {
    match item {
        Some(index) => format!(" on item {}", index),
        None => String::new(),
    }
}
