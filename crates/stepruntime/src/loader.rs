//! Builds runnable flows from declarative [`FlowSpec`]s.

use crate::batch::BatchFlow;
use crate::flow::{Flow, NodeKey};
use crate::registry::NodeRegistry;
use crate::runnable::Runnable;
use std::collections::HashMap;
use stepcore::{FlowSpec, GraphError, NodeInit, NodeSpec};

/// Build a [`Flow`] from `spec`, creating nodes through `registry`.
///
/// Nested flow specs are built recursively. Node ids must be unique within
/// a spec; edges and `start` refer to them.
pub fn load_flow(spec: &FlowSpec, registry: &NodeRegistry) -> Result<Flow, GraphError> {
    let mut flow = Flow::new(spec.name.clone()).with_params(spec.params.clone());
    let mut keys: HashMap<&str, NodeKey> = HashMap::new();

    for node in &spec.nodes {
        if keys.contains_key(node.id.as_str()) {
            return Err(GraphError::DuplicateNodeId(node.id.clone()));
        }
        let runnable = build_node(node, registry)?;
        let key = flow.add_boxed(runnable, node.params.clone())?;
        keys.insert(node.id.as_str(), key);
    }

    let lookup = |id: &str| {
        keys.get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(format!("{} (in flow '{}')", id, spec.name)))
    };

    if let Some(start) = &spec.start {
        flow.set_start(lookup(start)?)?;
    }
    for edge in &spec.edges {
        flow.connect(lookup(&edge.from)?, edge.action.clone(), lookup(&edge.to)?)?;
    }

    tracing::debug!(
        flow = %spec.name,
        nodes = spec.nodes.len(),
        edges = spec.edges.len(),
        "flow loaded"
    );
    Ok(flow)
}

fn build_node(node: &NodeSpec, registry: &NodeRegistry) -> Result<Box<dyn Runnable>, GraphError> {
    if node.flow.is_some() && node.retry.is_some() {
        return Err(GraphError::InvalidSpec(format!(
            "node '{}' runs a flow and cannot set retry",
            node.id
        )));
    }

    match (&node.node_type, &node.flow, &node.batch_params) {
        (None, Some(sub), None) => Ok(Box::new(load_flow(sub, registry)?)),
        (None, Some(sub), Some(batches)) => Ok(Box::new(BatchFlow::from_batches(
            load_flow(sub, registry)?,
            batches.clone(),
        ))),
        (Some(node_type), None, None) => {
            let init = NodeInit {
                name: node.display_name(),
                config: &node.config,
                retry: node.retry.unwrap_or_default(),
            };
            registry.create_node(node_type, &init)
        }
        (Some(_), Some(_), _) => Err(GraphError::InvalidSpec(format!(
            "node '{}' sets both node_type and flow",
            node.id
        ))),
        (_, None, Some(_)) => Err(GraphError::InvalidSpec(format!(
            "node '{}' has batch_params but no flow",
            node.id
        ))),
        (None, None, None) => Err(GraphError::InvalidSpec(format!(
            "node '{}' needs a node_type or a flow",
            node.id
        ))),
    }
}

