//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod control;
mod debug;
mod http;
mod shared;
mod time;
mod transform;

pub use control::{BranchNode, CounterNode};
pub use debug::DebugNode;
pub use http::HttpRequestNode;
pub use shared::SetSharedNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};
use stepruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(shared::SetSharedNodeFactory));
    registry.register(Arc::new(control::BranchNodeFactory));
    registry.register(Arc::new(control::CounterNodeFactory));
    registry.register(Arc::new(http::HttpRequestNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
}

/// A registry pre-loaded with every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
