//! Core abstractions for the step engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: values, the shared store, parameter contexts,
//! actions, the node traits, errors, execution events and the declarative
//! flow spec. It contains no traversal logic.

mod action;
mod error;
pub mod events;
mod node;
mod params;
mod shared;
mod spec;
mod value;

pub use action::Action;
pub use error::{FlowError, GraphError, NodeError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionId};
pub use node::{BatchNode, ConfigMap, ExecContext, Node, NodeInit, RetryPolicy};
pub use params::{param_map, ParamMap, Params};
pub use shared::SharedStore;
pub use spec::{EdgeSpec, FlowSpec, NodeSpec};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
