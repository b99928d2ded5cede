//! Flow execution runtime
//!
//! This crate provides the engine that runs nodes through their lifecycle,
//! traverses flow graphs by action, repeats batch nodes and batch flows, and
//! builds flows from declarative specs through the node registry.
//!
//! Execution is strictly sequential: every phase, node and iteration is
//! awaited before the next one starts.

mod batch;
mod env;
mod flow;
mod lifecycle;
mod loader;
mod mermaid;
mod registry;
mod runnable;
mod runtime;

pub use batch::{Batch, BatchFlow, BatchFlowHooks, StaticBatches};
pub use env::{RecordingSleeper, RunEnv, Sleeper, TokioSleeper};
pub use flow::{Flow, FlowHooks, NodeKey, PassThrough};
pub use loader::load_flow;
pub use registry::{ConfigDefinition, NodeFactory, NodeMetadata, NodeRegistry};
pub use runnable::{Runnable, RunnableKind};
pub use runtime::{ExecutionResult, FlowRuntime, RuntimeConfig};
