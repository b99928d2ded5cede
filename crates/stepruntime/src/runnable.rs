use crate::env::RunEnv;
use crate::flow::Flow;
use crate::lifecycle;
use async_trait::async_trait;
use stepcore::{Action, FlowError, Node, Params, RetryPolicy, SharedStore};

/// What a graph entry is, for diagrams and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnableKind {
    Node,
    BatchNode,
    Flow,
    BatchFlow,
}

/// Anything a flow can route to: plain nodes, batch nodes and nested flows.
///
/// Every [`Node`] is runnable through a blanket impl; batch nodes go through
/// [`Batch`](crate::Batch), and [`Flow`] / [`BatchFlow`](crate::BatchFlow)
/// implement it directly with their traversal as the compute step.
#[async_trait]
pub trait Runnable: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> RunnableKind;

    /// Declared action labels; empty means any label is allowed.
    fn actions(&self) -> &[&str] {
        &[]
    }

    /// Retry policy to validate when the runnable is added to a flow.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// The graph this runnable traverses, if it is a flow.
    fn as_flow(&self) -> Option<&Flow> {
        None
    }

    async fn run(
        &self,
        shared: &mut SharedStore,
        params: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError>;
}

#[async_trait]
impl<N: Node> Runnable for N {
    fn name(&self) -> &str {
        Node::name(self)
    }

    fn kind(&self) -> RunnableKind {
        RunnableKind::Node
    }

    fn actions(&self) -> &[&str] {
        Node::actions(self)
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(Node::retry_policy(self))
    }

    async fn run(
        &self,
        shared: &mut SharedStore,
        params: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        lifecycle::run_node(self, shared, params, env).await
    }
}
