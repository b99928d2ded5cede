use crate::env::RunEnv;
use crate::flow::Flow;
use crate::lifecycle::{check_action, exec_with_retry, fail};
use crate::runnable::{Runnable, RunnableKind};
use async_trait::async_trait;
use std::sync::Arc;
use stepcore::{
    Action, BatchNode, FlowError, NodeError, ParamMap, Params, RetryPolicy, SharedStore, Value,
};
use tracing::{debug, info, warn};

/// Adapter placing a [`BatchNode`] into a flow.
///
/// Exec runs once per item in order, each item with its own retry budget.
/// A fallback error on any item aborts the whole batch.
pub struct Batch<N> {
    inner: N,
}

impl<N: BatchNode> Batch<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }
}

#[async_trait]
impl<N: BatchNode> Runnable for Batch<N> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> RunnableKind {
        RunnableKind::BatchNode
    }

    fn actions(&self) -> &[&str] {
        self.inner.actions()
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(self.inner.retry_policy())
    }

    async fn run(
        &self,
        shared: &mut SharedStore,
        params: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        let node = &self.inner;
        let name = node.name();
        info!(node = name, "batch node started");
        env.events().node_started(name);

        let items = node.prep(shared, params).await.map_err(|source| {
            fail(env, FlowError::Prep {
                node: name.to_string(),
                source,
            })
        })?;
        debug!(node = name, items = items.len(), "prepared");
        if env.events().is_enabled() {
            env.events().node_prepared(name, &Value::Array(items.clone()));
        }

        let policy = node.retry_policy();
        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let attempt = exec_with_retry(name, &policy, params, Some(index), env, |ctx| async move {
                let result = node.exec(item, &ctx).await;
                (ctx, result)
            })
            .await;

            let output = match attempt {
                Ok(output) => output,
                Err(exhausted) => {
                    let attempts = exhausted.attempts();
                    warn!(node = name, item = index, attempts, error = %exhausted.error, "item retries exhausted, invoking fallback");
                    env.events()
                        .node_fallback(name, attempts, &exhausted.error.to_string());
                    node.exec_fallback(item, exhausted.error, &exhausted.ctx)
                        .await
                        .map_err(|source| {
                            fail(env, FlowError::Exec {
                                node: name.to_string(),
                                attempts,
                                item: Some(index),
                                source,
                            })
                        })?
                }
            };
            results.push(output);
        }
        if env.events().is_enabled() {
            env.events().node_executed(name, &Value::Array(results.clone()));
        }

        let action = node
            .post(shared, params, items, results)
            .await
            .map_err(|source| {
                fail(env, FlowError::Post {
                    node: name.to_string(),
                    source,
                })
            })?;
        let action = Action::from_option(action);
        check_action(name, node.actions(), &action).map_err(|err| fail(env, err))?;

        info!(node = name, action = %action, "routing");
        env.events().node_routed(name, &action);
        Ok(action)
    }
}

/// Prep/post hooks of a [`BatchFlow`].
#[async_trait]
pub trait BatchFlowHooks: Send + Sync {
    /// Produce one parameter dictionary per iteration.
    async fn prep(&self, shared: &SharedStore, params: &Params) -> Result<Vec<ParamMap>, NodeError>;

    async fn post(
        &self,
        _shared: &mut SharedStore,
        _params: &Params,
        _batches: Vec<ParamMap>,
    ) -> Result<Option<Action>, NodeError> {
        Ok(None)
    }
}

/// Iterates a fixed list of parameter dictionaries.
pub struct StaticBatches(pub Vec<ParamMap>);

#[async_trait]
impl BatchFlowHooks for StaticBatches {
    async fn prep(&self, _shared: &SharedStore, _params: &Params) -> Result<Vec<ParamMap>, NodeError> {
        Ok(self.0.clone())
    }
}

/// A flow re-run once per parameter dictionary.
///
/// Each iteration sees the inherited context, then the wrapped flow's own
/// params, then the iteration's dictionary, innermost winning. Iteration
/// contexts are dropped afterwards; only shared store writes persist.
/// The wrapped flow's own [`FlowHooks`](crate::FlowHooks) run once per
/// iteration.
pub struct BatchFlow {
    flow: Flow,
    hooks: Box<dyn BatchFlowHooks>,
}

impl BatchFlow {
    pub fn new(flow: Flow, hooks: impl BatchFlowHooks + 'static) -> Self {
        Self {
            flow,
            hooks: Box::new(hooks),
        }
    }

    pub fn from_batches(flow: Flow, batches: Vec<ParamMap>) -> Self {
        Self::new(flow, StaticBatches(batches))
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Top-level driver, see [`Flow::run`].
    pub async fn run(&self, shared: &mut SharedStore) -> Result<Action, FlowError> {
        Runnable::run(self, shared, &Params::new(), &RunEnv::detached()).await
    }
}

#[async_trait]
impl Runnable for BatchFlow {
    fn name(&self) -> &str {
        self.flow.name()
    }

    fn kind(&self) -> RunnableKind {
        RunnableKind::BatchFlow
    }

    fn as_flow(&self) -> Option<&Flow> {
        Some(&self.flow)
    }

    async fn run(
        &self,
        shared: &mut SharedStore,
        params: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        let name = self.flow.name();
        let started = std::time::Instant::now();
        env.events().flow_started(name);

        let result = self.iterate(shared, params, env).await;

        env.events().flow_completed(
            name,
            result.as_ref().ok(),
            started.elapsed().as_millis() as u64,
        );
        if let Ok(action) = &result {
            info!(flow = name, action = %action, "batch flow completed");
        }
        result
    }
}

impl BatchFlow {
    async fn iterate(
        &self,
        shared: &mut SharedStore,
        params: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        let name = self.flow.name();
        let scope = params.with_layer(self.flow.params_layer());
        let batches = self.hooks.prep(shared, &scope).await.map_err(|source| {
            fail(env, FlowError::Prep {
                node: name.to_string(),
                source,
            })
        })?;
        info!(flow = name, iterations = batches.len(), "batch flow started");

        for (index, batch) in batches.iter().enumerate() {
            debug!(flow = name, iteration = index, params = ?batch, "batch iteration");
            let iteration = scope.with_layer(Arc::new(batch.clone()));
            self.flow.traverse_scoped(shared, &iteration, env).await?;
        }

        let action = self
            .hooks
            .post(shared, &scope, batches)
            .await
            .map_err(|source| {
                fail(env, FlowError::Post {
                    node: name.to_string(),
                    source,
                })
            })?;
        Ok(Action::from_option(action))
    }
}
