use crate::env::RunEnv;
use crate::lifecycle::fail;
use crate::runnable::{Runnable, RunnableKind};
use async_trait::async_trait;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::sync::Arc;
use std::time::Instant;
use stepcore::{Action, FlowError, GraphError, NodeError, ParamMap, Params, SharedStore, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle to a node inside a specific [`Flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    flow: Uuid,
    index: NodeIndex,
}

impl NodeKey {
    pub fn index(&self) -> usize {
        self.index.index()
    }
}

/// Optional prep/post around a flow's traversal.
///
/// A flow never runs an exec phase of its own: its compute is the traversal.
/// `post` receives the action the traversal ended with.
#[async_trait]
pub trait FlowHooks: Send + Sync {
    async fn prep(&self, _shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    async fn post(
        &self,
        _shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        last_action: Action,
    ) -> Result<Option<Action>, NodeError> {
        Ok(Some(last_action))
    }
}

/// Hooks that pass the terminal action through unchanged.
pub struct PassThrough;

impl FlowHooks for PassThrough {}

pub(crate) struct Entry {
    pub runnable: Box<dyn Runnable>,
    /// Parameters declared for this node at its add site.
    pub params: Arc<ParamMap>,
}

/// Orchestrates a graph of runnables connected by action-labeled edges.
///
/// Routing cycles are allowed; a loop that never reaches an action without
/// a successor runs forever.
pub struct Flow {
    id: Uuid,
    name: String,
    graph: DiGraph<Entry, Action>,
    start: Option<NodeIndex>,
    params: Arc<ParamMap>,
    hooks: Box<dyn FlowHooks>,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            graph: DiGraph::new(),
            start: None,
            params: Arc::new(ParamMap::new()),
            hooks: Box::new(PassThrough),
        }
    }

    /// Parameters this flow overlays on whatever it inherits.
    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn with_hooks(mut self, hooks: impl FlowHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub(crate) fn params_layer(&self) -> Arc<ParamMap> {
        self.params.clone()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn start(&self) -> Option<NodeKey> {
        self.start.map(|index| self.key(index))
    }

    /// Add a runnable. The first one added becomes the start node.
    pub fn add(&mut self, node: impl Runnable + 'static) -> Result<NodeKey, GraphError> {
        self.add_boxed(Box::new(node), ParamMap::new())
    }

    /// Add a runnable with its own declared parameters.
    pub fn add_with_params(
        &mut self,
        node: impl Runnable + 'static,
        params: ParamMap,
    ) -> Result<NodeKey, GraphError> {
        self.add_boxed(Box::new(node), params)
    }

    pub fn add_boxed(
        &mut self,
        runnable: Box<dyn Runnable>,
        params: ParamMap,
    ) -> Result<NodeKey, GraphError> {
        if let Some(policy) = runnable.retry_policy() {
            policy.validate(runnable.name())?;
        }
        let index = self.graph.add_node(Entry {
            runnable,
            params: Arc::new(params),
        });
        if self.start.is_none() {
            self.start = Some(index);
        }
        Ok(self.key(index))
    }

    pub fn set_start(&mut self, key: NodeKey) -> Result<(), GraphError> {
        self.start = Some(self.resolve(key)?);
        Ok(())
    }

    /// Declare `from --action--> to`.
    ///
    /// Fails if `from` already has a successor for `action`, or if `from`
    /// declares its actions and `action` is not among them.
    pub fn connect(
        &mut self,
        from: NodeKey,
        action: impl Into<Action>,
        to: NodeKey,
    ) -> Result<(), GraphError> {
        let action = action.into();
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        let node = &self.graph[source].runnable;

        let declared = node.actions();
        if !declared.is_empty() && !declared.contains(&action.as_str()) {
            return Err(GraphError::UndeclaredAction {
                node: node.name().to_string(),
                declared: declared.iter().map(|a| a.to_string()).collect(),
                action,
            });
        }
        if self.successor(source, &action).is_some() {
            return Err(GraphError::DuplicateSuccessor {
                node: node.name().to_string(),
                action,
            });
        }

        self.graph.add_edge(source, target, action);
        Ok(())
    }

    /// Declare `from --default--> to`.
    pub fn chain(&mut self, from: NodeKey, to: NodeKey) -> Result<(), GraphError> {
        self.connect(from, Action::default(), to)
    }

    /// Connect every key to the next one with the default action.
    pub fn sequence(&mut self, keys: &[NodeKey]) -> Result<(), GraphError> {
        for pair in keys.windows(2) {
            self.chain(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Name of the node behind `key`.
    pub fn node_name(&self, key: NodeKey) -> Result<&str, GraphError> {
        Ok(self.graph[self.resolve(key)?].runnable.name())
    }

    /// Action labels leaving `key`, in declaration order.
    pub fn actions_from(&self, key: NodeKey) -> Result<Vec<Action>, GraphError> {
        let index = self.resolve(key)?;
        Ok(self.outgoing_labels(index))
    }

    /// Top-level driver: run with a fresh parameter context, real sleeps and
    /// no event subscribers.
    pub async fn run(&self, shared: &mut SharedStore) -> Result<Action, FlowError> {
        Runnable::run(self, shared, &Params::new(), &RunEnv::detached()).await
    }

    /// Run with an explicit environment.
    pub async fn run_with(&self, shared: &mut SharedStore, env: &RunEnv) -> Result<Action, FlowError> {
        Runnable::run(self, shared, &Params::new(), env).await
    }

    /// Walk the graph from the start node with `scope` as the inherited
    /// parameter context and return the last action produced.
    async fn orchestrate(
        &self,
        shared: &mut SharedStore,
        scope: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        let mut current = self
            .start
            .ok_or_else(|| GraphError::EmptyFlow(self.name.clone()))?;

        loop {
            let entry = &self.graph[current];
            let node_scope = scope.with_layer(entry.params.clone());
            let action = entry.runnable.run(shared, &node_scope, env).await?;

            match self.successor(current, &action) {
                Some(next) => {
                    debug!(
                        flow = %self.name,
                        from = entry.runnable.name(),
                        to = self.graph[next].runnable.name(),
                        action = %action,
                        "transition"
                    );
                    current = next;
                }
                None => {
                    let labels = self.outgoing_labels(current);
                    if !labels.is_empty() {
                        warn!(
                            flow = %self.name,
                            node = entry.runnable.name(),
                            action = %action,
                            available = ?labels,
                            "flow ends: no successor for action"
                        );
                    }
                    return Ok(action);
                }
            }
        }
    }

    pub(crate) fn graph(&self) -> &DiGraph<Entry, Action> {
        &self.graph
    }

    fn key(&self, index: NodeIndex) -> NodeKey {
        NodeKey {
            flow: self.id,
            index,
        }
    }

    fn resolve(&self, key: NodeKey) -> Result<NodeIndex, GraphError> {
        if key.flow != self.id || key.index.index() >= self.graph.node_count() {
            return Err(GraphError::UnknownNode(format!(
                "{} (not part of flow '{}')",
                key.index.index(),
                self.name
            )));
        }
        Ok(key.index)
    }

    fn successor(&self, index: NodeIndex, action: &Action) -> Option<NodeIndex> {
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .find(|edge| edge.weight() == action)
            .map(|edge| edge.target())
    }

    fn outgoing_labels(&self, index: NodeIndex) -> Vec<Action> {
        // petgraph yields outgoing edges newest first
        let mut labels: Vec<Action> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| edge.weight().clone())
            .collect();
        labels.reverse();
        labels
    }
}

#[async_trait]
impl Runnable for Flow {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RunnableKind {
        RunnableKind::Flow
    }

    fn as_flow(&self) -> Option<&Flow> {
        Some(self)
    }

    async fn run(
        &self,
        shared: &mut SharedStore,
        params: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        let started = Instant::now();
        info!(flow = %self.name, "flow started");
        env.events().flow_started(&self.name);

        let result = self.traverse(shared, params, env).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        env.events()
            .flow_completed(&self.name, result.as_ref().ok(), duration_ms);
        if let Ok(action) = &result {
            info!(flow = %self.name, action = %action, duration_ms, "flow completed");
        }
        result
    }
}

impl Flow {
    async fn traverse(
        &self,
        shared: &mut SharedStore,
        params: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        let scope = params.with_layer(self.params_layer());
        self.traverse_scoped(shared, &scope, env).await
    }

    /// Hooked traversal with `scope` used as-is: the caller has already
    /// applied this flow's own params.
    pub(crate) async fn traverse_scoped(
        &self,
        shared: &mut SharedStore,
        scope: &Params,
        env: &RunEnv,
    ) -> Result<Action, FlowError> {
        let prep = self.hooks.prep(shared, scope).await.map_err(|source| {
            fail(env, FlowError::Prep {
                node: self.name.clone(),
                source,
            })
        })?;

        let last_action = self.orchestrate(shared, scope, env).await?;

        let action = self
            .hooks
            .post(shared, scope, prep, last_action)
            .await
            .map_err(|source| {
                fail(env, FlowError::Post {
                    node: self.name.clone(),
                    source,
                })
            })?;
        Ok(Action::from_option(action))
    }
}
