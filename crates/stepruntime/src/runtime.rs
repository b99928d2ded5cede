use crate::env::{RunEnv, Sleeper, TokioSleeper};
use crate::flow::Flow;
use crate::loader::load_flow;
use crate::registry::NodeRegistry;
use crate::runnable::Runnable;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use stepcore::{
    Action, EventBus, EventEmitter, ExecutionEvent, ExecutionId, FlowError, FlowSpec, GraphError,
    Params, SharedStore,
};

/// Main runtime for executing flows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    event_bus: Arc<EventBus>,
    sleeper: Arc<dyn Sleeper>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            registry,
            event_bus,
            sleeper: Arc::new(TokioSleeper),
            config,
        }
    }

    /// Replace the sleeper used for retry waits
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a flow from a declarative spec using this runtime's registry
    pub fn load(&self, spec: &FlowSpec) -> Result<Flow, GraphError> {
        load_flow(spec, &self.registry)
    }

    /// Execute any runnable as the top of a run
    pub async fn execute(
        &self,
        runnable: &dyn Runnable,
        shared: &mut SharedStore,
    ) -> Result<ExecutionResult, FlowError> {
        let execution_id = ExecutionId::new_v4();
        let started = Instant::now();
        let env = self.env(execution_id);

        tracing::info!("Starting execution {} of '{}'", execution_id, runnable.name());
        let action = runnable.run(shared, &Params::new(), &env).await?;

        Ok(ExecutionResult {
            execution_id,
            action,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Load and execute a spec in one step
    pub async fn execute_spec(
        &self,
        spec: &FlowSpec,
        shared: &mut SharedStore,
    ) -> Result<ExecutionResult, FlowError> {
        let flow = self.load(spec)?;
        self.execute(&flow, shared).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    fn env(&self, execution_id: ExecutionId) -> RunEnv {
        let events = if self.config.emit_events {
            self.event_bus.create_emitter(execution_id)
        } else {
            EventEmitter::disabled()
        };
        RunEnv::new(self.sleeper.clone(), events)
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    pub emit_events: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            emit_events: true,
        }
    }
}

/// Result of a top-level execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    /// Terminal action of the run
    pub action: Action,
    pub duration_ms: u64,
}
