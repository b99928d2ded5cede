use crate::{Action, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted while a flow runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    FlowStarted {
        execution_id: ExecutionId,
        flow: String,
        timestamp: DateTime<Utc>,
    },
    FlowCompleted {
        execution_id: ExecutionId,
        flow: String,
        action: Option<Action>,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node: String,
        timestamp: DateTime<Utc>,
    },
    NodePrepared {
        execution_id: ExecutionId,
        node: String,
        input: Value,
        timestamp: DateTime<Utc>,
    },
    NodeExecuted {
        execution_id: ExecutionId,
        node: String,
        output: Value,
        timestamp: DateTime<Utc>,
    },
    NodeRetrying {
        execution_id: ExecutionId,
        node: String,
        /// Attempt that just failed, zero-based.
        attempt: u32,
        error: String,
        wait_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFallback {
        execution_id: ExecutionId,
        node: String,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeRouted {
        execution_id: ExecutionId,
        node: String,
        action: Action,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::FlowStarted { execution_id, .. }
            | ExecutionEvent::FlowCompleted { execution_id, .. }
            | ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodePrepared { execution_id, .. }
            | ExecutionEvent::NodeExecuted { execution_id, .. }
            | ExecutionEvent::NodeRetrying { execution_id, .. }
            | ExecutionEvent::NodeFallback { execution_id, .. }
            | ExecutionEvent::NodeRouted { execution_id, .. }
            | ExecutionEvent::NodeFailed { execution_id, .. } => *execution_id,
        }
    }
}

/// Event emitter scoped to one execution.
///
/// A disabled emitter drops every event, so the engine can report
/// unconditionally.
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    sender: Option<broadcast::Sender<ExecutionEvent>>,
}

impl EventEmitter {
    pub fn new(execution_id: ExecutionId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            execution_id,
            sender: Some(sender),
        }
    }

    pub fn disabled() -> Self {
        Self {
            execution_id: ExecutionId::new_v4(),
            sender: None,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    fn send(&self, build: impl FnOnce(ExecutionId, DateTime<Utc>) -> ExecutionEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(build(self.execution_id, Utc::now())).is_err() {
                tracing::trace!(execution_id = %self.execution_id, "no event subscribers");
            }
        }
    }

    pub fn flow_started(&self, flow: &str) {
        self.send(|execution_id, timestamp| ExecutionEvent::FlowStarted {
            execution_id,
            flow: flow.to_string(),
            timestamp,
        });
    }

    pub fn flow_completed(&self, flow: &str, action: Option<&Action>, duration_ms: u64) {
        self.send(|execution_id, timestamp| ExecutionEvent::FlowCompleted {
            execution_id,
            flow: flow.to_string(),
            action: action.cloned(),
            success: action.is_some(),
            duration_ms,
            timestamp,
        });
    }

    pub fn node_started(&self, node: &str) {
        self.send(|execution_id, timestamp| ExecutionEvent::NodeStarted {
            execution_id,
            node: node.to_string(),
            timestamp,
        });
    }

    /// Clones `input` only when someone is listening.
    pub fn node_prepared(&self, node: &str, input: &Value) {
        self.send(|execution_id, timestamp| ExecutionEvent::NodePrepared {
            execution_id,
            node: node.to_string(),
            input: input.clone(),
            timestamp,
        });
    }

    pub fn node_executed(&self, node: &str, output: &Value) {
        self.send(|execution_id, timestamp| ExecutionEvent::NodeExecuted {
            execution_id,
            node: node.to_string(),
            output: output.clone(),
            timestamp,
        });
    }

    pub fn node_retrying(&self, node: &str, attempt: u32, error: &str, wait_ms: u64) {
        self.send(|execution_id, timestamp| ExecutionEvent::NodeRetrying {
            execution_id,
            node: node.to_string(),
            attempt,
            error: error.to_string(),
            wait_ms,
            timestamp,
        });
    }

    pub fn node_fallback(&self, node: &str, attempts: u32, error: &str) {
        self.send(|execution_id, timestamp| ExecutionEvent::NodeFallback {
            execution_id,
            node: node.to_string(),
            attempts,
            error: error.to_string(),
            timestamp,
        });
    }

    pub fn node_routed(&self, node: &str, action: &Action) {
        self.send(|execution_id, timestamp| ExecutionEvent::NodeRouted {
            execution_id,
            node: node.to_string(),
            action: action.clone(),
            timestamp,
        });
    }

    pub fn node_failed(&self, node: &str, error: &str) {
        self.send(|execution_id, timestamp| ExecutionEvent::NodeFailed {
            execution_id,
            node: node.to_string(),
            error: error.to_string(),
            timestamp,
        });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("no event subscribers");
        }
    }

    pub fn create_emitter(&self, execution_id: ExecutionId) -> EventEmitter {
        EventEmitter::new(execution_id, self.sender.clone())
    }
}
