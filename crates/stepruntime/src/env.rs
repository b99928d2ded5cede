use async_trait::async_trait;
use stepcore::EventEmitter;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocking delay used between exec attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays without waiting. Useful for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(duration);
        }
    }
}

/// Per-execution services threaded through every node invocation.
#[derive(Clone)]
pub struct RunEnv {
    sleeper: Arc<dyn Sleeper>,
    events: EventEmitter,
}

impl RunEnv {
    pub fn new(sleeper: Arc<dyn Sleeper>, events: EventEmitter) -> Self {
        Self { sleeper, events }
    }

    /// Real sleeps, no event subscribers.
    pub fn detached() -> Self {
        Self::new(Arc::new(TokioSleeper), EventEmitter::disabled())
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }
}

impl Default for RunEnv {
    fn default() -> Self {
        Self::detached()
    }
}
