// crates/stepruntime/tests/lifecycle_test.rs

use async_trait::async_trait;
use std::error::Error as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepcore::{
    Action, ExecContext, FlowError, GraphError, Node, NodeError, Params, RetryPolicy, SharedStore,
    Value,
};
use stepruntime::{Flow, RecordingSleeper, RunEnv};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Fails its first `fail_times` attempts, then returns "ok".
struct Flaky {
    fail_times: u32,
    policy: RetryPolicy,
    substitute: Option<Value>,
    calls: Arc<AtomicU32>,
    seen_retries: Arc<Mutex<Vec<u32>>>,
    fallbacks: Arc<AtomicU32>,
}

impl Flaky {
    fn new(fail_times: u32, max_retries: u32, wait: Duration) -> Self {
        Self {
            fail_times,
            policy: RetryPolicy::new(max_retries, wait),
            substitute: None,
            calls: Arc::new(AtomicU32::new(0)),
            seen_retries: Arc::new(Mutex::new(Vec::new())),
            fallbacks: Arc::new(AtomicU32::new(0)),
        }
    }

    fn with_substitute(mut self, value: impl Into<Value>) -> Self {
        self.substitute = Some(value.into());
        self
    }
}

#[async_trait]
impl Node for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn exec(&self, _prep: &Value, ctx: &ExecContext) -> Result<Value, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_retries.lock().unwrap().push(ctx.current_retry);
        if call < self.fail_times {
            Err(NodeError::failed(format!("attempt {} failed", call)))
        } else {
            Ok(Value::from("ok"))
        }
    }

    async fn exec_fallback(
        &self,
        _prep: &Value,
        error: NodeError,
        _ctx: &ExecContext,
    ) -> Result<Value, NodeError> {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        match &self.substitute {
            Some(value) => Ok(value.clone()),
            None => Err(error),
        }
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        shared.set("result", exec);
        Ok(None)
    }
}

fn env_with(sleeper: &RecordingSleeper) -> RunEnv {
    RunEnv::detached().with_sleeper(Arc::new(sleeper.clone()))
}

#[tokio::test]
async fn test_single_attempt_goes_straight_to_fallback() {
    init_tracing();
    let node = Flaky::new(u32::MAX, 1, Duration::from_secs(5)).with_substitute("fallback");
    let fallbacks = node.fallbacks.clone();
    let calls = node.calls.clone();

    let mut flow = Flow::new("single");
    flow.add(node).unwrap();

    let sleeper = RecordingSleeper::new();
    let mut shared = SharedStore::new();
    let action = flow.run_with(&mut shared, &env_with(&sleeper)).await.unwrap();

    assert_eq!(action, "default");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
    assert!(sleeper.calls().is_empty(), "a single attempt must never sleep");
    assert_eq!(shared.get("result"), Some(&Value::from("fallback")));
}

#[tokio::test]
async fn test_succeeds_on_last_attempt_without_fallback() {
    init_tracing();
    let wait = Duration::from_millis(250);
    let node = Flaky::new(2, 3, wait);
    let seen = node.seen_retries.clone();
    let fallbacks = node.fallbacks.clone();

    let mut flow = Flow::new("retrying");
    flow.add(node).unwrap();

    let sleeper = RecordingSleeper::new();
    let mut shared = SharedStore::new();
    flow.run_with(&mut shared, &env_with(&sleeper)).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    assert_eq!(sleeper.calls(), vec![wait, wait]);
    assert_eq!(shared.get("result"), Some(&Value::from("ok")));
}

#[tokio::test]
async fn test_zero_wait_never_sleeps() {
    let node = Flaky::new(2, 3, Duration::ZERO);
    let mut flow = Flow::new("eager");
    flow.add(node).unwrap();

    let sleeper = RecordingSleeper::new();
    let mut shared = SharedStore::new();
    flow.run_with(&mut shared, &env_with(&sleeper)).await.unwrap();

    assert!(sleeper.calls().is_empty());
}

#[tokio::test]
async fn test_default_fallback_aborts_run() {
    init_tracing();
    let node = Flaky::new(u32::MAX, 3, Duration::from_millis(10));
    let fallbacks = node.fallbacks.clone();

    let mut flow = Flow::new("doomed");
    flow.add(node).unwrap();

    let sleeper = RecordingSleeper::new();
    let mut shared = SharedStore::new();
    let err = flow.run_with(&mut shared, &env_with(&sleeper)).await.unwrap_err();

    match &err {
        FlowError::Exec { node, attempts, item, source } => {
            assert_eq!(node, "flaky");
            assert_eq!(*attempts, 3);
            assert_eq!(*item, None);
            assert!(source.to_string().contains("attempt 2 failed"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
    assert_eq!(sleeper.calls().len(), 2);
    assert!(shared.get("result").is_none(), "post must not run after a fatal exec");
}

#[derive(Debug)]
struct DiskFull;

impl std::fmt::Display for DiskFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("disk full")
    }
}

impl std::error::Error for DiskFull {}

struct Writer;

#[async_trait]
impl Node for Writer {
    fn name(&self) -> &str {
        "writer"
    }

    async fn exec(&self, _prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        Err(NodeError::compute(DiskFull))
    }
}

#[tokio::test]
async fn test_compute_error_preserved_as_cause() {
    let mut flow = Flow::new("write");
    flow.add(Writer).unwrap();

    let mut shared = SharedStore::new();
    let err = flow.run(&mut shared).await.unwrap_err();

    let node_error = err.source().expect("exec failure carries the node error");
    let compute = node_error.source().expect("node error carries the compute error");
    assert_eq!(compute.to_string(), "disk full");
    assert_eq!(err.node(), Some("writer"));

    match &err {
        FlowError::Exec {
            source: NodeError::Compute { source, .. },
            ..
        } => assert!(source.downcast_ref::<DiskFull>().is_some()),
        other => panic!("unexpected error: {:?}", other),
    }
}

/// Fails in prep or post depending on `phase`; counts exec calls.
struct Broken {
    phase: &'static str,
    execs: Arc<AtomicU32>,
}

#[async_trait]
impl Node for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(5, Duration::ZERO)
    }

    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Value, NodeError> {
        if self.phase == "prep" {
            shared.require("missing")?;
        }
        Ok(Value::Null)
    }

    async fn exec(&self, _prep: &Value, _ctx: &ExecContext) -> Result<Value, NodeError> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }

    async fn post(
        &self,
        _shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        _exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        if self.phase == "post" {
            return Err(NodeError::Configuration("bad output".to_string()));
        }
        Ok(None)
    }
}

#[tokio::test]
async fn test_prep_failure_is_fatal_and_not_retried() {
    let execs = Arc::new(AtomicU32::new(0));
    let mut flow = Flow::new("prep");
    flow.add(Broken { phase: "prep", execs: execs.clone() }).unwrap();

    let err = flow.run(&mut SharedStore::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::Prep { source: NodeError::MissingShared(ref key), .. } if key == "missing"));
    assert_eq!(execs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_post_failure_is_fatal() {
    let execs = Arc::new(AtomicU32::new(0));
    let mut flow = Flow::new("post");
    flow.add(Broken { phase: "post", execs: execs.clone() }).unwrap();

    let err = flow.run(&mut SharedStore::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::Post { .. }));
    assert_eq!(execs.load(Ordering::SeqCst), 1);
}

struct Liar;

#[async_trait]
impl Node for Liar {
    fn name(&self) -> &str {
        "liar"
    }

    fn actions(&self) -> &[&str] {
        &["yes", "no"]
    }

    async fn post(
        &self,
        _shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        _exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        Ok(Some("maybe".into()))
    }
}

#[tokio::test]
async fn test_undeclared_action_at_run_time() {
    let mut flow = Flow::new("liar");
    flow.add(Liar).unwrap();

    let err = flow.run(&mut SharedStore::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::UndeclaredAction { ref action, .. } if action == "maybe"));
}

#[test]
fn test_zero_max_retries_rejected_on_add() {
    let mut flow = Flow::new("invalid");
    let err = flow.add(Flaky::new(0, 0, Duration::ZERO)).unwrap_err();
    assert!(matches!(err, GraphError::InvalidRetryPolicy { .. }));
}
