// crates/stepruntime/tests/batch_test.rs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepcore::{
    param_map, Action, BatchNode, ExecContext, FlowError, Node, NodeError, ParamMap, Params,
    RetryPolicy, SharedStore, Value,
};
use stepruntime::{Batch, BatchFlow, BatchFlowHooks, Flow, FlowHooks, RecordingSleeper, RunEnv};

/// Doubles numbers from `shared["numbers"]`.
///
/// Item `i` fails its first `failures[i]` attempts; "bad" items always fail.
struct Doubler {
    failures: BTreeMap<usize, u32>,
    substitute: Option<Value>,
    attempts: Arc<Mutex<Vec<(usize, u32)>>>,
}

impl Doubler {
    fn new(failures: &[(usize, u32)]) -> Self {
        Self {
            failures: failures.iter().copied().collect(),
            substitute: None,
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl BatchNode for Doubler {
    fn name(&self) -> &str {
        "doubler"
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(5))
    }

    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Vec<Value>, NodeError> {
        Ok(shared
            .get("numbers")
            .and_then(Value::as_array)
            .map(<[Value]>::to_vec)
            .unwrap_or_default())
    }

    async fn exec(&self, item: &Value, ctx: &ExecContext) -> Result<Value, NodeError> {
        let index = ctx.item_index.expect("batch items carry their index");
        self.attempts.lock().unwrap().push((index, ctx.current_retry));

        let number = item.as_f64().ok_or_else(|| NodeError::failed(format!("not a number: {}", item)))?;
        let failures = self.failures.get(&index).copied().unwrap_or(0);
        if ctx.current_retry < failures {
            return Err(NodeError::failed(format!("item {} attempt {}", index, ctx.current_retry)));
        }
        Ok(Value::from(number * 2.0))
    }

    async fn exec_fallback(
        &self,
        _item: &Value,
        error: NodeError,
        _ctx: &ExecContext,
    ) -> Result<Value, NodeError> {
        self.substitute.clone().ok_or(error)
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        items: Vec<Value>,
        results: Vec<Value>,
    ) -> Result<Option<Action>, NodeError> {
        assert_eq!(items.len(), results.len());
        shared.set("doubled", results);
        Ok(Some("doubled".into()))
    }
}

fn shared_with_numbers(numbers: Vec<Value>) -> SharedStore {
    let mut shared = SharedStore::new();
    shared.set("numbers", numbers);
    shared
}

#[tokio::test]
async fn test_batch_preserves_order_across_retries() {
    let node = Doubler::new(&[(1, 2), (2, 1)]);
    let attempts = node.attempts.clone();

    let mut flow = Flow::new("double");
    flow.add(Batch::new(node)).unwrap();

    let sleeper = RecordingSleeper::new();
    let env = RunEnv::detached().with_sleeper(Arc::new(sleeper.clone()));
    let mut shared = shared_with_numbers(vec![1i64.into(), 2i64.into(), 3i64.into()]);
    let action = flow.run_with(&mut shared, &env).await.unwrap();

    assert_eq!(action, "doubled");
    assert_eq!(
        shared.get("doubled"),
        Some(&Value::Array(vec![2.0.into(), 4.0.into(), 6.0.into()]))
    );
    // the retry counter restarts for every item
    assert_eq!(
        *attempts.lock().unwrap(),
        vec![(0, 0), (1, 0), (1, 1), (1, 2), (2, 0), (2, 1)]
    );
    assert_eq!(sleeper.calls().len(), 3);
}

#[tokio::test]
async fn test_item_fallback_is_isolated() {
    let mut node = Doubler::new(&[]);
    node.substitute = Some(Value::Null);

    let mut flow = Flow::new("lenient");
    flow.add(Batch::new(node)).unwrap();

    let sleeper = RecordingSleeper::new();
    let env = RunEnv::detached().with_sleeper(Arc::new(sleeper));
    let mut shared = shared_with_numbers(vec![1i64.into(), "bad".into(), 3i64.into()]);
    flow.run_with(&mut shared, &env).await.unwrap();

    assert_eq!(
        shared.get("doubled"),
        Some(&Value::Array(vec![2.0.into(), Value::Null, 6.0.into()]))
    );
}

#[tokio::test]
async fn test_item_fallback_error_aborts_batch() {
    let mut flow = Flow::new("strict");
    flow.add(Batch::new(Doubler::new(&[]))).unwrap();

    let env = RunEnv::detached().with_sleeper(Arc::new(RecordingSleeper::new()));
    let mut shared = shared_with_numbers(vec![1i64.into(), "bad".into(), 3i64.into()]);
    let err = flow.run_with(&mut shared, &env).await.unwrap_err();

    assert!(matches!(err, FlowError::Exec { item: Some(1), attempts: 3, .. }), "{:?}", err);
    assert!(!shared.contains("doubled"), "no partial results are delivered");
}

#[tokio::test]
async fn test_empty_batch_posts_empty_list() {
    let mut flow = Flow::new("empty");
    flow.add(Batch::new(Doubler::new(&[]))).unwrap();

    let mut shared = SharedStore::new();
    flow.run(&mut shared).await.unwrap();
    assert_eq!(shared.get("doubled"), Some(&Value::Array(Vec::new())));
}

/// Appends the flattened parameter context it sees to `shared["seen"]`.
struct Probe;

#[async_trait]
impl Node for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn prep(&self, _shared: &SharedStore, params: &Params) -> Result<Value, NodeError> {
        Ok(Value::Object(params.flatten()))
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        prep: Value,
        _exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        shared.push("seen", prep)?;
        Ok(None)
    }
}

fn seen(shared: &SharedStore) -> Vec<ParamMap> {
    shared
        .get("seen")
        .and_then(Value::as_array)
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

/// Lists directories from the shared store, one batch per directory.
struct Directories;

#[async_trait]
impl BatchFlowHooks for Directories {
    async fn prep(&self, shared: &SharedStore, _params: &Params) -> Result<Vec<ParamMap>, NodeError> {
        let dirs = shared.require("directories")?.as_array().unwrap_or_default();
        Ok(dirs
            .iter()
            .map(|dir| param_map([("directory", dir.clone())]))
            .collect())
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        batches: Vec<ParamMap>,
    ) -> Result<Option<Action>, NodeError> {
        shared.set("directories_done", batches.len());
        Ok(Some("scanned".into()))
    }
}

fn nested_scan(files: Vec<ParamMap>) -> BatchFlow {
    let mut per_file = Flow::new("per-file");
    per_file.add(Probe).unwrap();
    let files = BatchFlow::from_batches(per_file, files);

    let mut per_dir = Flow::new("per-directory");
    per_dir.add(files).unwrap();
    BatchFlow::new(per_dir, Directories)
}

#[tokio::test]
async fn test_nested_batch_flow_merges_params() {
    let scan = nested_scan(vec![param_map([("filename", "f.txt")])]);

    let mut shared = SharedStore::new();
    shared.set("directories", vec![Value::from("/a")]);
    let action = scan.run(&mut shared).await.unwrap();

    assert_eq!(action, "scanned");
    assert_eq!(seen(&shared), vec![param_map([("directory", "/a"), ("filename", "f.txt")])]);
    assert_eq!(shared.get("directories_done"), Some(&Value::Number(1.0)));
}

#[tokio::test]
async fn test_nested_batch_flow_iterates_in_order() {
    let scan = nested_scan(vec![
        param_map([("filename", "1.txt")]),
        param_map([("filename", "2.txt")]),
    ]);

    let mut shared = SharedStore::new();
    shared.set("directories", vec![Value::from("/a"), Value::from("/b")]);
    scan.run(&mut shared).await.unwrap();

    let pairs: Vec<(String, String)> = seen(&shared)
        .iter()
        .map(|p| (p["directory"].to_string(), p["filename"].to_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("/a".to_string(), "1.txt".to_string()),
            ("/a".to_string(), "2.txt".to_string()),
            ("/b".to_string(), "1.txt".to_string()),
            ("/b".to_string(), "2.txt".to_string()),
        ]
    );
    assert!(!shared.contains("directory"));
    assert!(!shared.contains("filename"));
}

#[tokio::test]
async fn test_iterations_are_isolated_and_override_own_params() {
    let mut inner = Flow::new("jobs").with_params(param_map([("mode", "default"), ("keep", "x")]));
    inner.add(Probe).unwrap();
    let jobs = BatchFlow::from_batches(
        inner,
        vec![param_map([("mode", "override"), ("first", "1")]), param_map([("second", "2")])],
    );

    let mut shared = SharedStore::new();
    let action = jobs.run(&mut shared).await.unwrap();

    assert!(action.is_default());
    assert_eq!(
        seen(&shared),
        vec![
            param_map([("mode", "override"), ("keep", "x"), ("first", "1")]),
            param_map([("mode", "default"), ("keep", "x"), ("second", "2")]),
        ]
    );
}

#[tokio::test]
async fn test_batch_flow_prep_failure_is_fatal() {
    let scan = nested_scan(vec![param_map([("filename", "f.txt")])]);

    let err = scan.run(&mut SharedStore::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::Prep { ref node, .. } if node == "per-directory"));
}

/// Counts its own invocations and records the iteration's `file` param.
struct CountingHooks;

#[async_trait]
impl FlowHooks for CountingHooks {
    async fn prep(&self, _shared: &SharedStore, params: &Params) -> Result<Value, NodeError> {
        Ok(params.get("file").cloned().unwrap_or(Value::Null))
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        prep: Value,
        last_action: Action,
    ) -> Result<Option<Action>, NodeError> {
        let posts = shared.get("hook_posts").and_then(Value::as_f64).unwrap_or(0.0);
        shared.set("hook_posts", posts + 1.0);
        shared.push("hook_files", prep)?;
        Ok(Some(last_action))
    }
}

#[tokio::test]
async fn test_wrapped_flow_hooks_run_per_iteration() {
    let mut inner = Flow::new("per-file").with_hooks(CountingHooks);
    inner.add(Probe).unwrap();
    let files = BatchFlow::from_batches(
        inner,
        vec![param_map([("file", "a.txt")]), param_map([("file", "b.txt")])],
    );

    let mut shared = SharedStore::new();
    files.run(&mut shared).await.unwrap();

    assert_eq!(shared.get("hook_posts"), Some(&Value::Number(2.0)));
    assert_eq!(
        shared.get("hook_files"),
        Some(&Value::Array(vec!["a.txt".into(), "b.txt".into()]))
    );
    assert_eq!(seen(&shared).len(), 2);
}
