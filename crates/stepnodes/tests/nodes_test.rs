use std::sync::Arc;
use std::time::Duration;
use stepcore::{param_map, FlowError, FlowSpec, GraphError, NodeError, NodeSpec, SharedStore, Value};
use stepnodes::standard_registry;
use stepruntime::{load_flow, FlowRuntime, RecordingSleeper, RuntimeConfig};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

fn runtime(sleeper: &RecordingSleeper) -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(standard_registry()), RuntimeConfig::default())
        .with_sleeper(Arc::new(sleeper.clone()))
}

#[tokio::test]
async fn test_counter_drives_loop() {
    init_tracing();
    let mut spec = FlowSpec::new("loop");
    spec.add_node(
        NodeSpec::new("count", "control.counter")
            .with_config("key", "iterations")
            .with_config("limit", 3i64),
    );
    spec.add_node(
        NodeSpec::new("log", "debug.log")
            .with_config("key", "iterations")
            .with_config("message", "looping"),
    );
    spec.add_node(
        NodeSpec::new("finish", "shared.set")
            .with_config("key", "finished")
            .with_config("value", true),
    );
    spec.connect("count", "continue", "log");
    spec.chain("log", "count");
    spec.connect("count", "done", "finish");

    let mut shared = SharedStore::new();
    let result = runtime(&RecordingSleeper::new())
        .execute_spec(&spec, &mut shared)
        .await
        .unwrap();

    assert!(result.action.is_default());
    assert_eq!(shared.get("iterations"), Some(&Value::Number(3.0)));
    assert_eq!(shared.get("finished"), Some(&Value::Bool(true)));
}

fn branching(equals: Option<&str>) -> FlowSpec {
    let mut branch = NodeSpec::new("check", "control.branch").with_config("key", "status");
    if let Some(expected) = equals {
        branch = branch.with_config("equals", expected);
    }

    let mut spec = FlowSpec::new("branching");
    spec.add_node(branch);
    spec.add_node(NodeSpec::new("yes", "shared.set").with_config("key", "result").with_config("value", "yes"));
    spec.add_node(NodeSpec::new("no", "shared.set").with_config("key", "result").with_config("value", "no"));
    spec.connect("check", "true", "yes");
    spec.connect("check", "false", "no");
    spec
}

#[tokio::test]
async fn test_branch_routes_on_shared_value() {
    let registry = standard_registry();

    for (status, equals, expected) in [
        ("ok", Some("ok"), "yes"),
        ("failed", Some("ok"), "no"),
        ("anything", None, "yes"),
        ("", None, "no"),
    ] {
        let flow = load_flow(&branching(equals), &registry).unwrap();
        let mut shared = SharedStore::new();
        shared.set("status", status);
        flow.run(&mut shared).await.unwrap();
        assert_eq!(shared.get("result"), Some(&Value::from(expected)), "status {:?}", status);
    }
}

#[test]
fn test_branch_rejects_undeclared_edge() {
    let mut spec = branching(Some("ok"));
    spec.connect("check", "maybe", "no");

    let err = load_flow(&spec, &standard_registry()).unwrap_err();
    assert!(matches!(err, GraphError::UndeclaredAction { ref action, .. } if action == "maybe"));
}

#[tokio::test]
async fn test_json_transforms() {
    let mut spec = FlowSpec::new("json");
    spec.add_node(NodeSpec::new("parse", "transform.json_parse").with_config("input", "raw"));
    spec.add_node(
        NodeSpec::new("stringify", "transform.json_stringify")
            .with_config("input", "parsed")
            .with_config("output", "compact"),
    );
    spec.chain("parse", "stringify");
    let flow = load_flow(&spec, &standard_registry()).unwrap();

    let mut shared = SharedStore::new();
    shared.set("raw", r#"{"tags": ["x", "y"], "name": "ada"}"#);
    flow.run(&mut shared).await.unwrap();

    let parsed = shared.get("parsed").and_then(Value::as_object).unwrap();
    assert_eq!(parsed["name"], Value::from("ada"));
    assert_eq!(
        shared.get("compact"),
        Some(&Value::from(r#"{"name":"ada","tags":["x","y"]}"#))
    );

    let mut bad = SharedStore::new();
    bad.set("raw", "{not json");
    let err = flow.run(&mut bad).await.unwrap_err();
    assert!(matches!(err, FlowError::Exec { ref node, .. } if node == "parse"));

    let mut wrong_type = SharedStore::new();
    wrong_type.set("raw", 42i64);
    let err = flow.run(&mut wrong_type).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Prep { source: NodeError::InvalidInputType { ref actual, .. }, .. } if actual == "number"
    ));
}

#[tokio::test]
async fn test_shared_set_collects_batch_params() {
    let mut per_file = FlowSpec::new("per-file");
    per_file.add_node(
        NodeSpec::new("collect", "shared.set")
            .with_config("key", "seen")
            .with_config("from_param", "file")
            .with_config("append", true),
    );

    let mut spec = FlowSpec::new("files");
    spec.add_node(NodeSpec::batch_flow(
        "each",
        per_file,
        vec![
            param_map([("file", "a.txt")]),
            param_map([("file", "b.txt")]),
            param_map([("file", "c.txt")]),
        ],
    ));

    let mut shared = SharedStore::new();
    runtime(&RecordingSleeper::new())
        .execute_spec(&spec, &mut shared)
        .await
        .unwrap();

    assert_eq!(
        shared.get("seen"),
        Some(&Value::Array(vec!["a.txt".into(), "b.txt".into(), "c.txt".into()]))
    );
    assert!(!shared.contains("file"));
}

#[test]
fn test_factories_validate_config() {
    let registry = standard_registry();

    let mut missing_key = FlowSpec::new("missing-key");
    missing_key.add_node(NodeSpec::new("set", "shared.set").with_config("value", 1i64));
    assert!(matches!(
        load_flow(&missing_key, &registry),
        Err(GraphError::NodeCreation { source: NodeError::Configuration(_), .. })
    ));

    let mut bad_limit = FlowSpec::new("bad-limit");
    bad_limit.add_node(NodeSpec::new("count", "control.counter").with_config("limit", "three"));
    assert!(load_flow(&bad_limit, &registry).is_err());

    let mut negative = FlowSpec::new("negative");
    negative.add_node(NodeSpec::new("wait", "time.delay").with_config("delay_ms", -5i64));
    assert!(load_flow(&negative, &registry).is_err());
}

#[tokio::test]
async fn test_delay_passes_through() {
    let mut spec = FlowSpec::new("wait");
    spec.add_node(NodeSpec::new("wait", "time.delay").with_config("delay_ms", 1i64));
    spec.add_node(NodeSpec::new("done", "shared.set").with_config("key", "done").with_config("value", true));
    spec.chain("wait", "done");

    let mut shared = SharedStore::new();
    load_flow(&spec, &standard_registry())
        .unwrap()
        .run(&mut shared)
        .await
        .unwrap();
    assert_eq!(shared.get("done"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_http_network_errors_are_retried() {
    init_tracing();
    let mut spec = FlowSpec::new("fetch");
    spec.add_node(
        NodeSpec::new("fetch", "http.request")
            .with_config("url", "http://127.0.0.1:1/unreachable")
            .with_retry(3, 10),
    );

    let sleeper = RecordingSleeper::new();
    let err = runtime(&sleeper)
        .execute_spec(&spec, &mut SharedStore::new())
        .await
        .unwrap_err();

    match err {
        FlowError::Exec { node, attempts, source, .. } => {
            assert_eq!(node, "fetch");
            assert_eq!(attempts, 3);
            // refused connection, or an error status when a proxy answers instead
            assert!(
                matches!(source, NodeError::Compute { .. } | NodeError::ExecutionFailed(_)),
                "{:?}",
                source
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(10); 2]);
}

#[tokio::test]
async fn test_http_requires_url() {
    let mut spec = FlowSpec::new("fetch");
    spec.add_node(NodeSpec::new("fetch", "http.request"));

    let err = runtime(&RecordingSleeper::new())
        .execute_spec(&spec, &mut SharedStore::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Prep { source: NodeError::MissingParam(ref p), .. } if p == "url"));
}

#[test]
fn test_registry_lists_standard_nodes() {
    let registry = standard_registry();
    let types = registry.list_node_types();
    for expected in [
        "control.branch",
        "control.counter",
        "debug.log",
        "http.request",
        "shared.set",
        "time.delay",
        "transform.json_parse",
        "transform.json_stringify",
    ] {
        assert!(types.iter().any(|t| t == expected), "missing {}", expected);
    }
    assert_eq!(
        registry.get_metadata("control.counter").unwrap().actions,
        vec!["continue".to_string(), "done".to_string()]
    );
}
