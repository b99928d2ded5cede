//! The prep → exec → post lifecycle shared by plain and batch nodes.

use crate::env::RunEnv;
use std::future::Future;
use stepcore::{Action, ExecContext, FlowError, Node, NodeError, Params, RetryPolicy, SharedStore, Value};
use tracing::{debug, info, warn};

/// Last failure of an exec that ran out of attempts.
pub(crate) struct Exhausted {
    pub error: NodeError,
    pub ctx: ExecContext,
}

impl Exhausted {
    pub fn attempts(&self) -> u32 {
        self.ctx.current_retry + 1
    }
}

/// Attempt `exec` up to `policy.max_retries` times, sleeping `policy.wait`
/// between attempts. `current_retry` starts at 0 for every call.
pub(crate) async fn exec_with_retry<F, Fut>(
    node: &str,
    policy: &RetryPolicy,
    params: &Params,
    item_index: Option<usize>,
    env: &RunEnv,
    mut exec: F,
) -> Result<Value, Exhausted>
where
    F: FnMut(ExecContext) -> Fut,
    Fut: Future<Output = (ExecContext, Result<Value, NodeError>)>,
{
    let max_retries = policy.max_retries.max(1);
    let mut current_retry = 0;

    loop {
        let ctx = ExecContext {
            current_retry,
            max_retries,
            item_index,
            params: params.clone(),
        };
        let (ctx, error) = match exec(ctx).await {
            (_, Ok(value)) => return Ok(value),
            (ctx, Err(error)) => (ctx, error),
        };

        if ctx.is_last_attempt() {
            return Err(Exhausted { error, ctx });
        }

        warn!(
            node,
            attempt = current_retry,
            max_retries,
            error = %error,
            "exec failed, retrying"
        );
        env.events().node_retrying(
            node,
            current_retry,
            &error.to_string(),
            policy.wait.as_millis() as u64,
        );
        if !policy.wait.is_zero() {
            env.sleeper().sleep(policy.wait).await;
        }
        current_retry += 1;
    }
}

/// Report a fatal node error and hand it back for propagation.
pub(crate) fn fail(env: &RunEnv, err: FlowError) -> FlowError {
    let node = err.node().unwrap_or("<flow>");
    tracing::error!(node, error = %err, "node failed");
    env.events().node_failed(node, &err.to_string());
    err
}

/// Check a returned action against the node's declared set.
pub(crate) fn check_action(node: &str, declared: &[&str], action: &Action) -> Result<(), FlowError> {
    if declared.is_empty() || declared.contains(&action.as_str()) {
        Ok(())
    } else {
        Err(FlowError::UndeclaredAction {
            node: node.to_string(),
            action: action.clone(),
        })
    }
}

pub(crate) async fn run_node<N: Node + ?Sized>(
    node: &N,
    shared: &mut SharedStore,
    params: &Params,
    env: &RunEnv,
) -> Result<Action, FlowError> {
    let name = node.name();
    info!(node = name, "node started");
    env.events().node_started(name);

    let prep = node.prep(shared, params).await.map_err(|source| {
        fail(env, FlowError::Prep {
            node: name.to_string(),
            source,
        })
    })?;
    debug!(node = name, input = %prep, "prepared");
    env.events().node_prepared(name, &prep);

    let policy = node.retry_policy();
    let attempt = exec_with_retry(name, &policy, params, None, env, |ctx| {
        let prep = &prep;
        async move {
            let result = node.exec(prep, &ctx).await;
            (ctx, result)
        }
    })
    .await;

    let output = match attempt {
        Ok(output) => output,
        Err(exhausted) => {
            let attempts = exhausted.attempts();
            warn!(node = name, attempts, error = %exhausted.error, "retries exhausted, invoking fallback");
            env.events()
                .node_fallback(name, attempts, &exhausted.error.to_string());
            node.exec_fallback(&prep, exhausted.error, &exhausted.ctx)
                .await
                .map_err(|source| {
                    fail(env, FlowError::Exec {
                        node: name.to_string(),
                        attempts,
                        item: None,
                        source,
                    })
                })?
        }
    };
    debug!(node = name, output = %output, "executed");
    env.events().node_executed(name, &output);

    let action = node
        .post(shared, params, prep, output)
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
