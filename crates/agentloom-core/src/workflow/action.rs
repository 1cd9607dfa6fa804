//! The action executor contract between the engine and the host application.
//!
//! The engine never performs side effects itself: action nodes delegate to a
//! host-supplied `ActionExecutor` that interprets the node's `ActionConfig`
//! payload (tool call, sub-agent invocation, HTTP request, notification) and
//! returns an opaque JSON value. The engine only inspects the result to store
//! it under the node's `output_variable`.
//!
//! The cancellation token is the cooperative cancellation channel: when an
//! execution is cancelled, in-flight invocations should observe the token
//! and stop promptly.

use std::collections::HashMap;

use agentloom_types::workflow::WorkflowNode;
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors an action invocation can produce.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The host's action implementation failed.
    #[error("action failed: {0}")]
    Failed(String),

    /// The invocation observed the cancellation token and stopped.
    #[error("action cancelled")]
    Cancelled,
}

/// Host-supplied executor for action nodes.
///
/// Object-safe (boxed futures) so the engine can hold it as
/// `Arc<dyn ActionExecutor>`. Arguments are passed by value: invocations are
/// spawned as independent tasks and must not borrow from the engine.
pub trait ActionExecutor: Send + Sync {
    fn execute(
        &self,
        node: WorkflowNode,
        variables: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, ActionError>>;
}

/// Adapter turning an async closure into an `ActionExecutor`.
///
/// Mostly used in tests and small hosts:
/// ```ignore
/// let executor = ActionFn::new(|_node, vars, _cancel| async move {
///     Ok(serde_json::json!({ "echo": vars }))
/// });
/// ```
pub struct ActionFn<F>(F);

impl<F, Fut> ActionFn<F>
where
    F: Fn(WorkflowNode, HashMap<String, Value>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> ActionExecutor for ActionFn<F>
where
    F: Fn(WorkflowNode, HashMap<String, Value>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
{
    fn execute(
        &self,
        node: WorkflowNode,
        variables: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, ActionError>> {
        Box::pin((self.0)(node, variables, cancel))
    }
}
