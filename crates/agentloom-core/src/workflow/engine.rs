//! The step-wise workflow execution engine.
//!
//! `ExecutionEngine` advances a frontier of current nodes one tick at a
//! time. Within a tick every frontier node runs as its own task in a
//! `tokio::JoinSet` against a snapshot of the execution variables; the
//! engine joins the whole frontier, merges the results into the execution
//! record, and computes the de-duplicated successor union as the next
//! frontier. An empty union completes the execution.
//!
//! # Semantics
//!
//! - Trigger nodes are pass-throughs: they are expanded (completed and
//!   replaced by their successors) at the start of a tick and do not
//!   consume one.
//! - Condition and loop nodes route dynamically; their `next_nodes` lists
//!   are advisory.
//! - Merge nodes with `wait_all` stay deferred in the frontier until every
//!   static predecessor has completed; with `wait_all` false the first
//!   arrival proceeds and later arrivals are dropped.
//! - Delay nodes suspend only their own task and race the execution's
//!   cancellation token.
//! - Action failures consult the workflow's retry policy; exhausted or
//!   disabled retry fails the whole execution.
//! - Subworkflow nodes delegate to a nested execution, depth-capped.
//!
//! The engine never mutates a `Workflow`. The definition in force is pinned
//! when the execution starts, so concurrent registry updates cannot change
//! a running execution's graph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use agentloom_types::error::StoreError;
use agentloom_types::workflow::{
    DelayKind, ExecutionLog, ExecutionStatus, LogLevel, LoopState, NodeConfig,
    NodeExecutionResult, NodeRunStatus, Workflow, WorkflowExecution, WorkflowNode,
    WorkflowSettings,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{ExecutionStore, WorkflowStore};

use super::action::{ActionError, ActionExecutor};
use super::condition;
use super::graph::GraphError;
use super::loop_control;
use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum subworkflow nesting depth.
pub const MAX_SUBWORKFLOW_DEPTH: u32 = 5;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from engine operations.
///
/// Structural errors fail the calling operation synchronously. Runtime
/// action failures are captured per-node on the execution record instead
/// and escalate to `status = failed`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("workflow {0} has no trigger nodes")]
    NoTriggerNodes(Uuid),

    #[error("execution exceeded its time limit")]
    ExecutionTimeout,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Result of one `execute_step` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepOutcome {
    /// Status after the step.
    pub status: ExecutionStatus,
    /// Node ids processed during the step (triggers included).
    pub processed: Vec<Uuid>,
    /// The frontier after the step.
    pub frontier: Vec<Uuid>,
}

/// What one frontier node produced, reported back to the merge phase.
enum NodeOutcome {
    Completed {
        node_id: Uuid,
        attempt: u32,
        started_at: DateTime<Utc>,
        output: Value,
        successors: Vec<Uuid>,
        variable_updates: Vec<(String, Value)>,
        loop_state: Option<LoopState>,
    },
    Failed {
        node_id: Uuid,
        attempt: u32,
        started_at: DateTime<Utc>,
        error: String,
    },
    /// The node observed the cancellation token; nothing is recorded.
    Cancelled { node_id: Uuid },
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Step interpreter over injected workflow/execution stores.
///
/// Cheap to clone; all state is behind `Arc`. Multiple engines over
/// distinct stores are fully independent.
pub struct ExecutionEngine<W, E> {
    workflows: Arc<W>,
    executions: Arc<E>,
    action_executor: Arc<dyn ActionExecutor>,
    /// Definitions pinned per execution id at start.
    definitions: Arc<DashMap<Uuid, Arc<Workflow>>>,
    /// Cancellation tokens per execution id.
    tokens: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<W, E> Clone for ExecutionEngine<W, E> {
    fn clone(&self) -> Self {
        Self {
            workflows: Arc::clone(&self.workflows),
            executions: Arc::clone(&self.executions),
            action_executor: Arc::clone(&self.action_executor),
            definitions: Arc::clone(&self.definitions),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

/// Helpers for the subworkflow recursion boundary.
///
/// Boxing the recursive `run_to_completion` future in a distinct module moves
/// the `Send` auto-trait check off the engine's async opaque types while they
/// are still being defined in the parent module, which rustc cannot do inline.
mod recurse {
    use super::*;

    pub(super) fn drive_to_completion<W, E>(
        engine: ExecutionEngine<W, E>,
        execution_id: Uuid,
    ) -> BoxFuture<'static, Result<WorkflowExecution, EngineError>>
    where
        W: WorkflowStore + 'static,
        E: ExecutionStore + 'static,
    {
        Box::pin(async move { engine.run_to_completion(execution_id).await })
    }
}

impl<W, E> ExecutionEngine<W, E>
where
    W: WorkflowStore + 'static,
    E: ExecutionStore + 'static,
{
    pub fn new(
        workflows: Arc<W>,
        executions: Arc<E>,
        action_executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            workflows,
            executions,
            action_executor,
            definitions: Arc::new(DashMap::new()),
            tokens: Arc::new(DashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start a new execution of a workflow.
    ///
    /// Seeds the variable namespace from declared defaults, then overrides
    /// with caller-supplied initial values; pins the workflow version; sets
    /// the frontier to the workflow's trigger nodes.
    pub async fn start_execution(
        &self,
        workflow_id: Uuid,
        initial_variables: HashMap<String, Value>,
    ) -> Result<WorkflowExecution, EngineError> {
        self.start_execution_at_depth(workflow_id, initial_variables, 0)
            .await
    }

    async fn start_execution_at_depth(
        &self,
        workflow_id: Uuid,
        initial_variables: HashMap<String, Value>,
        depth: u32,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        if workflow.triggers.is_empty() {
            return Err(EngineError::NoTriggerNodes(workflow_id));
        }

        let mut variables: HashMap<String, Value> = workflow
            .variables
            .iter()
            .filter_map(|v| v.default_value.clone().map(|d| (v.name.clone(), d)))
            .collect();
        variables.extend(initial_variables);

        let mut execution = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id,
            workflow_version: workflow.version,
            status: ExecutionStatus::Running,
            variables,
            current_nodes: workflow.triggers.clone(),
            completed_nodes: vec![],
            node_results: HashMap::new(),
            loop_states: HashMap::new(),
            subworkflow_depth: depth,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            logs: vec![],
        };
        push_log(
            &mut execution,
            &workflow.settings,
            LogLevel::Info,
            format!("execution of workflow '{}' started", workflow.name),
            None,
        );

        self.definitions
            .insert(execution.id, Arc::new(workflow.clone()));
        self.tokens
            .insert(execution.id, CancellationToken::new());
        self.executions.insert(execution.clone()).await?;

        tracing::info!(
            execution_id = %execution.id,
            workflow = workflow.name.as_str(),
            version = workflow.version,
            "starting workflow execution"
        );
        Ok(execution)
    }

    /// Pause a running execution. Inert unless currently running.
    pub async fn pause_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, EngineError> {
        let settings = self.settings_for(execution_id).await;
        self.executions
            .modify(execution_id, move |execution| {
                if execution.status == ExecutionStatus::Running {
                    execution.status = ExecutionStatus::Paused;
                    push_log(execution, &settings, LogLevel::Info, "execution paused", None);
                    tracing::info!(execution_id = %execution.id, "execution paused");
                }
                execution.clone()
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::ExecutionNotFound(execution_id),
                other => EngineError::Store(other),
            })
    }

    /// Resume a paused execution. Inert unless currently paused.
    pub async fn resume_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, EngineError> {
        let settings = self.settings_for(execution_id).await;
        self.executions
            .modify(execution_id, move |execution| {
                if execution.status == ExecutionStatus::Paused {
                    execution.status = ExecutionStatus::Running;
                    push_log(execution, &settings, LogLevel::Info, "execution resumed", None);
                    tracing::info!(execution_id = %execution.id, "execution resumed");
                }
                execution.clone()
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::ExecutionNotFound(execution_id),
                other => EngineError::Store(other),
            })
    }

    /// Cancel a non-terminal execution and interrupt in-flight work.
    pub async fn cancel_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, EngineError> {
        let settings = self.settings_for(execution_id).await;
        let updated = self
            .executions
            .modify(execution_id, move |execution| {
                if !execution.status.is_terminal() {
                    execution.status = ExecutionStatus::Cancelled;
                    execution.completed_at = Some(Utc::now());
                    // In-flight nodes will never report back.
                    for result in execution.node_results.values_mut() {
                        if result.status == NodeRunStatus::Running {
                            result.status = NodeRunStatus::Skipped;
                            result.completed_at = Some(Utc::now());
                        }
                    }
                    push_log(
                        execution,
                        &settings,
                        LogLevel::Info,
                        "execution cancelled",
                        None,
                    );
                    tracing::info!(execution_id = %execution.id, "execution cancelled");
                }
                execution.clone()
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::ExecutionNotFound(execution_id),
                other => EngineError::Store(other),
            })?;

        if let Some((_, token)) = self.tokens.remove(&execution_id) {
            token.cancel();
        }
        self.definitions.remove(&execution_id);
        Ok(updated)
    }

    /// Get an execution by id.
    pub async fn get_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, EngineError> {
        self.executions
            .get(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Executions of a workflow, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        Ok(self.executions.list_for_workflow(workflow_id).await?)
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advance the execution by one tick.
    ///
    /// Processes the entire current frontier concurrently, merges results,
    /// and installs the successor union as the new frontier. A no-op for
    /// paused and terminal executions.
    pub async fn execute_step(&self, execution_id: Uuid) -> Result<StepOutcome, EngineError> {
        let execution = self.get_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Ok(StepOutcome {
                status: execution.status,
                processed: vec![],
                frontier: execution.current_nodes,
            });
        }

        let workflow = self.definition_for(&execution).await?;
        let token = self.token_for(execution_id);

        // Expand pass-through triggers: they complete in place and their
        // successors join the tick's frontier.
        let mut trigger_outcomes: Vec<NodeOutcome> = vec![];
        let mut frontier_nodes: Vec<WorkflowNode> = vec![];
        let mut queue: VecDeque<Uuid> = execution.current_nodes.iter().copied().collect();
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let node = workflow
                .node(id)
                .ok_or(GraphError::NodeNotFound(id))?
                .clone();
            if let NodeConfig::Trigger { filter, .. } = &node.config {
                let fired = filter
                    .as_ref()
                    .is_none_or(|p| condition::evaluate_predicate(p, &execution.variables));
                if fired {
                    queue.extend(node.next_nodes.iter().copied());
                }
                trigger_outcomes.push(NodeOutcome::Completed {
                    node_id: id,
                    attempt: 1,
                    started_at: Utc::now(),
                    output: json!({ "triggered": fired }),
                    // Successors already joined this tick's frontier.
                    successors: vec![],
                    variable_updates: vec![],
                    loop_state: None,
                });
            } else {
                frontier_nodes.push(node);
            }
        }

        // Merge nodes gate on their static predecessors.
        let mut completed_view: HashSet<Uuid> =
            execution.completed_nodes.iter().copied().collect();
        for outcome in &trigger_outcomes {
            if let NodeOutcome::Completed { node_id, .. } = outcome {
                completed_view.insert(*node_id);
            }
        }

        let mut ready: Vec<WorkflowNode> = vec![];
        let mut deferred: Vec<Uuid> = vec![];
        for node in frontier_nodes {
            if let NodeConfig::Merge { wait_all } = node.config {
                if completed_view.contains(&node.id) {
                    // A later arrival at an already-passed merge is dropped.
                    continue;
                }
                if wait_all {
                    let predecessors = workflow.predecessors(node.id);
                    if !predecessors.iter().all(|p| completed_view.contains(p)) {
                        deferred.push(node.id);
                        continue;
                    }
                }
            }
            ready.push(node);
        }

        if ready.is_empty() && trigger_outcomes.is_empty() && !deferred.is_empty() {
            // No node can make progress: the merge waits on predecessors
            // that are no longer reachable.
            let settings = workflow.settings.clone();
            let status = self
                .executions
                .modify(execution_id, move |execution| {
                    if !execution.status.is_terminal() {
                        execution.status = ExecutionStatus::Failed;
                        execution.error =
                            Some("merge node waits on unreachable predecessors".to_string());
                        execution.completed_at = Some(Utc::now());
                        execution.current_nodes.clear();
                        push_log(
                            execution,
                            &settings,
                            LogLevel::Error,
                            "execution failed: merge node waits on unreachable predecessors",
                            None,
                        );
                    }
                    execution.status
                })
                .await?;
            self.release(execution_id);
            return Ok(StepOutcome {
                status,
                processed: vec![],
                frontier: vec![],
            });
        }

        // Mark frontier nodes running before dispatch.
        if !ready.is_empty() {
            let marks: Vec<(Uuid, String)> =
                ready.iter().map(|n| (n.id, n.name.clone())).collect();
            let settings = workflow.settings.clone();
            self.executions
                .modify(execution_id, move |execution| {
                    if execution.status.is_terminal() {
                        return;
                    }
                    for (id, name) in &marks {
                        execution.node_results.insert(
                            *id,
                            NodeExecutionResult {
                                node_id: *id,
                                status: NodeRunStatus::Running,
                                attempt: 1,
                                started_at: Some(Utc::now()),
                                completed_at: None,
                                output: None,
                                error: None,
                            },
                        );
                        push_log(
                            execution,
                            &settings,
                            LogLevel::Debug,
                            format!("node '{name}' started"),
                            Some(*id),
                        );
                    }
                })
                .await?;
        }

        // One task per frontier node; independent by construction.
        let mut join_set = JoinSet::new();
        let policy = RetryPolicy::from_settings(&workflow.settings);
        for node in ready {
            let engine = self.clone();
            let variables = execution.variables.clone();
            let loop_state = execution
                .loop_states
                .get(&node.id)
                .copied()
                .unwrap_or_default();
            let token = token.clone();
            let depth = execution.subworkflow_depth;
            join_set.spawn(async move {
                engine
                    .run_node(node, variables, loop_state, policy, depth, token)
                    .await
            });
        }

        let mut outcomes = trigger_outcomes;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    tracing::error!(error = %join_error, "frontier task panicked");
                }
            }
        }

        self.merge_outcomes(execution_id, &workflow, outcomes, deferred)
            .await
    }

    /// Drive an execution until it reaches a terminal or paused status,
    /// bounded by the workflow's `max_execution_time_secs`.
    pub async fn run_to_completion(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, EngineError> {
        let execution = self.get_execution(execution_id).await?;
        let workflow = self.definition_for(&execution).await?;
        let limit = Duration::from_secs(workflow.settings.max_execution_time_secs);

        let drive = async {
            loop {
                let outcome = self.execute_step(execution_id).await?;
                if outcome.status.is_terminal() || outcome.status == ExecutionStatus::Paused {
                    return Ok::<_, EngineError>(());
                }
            }
        };

        match tokio::time::timeout(limit, drive).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                let settings = workflow.settings.clone();
                self.executions
                    .modify(execution_id, move |execution| {
                        if !execution.status.is_terminal() {
                            execution.status = ExecutionStatus::Failed;
                            execution.error = Some("execution exceeded its time limit".to_string());
                            execution.completed_at = Some(Utc::now());
                            execution.current_nodes.clear();
                            push_log(
                                execution,
                                &settings,
                                LogLevel::Error,
                                "execution failed: time limit exceeded",
                                None,
                            );
                        }
                    })
                    .await?;
                self.release(execution_id);
                tracing::warn!(execution_id = %execution_id, "execution timed out");
                return Err(EngineError::ExecutionTimeout);
            }
        }

        self.get_execution(execution_id).await
    }

    // -----------------------------------------------------------------------
    // Node dispatch
    // -----------------------------------------------------------------------

    async fn run_node(
        &self,
        node: WorkflowNode,
        variables: HashMap<String, Value>,
        loop_state: LoopState,
        policy: RetryPolicy,
        depth: u32,
        token: CancellationToken,
    ) -> NodeOutcome {
        let started_at = Utc::now();
        let node_id = node.id;
        match node.config.clone() {
            NodeConfig::Trigger { .. } => NodeOutcome::Completed {
                node_id,
                attempt: 1,
                started_at,
                output: json!({ "triggered": true }),
                successors: node.next_nodes.clone(),
                variable_updates: vec![],
                loop_state: None,
            },
            NodeConfig::Action {
                output_variable, ..
            } => {
                self.run_action(&node, variables, output_variable, policy, token, started_at)
                    .await
            }
            NodeConfig::Condition {
                conditions,
                default_node,
            } => {
                let decision = condition::evaluate(&conditions, default_node, &variables);
                tracing::debug!(
                    node_id = %node_id,
                    matched = decision.matched_condition.as_deref().unwrap_or("<default>"),
                    "condition evaluated"
                );
                NodeOutcome::Completed {
                    node_id,
                    attempt: 1,
                    started_at,
                    output: json!({
                        "matched_condition": decision.matched_condition,
                        "next_node": decision.next_node.map(|id| id.to_string()),
                    }),
                    successors: decision.next_node.into_iter().collect(),
                    variable_updates: vec![],
                    loop_state: None,
                }
            }
            NodeConfig::Loop {
                kind,
                body_node,
                exit_node,
            } => {
                let decision = loop_control::step(&kind, &variables, loop_state);
                let successors = if decision.continue_loop {
                    vec![body_node]
                } else {
                    exit_node.into_iter().collect()
                };
                NodeOutcome::Completed {
                    node_id,
                    attempt: 1,
                    started_at,
                    output: json!({
                        "continue": decision.continue_loop,
                        "index": decision.index,
                        "item": decision.item,
                    }),
                    successors,
                    variable_updates: decision.variable_updates,
                    loop_state: Some(decision.state),
                }
            }
            NodeConfig::Delay { kind } => {
                let duration = match kind {
                    DelayKind::Fixed { duration_ms } => Duration::from_millis(duration_ms),
                    DelayKind::Until { timestamp } => (timestamp - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO),
                };
                tokio::select! {
                    _ = token.cancelled() => NodeOutcome::Cancelled { node_id },
                    _ = tokio::time::sleep(duration) => NodeOutcome::Completed {
                        node_id,
                        attempt: 1,
                        started_at,
                        output: json!({ "delayed_ms": duration.as_millis() as u64 }),
                        successors: node.next_nodes.clone(),
                        variable_updates: vec![],
                        loop_state: None,
                    },
                }
            }
            NodeConfig::Parallel { branches, .. } => NodeOutcome::Completed {
                node_id,
                attempt: 1,
                started_at,
                output: json!({ "branches": branches.len() }),
                successors: branches.into_iter().map(|b| b.start_node).collect(),
                variable_updates: vec![],
                loop_state: None,
            },
            NodeConfig::Merge { .. } => NodeOutcome::Completed {
                node_id,
                attempt: 1,
                started_at,
                output: json!({ "merged": true }),
                successors: node.next_nodes.clone(),
                variable_updates: vec![],
                loop_state: None,
            },
            NodeConfig::Subworkflow {
                workflow_id,
                input_variables,
                output_variable,
            } => {
                self.run_subworkflow(
                    node_id,
                    workflow_id,
                    input_variables,
                    output_variable,
                    &node.next_nodes,
                    variables,
                    depth,
                    started_at,
                )
                .await
            }
            NodeConfig::End {} => NodeOutcome::Completed {
                node_id,
                attempt: 1,
                started_at,
                output: json!({ "ended": true }),
                // Terminal marker: never propagates, regardless of edges.
                successors: vec![],
                variable_updates: vec![],
                loop_state: None,
            },
        }
    }

    async fn run_action(
        &self,
        node: &WorkflowNode,
        variables: HashMap<String, Value>,
        output_variable: Option<String>,
        policy: RetryPolicy,
        token: CancellationToken,
        started_at: DateTime<Utc>,
    ) -> NodeOutcome {
        let node_id = node.id;
        let mut attempt = 1u32;
        loop {
            if token.is_cancelled() {
                return NodeOutcome::Cancelled { node_id };
            }
            let invocation = self.action_executor.execute(
                node.clone(),
                variables.clone(),
                token.clone(),
            );
            match invocation.await {
                Ok(output) => {
                    let variable_updates = output_variable
                        .as_ref()
                        .map(|name| vec![(name.clone(), output.clone())])
                        .unwrap_or_default();
                    return NodeOutcome::Completed {
                        node_id,
                        attempt,
                        started_at,
                        output,
                        successors: node.next_nodes.clone(),
                        variable_updates,
                        loop_state: None,
                    };
                }
                Err(ActionError::Cancelled) => return NodeOutcome::Cancelled { node_id },
                Err(ActionError::Failed(error)) => {
                    if policy.should_retry(attempt) {
                        let delay = policy.delay_for(attempt);
                        tracing::warn!(
                            node_id = %node_id,
                            attempt,
                            error = error.as_str(),
                            delay_ms = delay.as_millis() as u64,
                            "action failed, retrying"
                        );
                        tokio::select! {
                            _ = token.cancelled() => return NodeOutcome::Cancelled { node_id },
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    } else {
                        return NodeOutcome::Failed {
                            node_id,
                            attempt,
                            started_at,
                            error,
                        };
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_subworkflow(
        &self,
        node_id: Uuid,
        workflow_id: Uuid,
        input_variables: HashMap<String, String>,
        output_variable: Option<String>,
        next_nodes: &[Uuid],
        variables: HashMap<String, Value>,
        depth: u32,
        started_at: DateTime<Utc>,
    ) -> NodeOutcome {
        if depth + 1 > MAX_SUBWORKFLOW_DEPTH {
            return NodeOutcome::Failed {
                node_id,
                attempt: 1,
                started_at,
                error: format!(
                    "subworkflow depth {} exceeds maximum {}",
                    depth + 1,
                    MAX_SUBWORKFLOW_DEPTH
                ),
            };
        }

        let inputs: HashMap<String, Value> = input_variables
            .into_iter()
            .filter_map(|(child_name, parent_name)| {
                condition::resolve_path(&variables, &parent_name)
                    .cloned()
                    .map(|value| (child_name, value))
            })
            .collect();

        let child = match self
            .start_execution_at_depth(workflow_id, inputs, depth + 1)
            .await
        {
            Ok(child) => child,
            Err(e) => {
                return NodeOutcome::Failed {
                    node_id,
                    attempt: 1,
                    started_at,
                    error: e.to_string(),
                };
            }
        };

        tracing::debug!(
            node_id = %node_id,
            child_execution = %child.id,
            depth = depth + 1,
            "delegating to subworkflow"
        );

        // Boxed so the nested drive does not recurse at the type level. The
        // coercion lives in a submodule (`recurse`) so the `Send` obligation on
        // the recursive future is discharged outside this method's defining
        // scope, where the engine's async opaque types are already finalized.
        let drive = recurse::drive_to_completion(self.clone(), child.id);

        match drive.await {
            Ok(child) if child.status == ExecutionStatus::Completed => {
                let output = json!({
                    "execution_id": child.id.to_string(),
                    "variables": child.variables,
                });
                let variable_updates = output_variable
                    .map(|name| vec![(name, json!(child.variables))])
                    .unwrap_or_default();
                NodeOutcome::Completed {
                    node_id,
                    attempt: 1,
                    started_at,
                    output,
                    successors: next_nodes.to_vec(),
                    variable_updates,
                    loop_state: None,
                }
            }
            Ok(child) => NodeOutcome::Failed {
                node_id,
                attempt: 1,
                started_at,
                error: child
                    .error
                    .unwrap_or_else(|| format!("subworkflow ended as {:?}", child.status)),
            },
            Err(e) => NodeOutcome::Failed {
                node_id,
                attempt: 1,
                started_at,
                error: e.to_string(),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Merge phase
    // -----------------------------------------------------------------------

    async fn merge_outcomes(
        &self,
        execution_id: Uuid,
        workflow: &Arc<Workflow>,
        outcomes: Vec<NodeOutcome>,
        deferred: Vec<Uuid>,
    ) -> Result<StepOutcome, EngineError> {
        let workflow = Arc::clone(workflow);
        let (status, processed, frontier) = self
            .executions
            .modify(execution_id, move |execution| {
                // Cancelled (or otherwise finished) while the frontier was in
                // flight: record nothing further.
                if execution.status.is_terminal() {
                    return (
                        execution.status,
                        vec![],
                        execution.current_nodes.clone(),
                    );
                }

                let settings = workflow.settings.clone();
                let now = Utc::now();
                let mut processed: Vec<Uuid> = vec![];
                let mut successors: Vec<Uuid> = vec![];
                let mut interrupted: Vec<Uuid> = vec![];
                let mut failure: Option<String> = None;

                for outcome in outcomes {
                    match outcome {
                        NodeOutcome::Completed {
                            node_id,
                            attempt,
                            started_at,
                            output,
                            successors: node_successors,
                            variable_updates,
                            loop_state,
                        } => {
                            processed.push(node_id);
                            execution.node_results.insert(
                                node_id,
                                NodeExecutionResult {
                                    node_id,
                                    status: NodeRunStatus::Completed,
                                    attempt,
                                    started_at: Some(started_at),
                                    completed_at: Some(now),
                                    output: Some(output),
                                    error: None,
                                },
                            );
                            execution.completed_nodes.push(node_id);
                            for (name, value) in variable_updates {
                                execution.variables.insert(name, value);
                            }
                            if let Some(state) = loop_state {
                                execution.loop_states.insert(node_id, state);
                            }
                            let name = workflow
                                .node(node_id)
                                .map(|n| n.name.as_str())
                                .unwrap_or("unknown");
                            push_log(
                                execution,
                                &settings,
                                LogLevel::Info,
                                format!("node '{name}' completed"),
                                Some(node_id),
                            );
                            for successor in node_successors {
                                if !successors.contains(&successor) {
                                    successors.push(successor);
                                }
                            }
                        }
                        NodeOutcome::Failed {
                            node_id,
                            attempt,
                            started_at,
                            error,
                        } => {
                            processed.push(node_id);
                            execution.node_results.insert(
                                node_id,
                                NodeExecutionResult {
                                    node_id,
                                    status: NodeRunStatus::Failed,
                                    attempt,
                                    started_at: Some(started_at),
                                    completed_at: Some(now),
                                    output: None,
                                    error: Some(error.clone()),
                                },
                            );
                            let name = workflow
                                .node(node_id)
                                .map(|n| n.name.as_str())
                                .unwrap_or("unknown");
                            push_log(
                                execution,
                                &settings,
                                LogLevel::Error,
                                format!("node '{name}' failed: {error}"),
                                Some(node_id),
                            );
                            failure = Some(error);
                        }
                        NodeOutcome::Cancelled { node_id } => {
                            // Keep interrupted nodes in the frontier; the
                            // execution is being cancelled or paused.
                            interrupted.push(node_id);
                        }
                    }
                }

                if let Some(error) = failure {
                    execution.status = ExecutionStatus::Failed;
                    execution.error = Some(error.clone());
                    execution.completed_at = Some(now);
                    execution.current_nodes.clear();
                    push_log(
                        execution,
                        &settings,
                        LogLevel::Error,
                        format!("execution failed: {error}"),
                        None,
                    );
                } else {
                    for id in deferred.into_iter().chain(interrupted) {
                        if !successors.contains(&id) {
                            successors.push(id);
                        }
                    }
                    if successors.is_empty() {
                        if execution.status == ExecutionStatus::Running {
                            execution.status = ExecutionStatus::Completed;
                            execution.completed_at = Some(now);
                            push_log(
                                execution,
                                &settings,
                                LogLevel::Info,
                                "execution completed",
                                None,
                            );
                        }
                        execution.current_nodes.clear();
                    } else {
                        execution.current_nodes = successors;
                    }
                }

                (
                    execution.status,
                    processed,
                    execution.current_nodes.clone(),
                )
            })
            .await?;

        if status.is_terminal() {
            self.release(execution_id);
            tracing::info!(
                execution_id = %execution_id,
                status = ?status,
                "execution finished"
            );
        }

        Ok(StepOutcome {
            status,
            processed,
            frontier,
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// The definition pinned for this execution, falling back to the store.
    async fn definition_for(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<Arc<Workflow>, EngineError> {
        if let Some(pinned) = self.definitions.get(&execution.id) {
            return Ok(Arc::clone(&pinned));
        }
        let workflow = self
            .workflows
            .get(execution.workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(execution.workflow_id))?;
        if workflow.version != execution.workflow_version {
            tracing::warn!(
                execution_id = %execution.id,
                pinned = execution.workflow_version,
                current = workflow.version,
                "workflow changed since execution start; using current definition"
            );
        }
        let workflow = Arc::new(workflow);
        self.definitions
            .insert(execution.id, Arc::clone(&workflow));
        Ok(workflow)
    }

    fn token_for(&self, execution_id: Uuid) -> CancellationToken {
        self.tokens.entry(execution_id).or_default().clone()
    }

    /// Settings for log filtering in lifecycle operations.
    async fn settings_for(&self, execution_id: Uuid) -> WorkflowSettings {
        self.definitions
            .get(&execution_id)
            .map(|w| w.settings.clone())
            .unwrap_or_default()
    }

    fn release(&self, execution_id: Uuid) {
        self.tokens.remove(&execution_id);
        self.definitions.remove(&execution_id);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Append a log entry, honoring the workflow's log level.
fn push_log(
    execution: &mut WorkflowExecution,
    settings: &WorkflowSettings,
    level: LogLevel,
    message: impl Into<String>,
    node_id: Option<Uuid>,
) {
    if level < settings.log_level {
        return;
    }
    execution.logs.push(ExecutionLog {
        timestamp: Utc::now(),
        level,
        message: message.into(),
        node_id,
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use agentloom_types::workflow::{
        ConditionOperator, ConditionRule, LoopKind, ParallelBranch, Predicate, TriggerKind,
        VariableType, WorkflowMetadata, WorkflowVariable,
    };
    use serde_json::json;

    use crate::store::{MemoryExecutionStore, MemoryWorkflowStore};
    use crate::workflow::action::ActionFn;
    use crate::workflow::graph::{node, recompute_triggers};

    use super::*;

    type TestEngine = ExecutionEngine<MemoryWorkflowStore, MemoryExecutionStore>;

    fn engine_with(executor: Arc<dyn ActionExecutor>) -> (TestEngine, Arc<MemoryWorkflowStore>) {
        let workflows = Arc::new(MemoryWorkflowStore::new());
        let executions = Arc::new(MemoryExecutionStore::new());
        let engine = ExecutionEngine::new(Arc::clone(&workflows), executions, executor);
        (engine, workflows)
    }

    /// Executor that doubles the `x` variable.
    fn doubling_executor() -> Arc<dyn ActionExecutor> {
        Arc::new(ActionFn::new(|_node, variables, _cancel| async move {
            let x = variables.get("x").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x * 2))
        }))
    }

    /// Executor that records which node ran and with which `it` variable.
    fn recording_executor(calls: Arc<Mutex<Vec<(String, Option<Value>)>>>) -> Arc<dyn ActionExecutor> {
        Arc::new(ActionFn::new(move |node: WorkflowNode, variables, _cancel| {
            let calls = Arc::clone(&calls);
            async move {
                calls
                    .lock()
                    .unwrap()
                    .push((node.name.clone(), variables.get("it").cloned()));
                Ok(json!({ "ran": node.name }))
            }
        }))
    }

    fn trigger_node() -> WorkflowNode {
        node(
            "Start",
            NodeConfig::Trigger {
                trigger_type: TriggerKind::Manual,
                filter: None,
            },
        )
    }

    fn action_node(name: &str, output_variable: Option<&str>) -> WorkflowNode {
        node(
            name,
            NodeConfig::Action {
                action_type: "test_action".to_string(),
                parameters: json!({}),
                output_variable: output_variable.map(String::from),
            },
        )
    }

    async fn store_workflow(
        workflows: &MemoryWorkflowStore,
        nodes: Vec<WorkflowNode>,
        variables: Vec<WorkflowVariable>,
        settings: WorkflowSettings,
    ) -> Workflow {
        let triggers = recompute_triggers(&nodes);
        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: "test-workflow".to_string(),
            description: None,
            version: 1,
            nodes,
            connections: vec![],
            variables,
            triggers,
            metadata: WorkflowMetadata {
                created_by: "tester".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                tags: vec![],
                category: None,
            },
            settings,
        };
        workflows.insert(workflow.clone()).await.unwrap();
        workflow
    }

    // -----------------------------------------------------------------------
    // start_execution
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_seeds_variables_and_frontier() {
        let (engine, workflows) = engine_with(doubling_executor());
        let workflow = store_workflow(
            &workflows,
            vec![trigger_node()],
            vec![
                WorkflowVariable {
                    name: "greeting".to_string(),
                    var_type: VariableType::String,
                    default_value: Some(json!("hello")),
                    description: None,
                },
                WorkflowVariable {
                    name: "x".to_string(),
                    var_type: VariableType::Number,
                    default_value: Some(json!(1)),
                    description: None,
                },
            ],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine
            .start_execution(workflow.id, HashMap::from([("x".to_string(), json!(2))]))
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.current_nodes, workflow.triggers);
        assert!(!execution.current_nodes.is_empty());
        assert_eq!(execution.variables.get("greeting"), Some(&json!("hello")));
        assert_eq!(execution.variables.get("x"), Some(&json!(2)), "override wins");
        assert_eq!(execution.workflow_version, 1);
        assert!(!execution.logs.is_empty());
    }

    #[tokio::test]
    async fn test_start_requires_a_trigger_node() {
        let (engine, workflows) = engine_with(doubling_executor());
        let workflow = store_workflow(
            &workflows,
            vec![action_node("Lonely", None)],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let err = engine.start_execution(workflow.id, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NoTriggerNodes(id) if id == workflow.id));
    }

    #[tokio::test]
    async fn test_start_unknown_workflow_fails() {
        let (engine, _workflows) = engine_with(doubling_executor());
        let id = Uuid::now_v7();
        let err = engine.start_execution(id, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(found) if found == id));
    }

    #[tokio::test]
    async fn test_step_unknown_execution_fails() {
        let (engine, _workflows) = engine_with(doubling_executor());
        let err = engine.execute_step(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionNotFound(_)));
    }

    // -----------------------------------------------------------------------
    // End to end: trigger -> action
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_single_step_runs_trigger_and_action() {
        let (engine, workflows) = engine_with(doubling_executor());
        let mut trigger = trigger_node();
        let action = action_node("Double", Some("y"));
        trigger.next_nodes.push(action.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, action],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine
            .start_execution(workflow.id, HashMap::from([("x".to_string(), json!(21))]))
            .await
            .unwrap();

        // Triggers are pass-throughs, so one tick reaches the action.
        let outcome = engine.execute_step(execution.id).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);

        let finished = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(finished.variables.get("y"), Some(&json!(42)));
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert!(finished.completed_at.is_some());
        assert_eq!(finished.completed_nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_acyclic_chain_completes_in_path_length_steps() {
        let (engine, workflows) = engine_with(doubling_executor());
        let mut trigger = trigger_node();
        let mut a1 = action_node("A1", None);
        let mut a2 = action_node("A2", None);
        let end = node("Done", NodeConfig::End {});
        a2.next_nodes.push(end.id);
        a1.next_nodes.push(a2.id);
        trigger.next_nodes.push(a1.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, a1, a2, end],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();

        // Longest path: trigger -> a1 -> a2 -> end = 3 edges.
        let mut steps = 0;
        loop {
            let outcome = engine.execute_step(execution.id).await.unwrap();
            steps += 1;
            if outcome.status.is_terminal() {
                break;
            }
            assert!(steps < 10, "must terminate within the path length");
        }
        assert_eq!(steps, 3);
        assert_eq!(
            engine.get_execution(execution.id).await.unwrap().status,
            ExecutionStatus::Completed
        );
    }

    // -----------------------------------------------------------------------
    // Condition routing
    // -----------------------------------------------------------------------

    async fn condition_workflow(
        workflows: &MemoryWorkflowStore,
    ) -> Workflow {
        let mut trigger = trigger_node();
        let a = action_node("A", None);
        let b = action_node("B", None);
        let mut branch = node(
            "Check X",
            NodeConfig::Condition {
                conditions: vec![ConditionRule {
                    id: "big".to_string(),
                    predicate: Predicate {
                        field: "x".to_string(),
                        operator: ConditionOperator::Gt,
                        value: json!(10),
                    },
                    next_node: Some(a.id),
                }],
                default_node: Some(b.id),
            },
        );
        branch.next_nodes = vec![a.id, b.id];
        trigger.next_nodes.push(branch.id);
        store_workflow(
            workflows,
            vec![trigger, branch, a, b],
            vec![],
            WorkflowSettings::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_condition_routes_to_matched_branch() {
        let calls = Arc::new(Mutex::new(vec![]));
        let (engine, workflows) = engine_with(recording_executor(Arc::clone(&calls)));
        let workflow = condition_workflow(&workflows).await;

        let execution = engine
            .start_execution(workflow.id, HashMap::from([("x".to_string(), json!(15))]))
            .await
            .unwrap();
        engine.run_to_completion(execution.id).await.unwrap();

        let ran: Vec<String> = calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(ran, vec!["A"], "x=15 matches 'big' and routes to A only");
    }

    #[tokio::test]
    async fn test_condition_falls_back_to_default_branch() {
        let calls = Arc::new(Mutex::new(vec![]));
        let (engine, workflows) = engine_with(recording_executor(Arc::clone(&calls)));
        let workflow = condition_workflow(&workflows).await;

        let execution = engine
            .start_execution(workflow.id, HashMap::from([("x".to_string(), json!(5))]))
            .await
            .unwrap();
        engine.run_to_completion(execution.id).await.unwrap();

        let ran: Vec<String> = calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(ran, vec!["B"], "x=5 takes the default branch");
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_for_each_loop_visits_every_item() {
        let calls = Arc::new(Mutex::new(vec![]));
        let (engine, workflows) = engine_with(recording_executor(Arc::clone(&calls)));

        let mut trigger = trigger_node();
        let end = node("Done", NodeConfig::End {});
        let mut body = action_node("Body", None);
        let loop_node = node(
            "Per Item",
            NodeConfig::Loop {
                kind: LoopKind::ForEach {
                    source_variable: "items".to_string(),
                    item_variable: Some("it".to_string()),
                    index_variable: None,
                },
                body_node: body.id,
                exit_node: Some(end.id),
            },
        );
        body.next_nodes.push(loop_node.id);
        trigger.next_nodes.push(loop_node.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, loop_node, body, end],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine
            .start_execution(
                workflow.id,
                HashMap::from([("items".to_string(), json!([1, 2, 3]))]),
            )
            .await
            .unwrap();
        let finished = engine.run_to_completion(execution.id).await.unwrap();

        assert_eq!(finished.status, ExecutionStatus::Completed);
        let items: Vec<Option<Value>> =
            calls.lock().unwrap().iter().map(|(_, it)| it.clone()).collect();
        assert_eq!(
            items,
            vec![Some(json!(1)), Some(json!(2)), Some(json!(3))],
            "body sees each item in order"
        );
        let state = finished
            .loop_states
            .values()
            .next()
            .expect("loop state recorded");
        assert!(state.completed);
        assert_eq!(state.iteration, 3);
    }

    // -----------------------------------------------------------------------
    // Trigger filters
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_trigger_filter_gates_firing() {
        let calls = Arc::new(Mutex::new(vec![]));
        let (engine, workflows) = engine_with(recording_executor(Arc::clone(&calls)));

        let mut trigger = node(
            "On Push",
            NodeConfig::Trigger {
                trigger_type: TriggerKind::Webhook,
                filter: Some(Predicate {
                    field: "source".to_string(),
                    operator: ConditionOperator::Eq,
                    value: json!("github"),
                }),
            },
        );
        let action = action_node("React", None);
        trigger.next_nodes.push(action.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, action],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        // Non-matching payload: the trigger does not fire its successors.
        let execution = engine
            .start_execution(
                workflow.id,
                HashMap::from([("source".to_string(), json!("gitlab"))]),
            )
            .await
            .unwrap();
        let outcome = engine.execute_step(execution.id).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert!(calls.lock().unwrap().is_empty(), "filtered trigger runs nothing");

        // Matching payload: the action runs.
        let execution = engine
            .start_execution(
                workflow.id,
                HashMap::from([("source".to_string(), json!("github"))]),
            )
            .await
            .unwrap();
        engine.execute_step(execution.id).await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancelled_execution_ignores_further_steps() {
        let (engine, workflows) = engine_with(doubling_executor());
        let mut trigger = trigger_node();
        let action = action_node("Double", Some("y"));
        trigger.next_nodes.push(action.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, action],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        let cancelled = engine.cancel_execution(execution.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        let outcome = engine.execute_step(execution.id).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert!(outcome.processed.is_empty());

        let after = engine.get_execution(execution.id).await.unwrap();
        assert!(after.node_results.is_empty(), "no results after cancellation");
        assert!(after.variables.get("y").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_inflight_delay() {
        let (engine, workflows) = engine_with(doubling_executor());
        let mut trigger = trigger_node();
        let end = node("Done", NodeConfig::End {});
        let mut delay = node(
            "Wait",
            NodeConfig::Delay {
                kind: DelayKind::Fixed { duration_ms: 10_000 },
            },
        );
        delay.next_nodes.push(end.id);
        trigger.next_nodes.push(delay.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, delay, end],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        let execution_id = execution.id;

        let stepper = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute_step(execution_id).await })
        };

        // Let the delay start sleeping, then cancel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.cancel_execution(execution_id).await.unwrap();

        let outcome = stepper.await.unwrap().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Cancelled);

        let after = engine.get_execution(execution_id).await.unwrap();
        assert_eq!(after.status, ExecutionStatus::Cancelled);
        // The interrupted delay was marked running, then skipped on cancel.
        let delay_result = after.node_results.values().next().unwrap();
        assert_eq!(delay_result.status, NodeRunStatus::Skipped);
    }

    // -----------------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_pause_blocks_stepping_and_resume_continues() {
        let (engine, workflows) = engine_with(doubling_executor());
        let mut trigger = trigger_node();
        let action = action_node("Double", Some("y"));
        trigger.next_nodes.push(action.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, action],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine
            .start_execution(workflow.id, HashMap::from([("x".to_string(), json!(21))]))
            .await
            .unwrap();

        let paused = engine.pause_execution(execution.id).await.unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);

        let outcome = engine.execute_step(execution.id).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Paused);
        assert!(outcome.processed.is_empty(), "paused executions do not advance");

        let resumed = engine.resume_execution(execution.id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Running);

        let outcome = engine.execute_step(execution.id).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        let finished = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(finished.variables.get("y"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_inert_in_wrong_states() {
        let (engine, workflows) = engine_with(doubling_executor());
        let workflow = store_workflow(
            &workflows,
            vec![trigger_node()],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();

        // Resume on a running execution changes nothing.
        let resumed = engine.resume_execution(execution.id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Running);

        engine.cancel_execution(execution.id).await.unwrap();

        // Pause and resume on a terminal execution are silently ignored.
        let paused = engine.pause_execution(execution.id).await.unwrap();
        assert_eq!(paused.status, ExecutionStatus::Cancelled);
        let resumed = engine.resume_execution(execution.id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Cancelled);
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_action_retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_seen = Arc::clone(&attempts);
        let executor = Arc::new(ActionFn::new(move |_node, _vars, _cancel| {
            let attempts = Arc::clone(&attempts_seen);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ActionError::Failed(format!("flaky failure {n}")))
                } else {
                    Ok(json!("recovered"))
                }
            }
        }));
        let (engine, workflows) = engine_with(executor);

        let mut trigger = trigger_node();
        let action = action_node("Flaky", Some("result"));
        let action_id = action.id;
        trigger.next_nodes.push(action.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, action],
            vec![],
            WorkflowSettings {
                retry_on_failure: true,
                retry_count: 3,
                retry_delay_ms: 1,
                ..WorkflowSettings::default()
            },
        )
        .await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        let finished = engine.run_to_completion(execution.id).await.unwrap();

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.variables.get("result"), Some(&json!("recovered")));
        let result = &finished.node_results[&action_id];
        assert_eq!(result.status, NodeRunStatus::Completed);
        assert_eq!(result.attempt, 3, "third attempt succeeded");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_without_retry_fails_the_execution() {
        let executor = Arc::new(ActionFn::new(|_node, _vars, _cancel| async move {
            Err::<Value, _>(ActionError::Failed("tool exploded".to_string()))
        }));
        let (engine, workflows) = engine_with(executor);

        let mut trigger = trigger_node();
        let action = action_node("Doomed", None);
        let action_id = action.id;
        trigger.next_nodes.push(action.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, action],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        let outcome = engine.execute_step(execution.id).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);

        let failed = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("tool exploded"));
        assert!(failed.current_nodes.is_empty());
        let result = &failed.node_results[&action_id];
        assert_eq!(result.status, NodeRunStatus::Failed);
        assert_eq!(result.attempt, 1);
        assert!(
            failed.logs.iter().any(|l| l.level == LogLevel::Error),
            "failure is logged at error level"
        );
    }

    // -----------------------------------------------------------------------
    // Parallel / merge
    // -----------------------------------------------------------------------

    async fn fan_out_workflow(
        workflows: &MemoryWorkflowStore,
        wait_all: bool,
    ) -> (Workflow, Uuid, Uuid) {
        let mut trigger = trigger_node();
        let end = node("Done", NodeConfig::End {});
        let mut merge = node("Join", NodeConfig::Merge { wait_all });
        merge.next_nodes.push(end.id);
        let mut a = action_node("Short", None);
        let mut b1 = action_node("Long 1", None);
        let mut b2 = action_node("Long 2", None);
        a.next_nodes.push(merge.id);
        b1.next_nodes.push(b2.id);
        b2.next_nodes.push(merge.id);
        let parallel = node(
            "Fan Out",
            NodeConfig::Parallel {
                branches: vec![
                    ParallelBranch {
                        name: Some("short".to_string()),
                        start_node: a.id,
                    },
                    ParallelBranch {
                        name: Some("long".to_string()),
                        start_node: b1.id,
                    },
                ],
                join_node: Some(merge.id),
            },
        );
        trigger.next_nodes.push(parallel.id);
        let merge_id = merge.id;
        let b2_id = b2.id;
        let workflow = store_workflow(
            workflows,
            vec![trigger, parallel, a, b1, b2, merge, end],
            vec![],
            WorkflowSettings::default(),
        )
        .await;
        (workflow, merge_id, b2_id)
    }

    #[tokio::test]
    async fn test_parallel_fan_out_with_wait_all_merge() {
        let calls = Arc::new(Mutex::new(vec![]));
        let (engine, workflows) = engine_with(recording_executor(Arc::clone(&calls)));
        let (workflow, merge_id, b2_id) = fan_out_workflow(&workflows, true).await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        let finished = engine.run_to_completion(execution.id).await.unwrap();

        assert_eq!(finished.status, ExecutionStatus::Completed);
        let ran: Vec<String> = calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(ran.len(), 3, "all branch actions ran");

        // The merge fires only after the longest branch finished.
        let merge_pos = finished
            .completed_nodes
            .iter()
            .position(|id| *id == merge_id)
            .expect("merge completed");
        let b2_pos = finished
            .completed_nodes
            .iter()
            .position(|id| *id == b2_id)
            .expect("b2 completed");
        assert!(merge_pos > b2_pos, "wait_all merge defers until all predecessors");
        assert_eq!(
            finished.completed_nodes.iter().filter(|id| **id == merge_id).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_merge_without_wait_all_passes_first_arrival() {
        let calls = Arc::new(Mutex::new(vec![]));
        let (engine, workflows) = engine_with(recording_executor(Arc::clone(&calls)));
        let (workflow, merge_id, _b2_id) = fan_out_workflow(&workflows, false).await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        let finished = engine.run_to_completion(execution.id).await.unwrap();

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(
            finished.completed_nodes.iter().filter(|id| **id == merge_id).count(),
            1,
            "later arrivals at a passed merge are dropped"
        );
    }

    // -----------------------------------------------------------------------
    // Subworkflows
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_subworkflow_delegates_and_captures_output() {
        let executor = Arc::new(ActionFn::new(|_node, variables, _cancel| async move {
            let seed = variables.get("seed").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(seed + 1))
        }));
        let (engine, workflows) = engine_with(executor);

        // Child: trigger -> action storing `inner`.
        let mut child_trigger = trigger_node();
        let child_action = action_node("Child Action", Some("inner"));
        child_trigger.next_nodes.push(child_action.id);
        let child = store_workflow(
            &workflows,
            vec![child_trigger, child_action],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        // Parent: trigger -> subworkflow -> end.
        let mut parent_trigger = trigger_node();
        let end = node("Done", NodeConfig::End {});
        let mut sub = node(
            "Delegate",
            NodeConfig::Subworkflow {
                workflow_id: child.id,
                input_variables: HashMap::from([("seed".to_string(), "seed".to_string())]),
                output_variable: Some("sub_out".to_string()),
            },
        );
        sub.next_nodes.push(end.id);
        parent_trigger.next_nodes.push(sub.id);
        let parent = store_workflow(
            &workflows,
            vec![parent_trigger, sub, end],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let execution = engine
            .start_execution(parent.id, HashMap::from([("seed".to_string(), json!(41))]))
            .await
            .unwrap();
        let finished = engine.run_to_completion(execution.id).await.unwrap();

        assert_eq!(finished.status, ExecutionStatus::Completed);
        let sub_out = finished.variables.get("sub_out").expect("sub output stored");
        assert_eq!(sub_out["inner"], json!(42), "child saw the mapped input");

        // The child execution is independently inspectable.
        let child_runs = engine.list_executions(child.id).await.unwrap();
        assert_eq!(child_runs.len(), 1);
        assert_eq!(child_runs[0].status, ExecutionStatus::Completed);
        assert_eq!(child_runs[0].subworkflow_depth, 1);
    }

    #[tokio::test]
    async fn test_subworkflow_depth_is_capped() {
        let (engine, workflows) = engine_with(doubling_executor());

        // A workflow that delegates to itself recurses until the cap.
        let workflow_id = Uuid::now_v7();
        let mut trigger = trigger_node();
        let sub = node(
            "Recurse",
            NodeConfig::Subworkflow {
                workflow_id,
                input_variables: HashMap::new(),
                output_variable: None,
            },
        );
        trigger.next_nodes.push(sub.id);
        let nodes = vec![trigger, sub];
        let triggers = recompute_triggers(&nodes);
        let workflow = Workflow {
            id: workflow_id,
            name: "recursive".to_string(),
            description: None,
            version: 1,
            nodes,
            connections: vec![],
            variables: vec![],
            triggers,
            metadata: WorkflowMetadata {
                created_by: "tester".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                tags: vec![],
                category: None,
            },
            settings: WorkflowSettings::default(),
        };
        workflows.insert(workflow).await.unwrap();

        let execution = engine.start_execution(workflow_id, HashMap::new()).await.unwrap();
        let finished = engine.run_to_completion(execution.id).await.unwrap();

        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert!(
            finished.error.as_deref().unwrap_or("").contains("depth"),
            "failure names the depth cap, got: {:?}",
            finished.error
        );
    }

    // -----------------------------------------------------------------------
    // Timeout
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_run_to_completion_honors_time_limit() {
        let (engine, workflows) = engine_with(doubling_executor());
        let mut trigger = trigger_node();
        let delay = node(
            "Wait Forever",
            NodeConfig::Delay {
                kind: DelayKind::Fixed {
                    duration_ms: 3_600_000,
                },
            },
        );
        trigger.next_nodes.push(delay.id);
        let workflow = store_workflow(
            &workflows,
            vec![trigger, delay],
            vec![],
            WorkflowSettings {
                max_execution_time_secs: 1,
                ..WorkflowSettings::default()
            },
        )
        .await;

        let execution = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        let err = engine.run_to_completion(execution.id).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionTimeout));

        let failed = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert!(failed.error.as_deref().unwrap_or("").contains("time limit"));
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_executions_newest_first() {
        let (engine, workflows) = engine_with(doubling_executor());
        let workflow = store_workflow(
            &workflows,
            vec![trigger_node()],
            vec![],
            WorkflowSettings::default(),
        )
        .await;

        let first = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = engine.start_execution(workflow.id, HashMap::new()).await.unwrap();

        let runs = engine.list_executions(workflow.id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[1].id, first.id);
    }
}
