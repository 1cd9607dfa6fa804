//! Workflow domain types for Agentloom.
//!
//! Defines the canonical representation for workflows: the visual canvas,
//! JSON/YAML documents, and the SDK all convert to and from `Workflow`.
//! This module also contains execution tracking types (`WorkflowExecution`,
//! `NodeExecutionResult`, `ExecutionLog`) and per-node configuration payloads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow (canonical definition)
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// A workflow is created once and replaced wholesale on each update
/// (copy-on-write), never mutated in place, so in-flight executions keep
/// referencing the version they started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic version, incremented on every registry update.
    pub version: u64,
    /// The nodes forming the workflow graph.
    pub nodes: Vec<WorkflowNode>,
    /// UI-facing mirror of the edges in `next_nodes`. Never execution truth.
    #[serde(default)]
    pub connections: Vec<WorkflowConnection>,
    /// Typed variable declarations with optional defaults.
    #[serde(default)]
    pub variables: Vec<WorkflowVariable>,
    /// Derived view: ids of all trigger nodes. Recomputed on every mutation.
    #[serde(default)]
    pub triggers: Vec<Uuid>,
    /// Creator, timestamps, tags, category.
    pub metadata: WorkflowMetadata,
    /// Execution limits, retry policy, log level.
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    /// Look up a node by id.
    pub fn node(&self, id: Uuid) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of nodes with an edge into `id` (static `next_nodes` edges only).
    pub fn predecessors(&self, id: Uuid) -> Vec<Uuid> {
        self.nodes
            .iter()
            .filter(|n| n.next_nodes.contains(&id))
            .map(|n| n.id)
            .collect()
    }
}

/// Creator, timestamps, tags, and category for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Who created this workflow.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Execution limits and failure policy for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Overall execution timeout in seconds.
    #[serde(default = "default_max_execution_time_secs")]
    pub max_execution_time_secs: u64,
    /// Whether failed action nodes are retried before failing the execution.
    #[serde(default)]
    pub retry_on_failure: bool,
    /// Maximum attempts per node when retry is enabled.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Minimum level recorded into the execution log.
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_max_execution_time_secs() -> u64 {
    1800
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_execution_time_secs: default_max_execution_time_secs(),
            retry_on_failure: false,
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            log_level: LogLevel::Info,
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// UUIDv7 assigned on construction.
    pub id: Uuid,
    /// The kind of node. Must agree with the `config` variant.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Human-readable node name.
    pub name: String,
    /// Node-specific configuration payload.
    pub config: NodeConfig,
    /// Canvas position (layout only, not behavioral).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<NodePosition>,
    /// Outgoing edges. For condition nodes this list is advisory; the
    /// matched condition computes the actual successor.
    #[serde(default)]
    pub next_nodes: Vec<Uuid>,
}

/// The kind of node in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    Action,
    Condition,
    Loop,
    Delay,
    Parallel,
    Merge,
    Subworkflow,
    End,
}

/// Canvas position coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

/// UI-facing mirror of an edge between two nodes.
///
/// Kept in sync by the connect operation; execution reads `next_nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConnection {
    pub id: Uuid,
    pub from_node: Uuid,
    pub to_node: Uuid,
    /// Branch label for condition edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ---------------------------------------------------------------------------
// Node configuration payloads
// ---------------------------------------------------------------------------

/// Node-specific configuration.
///
/// Internally tagged by `type`, one variant per `NodeType`, so a document
/// like `{"type": "action", "action_type": "web_search", ...}` maps onto
/// exactly one variant. Generic over the node-reference type `R`: concrete
/// workflows use `Uuid`, id-less templates use positional `usize` indices
/// that the instantiator rewrites to fresh ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig<R = Uuid> {
    /// Starting point of a workflow.
    Trigger {
        trigger_type: TriggerKind,
        /// Optional predicate a trigger payload must satisfy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Predicate>,
    },
    /// Externally executed side effect (tool call, agent invocation, ...).
    Action {
        action_type: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        parameters: Value,
        /// Variable name the action result is stored under.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_variable: Option<String>,
    },
    /// Dynamic branch: first matching rule wins.
    Condition {
        conditions: Vec<ConditionRule<R>>,
        /// Successor when no rule matches. Absent means the branch ends here.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_node: Option<R>,
    },
    /// Repeats its body node until the iteration source is exhausted.
    Loop {
        kind: LoopKind,
        /// First node of the loop body.
        body_node: R,
        /// Successor once the loop terminates. Absent means the branch ends.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_node: Option<R>,
    },
    /// Suspends its own task, never the whole engine.
    Delay { kind: DelayKind },
    /// Fans out to every branch start node.
    Parallel {
        branches: Vec<ParallelBranch<R>>,
        /// Node where the branches are expected to converge (a merge node).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        join_node: Option<R>,
    },
    /// Join point for parallel branches.
    Merge {
        /// Wait for all predecessors (true) or pass the first arrival (false).
        #[serde(default = "default_wait_all")]
        wait_all: bool,
    },
    /// Delegated execution of another workflow.
    Subworkflow {
        workflow_id: Uuid,
        /// Child variable name -> parent variable name.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        input_variables: HashMap<String, String>,
        /// Variable the child's final variable snapshot is stored under.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_variable: Option<String>,
    },
    /// Terminal marker. Never propagates to successors.
    End {},
}

fn default_wait_all() -> bool {
    true
}

impl<R> NodeConfig<R> {
    /// The canonical node type for this configuration.
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Trigger { .. } => NodeType::Trigger,
            NodeConfig::Action { .. } => NodeType::Action,
            NodeConfig::Condition { .. } => NodeType::Condition,
            NodeConfig::Loop { .. } => NodeType::Loop,
            NodeConfig::Delay { .. } => NodeType::Delay,
            NodeConfig::Parallel { .. } => NodeType::Parallel,
            NodeConfig::Merge { .. } => NodeType::Merge,
            NodeConfig::Subworkflow { .. } => NodeType::Subworkflow,
            NodeConfig::End {} => NodeType::End,
        }
    }

    /// All node references embedded in this configuration.
    pub fn node_refs(&self) -> Vec<&R> {
        match self {
            NodeConfig::Condition {
                conditions,
                default_node,
            } => conditions
                .iter()
                .filter_map(|c| c.next_node.as_ref())
                .chain(default_node.as_ref())
                .collect(),
            NodeConfig::Loop {
                body_node,
                exit_node,
                ..
            } => std::iter::once(body_node).chain(exit_node.as_ref()).collect(),
            NodeConfig::Parallel {
                branches,
                join_node,
            } => branches
                .iter()
                .map(|b| &b.start_node)
                .chain(join_node.as_ref())
                .collect(),
            _ => vec![],
        }
    }

    /// Rewrite every embedded node reference with `f`, preserving structure.
    ///
    /// Used by the template instantiator to turn positional indices into
    /// freshly minted node ids.
    pub fn map_refs<S, E>(
        self,
        f: &mut impl FnMut(R) -> Result<S, E>,
    ) -> Result<NodeConfig<S>, E> {
        Ok(match self {
            NodeConfig::Trigger {
                trigger_type,
                filter,
            } => NodeConfig::Trigger {
                trigger_type,
                filter,
            },
            NodeConfig::Action {
                action_type,
                parameters,
                output_variable,
            } => NodeConfig::Action {
                action_type,
                parameters,
                output_variable,
            },
            NodeConfig::Condition {
                conditions,
                default_node,
            } => NodeConfig::Condition {
                conditions: conditions
                    .into_iter()
                    .map(|c| {
                        Ok(ConditionRule {
                            id: c.id,
                            predicate: c.predicate,
                            next_node: c.next_node.map(&mut *f).transpose()?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
                default_node: default_node.map(&mut *f).transpose()?,
            },
            NodeConfig::Loop {
                kind,
                body_node,
                exit_node,
            } => NodeConfig::Loop {
                kind,
                body_node: f(body_node)?,
                exit_node: exit_node.map(&mut *f).transpose()?,
            },
            NodeConfig::Delay { kind } => NodeConfig::Delay { kind },
            NodeConfig::Parallel {
                branches,
                join_node,
            } => NodeConfig::Parallel {
                branches: branches
                    .into_iter()
                    .map(|b| {
                        Ok(ParallelBranch {
                            name: b.name,
                            start_node: f(b.start_node)?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
                join_node: join_node.map(&mut *f).transpose()?,
            },
            NodeConfig::Merge { wait_all } => NodeConfig::Merge { wait_all },
            NodeConfig::Subworkflow {
                workflow_id,
                input_variables,
                output_variable,
            } => NodeConfig::Subworkflow {
                workflow_id,
                input_variables,
                output_variable,
            },
            NodeConfig::End {} => NodeConfig::End {},
        })
    }
}

/// How a trigger node fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// User-initiated via CLI or API.
    Manual,
    /// External HTTP event.
    Webhook,
    /// Time-based (fired by the host scheduler).
    Schedule,
    /// Internal event bus.
    Event,
}

/// One branch of a parallel fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelBranch<R = Uuid> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub start_node: R,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A comparison applied to a value resolved from the execution variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    /// Dot-path into the variable namespace (e.g. `"company.size"`).
    pub field: String,
    pub operator: ConditionOperator,
    /// Comparison operand. Ignored by `exists`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

/// A routing rule inside a condition node: predicate plus target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule<R = Uuid> {
    /// Rule identifier, reported back as the matched condition.
    pub id: String,
    #[serde(flatten)]
    pub predicate: Predicate,
    /// Successor when this rule matches. Absent means the branch ends here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node: Option<R>,
}

/// Comparison operators for condition predicates.
///
/// Ordering operators compare number-to-number or string-to-string only;
/// no type coercion is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    Regex,
    Exists,
}

// ---------------------------------------------------------------------------
// Loops and delays
// ---------------------------------------------------------------------------

/// The iteration strategy of a loop node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopKind {
    /// Iterate over an array held in a variable.
    ForEach {
        /// Variable holding the array to iterate.
        source_variable: String,
        /// Variable the current item is projected into.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_variable: Option<String>,
        /// Variable the current index is projected into.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_variable: Option<String>,
    },
    /// Iterate a fixed number of times.
    Times {
        count: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_variable: Option<String>,
    },
    /// Iterate while a predicate holds, bounded by `max_iterations`.
    While {
        condition: Predicate,
        #[serde(default = "default_max_iterations")]
        max_iterations: u64,
    },
}

fn default_max_iterations() -> u64 {
    100
}

/// How a delay node suspends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelayKind {
    /// Sleep for a fixed duration.
    Fixed { duration_ms: u64 },
    /// Sleep until an absolute instant. Past timestamps proceed immediately.
    Until { timestamp: DateTime<Utc> },
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A typed variable declaration with an optional default.
///
/// Declares the execution variable namespace; types are not enforced at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared type of a workflow variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

// ---------------------------------------------------------------------------
// Execution tracking
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, failed, and cancelled executions never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One run instance of a workflow.
///
/// Created by `start_execution`, mutated exclusively by `execute_step` and
/// the pause/resume/cancel operations, retained for inspection afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution id.
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Pinned at start; protects the run from concurrent workflow edits.
    pub workflow_version: u64,
    pub status: ExecutionStatus,
    /// Mutable runtime variables, seeded from declared defaults then
    /// overridden by caller-supplied initial values.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// The execution frontier: node ids eligible to execute next.
    #[serde(default)]
    pub current_nodes: Vec<Uuid>,
    #[serde(default)]
    pub completed_nodes: Vec<Uuid>,
    /// Per-node results. Loop bodies reuse their node id, so only the
    /// latest iteration's result is retained.
    #[serde(default)]
    pub node_results: HashMap<Uuid, NodeExecutionResult>,
    /// Loop state per loop node. Separate namespace from `variables` so
    /// user-declared names can never collide with it.
    #[serde(default)]
    pub loop_states: HashMap<Uuid, LoopState>,
    /// Nesting depth when this execution was spawned by a subworkflow node.
    #[serde(default)]
    pub subworkflow_depth: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Append-only execution log.
    #[serde(default)]
    pub logs: Vec<ExecutionLog>,
}

/// Per-node record of the latest attempt within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: Uuid,
    pub status: NodeRunStatus,
    /// 1-based attempt counter, increments on retry.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Iteration state for one loop node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoopState {
    /// Next iteration index (0-based).
    pub iteration: u64,
    /// Whether the loop has terminated.
    pub completed: bool,
}

// ---------------------------------------------------------------------------
// Execution log
// ---------------------------------------------------------------------------

/// Severity of an execution log entry. Ordered for level filtering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// One append-only entry in an execution's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
