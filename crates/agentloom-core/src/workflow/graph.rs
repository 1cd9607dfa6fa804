//! Node construction, connection, and graph validation.
//!
//! Uses `petgraph` to model the static `next_nodes` edges as a directed
//! graph. Topological sort detects cycles; edges out of condition and loop
//! nodes are excluded from the check because their `next_nodes` lists are
//! advisory -- those nodes route dynamically, and loop back-edges are the
//! sanctioned cycle mechanism.

use std::collections::{HashMap, HashSet};

use agentloom_types::workflow::{
    NodeConfig, NodePosition, NodeType, Workflow, WorkflowConnection, WorkflowNode,
};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from graph construction and validation.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An edge or config references a node that does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(Uuid),

    /// Two nodes share the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(Uuid),

    /// A node's declared type does not match its config variant.
    #[error("node {node_id} declared as {declared:?} but configured as {actual:?}")]
    ConfigMismatch {
        node_id: Uuid,
        declared: NodeType,
        actual: NodeType,
    },

    /// The static edge graph contains a cycle.
    #[error("cycle detected involving node '{0}'")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

/// Create a node with a fresh identity and an empty edge list.
///
/// The node type is derived from the config variant, so a node built this
/// way can never carry a mismatched configuration.
pub fn node(name: impl Into<String>, config: NodeConfig) -> WorkflowNode {
    WorkflowNode {
        id: Uuid::now_v7(),
        node_type: config.node_type(),
        name: name.into(),
        config,
        position: None,
        next_nodes: vec![],
    }
}

/// Create a node with a canvas position.
pub fn node_at(
    name: impl Into<String>,
    config: NodeConfig,
    position: NodePosition,
) -> WorkflowNode {
    WorkflowNode {
        position: Some(position),
        ..node(name, config)
    }
}

/// Connect two nodes: append `to` to the source's `next_nodes` and record a
/// mirrored `WorkflowConnection`.
///
/// The `next_nodes` append is idempotent; the mirror list records one entry
/// per call, so duplicate calls leave duplicate connection records.
pub fn connect_nodes(
    workflow: &mut Workflow,
    from: Uuid,
    to: Uuid,
    label: Option<String>,
) -> Result<(), GraphError> {
    if workflow.node(to).is_none() {
        return Err(GraphError::NodeNotFound(to));
    }
    let source = workflow
        .nodes
        .iter_mut()
        .find(|n| n.id == from)
        .ok_or(GraphError::NodeNotFound(from))?;

    if !source.next_nodes.contains(&to) {
        source.next_nodes.push(to);
    }
    workflow.connections.push(WorkflowConnection {
        id: Uuid::now_v7(),
        from_node: from,
        to_node: to,
        label,
    });
    Ok(())
}

/// Recompute the derived trigger list: ids of all trigger nodes.
pub fn recompute_triggers(nodes: &[WorkflowNode]) -> Vec<Uuid> {
    nodes
        .iter()
        .filter(|n| matches!(n.config, NodeConfig::Trigger { .. }))
        .map(|n| n.id)
        .collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the static shape of a node list.
///
/// Checks:
/// - Node ids are unique
/// - Every `next_nodes` entry references an existing node
/// - Every node reference embedded in a config references an existing node
/// - Each node's declared type agrees with its config variant
/// - The static edge graph is acyclic (advisory edges of condition and loop
///   nodes excluded)
pub fn validate_nodes(nodes: &[WorkflowNode]) -> Result<(), GraphError> {
    let mut ids = HashSet::new();
    for node in nodes {
        if !ids.insert(node.id) {
            return Err(GraphError::DuplicateNodeId(node.id));
        }
    }

    for node in nodes {
        let actual = node.config.node_type();
        if node.node_type != actual {
            return Err(GraphError::ConfigMismatch {
                node_id: node.id,
                declared: node.node_type,
                actual,
            });
        }
        for target in &node.next_nodes {
            if !ids.contains(target) {
                return Err(GraphError::NodeNotFound(*target));
            }
        }
        for target in node.config.node_refs() {
            if !ids.contains(target) {
                return Err(GraphError::NodeNotFound(*target));
            }
        }
    }

    check_acyclic(nodes)
}

/// Verify the static `next_nodes` graph has no cycles.
fn check_acyclic(nodes: &[WorkflowNode]) -> Result<(), GraphError> {
    let mut graph = DiGraph::<Uuid, ()>::new();
    let indices: HashMap<Uuid, _> = nodes
        .iter()
        .map(|n| (n.id, graph.add_node(n.id)))
        .collect();

    for node in nodes {
        // Dynamic-routing nodes carry advisory next_nodes only.
        if matches!(
            node.config,
            NodeConfig::Condition { .. } | NodeConfig::Loop { .. }
        ) {
            continue;
        }
        for target in &node.next_nodes {
            graph.add_edge(indices[&node.id], indices[target], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        let id = graph[cycle.node_id()];
        let name = nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.name.as_str())
            .unwrap_or("unknown");
        GraphError::CycleDetected(name.to_string())
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
