//! Workflow template types.
//!
//! A template is a parametrized, id-less workflow blueprint: nodes carry no
//! ids and connections are expressed as index pairs into the node list. The
//! instantiator mints fresh node ids and rewrites the index pairs when a
//! template is materialized into a concrete `Workflow`.

use serde::{Deserialize, Serialize};

use crate::workflow::{NodeConfig, NodePosition, WorkflowVariable};

/// A parametrized workflow blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Stable template identifier (slug, e.g. "lead-enrichment").
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Variable declarations copied onto instantiated workflows.
    #[serde(default)]
    pub variables: Vec<WorkflowVariable>,
    /// Id-less nodes; config references other nodes by position.
    pub nodes: Vec<TemplateNode>,
    /// Edges expressed as index pairs into `nodes`.
    #[serde(default)]
    pub connections: Vec<TemplateConnection>,
    /// Tool hints surfaced by the discovery subsystem.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_tools: Vec<String>,
}

/// A node blueprint without an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateNode {
    pub name: String,
    /// Node configuration referencing sibling nodes by index.
    pub config: NodeConfig<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<NodePosition>,
}

/// An edge blueprint between two node positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConnection {
    pub from_index: usize,
    pub to_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}
