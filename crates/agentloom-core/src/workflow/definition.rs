//! Workflow document parsing and serialization.
//!
//! Workflows are plain structured records: JSON for API payloads, YAML for
//! files on disk. Parsing validates the graph, so a document that
//! deserializes successfully is guaranteed structurally sound.

use agentloom_types::workflow::Workflow;
use thiserror::Error;

use super::graph::{self, GraphError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from workflow document handling.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON document into a validated `Workflow`.
pub fn parse_workflow_json(json: &str) -> Result<Workflow, DefinitionError> {
    let workflow: Workflow =
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_document(&workflow)?;
    Ok(workflow)
}

/// Parse a YAML document into a validated `Workflow`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, DefinitionError> {
    let workflow: Workflow =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_document(&workflow)?;
    Ok(workflow)
}

/// Serialize a `Workflow` to pretty JSON.
pub fn serialize_workflow_json(workflow: &Workflow) -> Result<String, DefinitionError> {
    serde_json::to_string_pretty(workflow).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Serialize a `Workflow` to YAML.
pub fn serialize_workflow_yaml(workflow: &Workflow) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Structural checks beyond what serde enforces.
fn validate_document(workflow: &Workflow) -> Result<(), DefinitionError> {
    if workflow.name.trim().is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    graph::validate_nodes(&workflow.nodes)?;

    // The trigger list is derived; a document that disagrees with its own
    // nodes was hand-edited out of sync.
    let derived = graph::recompute_triggers(&workflow.nodes);
    if workflow.triggers != derived {
        return Err(DefinitionError::Validation(
            "trigger list does not match the workflow's trigger nodes".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
