//! Workflow registry: CRUD with optimistic versioning over a `WorkflowStore`.
//!
//! Updates are copy-on-write: the stored workflow is replaced wholesale with
//! a validated candidate, the version is incremented, and the derived
//! trigger list is recomputed. All of that happens inside the store's
//! `modify` so concurrent updates to the same id are serialized and versions
//! stay strictly monotonic.

use agentloom_types::error::StoreError;
use agentloom_types::workflow::{
    Workflow, WorkflowConnection, WorkflowMetadata, WorkflowNode, WorkflowSettings,
    WorkflowVariable,
};
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::store::WorkflowStore;

use super::graph::{self, GraphError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Operation payloads
// ---------------------------------------------------------------------------

/// Parameters for creating a workflow.
#[derive(Debug, Clone)]
pub struct CreateWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub nodes: Vec<WorkflowNode>,
    pub connections: Vec<WorkflowConnection>,
    pub variables: Vec<WorkflowVariable>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub settings: WorkflowSettings,
}

impl CreateWorkflow {
    /// Minimal creation payload; everything else defaults to empty.
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            created_by: created_by.into(),
            nodes: vec![],
            connections: vec![],
            variables: vec![],
            tags: vec![],
            category: None,
            settings: WorkflowSettings::default(),
        }
    }
}

/// Partial update applied to an existing workflow. `None` fields are kept.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub nodes: Option<Vec<WorkflowNode>>,
    pub connections: Option<Vec<WorkflowConnection>>,
    pub variables: Option<Vec<WorkflowVariable>>,
    pub settings: Option<WorkflowSettings>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
}

/// Filter for listing workflows. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub created_by: Option<String>,
    pub category: Option<String>,
    /// Workflows must carry every listed tag.
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// WorkflowRegistry
// ---------------------------------------------------------------------------

/// CRUD operations over workflow definitions.
pub struct WorkflowRegistry<S: WorkflowStore> {
    store: S,
}

impl<S: WorkflowStore> WorkflowRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a new workflow at version 1 with a derived trigger list.
    pub async fn create(&self, params: CreateWorkflow) -> Result<Workflow, RegistryError> {
        graph::validate_nodes(&params.nodes)?;
        let now = Utc::now();
        let triggers = graph::recompute_triggers(&params.nodes);
        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: params.name,
            description: params.description,
            version: 1,
            nodes: params.nodes,
            connections: params.connections,
            variables: params.variables,
            triggers,
            metadata: WorkflowMetadata {
                created_by: params.created_by,
                created_at: now,
                updated_at: now,
                tags: params.tags,
                category: params.category,
            },
            settings: params.settings,
        };

        self.store.insert(workflow.clone()).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            name = workflow.name.as_str(),
            "workflow created"
        );
        Ok(workflow)
    }

    /// Apply a partial update, incrementing the version.
    ///
    /// The stored workflow is replaced wholesale with the validated
    /// candidate; in-flight executions keep the version they pinned at
    /// start.
    pub async fn update(
        &self,
        id: Uuid,
        update: WorkflowUpdate,
    ) -> Result<Workflow, RegistryError> {
        let result = self
            .store
            .modify(id, move |workflow| {
                let mut candidate = workflow.clone();
                if let Some(name) = update.name {
                    candidate.name = name;
                }
                if let Some(description) = update.description {
                    candidate.description = Some(description);
                }
                if let Some(nodes) = update.nodes {
                    candidate.nodes = nodes;
                }
                if let Some(connections) = update.connections {
                    candidate.connections = connections;
                }
                if let Some(variables) = update.variables {
                    candidate.variables = variables;
                }
                if let Some(settings) = update.settings {
                    candidate.settings = settings;
                }
                if let Some(tags) = update.tags {
                    candidate.metadata.tags = tags;
                }
                if let Some(category) = update.category {
                    candidate.metadata.category = Some(category);
                }

                graph::validate_nodes(&candidate.nodes)?;
                candidate.version = workflow.version + 1;
                candidate.triggers = graph::recompute_triggers(&candidate.nodes);
                candidate.metadata.updated_at = Utc::now();

                *workflow = candidate.clone();
                Ok::<Workflow, RegistryError>(candidate)
            })
            .await;

        match result {
            Ok(inner) => {
                let workflow = inner?;
                tracing::debug!(
                    workflow_id = %id,
                    version = workflow.version,
                    "workflow updated"
                );
                Ok(workflow)
            }
            Err(StoreError::NotFound) => Err(RegistryError::WorkflowNotFound(id)),
            Err(e) => Err(RegistryError::Store(e)),
        }
    }

    /// Get a workflow by id.
    pub async fn get(&self, id: Uuid) -> Result<Workflow, RegistryError> {
        self.store
            .get(id)
            .await?
            .ok_or(RegistryError::WorkflowNotFound(id))
    }

    /// List workflows matching the filter.
    pub async fn list(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>, RegistryError> {
        let workflows = self.store.list().await?;
        Ok(workflows
            .into_iter()
            .filter(|w| {
                filter
                    .created_by
                    .as_deref()
                    .is_none_or(|by| w.metadata.created_by == by)
                    && filter
                        .category
                        .as_deref()
                        .is_none_or(|c| w.metadata.category.as_deref() == Some(c))
                    && filter.tags.iter().all(|t| w.metadata.tags.contains(t))
            })
            .collect())
    }

    /// Delete a workflow by id. Returns `true` if it existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, RegistryError> {
        let existed = self.store.delete(id).await?;
        if existed {
            tracing::info!(workflow_id = %id, "workflow deleted");
        }
        Ok(existed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
