//! In-memory store implementations backed by `DashMap`.
//!
//! The default backend for tests and single-process deployments. Per-id
//! serialization comes from the DashMap entry API: `modify` holds the entry's
//! write guard for the duration of the closure, so concurrent updates to the
//! same id are applied one at a time and version increments stay race-free.

use agentloom_types::error::StoreError;
use agentloom_types::workflow::{Workflow, WorkflowExecution};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{ExecutionStore, WorkflowStore};

// ---------------------------------------------------------------------------
// MemoryWorkflowStore
// ---------------------------------------------------------------------------

/// DashMap-backed workflow store.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    workflows: DashMap<Uuid, Workflow>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    async fn insert(&self, workflow: Workflow) -> Result<(), StoreError> {
        match self.workflows.entry(workflow.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(workflow);
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.get(&id).map(|w| w.value().clone()))
    }

    async fn modify<T, F>(&self, id: Uuid, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut Workflow) -> T + Send,
    {
        let mut entry = self.workflows.get_mut(&id).ok_or(StoreError::NotFound)?;
        Ok(f(entry.value_mut()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.workflows.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.workflows.iter().map(|w| w.value().clone()).collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryExecutionStore
// ---------------------------------------------------------------------------

/// DashMap-backed execution store.
///
/// Executions are never deleted automatically; they are retained for
/// inspection and listing after they reach a terminal status.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    executions: DashMap<Uuid, WorkflowExecution>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, execution: WorkflowExecution) -> Result<(), StoreError> {
        match self.executions.entry(execution.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "execution {} already exists",
                execution.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(execution);
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        Ok(self.executions.get(&id).map(|e| e.value().clone()))
    }

    async fn modify<T, F>(&self, id: Uuid, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut WorkflowExecution) -> T + Send,
    {
        let mut entry = self.executions.get_mut(&id).ok_or(StoreError::NotFound)?;
        Ok(f(entry.value_mut()))
    }

    async fn list_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let mut runs: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| e.value().clone())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
