//! Store trait definitions for workflows and executions.
//!
//! The engine and registry operate over these "ports" instead of process-wide
//! maps, so multiple independent engine instances can coexist and tests can
//! inject their own backends. The in-memory implementations live in `memory`.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use agentloom_types::error::StoreError;
use agentloom_types::workflow::{Workflow, WorkflowExecution};
use uuid::Uuid;

pub mod memory;

pub use memory::{MemoryExecutionStore, MemoryWorkflowStore};

/// Storage port for workflow definitions.
///
/// `modify` is the serialization point: implementations must apply the
/// closure under exclusive per-id access so concurrent updates cannot
/// interleave and version increments stay monotonic.
pub trait WorkflowStore: Send + Sync {
    /// Insert a new workflow. Fails with `Conflict` if the id already exists.
    fn insert(
        &self,
        workflow: Workflow,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Get a workflow by id.
    fn get(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, StoreError>> + Send;

    /// Atomically apply `f` to the stored workflow and return its result.
    ///
    /// Fails with `NotFound` if the id does not exist.
    fn modify<T, F>(
        &self,
        id: Uuid,
        f: F,
    ) -> impl std::future::Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: FnOnce(&mut Workflow) -> T + Send;

    /// Delete a workflow by id. Returns `true` if it existed.
    fn delete(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// All stored workflows, in no particular order.
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<Workflow>, StoreError>> + Send;
}

/// Storage port for workflow executions.
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution record.
    fn insert(
        &self,
        execution: WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Get an execution by id.
    fn get(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, StoreError>> + Send;

    /// Atomically apply `f` to the stored execution and return its result.
    ///
    /// The engine funnels every state transition through this method, so
    /// implementations must serialize concurrent calls per id.
    fn modify<T, F>(
        &self,
        id: Uuid,
        f: F,
    ) -> impl std::future::Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: FnOnce(&mut WorkflowExecution) -> T + Send;

    /// Executions for a workflow, newest first by `started_at`.
    fn list_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Arc delegation
// ---------------------------------------------------------------------------

// A shared handle to a store is itself a store, so the registry and the
// engine can run over the same backend.

impl<S: WorkflowStore> WorkflowStore for std::sync::Arc<S> {
    async fn insert(&self, workflow: Workflow) -> Result<(), StoreError> {
        (**self).insert(workflow).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        (**self).get(id).await
    }

    async fn modify<T, F>(&self, id: Uuid, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut Workflow) -> T + Send,
    {
        (**self).modify(id, f).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }

    async fn list(&self) -> Result<Vec<Workflow>, StoreError> {
        (**self).list().await
    }
}

impl<S: ExecutionStore> ExecutionStore for std::sync::Arc<S> {
    async fn insert(&self, execution: WorkflowExecution) -> Result<(), StoreError> {
        (**self).insert(execution).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        (**self).get(id).await
    }

    async fn modify<T, F>(&self, id: Uuid, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(&mut WorkflowExecution) -> T + Send,
    {
        (**self).modify(id, f).await
    }

    async fn list_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        (**self).list_for_workflow(workflow_id).await
    }
}
