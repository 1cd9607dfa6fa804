//! Workflow engine core for Agentloom.
//!
//! This crate defines the store traits ("ports") the engine runs over, the
//! in-memory reference implementations, and the engine itself:
//! - `store` -- `WorkflowStore` / `ExecutionStore` traits + in-memory impls
//! - `workflow::graph` -- node construction, connection, graph validation
//! - `workflow::registry` -- workflow CRUD with optimistic versioning
//! - `workflow::condition` -- pure condition evaluation for branch nodes
//! - `workflow::loop_control` -- pure per-node loop iteration state
//! - `workflow::retry` -- bounded retry with exponential backoff
//! - `workflow::engine` -- the step-wise execution interpreter
//! - `workflow::template` -- template catalog and instantiation
//! - `workflow::definition` -- JSON/YAML workflow documents

pub mod store;
pub mod workflow;
