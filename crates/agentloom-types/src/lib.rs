//! Shared domain types for Agentloom.
//!
//! This crate contains the workflow graph model, execution tracking types,
//! and template blueprints used across the Agentloom engine.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod template;
pub mod workflow;
