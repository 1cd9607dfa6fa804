//! Pure per-node loop iteration state.
//!
//! Each call to `step` advances one iteration against the current variable
//! snapshot and returns the updated `LoopState`. The state lives in the
//! execution's dedicated `loop_states` map keyed by node id, never in the
//! user variable namespace, so declared variables cannot collide with it.

use std::collections::HashMap;

use agentloom_types::workflow::{LoopKind, LoopState};
use serde_json::{Value, json};

use super::condition;

// ---------------------------------------------------------------------------
// LoopDecision
// ---------------------------------------------------------------------------

/// The outcome of advancing a loop node by one iteration.
#[derive(Debug, Clone)]
pub struct LoopDecision {
    /// `true` routes to the loop body, `false` to the exit node.
    pub continue_loop: bool,
    /// The current item for `for_each` loops.
    pub item: Option<Value>,
    /// The current 0-based index, when iterating.
    pub index: Option<u64>,
    /// Updated state to store back under the node id.
    pub state: LoopState,
    /// Variable projections (item/index) for the loop body to consume.
    pub variable_updates: Vec<(String, Value)>,
}

impl LoopDecision {
    fn finished(state: LoopState) -> Self {
        Self {
            continue_loop: false,
            item: None,
            index: None,
            state: LoopState {
                completed: true,
                ..state
            },
            variable_updates: vec![],
        }
    }
}

/// Advance a loop node by one iteration.
pub fn step(
    kind: &LoopKind,
    variables: &HashMap<String, Value>,
    state: LoopState,
) -> LoopDecision {
    match kind {
        LoopKind::ForEach {
            source_variable,
            item_variable,
            index_variable,
        } => {
            let Some(items) = condition::resolve_path(variables, source_variable)
                .and_then(Value::as_array)
            else {
                // Missing or non-array source terminates immediately.
                return LoopDecision::finished(state);
            };

            let index = state.iteration;
            if index as usize >= items.len() {
                return LoopDecision::finished(state);
            }

            let item = items[index as usize].clone();
            let mut updates = vec![];
            if let Some(name) = item_variable {
                updates.push((name.clone(), item.clone()));
            }
            if let Some(name) = index_variable {
                updates.push((name.clone(), json!(index)));
            }

            LoopDecision {
                continue_loop: true,
                item: Some(item),
                index: Some(index),
                state: LoopState {
                    iteration: index + 1,
                    completed: false,
                },
                variable_updates: updates,
            }
        }
        LoopKind::Times {
            count,
            index_variable,
        } => {
            let index = state.iteration;
            if index >= *count {
                return LoopDecision::finished(state);
            }

            let mut updates = vec![];
            if let Some(name) = index_variable {
                updates.push((name.clone(), json!(index)));
            }

            LoopDecision {
                continue_loop: true,
                item: None,
                index: Some(index),
                state: LoopState {
                    iteration: index + 1,
                    completed: false,
                },
                variable_updates: updates,
            }
        }
        LoopKind::While {
            condition: predicate,
            max_iterations,
        } => {
            if state.iteration >= *max_iterations
                || !condition::evaluate_predicate(predicate, variables)
            {
                return LoopDecision::finished(state);
            }

            LoopDecision {
                continue_loop: true,
                item: None,
                index: Some(state.iteration),
                state: LoopState {
                    iteration: state.iteration + 1,
                    completed: false,
                },
                variable_updates: vec![],
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
