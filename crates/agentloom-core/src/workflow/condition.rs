//! Pure condition evaluation for branch nodes and trigger filters.
//!
//! Rules are evaluated in declaration order and the first match wins; no
//! scoring, no fallthrough accumulation. Values are resolved from the
//! execution variables via dot-path lookup (`"company.size"`). Comparisons
//! never coerce types: ordering operators require both sides to be numbers
//! or both to be strings, anything else is a non-match.

use std::collections::HashMap;

use agentloom_types::workflow::{ConditionOperator, ConditionRule, Predicate};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ConditionDecision
// ---------------------------------------------------------------------------

/// The routing decision produced by evaluating a condition node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConditionDecision {
    /// The successor node, if any rule (or the default) provided one.
    /// `None` means the branch terminates here; the engine treats that as
    /// normal completion of the path, not an error.
    pub next_node: Option<Uuid>,
    /// Id of the rule that matched, absent when the default was taken.
    pub matched_condition: Option<String>,
}

/// Evaluate a condition node's rules against a variable snapshot.
pub fn evaluate(
    conditions: &[ConditionRule],
    default_node: Option<Uuid>,
    variables: &HashMap<String, Value>,
) -> ConditionDecision {
    for rule in conditions {
        if evaluate_predicate(&rule.predicate, variables) {
            return ConditionDecision {
                next_node: rule.next_node,
                matched_condition: Some(rule.id.clone()),
            };
        }
    }
    ConditionDecision {
        next_node: default_node,
        matched_condition: None,
    }
}

/// Evaluate a single predicate against a variable snapshot.
pub fn evaluate_predicate(predicate: &Predicate, variables: &HashMap<String, Value>) -> bool {
    let resolved = resolve_path(variables, &predicate.field);

    match predicate.operator {
        ConditionOperator::Exists => resolved.is_some(),
        ConditionOperator::Eq => resolved.is_some_and(|v| *v == predicate.value),
        ConditionOperator::Neq => !resolved.is_some_and(|v| *v == predicate.value),
        ConditionOperator::Gt => compare(resolved, &predicate.value)
            .is_some_and(|ord| ord == std::cmp::Ordering::Greater),
        ConditionOperator::Gte => compare(resolved, &predicate.value)
            .is_some_and(|ord| ord != std::cmp::Ordering::Less),
        ConditionOperator::Lt => compare(resolved, &predicate.value)
            .is_some_and(|ord| ord == std::cmp::Ordering::Less),
        ConditionOperator::Lte => compare(resolved, &predicate.value)
            .is_some_and(|ord| ord != std::cmp::Ordering::Greater),
        ConditionOperator::Contains => resolved.is_some_and(|v| contains(v, &predicate.value)),
        ConditionOperator::NotContains => {
            !resolved.is_some_and(|v| contains(v, &predicate.value))
        }
        ConditionOperator::Regex => resolved.is_some_and(|v| regex_matches(v, &predicate.value)),
    }
}

/// Resolve a dot-path (`"company.size"`) through the variable namespace.
pub fn resolve_path<'a>(
    variables: &'a HashMap<String, Value>,
    path: &str,
) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = variables.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Compare two values without coercion.
///
/// Numbers compare as f64, strings lexicographically. Mixed or non-ordered
/// types yield `None`.
fn compare(left: Option<&Value>, right: &Value) -> Option<std::cmp::Ordering> {
    match (left?, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// String containment for strings, membership for arrays.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.contains(needle),
        _ => false,
    }
}

/// Regex match on string values. Invalid patterns are non-matches.
fn regex_matches(value: &Value, pattern: &Value) -> bool {
    let (Some(subject), Some(pattern)) = (value.as_str(), pattern.as_str()) else {
        return false;
    };
    regex::Regex::new(pattern)
        .map(|re| re.is_match(subject))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
