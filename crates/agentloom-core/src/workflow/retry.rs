//! Bounded retry policy with exponential backoff for action nodes.
//!
//! Stateless: the engine tracks the attempt counter on the node result and
//! asks the policy whether (and how long) to wait before the next attempt.

use std::time::Duration;

use agentloom_types::workflow::WorkflowSettings;

/// Backoff delays never exceed this, regardless of attempt count.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Retry policy for a workflow's action nodes, derived from its settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Derive the policy from workflow settings.
    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        Self {
            enabled: settings.retry_on_failure,
            max_attempts: settings.retry_count.max(1),
            base_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }

    /// Whether a failed attempt (1-based) should be retried.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }

    /// Backoff delay before the attempt following `attempt` failures.
    ///
    /// Exponential: `base * 2^(attempt - 1)`, capped at `MAX_RETRY_DELAY`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
