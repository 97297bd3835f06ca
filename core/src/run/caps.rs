//! `CapsState`: per-run numeric budgets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-run budgets. Mutated only by the policy engine, once per turn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CapsState {
    pub max_tool_calls: u32,
    pub remaining_tool_calls: u32,
    pub max_consecutive_failed_tool_calls: u32,
    pub remaining_consecutive_failed_tool_calls: u32,
    pub expires_at: DateTime<Utc>,
}

impl CapsState {
    pub fn new(
        max_tool_calls: u32,
        max_consecutive_failed_tool_calls: u32,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            max_tool_calls,
            remaining_tool_calls: max_tool_calls,
            max_consecutive_failed_tool_calls,
            remaining_consecutive_failed_tool_calls: max_consecutive_failed_tool_calls,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn has_tool_calls_remaining(&self) -> bool {
        self.remaining_tool_calls > 0
    }

    /// Decremented once per executed tool regardless of outcome. Saturates at 0.
    pub fn consume_tool_call(&mut self) {
        self.remaining_tool_calls = self.remaining_tool_calls.saturating_sub(1);
    }

    /// On success: reset failure budget to max. On failure: decrement it.
    /// Saturates at 0; callers must check `remaining_consecutive_failed_tool_calls == 0`
    /// after a failure to detect `consecutive_failures_exhausted`.
    pub fn record_tool_outcome(&mut self, success: bool) {
        if success {
            self.remaining_consecutive_failed_tool_calls = self.max_consecutive_failed_tool_calls;
        } else {
            self.remaining_consecutive_failed_tool_calls =
                self.remaining_consecutive_failed_tool_calls.saturating_sub(1);
        }
    }

    pub fn consecutive_failures_exhausted(&self) -> bool {
        self.remaining_consecutive_failed_tool_calls == 0
    }

    /// `RetryHint.RestrictToTool` narrows remaining calls to at most 1.
    pub fn restrict_to_single_call(&mut self) {
        self.remaining_tool_calls = self.remaining_tool_calls.min(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn caps(max_calls: u32, max_failures: u32) -> CapsState {
        CapsState::new(max_calls, max_failures, Utc::now() + Duration::seconds(60))
    }

    #[test]
    fn consume_tool_call_decrements_and_saturates() {
        let mut c = caps(1, 3);
        c.consume_tool_call();
        assert_eq!(c.remaining_tool_calls, 0);
        c.consume_tool_call();
        assert_eq!(c.remaining_tool_calls, 0);
    }

    #[test]
    fn record_tool_outcome_resets_on_success_decrements_on_failure() {
        let mut c = caps(5, 2);
        c.record_tool_outcome(false);
        assert_eq!(c.remaining_consecutive_failed_tool_calls, 1);
        c.record_tool_outcome(false);
        assert!(c.consecutive_failures_exhausted());
        c.record_tool_outcome(true);
        assert_eq!(c.remaining_consecutive_failed_tool_calls, 2);
    }

    #[test]
    fn restrict_to_single_call_caps_at_one() {
        let mut c = caps(5, 2);
        c.restrict_to_single_call();
        assert_eq!(c.remaining_tool_calls, 1);
        c.consume_tool_call();
        c.restrict_to_single_call();
        assert_eq!(c.remaining_tool_calls, 0);
    }
}
