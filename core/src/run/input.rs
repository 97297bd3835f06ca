//! Run envelope: `RunInput`, `RunOutput`, `RunContext`, termination
//! status, and the engine-facing options carried on `StartWorkflow`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::AgentMessage;

use super::caps::CapsState;
use super::request::ToolResult;

/// Retry policy for activities scheduled on behalf of this run. Merged with
/// the engine default and the toolset's configured policy at execution time
/// (request override wins per field).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub initial_interval_ms: Option<u64>,
    pub backoff_coefficient: Option<f64>,
}

impl RetryPolicy {
    /// Merges `self` (the base/less-specific layer) with `other` (the
    /// more-specific layer), `other` winning per field when it sets one.
    /// Composing engine default ∘ toolset policy ∘ request override is
    /// three calls: `engine.merge(&toolset).merge(&override)`.
    pub fn merge(&self, other: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: other.max_attempts.or(self.max_attempts),
            initial_interval_ms: other.initial_interval_ms.or(self.initial_interval_ms),
            backoff_coefficient: other.backoff_coefficient.or(self.backoff_coefficient),
        }
    }
}

#[cfg(test)]
mod retry_policy_tests {
    use super::*;

    #[test]
    fn merge_lets_more_specific_layer_win_per_field() {
        let engine_default = RetryPolicy {
            max_attempts: Some(3),
            initial_interval_ms: Some(100),
            backoff_coefficient: Some(2.0),
        };
        let toolset = RetryPolicy {
            max_attempts: Some(5),
            initial_interval_ms: None,
            backoff_coefficient: None,
        };
        let request_override = RetryPolicy {
            max_attempts: None,
            initial_interval_ms: Some(250),
            backoff_coefficient: None,
        };

        let merged = engine_default.merge(&toolset).merge(&request_override);
        assert_eq!(merged.max_attempts, Some(5));
        assert_eq!(merged.initial_interval_ms, Some(250));
        assert_eq!(merged.backoff_coefficient, Some(2.0));
    }

    #[test]
    fn merge_with_all_none_layer_keeps_base() {
        let engine_default = RetryPolicy {
            max_attempts: Some(3),
            initial_interval_ms: Some(100),
            backoff_coefficient: Some(2.0),
        };
        let merged = engine_default.merge(&RetryPolicy::default());
        assert_eq!(merged.max_attempts, Some(3));
        assert_eq!(merged.initial_interval_ms, Some(100));
        assert_eq!(merged.backoff_coefficient, Some(2.0));
    }
}

/// Durable-engine scheduling knobs: workflow dedup key, search attributes for
/// the engine's UI/query surface, task queue, activity retry policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineOptions {
    pub memo: HashMap<String, Value>,
    pub search_attributes: HashMap<String, Value>,
    pub queue: Option<String>,
    pub retry_policy: Option<RetryPolicy>,
    /// `CapsState::max_tool_calls` seed; defaults to 20 if unset.
    pub max_tool_calls: Option<u32>,
    /// `CapsState::max_consecutive_failed_tool_calls` seed; defaults to 3 if unset.
    pub max_consecutive_failed_tool_calls: Option<u32>,
    /// Run-level wall-clock budget in milliseconds, relative to run start
    ///; defaults to 10 minutes if unset.
    pub time_budget_ms: Option<i64>,
}

pub const DEFAULT_MAX_TOOL_CALLS: u32 = 20;
pub const DEFAULT_MAX_CONSECUTIVE_FAILED_TOOL_CALLS: u32 = 3;
pub const DEFAULT_TIME_BUDGET_MS: i64 = 10 * 60 * 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunInput {
    pub agent_id: String,
    pub run_id: String,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub transcript: Vec<AgentMessage>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub engine_options: EngineOptions,
}

impl RunInput {
    pub fn new(agent_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            run_id: run_id.into(),
            session_id: None,
            turn_id: None,
            transcript: Vec::new(),
            labels: HashMap::new(),
            metadata: HashMap::new(),
            engine_options: EngineOptions::default(),
        }
    }

    pub fn with_transcript(mut self, transcript: Vec<AgentMessage>) -> Self {
        self.transcript = transcript;
        self
    }
}

/// Why a run stopped producing turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    Success,
    Failed,
    Canceled,
    CapsExhausted,
    TimeBudgetExceeded,
    ConsecutiveFailuresExhausted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunOutput {
    pub agent_id: String,
    pub run_id: String,
    pub status: TerminationStatus,
    pub final_message: Option<AgentMessage>,
    pub last_tool_results: Vec<ToolResult>,
    pub planner_notes: Vec<String>,
}

/// Run-scoped context threaded through every phase of the run loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub labels: HashMap<String, String>,
    pub attempt: u32,
    pub caps: CapsState,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, caps: CapsState) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: None,
            turn_id: None,
            labels: HashMap::new(),
            attempt: 1,
            caps,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.caps.is_expired(now)
    }
}
