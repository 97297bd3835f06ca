//! Lifecycle events published on the run bus.
//!
//! These are the *internal* events a run publishes as it progresses. They are
//! distinct from the client-facing [`crate::sink::StreamFrame`] union that a
//! [`crate::sink::StreamSubscriber`] translates them into — lifecycle events
//! carry everything a debug subscriber wants; stream frames carry only what a
//! chat UI renders.

use serde::Serialize;
use serde_json::Value;

/// One lifecycle event, tagged by kind. `RunID` + `AgentID` are carried in the
/// [`crate::envelope::Envelope`] this event is wrapped in, not here.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RunStarted {
        agent_id: String,
    },
    RunCompleted {
        status: String,
        final_message: Option<Value>,
    },
    RunPaused {
        reason: Option<String>,
        requested_by: Option<String>,
    },
    RunResumed {
        requested_by: Option<String>,
    },
    ToolCallScheduled {
        tool_id: String,
        tool_call_id: String,
        parent_tool_call_id: Option<String>,
    },
    ToolCallUpdated {
        tool_call_id: String,
        status: String,
    },
    ToolResultReceived {
        tool_id: String,
        tool_call_id: String,
        outcome: String,
        duration_ms: u64,
    },
    PlannerNote {
        text: String,
    },
    AssistantMessage {
        text: String,
    },
    RetryHintIssued {
        tool_call_id: String,
        reason: String,
    },
    MemoryAppended {
        event_kind: String,
    },
    PolicyDecision {
        allowed_tools: Vec<String>,
        disable_tools: bool,
        remaining_tool_calls: u32,
    },
    AgentRunStarted {
        child_run_id: String,
        child_agent_id: String,
        parent_tool_call_id: String,
    },
}

impl LifecycleEvent {
    /// Serializes this event to a JSON object (kind + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Short machine name, used in log lines and test assertions.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunPaused { .. } => "run_paused",
            Self::RunResumed { .. } => "run_resumed",
            Self::ToolCallScheduled { .. } => "tool_call_scheduled",
            Self::ToolCallUpdated { .. } => "tool_call_updated",
            Self::ToolResultReceived { .. } => "tool_result_received",
            Self::PlannerNote { .. } => "planner_note",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::RetryHintIssued { .. } => "retry_hint_issued",
            Self::MemoryAppended { .. } => "memory_appended",
            Self::PolicyDecision { .. } => "policy_decision",
            Self::AgentRunStarted { .. } => "agent_run_started",
        }
    }
}
