//! Tool call envelope: `ToolRequest`/`ToolResult`/`RetryHint`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolId;

/// One scheduled tool invocation. `tool_call_id` is unique per call within a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_id: ToolId,
    pub payload: Value,
    pub tool_call_id: String,
    pub parent_tool_call_id: Option<String>,
}

/// Reason a tool call should be retried or repaired, surfaced to the planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    InvalidArguments,
    MissingFields,
    MalformedResponse,
    Timeout,
    RateLimited,
    ToolUnavailable,
}

/// Structured, planner-facing guidance produced on tool failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetryHint {
    pub reason: Option<RetryReason>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    pub example_input: Option<Value>,
    pub clarifying_question: Option<String>,
    /// Narrows the next turn's allow-list to `tool` and caps remaining calls to 1.
    #[serde(default)]
    pub restrict_to_tool: bool,
    pub tool: Option<ToolId>,
}

impl RetryHint {
    pub fn reason(reason: RetryReason) -> Self {
        Self {
            reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn missing_fields(fields: Vec<String>, example_input: Option<Value>) -> Self {
        Self {
            reason: Some(RetryReason::MissingFields),
            missing_fields: fields,
            example_input,
            ..Default::default()
        }
    }
}

/// An error raised while executing a tool call; distinct from a transport/infra
/// failure, which is classified separately.
#[derive(Clone, Debug, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn canceled_time_budget() -> Self {
        Self::new("canceled: time budget reached")
    }
}

/// Links a `ToolResult` back to the child run it executed, for nested-agent
/// tool calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunLink {
    pub run_id: String,
}

/// Telemetry attached to a completed tool call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Telemetry {
    pub duration_ms: u64,
}

/// Outcome of one `ToolRequest`. Exactly one of `result`/`error` is meaningfully
/// set; both absent is not a valid terminal state for a scheduled call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_id: ToolId,
    pub tool_call_id: String,
    pub result: Option<Value>,
    pub error: Option<ToolError>,
    pub retry_hint: Option<RetryHint>,
    pub telemetry: Option<Telemetry>,
    pub run_link: Option<RunLink>,
}

impl ToolResult {
    pub fn success(tool_id: ToolId, tool_call_id: impl Into<String>, result: Value) -> Self {
        Self {
            tool_id,
            tool_call_id: tool_call_id.into(),
            result: Some(result),
            error: None,
            retry_hint: None,
            telemetry: None,
            run_link: None,
        }
    }

    pub fn failure(
        tool_id: ToolId,
        tool_call_id: impl Into<String>,
        error: ToolError,
        retry_hint: Option<RetryHint>,
    ) -> Self {
        Self {
            tool_id,
            tool_call_id: tool_call_id.into(),
            result: None,
            error: Some(error),
            retry_hint,
            telemetry: None,
            run_link: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_run_link(mut self, run_link: RunLink) -> Self {
        self.run_link = Some(run_link);
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
