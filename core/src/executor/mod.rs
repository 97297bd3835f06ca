//! Tool executors: one shared `execute` across four variants,
//! dispatched as a tagged union rather than a trait
//! object, since the variant a tool uses is fixed at registration time.

mod activity;
mod mcp;
mod nested_agent;
mod registry_executor;

pub use activity::{ActivityExecutor, ActivityRunner};
pub use mcp::{McpCallOutcome, McpCaller, McpError, McpExecutor, McpSessionKind};
pub use nested_agent::{NestedAgentExecutor, RunLoopInvoker};
pub use registry_executor::{
    RegistryCallHandle, RegistryClient, RegistryExecutor, ResultStreamReader, StreamedFrame,
};

use serde_json::Value;
use thiserror::Error;

use crate::message::AgentMessage;
use crate::run::{RetryHint, RetryPolicy, RetryReason, Telemetry, ToolError};
use crate::tool::ToolId;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("nested run failed: {0}")]
    NestedRunFailed(String),
}

/// Per-call context available to an executor: conversation so far, the ids
/// that correlate this call to its run/turn, and the run's retry-policy
/// override (the most specific layer in the engine-default ∘ toolset ∘
/// request-override merge, see [`RetryPolicy::merge`]).
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    pub run_id: String,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub recent_messages: Vec<AgentMessage>,
    pub retry_policy_override: Option<RetryPolicy>,
}

/// Input to one tool execution.
#[derive(Clone, Debug)]
pub struct ToolInput {
    pub tool_call_id: String,
    pub parent_tool_call_id: Option<String>,
    pub tool_id: ToolId,
    pub payload: Value,
    /// Set by the run loop only for the `NestedAgent` variant: the child run
    /// id it already published on `AgentRunStarted`, so `NestedAgentExecutor`
    /// reuses it for the `RunLink` on the final `ToolResult` instead of
    /// minting a second, disagreeing id.
    pub child_run_id: Option<String>,
}

/// Output of one tool execution. A non-empty `error` always takes precedence
/// over `result` when both happen to be set.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_hint: Option<RetryHint>,
    pub telemetry: Option<Telemetry>,
    /// Set only by `NestedAgentExecutor`: the child run id to link in the
    /// resulting `ToolResult`.
    pub child_run_id: Option<String>,
}

impl ToolOutput {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>, retry_hint: Option<RetryHint>) -> Self {
        Self {
            error: Some(message.into()),
            retry_hint,
            ..Default::default()
        }
    }
}

/// Maps a JSON-RPC error code to a retry hint: `-32602`
/// (invalid params) and `-32601` (method not found) are recognized; anything
/// else is left unclassified so the run loop treats it as an infra error.
pub fn retry_hint_for_json_rpc_code(code: i64) -> Option<RetryHint> {
    match code {
        -32602 => Some(RetryHint::reason(RetryReason::InvalidArguments)),
        -32601 => Some(RetryHint::reason(RetryReason::ToolUnavailable)),
        _ => None,
    }
}

/// Tagged union of executor kinds. Registration-time metadata picks the
/// variant; the run loop only ever calls `execute`.
pub enum ToolExecutor {
    Activity(ActivityExecutor),
    NestedAgent(NestedAgentExecutor),
    Mcp(McpExecutor),
    Registry(RegistryExecutor),
}

impl ToolExecutor {
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: ToolInput,
    ) -> Result<ToolOutput, ExecutorError> {
        match self {
            ToolExecutor::Activity(e) => e.execute(ctx, input).await,
            ToolExecutor::NestedAgent(e) => e.execute(ctx, input).await,
            ToolExecutor::Mcp(e) => e.execute(ctx, input).await,
            ToolExecutor::Registry(e) => e.execute(ctx, input).await,
        }
    }

    /// The child agent id this call would start, if this is a nested-agent
    /// tool. The run loop uses this to decide whether to publish
    /// `AgentRunStarted` in addition to `ToolCallScheduled`.
    pub fn nested_agent_id(&self) -> Option<&str> {
        match self {
            ToolExecutor::NestedAgent(e) => Some(e.child_agent_id()),
            _ => None,
        }
    }
}

/// Converts a non-error `ToolOutput` into a [`crate::run::ToolResult`]. The
/// run loop calls this after every `execute`; shared so each executor only
/// has to produce the variant-agnostic `ToolOutput`.
pub fn finish(
    tool_id: ToolId,
    tool_call_id: impl Into<String>,
    output: ToolOutput,
) -> crate::run::ToolResult {
    let tool_call_id = tool_call_id.into();
    let mut result = if let Some(message) = output.error {
        crate::run::ToolResult::failure(
            tool_id,
            tool_call_id,
            ToolError::new(message),
            output.retry_hint,
        )
    } else {
        crate::run::ToolResult::success(
            tool_id,
            tool_call_id,
            output.result.unwrap_or(Value::Null),
        )
    };
    if let Some(telemetry) = output.telemetry {
        result = result.with_telemetry(telemetry);
    }
    if let Some(run_id) = output.child_run_id {
        result = result.with_run_link(crate::run::RunLink { run_id });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_rpc_code_mapping_covers_spec_cases() {
        assert_eq!(
            retry_hint_for_json_rpc_code(-32602).unwrap().reason,
            Some(RetryReason::InvalidArguments)
        );
        assert_eq!(
            retry_hint_for_json_rpc_code(-32601).unwrap().reason,
            Some(RetryReason::ToolUnavailable)
        );
        assert!(retry_hint_for_json_rpc_code(-1).is_none());
    }

    #[test]
    fn finish_maps_error_output_to_failed_tool_result() {
        let output = ToolOutput::err("boom", None);
        let result = finish(ToolId::new("search", "query"), "call-1", output);
        assert!(!result.is_success());
    }
}
