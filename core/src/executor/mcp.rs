//! `MCPExecutor`: delegates to an `MCPCaller`, with
//! trace context propagated in both the transport header and the JSON-RPC
//! `_meta.traceparent` field, and JSON-RPC error codes mapped to retry hints.
//!
//! The wire protocol itself is out of scope; `McpCaller` is the
//! interface boundary, in the shape of an `McpSessionKind` enum holding
//! stdio vs. HTTP session variants behind one call surface.

use async_trait::async_trait;
use serde_json::Value;

use super::{retry_hint_for_json_rpc_code, ExecutionContext, ExecutorError, ToolInput, ToolOutput};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Outcome of one JSON-RPC `tools/call`.
pub struct McpCallOutcome {
    pub result: Value,
}

/// Transport session kind a given `McpExecutor` was built with — stdio or
/// HTTP/SSE. The executor only needs to know this to decide how trace context
/// is attached; the actual framing is behind [`McpCaller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum McpSessionKind {
    Stdio,
    Http,
}

/// Calls a tool over MCP. The wire protocol (JSON-RPC/SSE/stdio) is out of
/// scope for this crate; implementations live alongside a concrete transport.
#[async_trait]
pub trait McpCaller: Send + Sync {
    /// `trace_header` is the HTTP trace header value (ignored by stdio
    /// transports); `traceparent` is also embedded in `_meta.traceparent` of
    /// the JSON-RPC request body by the implementation
    async fn call_tool(
        &self,
        tool_name: &str,
        payload: Value,
        traceparent: &str,
    ) -> Result<McpCallOutcome, McpError>;
}

pub struct McpExecutor {
    caller: std::sync::Arc<dyn McpCaller>,
    kind: McpSessionKind,
}

impl McpExecutor {
    pub fn new(caller: std::sync::Arc<dyn McpCaller>, kind: McpSessionKind) -> Self {
        Self { caller, kind }
    }

    pub fn session_kind(&self) -> McpSessionKind {
        self.kind
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: ToolInput,
    ) -> Result<ToolOutput, ExecutorError> {
        let traceparent = format!("00-{}-{}-01", ctx.run_id, input.tool_call_id);
        match self
            .caller
            .call_tool(input.tool_id.tool(), input.payload, &traceparent)
            .await
        {
            Ok(outcome) => Ok(ToolOutput::ok(outcome.result)),
            Err(McpError::Rpc { code, message }) => {
                Ok(ToolOutput::err(message, retry_hint_for_json_rpc_code(code)))
            }
            Err(McpError::Transport(message)) => Err(ExecutorError::Transport(message)),
        }
    }
}
