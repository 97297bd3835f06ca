//! Run envelope types shared by the policy engine, executors, and run loop.

mod caps;
mod input;
mod request;

pub use caps::CapsState;
pub use input::{
    EngineOptions, RetryPolicy, RunContext, RunInput, RunOutput, TerminationStatus,
    DEFAULT_MAX_CONSECUTIVE_FAILED_TOOL_CALLS, DEFAULT_MAX_TOOL_CALLS, DEFAULT_TIME_BUDGET_MS,
};
pub use request::{RetryHint, RetryReason, RunLink, Telemetry, ToolError, ToolRequest, ToolResult};
