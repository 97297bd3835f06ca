//! `NestedAgentExecutor`: runs a child agent inline as a
//! tool call. The run loop emits `ToolCallScheduled` + `AgentRunStarted` at
//! schedule time (it alone knows the turn/seq bookkeeping); this executor's
//! job is only to run the child to completion and fold its final output into
//! a `ToolResult` with `RunLink` set.

use async_trait::async_trait;
use serde_json::Value;

use crate::message::{AgentMessage, Role};
use crate::run::{RunInput, RunOutput, TerminationStatus};

use super::{ExecutionContext, ExecutorError, ToolInput, ToolOutput};

/// Runs one child agent run to completion. Implemented by whatever drives the
/// top-level run loop (`shuttle_core::run_loop::run`), so a nested call is
/// just a recursive invocation in the same workflow/task that executes
/// `run_loop` recursively.
#[async_trait]
pub trait RunLoopInvoker: Send + Sync {
    async fn invoke(&self, input: RunInput) -> Result<RunOutput, ExecutorError>;
}

/// Invokes `child_agent_id` as a tool, converting its user-message payload
/// into a one-message transcript and its final response into the tool result.
pub struct NestedAgentExecutor {
    child_agent_id: String,
    invoker: std::sync::Arc<dyn RunLoopInvoker>,
}

impl NestedAgentExecutor {
    pub fn new(child_agent_id: impl Into<String>, invoker: std::sync::Arc<dyn RunLoopInvoker>) -> Self {
        Self {
            child_agent_id: child_agent_id.into(),
            invoker,
        }
    }

    pub fn child_agent_id(&self) -> &str {
        &self.child_agent_id
    }

    /// Deterministic child run id for this call, derived once by the run loop
    /// before scheduling and reused here so `AgentRunStarted` (published by
    /// the caller) and the `RunLink` on the final `ToolResult` agree.
    pub fn child_run_id_for(tool_call_id: &str) -> String {
        format!("{tool_call_id}-child")
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: ToolInput,
    ) -> Result<ToolOutput, ExecutorError> {
        let child_run_id = input
            .child_run_id
            .clone()
            .unwrap_or_else(|| Self::child_run_id_for(&input.tool_call_id));
        let prompt = input
            .payload
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.payload.to_string());

        let child_input = RunInput::new(self.child_agent_id.clone(), child_run_id.clone())
            .with_transcript(vec![AgentMessage::text(Role::User, prompt)]);
        let mut child_input = child_input;
        child_input.session_id = ctx.session_id.clone();

        let output = self.invoker.invoke(child_input).await?;

        let mut tool_output = match output.status {
            TerminationStatus::Success => ToolOutput::ok(
                output
                    .final_message
                    .as_ref()
                    .map(|m| Value::String(m.text_content()))
                    .unwrap_or(Value::Null),
            ),
            other => ToolOutput::err(format!("child run ended with status {other:?}"), None),
        };
        tool_output.child_run_id = Some(child_run_id);
        Ok(tool_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolId;
    use std::sync::Arc;

    struct StubInvoker;

    #[async_trait]
    impl RunLoopInvoker for StubInvoker {
        async fn invoke(&self, input: RunInput) -> Result<RunOutput, ExecutorError> {
            Ok(RunOutput {
                agent_id: input.agent_id,
                run_id: input.run_id,
                status: TerminationStatus::Success,
                final_message: Some(AgentMessage::text(Role::Assistant, "child done")),
                last_tool_results: vec![],
                planner_notes: vec![],
            })
        }
    }

    #[tokio::test]
    async fn execute_links_child_run_id_and_folds_final_message() {
        let executor = NestedAgentExecutor::new("child-agent", Arc::new(StubInvoker));
        let ctx = ExecutionContext::default();
        let input = ToolInput {
            tool_call_id: "tc-1".into(),
            parent_tool_call_id: None,
            tool_id: ToolId::new("child", "solve"),
            payload: serde_json::json!({"prompt": "solve this"}),
            child_run_id: Some(NestedAgentExecutor::child_run_id_for("tc-1")),
        };
        let output = executor.execute(&ctx, input).await.unwrap();
        assert_eq!(output.child_run_id, Some("tc-1-child".to_string()));
        assert_eq!(output.result, Some(Value::String("child done".into())));
    }

    #[tokio::test]
    async fn execute_falls_back_to_deriving_the_id_when_none_is_supplied() {
        let executor = NestedAgentExecutor::new("child-agent", Arc::new(StubInvoker));
        let ctx = ExecutionContext::default();
        let input = ToolInput {
            tool_call_id: "tc-2".into(),
            parent_tool_call_id: None,
            tool_id: ToolId::new("child", "solve"),
            payload: serde_json::json!({"prompt": "solve this"}),
            child_run_id: None,
        };
        let output = executor.execute(&ctx, input).await.unwrap();
        assert_eq!(output.child_run_id, Some("tc-2-child".to_string()));
    }
}
