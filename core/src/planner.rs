//! Planner contract: pluggable decision component producing a
//! final response, tool calls, or await items from transcript + context.
//! Concrete LLM-backed planners are out of scope; this crate
//! defines the `Planner` trait, the `PlanResult` sum type, and a deterministic
//! mock used by the run loop's own tests, in the shape of an `LlmClient`
//! trait plus a scripted `MockLlm`.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::AgentMessage;
use crate::run::{RunContext, RunInput, ToolRequest, ToolResult};

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner failed: {0}")]
    Failed(String),
}

/// One item parked on the planner-initiated await queue.
#[derive(Clone, Debug)]
pub struct AwaitItem {
    pub queue: String,
    pub prompt: Option<String>,
}

/// Sum type: exactly one variant is produced per planner turn.
#[derive(Clone, Debug)]
pub enum PlanResult {
    Final(AgentMessage),
    ToolCalls(Vec<ToolRequest>),
    Await(Vec<AwaitItem>),
}

/// Decision component invoked at the start of a run (`plan_start`) and after
/// every tool batch (`plan_resume`). Implementations MUST be total: every
/// call returns exactly one `PlanResult` variant or a `PlannerError`.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan_start(
        &self,
        input: &RunInput,
        ctx: &RunContext,
    ) -> Result<PlanResult, PlannerError>;

    async fn plan_resume(
        &self,
        input: &RunInput,
        ctx: &RunContext,
        results: &[ToolResult],
    ) -> Result<PlanResult, PlannerError>;
}

/// Deterministic scripted planner: replays a fixed sequence of `PlanResult`s,
/// one per call to either `plan_start` or `plan_resume`, in order. Useful for
/// exercising the run loop's state machine without a real model.
pub struct ScriptedPlanner {
    script: std::sync::Mutex<std::collections::VecDeque<PlanResult>>,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<PlanResult>) -> Self {
        Self {
            script: std::sync::Mutex::new(script.into()),
        }
    }

    fn next(&self) -> Result<PlanResult, PlannerError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PlannerError::Failed("scripted planner exhausted".into()))
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan_start(
        &self,
        _input: &RunInput,
        _ctx: &RunContext,
    ) -> Result<PlanResult, PlannerError> {
        self.next()
    }

    async fn plan_resume(
        &self,
        _input: &RunInput,
        _ctx: &RunContext,
        _results: &[ToolResult],
    ) -> Result<PlanResult, PlannerError> {
        self.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::run::CapsState;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn scripted_planner_replays_in_order() {
        let planner = ScriptedPlanner::new(vec![
            PlanResult::ToolCalls(vec![]),
            PlanResult::Final(AgentMessage::text(Role::Assistant, "done")),
        ]);
        let input = RunInput::new("agent-1", "run-1");
        let caps = CapsState::new(5, 3, Utc::now() + Duration::seconds(60));
        let ctx = RunContext::new("run-1", caps);

        let first = planner.plan_start(&input, &ctx).await.unwrap();
        assert!(matches!(first, PlanResult::ToolCalls(_)));
        let second = planner.plan_resume(&input, &ctx, &[]).await.unwrap();
        assert!(matches!(second, PlanResult::Final(_)));
    }
}
