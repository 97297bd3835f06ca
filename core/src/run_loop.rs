//! The run loop: plan → policy decision → tool batch execution →
//! resume → … → final, with caps, deadlines, interrupts, and event emission.
//!
//! In the shape of a `ReactRunner::invoke` that drives a compiled
//! think/act/observe graph to completion; here the "graph" is this explicit
//! state machine instead of a generic `StateGraph`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use shuttle_stream_event::{EventBus, LifecycleEvent};

use crate::engine::WorkflowContext;
use crate::executor::{ExecutionContext, ExecutorError, NestedAgentExecutor, ToolExecutor, ToolInput};
use crate::message::{AgentMessage, Part, Role};
use crate::policy::{PolicyEngine, PolicyInput};
use crate::run::{
    CapsState, RetryHint, RunContext, RunInput, RunOutput, TerminationStatus, ToolError,
    ToolRequest, ToolResult, DEFAULT_MAX_CONSECUTIVE_FAILED_TOOL_CALLS, DEFAULT_MAX_TOOL_CALLS,
    DEFAULT_TIME_BUDGET_MS,
};
use crate::store::{MemoryEventKind, RunRecord, RunStatus, Stores};
use crate::planner::{PlanResult, Planner};
use crate::tool::ToolId;

/// Everything the run loop needs beyond the transcript: the planner, the
/// policy engine, the tool catalog's executors, the event bus, and the
/// metadata/memory stores.
pub struct RunLoop {
    pub planner: Arc<dyn Planner>,
    pub policy: Arc<dyn PolicyEngine>,
    pub executors: HashMap<ToolId, Arc<ToolExecutor>>,
    pub bus: Arc<EventBus>,
    pub stores: Stores,
}

impl RunLoop {
    fn publish(
        &self,
        run_id: &str,
        agent_id: &str,
        session_id: Option<&str>,
        turn_id: Option<&str>,
        event: LifecycleEvent,
    ) {
        self.bus.publish(run_id, agent_id, session_id, turn_id, event);
    }

    /// Drains any pending pause signal, blocking on resume if one is found.
    /// Called at every phase boundary.
    async fn handle_pause(
        &self,
        input: &mut RunInput,
        ctx: &RunContext,
        wf: &dyn WorkflowContext,
    ) {
        let mut pause_channel = wf.signal_channel("pause");
        let Some(pause) = pause_channel.try_recv() else {
            return;
        };
        let reason = pause
            .get("reason")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let requested_by = pause
            .get("requested_by")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        self.publish(
            &ctx.run_id,
            &input.agent_id,
            ctx.session_id.as_deref(),
            None,
            LifecycleEvent::RunPaused {
                reason,
                requested_by: requested_by.clone(),
            },
        );

        let mut resume_channel = wf.signal_channel("resume");
        let resume = resume_channel.recv().await.unwrap_or_default();
        if let Some(messages) = resume.get("additional_messages").and_then(|v| v.as_array()) {
            for message in messages {
                if let Ok(msg) = serde_json::from_value::<AgentMessage>(message.clone()) {
                    input.transcript.push(msg);
                }
            }
        }
        let resumed_by = resume
            .get("requested_by")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        self.publish(
            &ctx.run_id,
            &input.agent_id,
            ctx.session_id.as_deref(),
            None,
            LifecycleEvent::RunResumed {
                requested_by: resumed_by,
            },
        );
    }

    /// Executes one batch of surviving tool requests concurrently, collecting
    /// results in declaration order regardless of completion order (spec
    /// §4.4 "Parallel batching"). Returns `(results, timed_out)`.
    async fn execute_batch(
        &self,
        input: &RunInput,
        ctx: &mut RunContext,
        turn_id: &str,
        requests: Vec<ToolRequest>,
        wf: &dyn WorkflowContext,
    ) -> (Vec<ToolResult>, bool) {
        let deadline = ctx.caps.expires_at;
        let now = wf.now();
        let remaining = (deadline - now).to_std().unwrap_or(StdDuration::from_secs(0));

        let mut futures = Vec::with_capacity(requests.len());
        for request in &requests {
            let executor = self.executors.get(&request.tool_id).cloned();
            self.publish(
                &ctx.run_id,
                &input.agent_id,
                ctx.session_id.as_deref(),
                Some(turn_id),
                LifecycleEvent::ToolCallScheduled {
                    tool_id: request.tool_id.to_string(),
                    tool_call_id: request.tool_call_id.clone(),
                    parent_tool_call_id: request.parent_tool_call_id.clone(),
                },
            );
            let child_run_id = if let Some(exec) = &executor {
                exec.nested_agent_id().map(|child_agent_id| {
                    let child_run_id = NestedAgentExecutor::child_run_id_for(&request.tool_call_id);
                    self.publish(
                        &ctx.run_id,
                        &input.agent_id,
                        ctx.session_id.as_deref(),
                        Some(turn_id),
                        LifecycleEvent::AgentRunStarted {
                            child_run_id: child_run_id.clone(),
                            child_agent_id: child_agent_id.to_string(),
                            parent_tool_call_id: request.tool_call_id.clone(),
                        },
                    );
                    child_run_id
                })
            } else {
                None
            };

            let exec_ctx = ExecutionContext {
                run_id: ctx.run_id.clone(),
                session_id: ctx.session_id.clone(),
                turn_id: Some(turn_id.to_string()),
                recent_messages: input.transcript.clone(),
                retry_policy_override: input.engine_options.retry_policy.clone(),
            };
            let tool_input = ToolInput {
                tool_call_id: request.tool_call_id.clone(),
                parent_tool_call_id: request.parent_tool_call_id.clone(),
                tool_id: request.tool_id.clone(),
                payload: request.payload.clone(),
                child_run_id,
            };
            futures.push(async move {
                match executor {
                    None => Err(ExecutorError::Transport(format!(
                        "no executor registered for tool {}",
                        tool_input.tool_id
                    ))),
                    Some(exec) => exec.execute(&exec_ctx, tool_input).await,
                }
            });
        }

        let started = std::time::Instant::now();
        let joined = futures::future::join_all(
            futures
                .into_iter()
                .map(|fut| tokio::time::timeout(remaining, fut)),
        )
        .await;

        let mut results = Vec::with_capacity(requests.len());
        let mut timed_out = false;
        for (request, outcome) in requests.into_iter().zip(joined.into_iter()) {
            let duration_ms = started.elapsed().as_millis() as u64;
            let result = match outcome {
                Err(_elapsed) => {
                    timed_out = true;
                    ToolResult::failure(
                        request.tool_id.clone(),
                        request.tool_call_id.clone(),
                        ToolError::canceled_time_budget(),
                        None,
                    )
                }
                Ok(Err(e)) => ToolResult::failure(
                    request.tool_id.clone(),
                    request.tool_call_id.clone(),
                    ToolError::new(e.to_string()),
                    None,
                ),
                Ok(Ok(output)) => {
                    let mut r = crate::executor::finish(
                        request.tool_id.clone(),
                        request.tool_call_id.clone(),
                        output,
                    );
                    r.telemetry = Some(crate::run::Telemetry { duration_ms });
                    r
                }
            };

            ctx.caps.consume_tool_call();
            ctx.caps.record_tool_outcome(result.is_success());

            self.publish(
                &ctx.run_id,
                &input.agent_id,
                ctx.session_id.as_deref(),
                Some(turn_id),
                LifecycleEvent::ToolResultReceived {
                    tool_id: result.tool_id.to_string(),
                    tool_call_id: result.tool_call_id.clone(),
                    outcome: if result.is_success() { "success".into() } else { "tool_error".into() },
                    duration_ms,
                },
            );
            if let Some(hint) = &result.retry_hint {
                self.publish(
                    &ctx.run_id,
                    &input.agent_id,
                    ctx.session_id.as_deref(),
                    Some(turn_id),
                    LifecycleEvent::RetryHintIssued {
                        tool_call_id: result.tool_call_id.clone(),
                        reason: format!("{:?}", hint.reason),
                    },
                );
            }
            results.push(result);
        }
        (results, timed_out)
    }

    async fn complete(
        &self,
        input: &RunInput,
        ctx: &RunContext,
        status: TerminationStatus,
        final_message: Option<AgentMessage>,
        last_tool_results: Vec<ToolResult>,
        planner_notes: Vec<String>,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> RunOutput {
        self.publish(
            &ctx.run_id,
            &input.agent_id,
            ctx.session_id.as_deref(),
            None,
            LifecycleEvent::RunCompleted {
                status: termination_status_tag(status).to_string(),
                final_message: final_message
                    .as_ref()
                    .and_then(|m| serde_json::to_value(m).ok()),
            },
        );
        let _ = self
            .stores
            .runs
            .upsert(RunRecord {
                run_id: ctx.run_id.clone(),
                agent_id: input.agent_id.clone(),
                session_id: ctx.session_id.clone(),
                turn_id: ctx.turn_id.clone(),
                status: RunStatus::Completed { status },
                started_at,
                updated_at: chrono::Utc::now(),
                labels: ctx.labels.clone(),
                metadata: HashMap::new(),
            })
            .await;
        RunOutput {
            agent_id: input.agent_id.clone(),
            run_id: ctx.run_id.clone(),
            status,
            final_message,
            last_tool_results,
            planner_notes,
        }
    }

    /// Drives one run to completion. This is the function handed to
    /// `Engine::start_workflow` as the `WorkflowFn`.
    pub async fn run(&self, mut input: RunInput, wf: Arc<dyn WorkflowContext>) -> RunOutput {
        let started_at = wf.now();
        let max_tool_calls = input
            .engine_options
            .max_tool_calls
            .unwrap_or(DEFAULT_MAX_TOOL_CALLS);
        let max_failures = input
            .engine_options
            .max_consecutive_failed_tool_calls
            .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILED_TOOL_CALLS);
        let time_budget_ms = input
            .engine_options
            .time_budget_ms
            .unwrap_or(DEFAULT_TIME_BUDGET_MS);
        let expires_at = started_at + Duration::milliseconds(time_budget_ms);
        let caps = CapsState::new(max_tool_calls, max_failures, expires_at);
        let mut ctx = RunContext::new(input.run_id.clone(), caps);
        ctx.session_id = input.session_id.clone();
        ctx.labels = input.labels.clone();

        self.publish(
            &ctx.run_id,
            &input.agent_id,
            ctx.session_id.as_deref(),
            None,
            LifecycleEvent::RunStarted {
                agent_id: input.agent_id.clone(),
            },
        );
        let _ = self
            .stores
            .runs
            .upsert(RunRecord {
                run_id: ctx.run_id.clone(),
                agent_id: input.agent_id.clone(),
                session_id: ctx.session_id.clone(),
                turn_id: None,
                status: RunStatus::Running,
                started_at,
                updated_at: started_at,
                labels: ctx.labels.clone(),
                metadata: HashMap::new(),
            })
            .await;

        let mut turn_idx: u64 = 0;
        let mut last_batch_results: Vec<ToolResult> = Vec::new();
        let mut pending_retry_hint: Option<RetryHint> = None;
        let mut planner_notes: Vec<String> = Vec::new();

        loop {
            self.handle_pause(&mut input, &ctx, wf.as_ref()).await;

            if ctx.is_expired(wf.now()) {
                return self
                    .complete(
                        &input,
                        &ctx,
                        TerminationStatus::TimeBudgetExceeded,
                        None,
                        last_batch_results,
                        planner_notes,
                        started_at,
                    )
                    .await;
            }

            let turn_id = format!("turn-{turn_idx}");
            ctx.turn_id = Some(turn_id.clone());

            let plan_result = if turn_idx == 0 {
                self.planner.plan_start(&input, &ctx).await
            } else {
                self.planner
                    .plan_resume(&input, &ctx, &last_batch_results)
                    .await
            };

            let plan_result = match plan_result {
                Ok(r) => r,
                Err(e) => {
                    return self
                        .complete(
                            &input,
                            &ctx,
                            TerminationStatus::Failed,
                            Some(AgentMessage::text(Role::Assistant, e.to_string())),
                            last_batch_results,
                            planner_notes,
                            started_at,
                        )
                        .await;
                }
            };

            match plan_result {
                PlanResult::Final(message) => {
                    self.publish(
                        &ctx.run_id,
                        &input.agent_id,
                        ctx.session_id.as_deref(),
                        Some(&turn_id),
                        LifecycleEvent::AssistantMessage {
                            text: message.text_content(),
                        },
                    );
                    return self
                        .complete(
                            &input,
                            &ctx,
                            TerminationStatus::Success,
                            Some(message),
                            last_batch_results,
                            planner_notes,
                            started_at,
                        )
                        .await;
                }
                PlanResult::Await(items) => {
                    for item in items {
                        planner_notes.push(format!("awaiting {}", item.queue));
                        let channel_name = format!("await:{}", item.queue);
                        let mut channel = wf.signal_channel(&channel_name);
                        if let Some(payload) = channel.recv().await {
                            let text = payload
                                .get("text")
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or_default()
                                .to_string();
                            input
                                .transcript
                                .push(AgentMessage::text(Role::User, text));
                        }
                    }
                    last_batch_results = Vec::new();
                    turn_idx += 1;
                    continue;
                }
                PlanResult::ToolCalls(requests) => {
                    let candidate_tools: Vec<ToolId> =
                        self.executors.keys().cloned().collect();
                    let explicitly_requested: Vec<ToolId> =
                        requests.iter().map(|r| r.tool_id.clone()).collect();

                    let decision = match self.policy.decide(
                        PolicyInput {
                            context: &ctx,
                            candidate_tools: &candidate_tools,
                            retry_hint: pending_retry_hint.as_ref(),
                            explicitly_requested_tools: &explicitly_requested,
                            labels: &ctx.labels,
                        },
                        wf.now(),
                    ) {
                        Ok(d) => d,
                        Err(e) => {
                            return self
                                .complete(
                                    &input,
                                    &ctx,
                                    TerminationStatus::Failed,
                                    Some(AgentMessage::text(Role::Assistant, e.to_string())),
                                    last_batch_results,
                                    planner_notes,
                                    started_at,
                                )
                                .await;
                        }
                    };
                    ctx.caps = decision.caps;

                    self.publish(
                        &ctx.run_id,
                        &input.agent_id,
                        ctx.session_id.as_deref(),
                        Some(&turn_id),
                        LifecycleEvent::PolicyDecision {
                            allowed_tools: decision
                                .allowed_tools
                                .iter()
                                .map(ToolId::to_string)
                                .collect(),
                            disable_tools: decision.disable_tools,
                            remaining_tool_calls: ctx.caps.remaining_tool_calls,
                        },
                    );

                    if decision.disable_tools {
                        // Open Question: force the planner to a
                        // final response rather than completing immediately.
                        // If it still insists on tools, that is caps_exhausted
                        // (documented in DESIGN.md).
                        match self.planner.plan_resume(&input, &ctx, &[]).await {
                            Ok(PlanResult::Final(message)) => {
                                self.publish(
                                    &ctx.run_id,
                                    &input.agent_id,
                                    ctx.session_id.as_deref(),
                                    Some(&turn_id),
                                    LifecycleEvent::AssistantMessage {
                                        text: message.text_content(),
                                    },
                                );
                                return self
                                    .complete(
                                        &input,
                                        &ctx,
                                        TerminationStatus::Success,
                                        Some(message),
                                        last_batch_results,
                                        planner_notes,
                                        started_at,
                                    )
                                    .await;
                            }
                            _ => {
                                let status = if ctx.is_expired(wf.now()) {
                                    TerminationStatus::TimeBudgetExceeded
                                } else {
                                    TerminationStatus::CapsExhausted
                                };
                                return self
                                    .complete(
                                        &input,
                                        &ctx,
                                        status,
                                        None,
                                        last_batch_results,
                                        planner_notes,
                                        started_at,
                                    )
                                    .await;
                            }
                        }
                    }

                    let allowed: HashSet<ToolId> = decision.allowed_tools.into_iter().collect();
                    let surviving: Vec<ToolRequest> = requests
                        .into_iter()
                        .filter(|r| allowed.contains(&r.tool_id))
                        .collect();

                    let (results, timed_out) = self
                        .execute_batch(&input, &mut ctx, &turn_id, surviving, wf.as_ref())
                        .await;

                    if timed_out {
                        return self
                            .complete(
                                &input,
                                &ctx,
                                TerminationStatus::TimeBudgetExceeded,
                                None,
                                results,
                                planner_notes,
                                started_at,
                            )
                            .await;
                    }
                    if ctx.caps.consecutive_failures_exhausted() {
                        return self
                            .complete(
                                &input,
                                &ctx,
                                TerminationStatus::ConsecutiveFailuresExhausted,
                                None,
                                results,
                                planner_notes,
                                started_at,
                            )
                            .await;
                    }

                    pending_retry_hint = results.iter().rev().find_map(|r| r.retry_hint.clone());
                    for result in &results {
                        for part in result_to_memory(result) {
                            let _ = self
                                .stores
                                .memory
                                .append(&input.agent_id, &ctx.run_id, wf.now(), part)
                                .await;
                        }
                    }
                    last_batch_results = results;
                    turn_idx += 1;
                }
            }
        }
    }
}

/// The wire name for a [`TerminationStatus`], matching its own
/// `#[serde(rename_all = "snake_case")]` so log lines and the lifecycle event
/// agree with anything that deserializes the status from JSON.
fn termination_status_tag(status: TerminationStatus) -> &'static str {
    match status {
        TerminationStatus::Success => "success",
        TerminationStatus::Failed => "failed",
        TerminationStatus::Canceled => "canceled",
        TerminationStatus::CapsExhausted => "caps_exhausted",
        TerminationStatus::TimeBudgetExceeded => "time_budget_exceeded",
        TerminationStatus::ConsecutiveFailuresExhausted => "consecutive_failures_exhausted",
    }
}

fn result_to_memory(result: &ToolResult) -> Vec<MemoryEventKind> {
    vec![MemoryEventKind::ToolResultReceived {
        tool_id: result.tool_id.to_string(),
        tool_call_id: result.tool_call_id.clone(),
        success: result.is_success(),
    }]
}

/// Builds a transcript `ToolUse`/`ToolResult` pair for a completed call, for
/// planners that want to append both parts to the conversation they pass to
/// the next `plan_resume` ( "Messages (transcript)").
pub fn tool_result_message(result: &ToolResult) -> AgentMessage {
    AgentMessage::new(
        Role::Assistant,
        vec![Part::ToolResult {
            tool_call_id: result.tool_call_id.clone(),
            result: result.result.clone(),
            error: result.error.as_ref().map(|e| e.message.clone()),
        }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, InMemoryEngine};
    use crate::executor::{ActivityExecutor, ActivityRunner};
    use crate::message::Role;
    use crate::planner::ScriptedPlanner;
    use crate::policy::DefaultPolicy;
    use async_trait::async_trait;
    use serde_json::Value;

    fn no_op_activity_fn() -> crate::engine::ActivityFn {
        Arc::new(|req: crate::engine::ActivityRequest| Box::pin(async move { Ok(req.payload) }))
    }

    struct EchoRunner;
    #[async_trait]
    impl ActivityRunner for EchoRunner {
        async fn run_activity(
            &self,
            _queue: Option<&str>,
            _retry_policy: Option<&crate::run::RetryPolicy>,
            _tool_id: &str,
            payload: Value,
        ) -> Result<Value, ExecutorError> {
            Ok(payload)
        }
    }

    fn make_run_loop(planner: Arc<dyn Planner>, executors: HashMap<ToolId, Arc<ToolExecutor>>) -> RunLoop {
        RunLoop {
            planner,
            policy: Arc::new(DefaultPolicy),
            executors,
            bus: Arc::new(EventBus::new()),
            stores: Stores::in_memory(),
        }
    }

    #[tokio::test]
    async fn simple_final_response_completes_success_scenario_1() {
        let planner: Arc<dyn Planner> = Arc::new(ScriptedPlanner::new(vec![PlanResult::Final(
            AgentMessage::text(Role::Assistant, "hello"),
        )]));
        let run_loop = Arc::new(make_run_loop(planner, HashMap::new()));
        let engine = InMemoryEngine::new(no_op_activity_fn());
        let rl = run_loop.clone();
        let workflow: crate::engine::WorkflowFn = Arc::new(move |input, ctx| {
            let rl = rl.clone();
            Box::pin(async move { rl.run(input, ctx).await })
        });
        let handle = engine
            .start_workflow(RunInput::new("agent-1", "run-1"), workflow)
            .await
            .unwrap();
        let output = handle.join().await.unwrap();
        assert_eq!(output.status, TerminationStatus::Success);
        assert_eq!(output.final_message.unwrap().text_content(), "hello");
    }

    #[tokio::test]
    async fn single_tool_success_then_final_scenario_2() {
        let tool_id = ToolId::new("search", "query");
        let planner: Arc<dyn Planner> = Arc::new(ScriptedPlanner::new(vec![
            PlanResult::ToolCalls(vec![ToolRequest {
                tool_id: tool_id.clone(),
                payload: serde_json::json!({"query": "docs"}),
                tool_call_id: "tc-1".into(),
                parent_tool_call_id: None,
            }]),
            PlanResult::Final(AgentMessage::text(Role::Assistant, "done")),
        ]));
        let mut executors: HashMap<ToolId, Arc<ToolExecutor>> = HashMap::new();
        executors.insert(
            tool_id,
            Arc::new(ToolExecutor::Activity(ActivityExecutor::new(Arc::new(
                EchoRunner,
            )))),
        );
        let run_loop = Arc::new(make_run_loop(planner, executors));
        let engine = InMemoryEngine::new(no_op_activity_fn());
        let rl = run_loop.clone();
        let workflow: crate::engine::WorkflowFn = Arc::new(move |input, ctx| {
            let rl = rl.clone();
            Box::pin(async move { rl.run(input, ctx).await })
        });
        let mut input = RunInput::new("agent-1", "run-1");
        input.engine_options.max_tool_calls = Some(5);
        let handle = engine.start_workflow(input, workflow).await.unwrap();
        let output = handle.join().await.unwrap();
        assert_eq!(output.status, TerminationStatus::Success);
    }

    #[tokio::test]
    async fn caps_exhaustion_completes_when_planner_still_wants_tools_scenario_4() {
        let tool_id = ToolId::new("search", "query");
        let planner: Arc<dyn Planner> = Arc::new(ScriptedPlanner::new(vec![
            PlanResult::ToolCalls(vec![ToolRequest {
                tool_id: tool_id.clone(),
                payload: serde_json::json!({}),
                tool_call_id: "tc-1".into(),
                parent_tool_call_id: None,
            }]),
            // Turn 2: caps are exhausted (max_tool_calls=1), run forces a
            // final-response ask; planner insists on more tools anyway.
            PlanResult::ToolCalls(vec![ToolRequest {
                tool_id: tool_id.clone(),
                payload: serde_json::json!({}),
                tool_call_id: "tc-2".into(),
                parent_tool_call_id: None,
            }]),
        ]));
        let mut executors: HashMap<ToolId, Arc<ToolExecutor>> = HashMap::new();
        executors.insert(
            tool_id,
            Arc::new(ToolExecutor::Activity(ActivityExecutor::new(Arc::new(
                EchoRunner,
            )))),
        );
        let run_loop = Arc::new(make_run_loop(planner, executors));
        let engine = InMemoryEngine::new(no_op_activity_fn());
        let rl = run_loop.clone();
        let workflow: crate::engine::WorkflowFn = Arc::new(move |input, ctx| {
            let rl = rl.clone();
            Box::pin(async move { rl.run(input, ctx).await })
        });
        let mut input = RunInput::new("agent-1", "run-1");
        input.engine_options.max_tool_calls = Some(1);
        let handle = engine.start_workflow(input, workflow).await.unwrap();
        let output = handle.join().await.unwrap();
        assert_eq!(output.status, TerminationStatus::CapsExhausted);
    }
}
