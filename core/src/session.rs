//! Run submission surface, usable as a conceptual RPC surface or an
//! in-process API: `StartRun`/`Run`/`PauseRun`/`ResumeRun`/
//! `SubscribeRun`/`DeleteSession`. `RunOrchestrator` is the in-process shape: it
//! wraps an [`Engine`] and a [`RunLoop`] the way a CLI backend wraps a
//! `ReactRunner` behind a handful of session-shaped methods, and is the thing
//! `shuttle-cli` and `shuttle-registry`'s callers actually hold onto.
//!
//! `RunStore`/`MemoryStore` bookkeeping (run status transitions, pause/resume
//! memory events) lives here rather than in [`RunLoop`] itself: the run loop
//! only ever sees one attempt of one run through [`WorkflowContext`], while
//! "what's the current status of run X" and "cancel everything for session Y"
//! are questions about the run's lifecycle from outside that one attempt.

use std::sync::Arc;

use chrono::Utc;

use shuttle_stream_event::{EnvelopedEvent, EventBus, EventSubscriber, SubscriberError, SubscriptionId};

use crate::engine::{Engine, EngineError, RunHandle, WorkflowFn};
use crate::message::AgentMessage;
use crate::run::{RunInput, RunOutput};
use crate::run_loop::RunLoop;
use crate::store::{MemoryEventKind, RunRecord, RunStatus, StoreError};

/// Summary returned by [`RunOrchestrator::delete_session`]: which of the
/// session's non-terminal runs were sent a best-effort cancel.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub canceled_run_ids: Vec<String>,
}

/// Wraps a bus subscription; drop without calling [`Self::unsubscribe`] and
/// the subscriber simply keeps receiving frames until the bus itself is gone.
pub struct Unsubscribe {
    bus: Arc<EventBus>,
    id: SubscriptionId,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        self.bus.unsubscribe(self.id);
    }
}

/// Drops every event whose `run_id` doesn't match, so a `SubscribeRun` caller
/// only ever sees its own run's frames even though the bus itself is
/// process-wide.
struct RunFilterSubscriber {
    run_id: String,
    inner: Arc<dyn EventSubscriber>,
}

impl EventSubscriber for RunFilterSubscriber {
    fn on_event(&self, event: &EnvelopedEvent) -> Result<(), SubscriberError> {
        if event.envelope.run_id == self.run_id {
            self.inner.on_event(event)?;
        }
        Ok(())
    }
}

/// Run submission front door. One instance per engine/run-loop
/// pairing; cheap to clone (everything inside is already `Arc`-backed).
#[derive(Clone)]
pub struct RunOrchestrator {
    engine: Arc<dyn Engine>,
    run_loop: Arc<RunLoop>,
}

impl RunOrchestrator {
    pub fn new(engine: Arc<dyn Engine>, run_loop: Arc<RunLoop>) -> Self {
        Self { engine, run_loop }
    }

    fn workflow(&self) -> WorkflowFn {
        let run_loop = self.run_loop.clone();
        Arc::new(move |input, ctx| {
            let run_loop = run_loop.clone();
            Box::pin(async move { run_loop.run(input, ctx).await })
        })
    }

    /// `StartRun(RunInput) → RunHandle`: upserts a `Running` record, then
    /// hands the workflow to the engine. Does not wait for completion.
    pub async fn start_run(&self, input: RunInput) -> Result<RunHandle, EngineError> {
        let now = Utc::now();
        let record = RunRecord {
            run_id: input.run_id.clone(),
            agent_id: input.agent_id.clone(),
            session_id: input.session_id.clone(),
            turn_id: input.turn_id.clone(),
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            labels: input.labels.clone(),
            metadata: input.metadata.clone(),
        };
        self.run_loop
            .stores
            .runs
            .upsert(record)
            .await
            .map_err(|e| EngineError::Checkpoint(e.to_string()))?;

        self.engine.start_workflow(input, self.workflow()).await
    }

    /// `Run(RunInput) → RunOutput`: the synchronous convenience — start, then
    /// join, then record the terminal status.
    pub async fn run(&self, input: RunInput) -> Result<RunOutput, EngineError> {
        let run_id = input.run_id.clone();
        let output = self.start_run(input).await?.join().await?;

        if let Ok(Some(mut record)) = self.run_loop.stores.runs.get(&run_id).await {
            record.status = RunStatus::Completed { status: output.status };
            record.updated_at = Utc::now();
            let _ = self.run_loop.stores.runs.upsert(record).await;
        }
        Ok(output)
    }

    /// `PauseRun(runID, reason, requestedBy) → void`. Best-effort: delivers
    /// the signal regardless of whether a `RunRecord` exists for `run_id`,
    /// but only the record and memory log are updated when one does.
    pub async fn pause_run(
        &self,
        run_id: &str,
        reason: Option<String>,
        requested_by: Option<String>,
    ) -> Result<(), StoreError> {
        self.engine.send_signal(
            run_id,
            "pause",
            serde_json::json!({ "reason": reason.clone(), "requested_by": requested_by }),
        );

        let now = Utc::now();
        if let Some(mut record) = self.run_loop.stores.runs.get(run_id).await? {
            self.run_loop
                .stores
                .memory
                .append(&record.agent_id, run_id, now, MemoryEventKind::Pause { reason })
                .await?;
            record.status = RunStatus::Paused;
            record.updated_at = now;
            self.run_loop.stores.runs.upsert(record).await?;
        }
        Ok(())
    }

    /// `ResumeRun(runID, notes, requestedBy, additionalMessages) → void`.
    /// `notes` rides along on the signal for a durable engine/observer to
    /// pick up; the run loop itself only consumes `requested_by` and
    /// `additional_messages`.
    pub async fn resume_run(
        &self,
        run_id: &str,
        notes: Option<String>,
        requested_by: Option<String>,
        additional_messages: Vec<AgentMessage>,
    ) -> Result<(), StoreError> {
        self.engine.send_signal(
            run_id,
            "resume",
            serde_json::json!({
                "notes": notes,
                "requested_by": requested_by.clone(),
                "additional_messages": additional_messages,
            }),
        );

        let now = Utc::now();
        if let Some(mut record) = self.run_loop.stores.runs.get(run_id).await? {
            self.run_loop
                .stores
                .memory
                .append(&record.agent_id, run_id, now, MemoryEventKind::Resume { requested_by })
                .await?;
            record.status = RunStatus::Running;
            record.updated_at = now;
            self.run_loop.stores.runs.upsert(record).await?;
        }
        Ok(())
    }

    /// `SubscribeRun(runID, sink) → Unsubscribe`. `sink` is whatever
    /// `EventSubscriber` the caller wants delivery translated through — a
    /// `ChatSubscriber`/`DebugSubscriber`/`MetricsSubscriber`, typically —
    /// filtered down to just this run.
    pub fn subscribe_run(&self, run_id: &str, sink: Arc<dyn EventSubscriber>) -> Unsubscribe {
        let filtered = Arc::new(RunFilterSubscriber {
            run_id: run_id.to_string(),
            inner: sink,
        });
        let id = self.run_loop.bus.subscribe(filtered);
        Unsubscribe {
            bus: self.run_loop.bus.clone(),
            id,
        }
    }

    /// `DeleteSession(sessionID) → SessionInfo`: cancels every non-terminal
    /// run tied to the session, best-effort.
    pub async fn delete_session(&self, session_id: &str) -> Result<SessionInfo, StoreError> {
        let active = self.run_loop.stores.runs.list_active_for_session(session_id).await?;
        let mut canceled_run_ids = Vec::with_capacity(active.len());
        for record in active {
            // Best-effort: a cancel that loses the race with the
            // run's natural completion is not an error.
            let _ = self.engine.cancel_by_id(&record.run_id).await;
            canceled_run_ids.push(record.run_id);
        }
        Ok(SessionInfo {
            session_id: session_id.to_string(),
            canceled_run_ids,
        })
    }
}
