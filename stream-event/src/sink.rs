//! Client-facing stream frame union and bridge from lifecycle events.
//!
//! A [`StreamSubscriber`] sits on the bus (synchronous `on_event`) and forwards
//! translated frames to a [`StreamSink`]. Three presets are provided: **chat**
//! (nests child-agent runs under their parent's tool card), **debug** (every
//! lifecycle event, untranslated), and **metrics** (lifecycle + usage only).

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::bus::{EventSubscriber, SubscriberError};
use crate::envelope::EnvelopedEvent;
use crate::event::LifecycleEvent;

/// Wire shape for one client-facing frame: `{type, runID, sessionID?,
/// turnID?, seqInTurn, payload}`.
#[derive(Clone, Debug, Serialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub run_id: String,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub seq_in_turn: Option<u64>,
    pub payload: Value,
}

/// Error returned by a [`StreamSink`]; e.g. the underlying channel/connection closed.
#[derive(Debug, thiserror::Error)]
#[error("stream sink error: {0}")]
pub struct SinkError(pub String);

/// A client-facing sink. `send`/`close` MUST NOT block: implementations
/// typically wrap a bounded channel and use a non-blocking try-send, since
/// they are invoked from the bus's synchronous delivery path.
pub trait StreamSink: Send + Sync {
    fn send(&self, frame: StreamFrame) -> Result<(), SinkError>;
    fn close(&self) -> Result<(), SinkError>;
}

/// Translates one lifecycle event to its canonical client frame type, or
/// `None` if this kind has no chat-facing representation. Total and pure.
fn translate_chat(event: &LifecycleEvent) -> Option<(&'static str, Value)> {
    match event {
        LifecycleEvent::ToolCallScheduled {
            tool_id,
            tool_call_id,
            parent_tool_call_id,
        } => Some((
            "tool_start",
            serde_json::json!({
                "tool_id": tool_id,
                "tool_call_id": tool_call_id,
                "parent_tool_call_id": parent_tool_call_id,
            }),
        )),
        LifecycleEvent::ToolCallUpdated {
            tool_call_id,
            status,
        } => Some((
            "tool_update",
            serde_json::json!({ "tool_call_id": tool_call_id, "status": status }),
        )),
        LifecycleEvent::ToolResultReceived {
            tool_id,
            tool_call_id,
            outcome,
            duration_ms,
        } => Some((
            "tool_end",
            serde_json::json!({
                "tool_id": tool_id,
                "tool_call_id": tool_call_id,
                "outcome": outcome,
                "duration_ms": duration_ms,
            }),
        )),
        LifecycleEvent::AssistantMessage { text } => {
            Some(("assistant_reply", serde_json::json!({ "text": text })))
        }
        LifecycleEvent::PlannerNote { text } => {
            Some(("planner_thought", serde_json::json!({ "text": text })))
        }
        LifecycleEvent::AgentRunStarted {
            child_run_id,
            child_agent_id,
            parent_tool_call_id,
        } => Some((
            "agent_run_started",
            serde_json::json!({
                "child_run_id": child_run_id,
                "child_agent_id": child_agent_id,
                "parent_tool_call_id": parent_tool_call_id,
            }),
        )),
        // RunStarted/RunCompleted/RunPaused/RunResumed/RetryHintIssued/MemoryAppended/
        // PolicyDecision have no chat-facing card; dropped by the chat profile.
        _ => None,
    }
}

fn to_frame(event: &EnvelopedEvent, frame_type: &'static str, payload: Value) -> StreamFrame {
    StreamFrame {
        frame_type,
        run_id: event.envelope.run_id.clone(),
        session_id: event.envelope.session_id.clone(),
        turn_id: event.envelope.turn_id.clone(),
        seq_in_turn: event.envelope.seq_in_turn,
        payload,
    }
}

/// Emits a `tool_output_delta` frame for a streamed partial tool result. This
/// kind is produced directly by executors, not
/// derived from a [`LifecycleEvent`], so it bypasses `translate_chat`.
pub fn tool_output_delta_frame(
    run_id: impl Into<String>,
    session_id: Option<String>,
    turn_id: Option<String>,
    seq_in_turn: Option<u64>,
    tool_call_id: &str,
    delta: Value,
) -> StreamFrame {
    StreamFrame {
        frame_type: "tool_output_delta",
        run_id: run_id.into(),
        session_id,
        turn_id,
        seq_in_turn,
        payload: serde_json::json!({ "tool_call_id": tool_call_id, "delta": delta }),
    }
}

/// Chat profile: translates to the canonical frame union; drops the rest.
pub struct ChatSubscriber {
    sink: Arc<dyn StreamSink>,
}

impl ChatSubscriber {
    pub fn new(sink: Arc<dyn StreamSink>) -> Self {
        Self { sink }
    }
}

impl EventSubscriber for ChatSubscriber {
    fn on_event(&self, event: &EnvelopedEvent) -> Result<(), SubscriberError> {
        if let Some((frame_type, payload)) = translate_chat(&event.event) {
            let frame = to_frame(event, frame_type, payload);
            self.sink
                .send(frame)
                .map_err(|e| SubscriberError(e.0))?;
        }
        Ok(())
    }
}

/// Debug profile: every lifecycle event, flattened (no nesting by parent tool
/// call), frame type set to the lifecycle kind name.
pub struct DebugSubscriber {
    sink: Arc<dyn StreamSink>,
}

impl DebugSubscriber {
    pub fn new(sink: Arc<dyn StreamSink>) -> Self {
        Self { sink }
    }
}

impl EventSubscriber for DebugSubscriber {
    fn on_event(&self, event: &EnvelopedEvent) -> Result<(), SubscriberError> {
        let payload = event.event.to_value().map_err(|e| SubscriberError(e.to_string()))?;
        let frame_type: &'static str = match &event.event {
            LifecycleEvent::RunStarted { .. } => "run_started",
            LifecycleEvent::RunCompleted { .. } => "run_completed",
            LifecycleEvent::RunPaused { .. } => "run_paused",
            LifecycleEvent::RunResumed { .. } => "run_resumed",
            LifecycleEvent::ToolCallScheduled { .. } => "tool_start",
            LifecycleEvent::ToolCallUpdated { .. } => "tool_update",
            LifecycleEvent::ToolResultReceived { .. } => "tool_end",
            LifecycleEvent::PlannerNote { .. } => "planner_thought",
            LifecycleEvent::AssistantMessage { .. } => "assistant_reply",
            LifecycleEvent::RetryHintIssued { .. } => "retry_hint_issued",
            LifecycleEvent::MemoryAppended { .. } => "memory_appended",
            LifecycleEvent::PolicyDecision { .. } => "policy_decision",
            LifecycleEvent::AgentRunStarted { .. } => "agent_run_started",
        };
        let frame = to_frame(event, frame_type, payload);
        self.sink.send(frame).map_err(|e| SubscriberError(e.0))
    }
}

/// Metrics profile: lifecycle (run started/completed/paused/resumed) and tool
/// usage (result received, with duration) only.
pub struct MetricsSubscriber {
    sink: Arc<dyn StreamSink>,
}

impl MetricsSubscriber {
    pub fn new(sink: Arc<dyn StreamSink>) -> Self {
        Self { sink }
    }
}

impl EventSubscriber for MetricsSubscriber {
    fn on_event(&self, event: &EnvelopedEvent) -> Result<(), SubscriberError> {
        let (frame_type, payload) = match &event.event {
            LifecycleEvent::RunStarted { agent_id } => {
                ("run_started", serde_json::json!({ "agent_id": agent_id }))
            }
            LifecycleEvent::RunCompleted { status, .. } => {
                ("run_completed", serde_json::json!({ "status": status }))
            }
            LifecycleEvent::RunPaused { .. } => ("run_paused", serde_json::json!({})),
            LifecycleEvent::RunResumed { .. } => ("run_resumed", serde_json::json!({})),
            LifecycleEvent::ToolResultReceived {
                tool_id,
                outcome,
                duration_ms,
                ..
            } => (
                "tool_end",
                serde_json::json!({ "tool_id": tool_id, "outcome": outcome, "duration_ms": duration_ms }),
            ),
            _ => return Ok(()),
        };
        let frame = to_frame(event, frame_type, payload);
        self.sink.send(frame).map_err(|e| SubscriberError(e.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use std::sync::Mutex;

    struct VecSink(Mutex<Vec<StreamFrame>>);
    impl StreamSink for VecSink {
        fn send(&self, frame: StreamFrame) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(frame);
            Ok(())
        }
        fn close(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn chat_profile_drops_non_chat_events() {
        let bus = EventBus::new();
        let sink = Arc::new(VecSink(Mutex::new(Vec::new())));
        bus.subscribe(Arc::new(ChatSubscriber::new(sink.clone())));

        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::PolicyDecision {
                allowed_tools: vec![],
                disable_tools: false,
                remaining_tool_calls: 5,
            },
        );
        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::AssistantMessage { text: "hi".into() },
        );

        let frames = sink.0.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, "assistant_reply");
    }

    #[test]
    fn debug_profile_forwards_every_event() {
        let bus = EventBus::new();
        let sink = Arc::new(VecSink(Mutex::new(Vec::new())));
        bus.subscribe(Arc::new(DebugSubscriber::new(sink.clone())));

        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::PolicyDecision {
                allowed_tools: vec!["a".into()],
                disable_tools: false,
                remaining_tool_calls: 5,
            },
        );
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn metrics_profile_keeps_lifecycle_and_usage_only() {
        let bus = EventBus::new();
        let sink = Arc::new(VecSink(Mutex::new(Vec::new())));
        bus.subscribe(Arc::new(MetricsSubscriber::new(sink.clone())));

        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::PlannerNote { text: "skip me".into() },
        );
        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::ToolResultReceived {
                tool_id: "search.query".into(),
                tool_call_id: "tc-1".into(),
                outcome: "success".into(),
                duration_ms: 12,
            },
        );

        let frames = sink.0.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, "tool_end");
    }
}
