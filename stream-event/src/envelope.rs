//! Envelope: `(RunID, AgentID, SessionID?, TurnID?, SeqInTurn)` stamped onto
//! every published event.
//!
//! `SeqInTurn` is assigned by the bus at publish time, not by the caller: the
//! invariant "strictly increasing, no gaps, starting at 0" only holds if one
//! component owns the counter. See [`crate::bus::EventBus`].

use serde::Serialize;
use serde_json::Value;

use crate::event::LifecycleEvent;

/// Envelope fields attached to every published event.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    pub run_id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    /// Monotonic within `(run_id, turn_id)`; `None` when the event is not
    /// associated with a turn (e.g. `RunStarted`).
    pub seq_in_turn: Option<u64>,
}

impl Envelope {
    pub fn new(run_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            session_id: None,
            turn_id: None,
            seq_in_turn: None,
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_turn(mut self, turn_id: impl Into<String>, seq_in_turn: u64) -> Self {
        self.turn_id = Some(turn_id.into());
        self.seq_in_turn = Some(seq_in_turn);
        self
    }
}

/// A fully envelope-stamped event, ready to publish or serialize.
#[derive(Clone, Debug, Serialize)]
pub struct EnvelopedEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

impl EnvelopedEvent {
    pub fn new(envelope: Envelope, event: LifecycleEvent) -> Self {
        Self { envelope, event }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_flattened() {
        let env = Envelope::new("run-1", "agent-1").with_turn("turn-1", 0);
        let ev = LifecycleEvent::RunStarted {
            agent_id: "agent-1".into(),
        };
        let enveloped = EnvelopedEvent::new(env, ev);
        let v = enveloped.to_value().unwrap();
        assert_eq!(v["run_id"], "run-1");
        assert_eq!(v["seq_in_turn"], 0);
        assert_eq!(v["kind"], "run_started");
    }
}
