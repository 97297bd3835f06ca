//! In-process event bus: ordered publish, synchronous delivery.
//!
//! The bus is the single owner of `seq_in_turn` counters so the "strictly
//! increasing, no gaps" invariant holds regardless of how many call sites
//! publish into a given `(run_id, turn_id)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::envelope::{Envelope, EnvelopedEvent};
use crate::event::LifecycleEvent;

/// Error a subscriber can return to abort delivery of the *current* event to
/// subscribers registered after it. Does not affect future events.
#[derive(Debug, thiserror::Error)]
#[error("subscriber error: {0}")]
pub struct SubscriberError(pub String);

/// A bus subscriber. Invoked synchronously on the publishing thread/task;
/// implementations that need to do real work MUST hand off to their own
/// channel/task instead of blocking here.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &EnvelopedEvent) -> Result<(), SubscriberError>;
}

/// Opaque handle returned by [`EventBus::subscribe`]; pass to [`EventBus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered, synchronous lifecycle event bus for one process.
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn EventSubscriber>)>>,
    next_subscription_id: AtomicU64,
    // Keyed by "run_id\u{0}turn_id" to avoid a tuple-keyed map's extra indirection.
    turn_counters: RwLock<HashMap<String, u64>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn turn_key(run_id: &str, turn_id: &str) -> String {
    format!("{run_id}\u{0}{turn_id}")
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_subscription_id: AtomicU64::new(0),
            turn_counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().unwrap().push((id, subscriber));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().unwrap().retain(|(sid, _)| *sid != id);
    }

    /// Allocates the next `seq_in_turn` for `(run_id, turn_id)`. Starts at 0.
    fn next_seq(&self, run_id: &str, turn_id: &str) -> u64 {
        let key = turn_key(run_id, turn_id);
        let mut counters = self.turn_counters.write().unwrap();
        let seq = counters.entry(key).or_insert(0);
        let current = *seq;
        *seq += 1;
        current
    }

    /// Publishes one lifecycle event. If `turn_id` is set, stamps the next
    /// `seq_in_turn` for `(run_id, turn_id)`; otherwise `seq_in_turn` is `None`.
    ///
    /// Delivers to subscribers in registration order. A subscriber returning
    /// `Err` aborts delivery to subscribers registered after it for *this*
    /// event only — it does not unsubscribe them or affect later events.
    pub fn publish(
        &self,
        run_id: &str,
        agent_id: &str,
        session_id: Option<&str>,
        turn_id: Option<&str>,
        event: LifecycleEvent,
    ) -> EnvelopedEvent {
        let mut envelope = Envelope::new(run_id, agent_id);
        if let Some(sid) = session_id {
            envelope = envelope.with_session_id(sid);
        }
        if let Some(tid) = turn_id {
            let seq = self.next_seq(run_id, tid);
            envelope = envelope.with_turn(tid, seq);
        }
        let enveloped = EnvelopedEvent::new(envelope, event);

        let subscribers = self.subscribers.read().unwrap().clone();
        for (_, subscriber) in subscribers {
            if let Err(e) = subscriber.on_event(&enveloped) {
                tracing::warn!(error = %e, kind = enveloped.event.kind_name(), "subscriber aborted delivery");
                break;
            }
        }
        enveloped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<(Option<u64>, String)>>);

    impl EventSubscriber for Recorder {
        fn on_event(&self, event: &EnvelopedEvent) -> Result<(), SubscriberError> {
            self.0
                .lock()
                .unwrap()
                .push((event.envelope.seq_in_turn, event.event.kind_name().to_string()));
            Ok(())
        }
    }

    #[test]
    fn seq_in_turn_is_strictly_increasing_from_zero_per_turn() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.subscribe(recorder.clone());

        for _ in 0..3 {
            bus.publish(
                "run-1",
                "agent-1",
                None,
                Some("turn-1"),
                LifecycleEvent::PlannerNote { text: "x".into() },
            );
        }
        bus.publish(
            "run-1",
            "agent-1",
            None,
            Some("turn-2"),
            LifecycleEvent::PlannerNote { text: "y".into() },
        );

        let seen = recorder.0.lock().unwrap();
        let seqs: Vec<Option<u64>> = seen.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![Some(0), Some(1), Some(2), Some(0)]);
    }

    #[test]
    fn subscriber_error_stops_delivery_to_later_subscribers_only() {
        let bus = EventBus::new();
        struct Failing;
        impl EventSubscriber for Failing {
            fn on_event(&self, _event: &EnvelopedEvent) -> Result<(), SubscriberError> {
                Err(SubscriberError("boom".into()))
            }
        }
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(recorder.clone());

        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::RunStarted {
                agent_id: "agent-1".into(),
            },
        );
        assert!(recorder.0.lock().unwrap().is_empty());

        // Next publish is unaffected: the failing subscriber is still registered
        // and fails again, but the bus itself keeps working.
        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::RunStarted {
                agent_id: "agent-1".into(),
            },
        );
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = bus.subscribe(recorder.clone());
        bus.unsubscribe(id);
        bus.publish(
            "run-1",
            "agent-1",
            None,
            None,
            LifecycleEvent::RunStarted {
                agent_id: "agent-1".into(),
            },
        );
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
