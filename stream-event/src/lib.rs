//! Lifecycle event wire protocol: event kind + envelope + bus + client-facing
//! stream frames.
//!
//! This crate defines the run loop's internal [`event::LifecycleEvent`] set,
//! the [`envelope::Envelope`] every event is stamped with, the synchronous,
//! order-preserving [`bus::EventBus`], and the chat/debug/metrics
//! [`sink::StreamSubscriber`] presets that bridge lifecycle events to a
//! client-facing [`sink::StreamFrame`] union. `shuttle-core` depends on this
//! crate; this crate depends on nothing in the workspace.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod sink;

pub use bus::{EventBus, EventSubscriber, SubscriberError, SubscriptionId};
pub use envelope::{Envelope, EnvelopedEvent};
pub use event::LifecycleEvent;
pub use sink::{
    tool_output_delta_frame, ChatSubscriber, DebugSubscriber, MetricsSubscriber, SinkError,
    StreamFrame, StreamSink,
};
