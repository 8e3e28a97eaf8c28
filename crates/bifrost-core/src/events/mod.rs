//! Structured, process-wide observability events.
//!
//! The core never depends on a concrete telemetry backend; it publishes
//! [`Event`]s into an [`EventHub`], and anything — a tracing sink, an
//! in-memory test sink, an exporter plugin — subscribes.

mod hub;
mod types;

pub use hub::{EventHub, EventSink};
pub use types::{
    CompletionEvent, Event, OperationalEvent, PoolSaturatedEvent, UnavailableEndEvent,
    UnavailableStartEvent,
};
