//! Default production [`EventSink`]: forwards every event to `tracing`.
//! Tests and other embedders are expected to supply their own sink
//! (an in-memory one, typically) rather than parse log lines.

use std::future::Future;
use std::pin::Pin;

use bifrost_core::events::{Event, EventSink, OperationalEvent};

pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match event {
                Event::Completion(completion) => {
                    tracing::info!(
                        trace_id = %completion.trace_id,
                        provider = %completion.provider,
                        model = %completion.model,
                        error_kind = completion.error_kind.as_deref(),
                        latency_ms = completion.extra.latency_ms,
                        retries = completion.extra.number_of_retries,
                        fallback_index = completion.extra.fallback_index,
                        "dispatch completed"
                    );
                }
                Event::Operational(OperationalEvent::PoolSaturated(pool_saturated)) => {
                    tracing::warn!(
                        provider = %pool_saturated.provider,
                        queued = pool_saturated.queued,
                        buffer_size = pool_saturated.buffer_size,
                        "worker pool saturated"
                    );
                }
                Event::Operational(OperationalEvent::UnavailableStart(unavailable)) => {
                    tracing::warn!(
                        provider = %unavailable.provider,
                        key_id = %unavailable.key_id,
                        reason = %unavailable.reason,
                        "credential marked unavailable"
                    );
                }
                Event::Operational(OperationalEvent::UnavailableEnd(recovered)) => {
                    tracing::info!(
                        provider = %recovered.provider,
                        key_id = %recovered.key_id,
                        "credential cooldown elapsed"
                    );
                }
            }
        })
    }
}
