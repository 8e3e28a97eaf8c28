use crate::config::KeyId;
use crate::response::ExtraFields;

#[derive(Debug, Clone)]
pub enum Event {
    /// A unary dispatch, or a stream's terminal chunk, completed.
    Completion(CompletionEvent),
    Operational(OperationalEvent),
}

#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub trace_id: String,
    pub provider: String,
    pub model: String,
    pub error_kind: Option<String>,
    pub extra: ExtraFields,
}

#[derive(Debug, Clone)]
pub enum OperationalEvent {
    /// A provider's worker pool queue is at `buffer_size` and the next
    /// enqueue will either block or be dropped (§4.E).
    PoolSaturated(PoolSaturatedEvent),
    UnavailableStart(UnavailableStartEvent),
    UnavailableEnd(UnavailableEndEvent),
}

#[derive(Debug, Clone)]
pub struct PoolSaturatedEvent {
    pub provider: String,
    pub queued: usize,
    pub buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct UnavailableStartEvent {
    pub provider: String,
    pub key_id: KeyId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct UnavailableEndEvent {
    pub provider: String,
    pub key_id: KeyId,
}
