use crate::config::KeyId;
use crate::error::DispatchError;

/// Token usage, when the provider reports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Set by a semantic-cache plugin that short-circuits with a synthesized
/// response (§4.B, §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheDebug {
    pub cache_hit: bool,
}

/// The sole audit/observability surface attached to every response and
/// stream chunk (§3). Plugins and telemetry consume this; nothing else.
#[derive(Debug, Clone, Default)]
pub struct ExtraFields {
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub selected_key_id: Option<KeyId>,
    pub selected_key_name: Option<String>,
    pub number_of_retries: u32,
    pub fallback_index: usize,
    /// Set only on stream chunks.
    pub chunk_index: Option<u64>,
    pub cache_debug: Option<CacheDebug>,
    pub usage: Option<TokenUsage>,
}

/// The tagged union of unary response bodies (§3). The core treats the
/// payload as opaque JSON; shaping it into a provider wire format is the
/// transport layer's job.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    ChatCompletion(serde_json::Value),
    TextCompletion(serde_json::Value),
    Responses(serde_json::Value),
    Embedding(serde_json::Value),
    Speech(serde_json::Value),
    Transcription(serde_json::Value),
    ImageGeneration(serde_json::Value),
    ModelList(serde_json::Value),
}

impl Default for ResponseBody {
    /// Arbitrary but harmless: only ever observed on a freshly pooled,
    /// not-yet-populated [`Response`] (§4.A).
    fn default() -> Self {
        ResponseBody::ChatCompletion(serde_json::Value::Null)
    }
}

/// A unary dispatch result (§3).
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub body: ResponseBody,
    pub extra: ExtraFields,
}

/// One streaming event. `index` is strictly increasing and contiguous
/// starting at 0 for a given stream; the terminal chunk is either
/// [`StreamChunkKind::End`] or [`StreamChunkKind::Error`] (§3's invariant,
/// §4.G, §7).
#[derive(Debug, Clone)]
pub enum StreamChunkKind {
    Data(serde_json::Value),
    End,
    Error(DispatchError),
}

#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub index: u64,
    pub kind: StreamChunkKind,
    pub extra: ExtraFields,
}

impl StreamChunk {
    pub fn data(index: u64, payload: serde_json::Value, extra: ExtraFields) -> Self {
        Self {
            index,
            kind: StreamChunkKind::Data(payload),
            extra,
        }
    }

    pub fn end(index: u64, extra: ExtraFields) -> Self {
        Self {
            index,
            kind: StreamChunkKind::End,
            extra,
        }
    }

    pub fn error(index: u64, error: DispatchError, extra: ExtraFields) -> Self {
        Self {
            index,
            kind: StreamChunkKind::Error(error),
            extra,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StreamChunkKind::End | StreamChunkKind::Error(_))
    }
}
