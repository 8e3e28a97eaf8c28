use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

/// The inbound request shape the core understands. Transport handlers
/// (out of scope, §1) translate wire formats into this; the core never
/// parses or serializes OpenAI/Anthropic/Gemini payloads itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    ChatCompletion,
    ChatCompletionStream,
    TextCompletion,
    Responses,
    ResponsesStream,
    Embedding,
    Speech,
    SpeechStream,
    Transcription,
    TranscriptionStream,
    ImageGeneration,
    ListModels,
}

impl RequestType {
    /// Whether this request type produces a stream of chunks rather than a
    /// single response.
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            RequestType::ChatCompletionStream
                | RequestType::ResponsesStream
                | RequestType::SpeechStream
                | RequestType::TranscriptionStream
        )
    }
}

impl Default for RequestType {
    /// Arbitrary but harmless: only ever observed on a freshly pooled,
    /// not-yet-populated [`Request`] (§4.A).
    fn default() -> Self {
        RequestType::ChatCompletion
    }
}

/// One entry in a request's fallback list (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackEntry {
    pub provider: String,
    pub model: String,
}

impl FallbackEntry {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Per-request key/value bag carrying caller identity, governance
/// decisions, telemetry labels, plus the cancellation signal (§3, §5).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    values: HashMap<String, serde_json::Value>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            values: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Resets this context to a fresh, unowned state for pooling (§4.A).
    pub fn reset(&mut self) {
        self.trace_id.clear();
        self.values.clear();
        self.cancellation = CancellationToken::new();
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(bifrost_common::new_trace_id())
    }
}

/// A normalized inference request (§3). Owned exclusively by its worker
/// until a result is produced, then released to the request pool.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub request_type: RequestType,
    pub provider: String,
    /// May embed a provider prefix, `"provider/model"`; use
    /// [`Request::model_name`] to strip it.
    pub model: String,
    /// Opaque payload capturing messages/prompt/parameters. The core never
    /// looks inside this beyond what the provider adapter needs.
    pub payload: serde_json::Value,
    pub fallback_list: Vec<FallbackEntry>,
    pub context: RequestContext,
}

impl Request {
    pub fn new(
        request_type: RequestType,
        provider: impl Into<String>,
        model: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            request_type,
            provider: provider.into(),
            model: model.into(),
            payload,
            fallback_list: Vec::new(),
            context: RequestContext::default(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<FallbackEntry>) -> Self {
        self.fallback_list = fallbacks;
        self
    }

    /// The model name with any `"provider/"` prefix stripped, used by the
    /// key selector's model-gating check (§4.C).
    pub fn model_name(&self) -> &str {
        match self.model.split_once('/') {
            Some((_, rest)) => rest,
            None => &self.model,
        }
    }

    /// Resets this request to a zero-valued-for-purpose instance so it can
    /// be returned to the object pool (§4.A).
    pub fn reset(&mut self) {
        self.provider.clear();
        self.model.clear();
        self.payload = serde_json::Value::Null;
        self.fallback_list.clear();
        self.context.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_request_types_report_is_stream() {
        assert!(RequestType::ChatCompletionStream.is_stream());
        assert!(!RequestType::ChatCompletion.is_stream());
        assert!(!RequestType::ListModels.is_stream());
    }

    #[test]
    fn model_name_strips_provider_prefix() {
        let req = Request::new(
            RequestType::ChatCompletion,
            "azure",
            "azure/gpt-4o",
            serde_json::json!({}),
        );
        assert_eq!(req.model_name(), "gpt-4o");

        let req2 = Request::new(
            RequestType::ChatCompletion,
            "openai",
            "gpt-4o",
            serde_json::json!({}),
        );
        assert_eq!(req2.model_name(), "gpt-4o");
    }

    #[test]
    fn cancellation_propagates_through_clones_of_the_token() {
        let ctx = RequestContext::new("t1");
        let token = ctx.cancellation_token();
        assert!(!token.is_cancelled());
        ctx.cancel();
        assert!(token.is_cancelled());
        assert!(ctx.is_canceled());
    }
}
