//! The seam between the dispatch engine and a concrete LLM backend (§4.D).
//!
//! A [`ProviderAdapter`] turns a [`Request`] into an upstream HTTP call
//! description, turns the upstream's bytes back into a [`Response`] or a
//! stream of [`StreamChunk`]s, and classifies upstream failures into the
//! engine's [`ErrorKind`] vocabulary. The engine never speaks a provider's
//! wire format directly; everything provider-shaped lives behind this
//! trait, same as the teacher keeps protocol transforms behind
//! `UpstreamProvider`.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::config::{Key, ProviderConfig};
use crate::error::{DispatchError, ErrorKind};
use crate::request::{Request, RequestType};
use crate::response::{Response, StreamChunk};

pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A fully-built upstream call, independent of whatever HTTP client
/// eventually sends it.
#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

impl UpstreamHttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            is_stream: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.is_stream = true;
        self
    }
}

/// Bytes received back from upstream, not yet classified as success or
/// failure (that's [`ProviderAdapter::classify_error`]'s job).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Other,
}

/// What came back from attempting the upstream call, before adapter
/// classification.
#[derive(Debug, Clone)]
pub enum UpstreamOutcome {
    Success { status: u16, body: Bytes },
    Http { status: u16, body: Bytes },
    Transport { kind: UpstreamTransportErrorKind, message: String },
}

/// Implemented once per backend (OpenAI, Anthropic, Gemini, ...). The
/// dispatcher calls these hooks; it never branches on provider identity
/// itself (§4.D).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Request types this adapter natively understands. The dispatcher
    /// rejects a request with [`ErrorKind::InvalidRequest`] before ever
    /// reaching the worker pool if the type isn't in this list.
    fn allowed_requests(&self) -> &'static [RequestType];

    /// Builds the upstream HTTP call for `request` using the selected
    /// `key`. Adapters read `request.payload` as opaque JSON and produce
    /// whatever wire shape the backend expects.
    async fn build_request(
        &self,
        config: &ProviderConfig,
        key: &Key,
        request: &Request,
    ) -> Result<UpstreamHttpRequest, DispatchError>;

    /// Parses a successful unary upstream body into a [`Response`].
    fn parse_response(
        &self,
        request: &Request,
        status: u16,
        body: &Bytes,
    ) -> Result<Response, DispatchError>;

    /// Parses one line/event of a streaming upstream body into a
    /// [`StreamChunk`] payload (the caller assigns `index` and `extra`).
    /// Returns `None` for framing noise (e.g. SSE keep-alive comments)
    /// that doesn't correspond to a chunk.
    fn parse_stream_event(
        &self,
        request: &Request,
        event: &Bytes,
    ) -> Result<Option<serde_json::Value>, DispatchError>;

    /// Classifies a raw upstream outcome into the engine's error
    /// vocabulary. `Ok(None)` means the outcome was a success.
    fn classify_error(
        &self,
        outcome: &UpstreamOutcome,
    ) -> Option<DispatchError> {
        match outcome {
            UpstreamOutcome::Success { .. } => None,
            UpstreamOutcome::Http { status, .. } => Some(default_classify_http(*status)),
            UpstreamOutcome::Transport { kind, message } => {
                Some(default_classify_transport(*kind, message))
            }
        }
    }
}

/// Shared default classification for HTTP status codes, usable by
/// adapters that don't need a provider-specific override.
pub fn default_classify_http(status: u16) -> DispatchError {
    match status {
        400 | 404 | 422 => DispatchError::invalid_request(format!("upstream returned {status}")),
        401 | 403 => DispatchError::auth(format!("upstream returned {status}")),
        429 => DispatchError::rate_limited(format!("upstream returned {status}"))
            .with_retry_after(Duration::from_secs(30)),
        500..=599 => DispatchError::provider_transient(format!("upstream returned {status}")),
        _ => DispatchError::provider_permanent(format!("upstream returned {status}")),
    }
}

pub fn default_classify_transport(
    kind: UpstreamTransportErrorKind,
    message: &str,
) -> DispatchError {
    match kind {
        UpstreamTransportErrorKind::Timeout
        | UpstreamTransportErrorKind::Connect
        | UpstreamTransportErrorKind::Dns
        | UpstreamTransportErrorKind::Tls => {
            DispatchError::provider_transient(message.to_string())
        }
        UpstreamTransportErrorKind::Other => DispatchError::internal(message.to_string()),
    }
}

/// Maps an [`ErrorKind`] back to whether the dispatcher should treat the
/// originating provider/key as unavailable for a cooldown window.
pub fn unavailable_cooldown(kind: ErrorKind) -> Option<Duration> {
    match kind {
        ErrorKind::RateLimited => Some(Duration::from_secs(30)),
        ErrorKind::Auth => Some(Duration::from_secs(60 * 60)),
        ErrorKind::ProviderTransient => Some(Duration::from_secs(10)),
        _ => None,
    }
}
