//! The generic OpenAI-compatible adapter (§4.D: "several OpenAI-compatible
//! providers distinguished by base URL and header quirks") plus the
//! shared request-shape helpers [`openai::OpenAiAdapter`] and every
//! OpenAI-shaped adapter in this crate builds on.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_core::config::{Key, ProviderConfig};
use bifrost_core::error::DispatchError;
use bifrost_core::provider::{HttpMethod, ProviderAdapter, UpstreamHttpRequest};
use bifrost_core::request::{Request, RequestType};
use bifrost_core::response::{Response, ResponseBody};

use crate::headers;

/// `(path, method)` for the OpenAI wire shape. `None` means this
/// request type has no OpenAI-compatible endpoint.
pub(crate) fn openai_endpoint(request_type: RequestType) -> Option<(&'static str, HttpMethod)> {
    match request_type {
        RequestType::ChatCompletion | RequestType::ChatCompletionStream => {
            Some(("/v1/chat/completions", HttpMethod::Post))
        }
        RequestType::TextCompletion => Some(("/v1/completions", HttpMethod::Post)),
        RequestType::Responses | RequestType::ResponsesStream => {
            Some(("/v1/responses", HttpMethod::Post))
        }
        RequestType::Embedding => Some(("/v1/embeddings", HttpMethod::Post)),
        RequestType::Speech => Some(("/v1/audio/speech", HttpMethod::Post)),
        RequestType::Transcription => Some(("/v1/audio/transcriptions", HttpMethod::Post)),
        RequestType::ImageGeneration => Some(("/v1/images/generations", HttpMethod::Post)),
        RequestType::ListModels => Some(("/v1/models", HttpMethod::Get)),
        RequestType::SpeechStream | RequestType::TranscriptionStream => None,
    }
}

pub(crate) fn response_body_for(request_type: RequestType, value: serde_json::Value) -> ResponseBody {
    match request_type {
        RequestType::ChatCompletion | RequestType::ChatCompletionStream => {
            ResponseBody::ChatCompletion(value)
        }
        RequestType::TextCompletion => ResponseBody::TextCompletion(value),
        RequestType::Responses | RequestType::ResponsesStream => ResponseBody::Responses(value),
        RequestType::Embedding => ResponseBody::Embedding(value),
        RequestType::Speech | RequestType::SpeechStream => ResponseBody::Speech(value),
        RequestType::Transcription | RequestType::TranscriptionStream => {
            ResponseBody::Transcription(value)
        }
        RequestType::ImageGeneration => ResponseBody::ImageGeneration(value),
        RequestType::ListModels => ResponseBody::ModelList(value),
    }
}

/// Parses one SSE `data: {...}` line into a chunk payload. Returns
/// `None` for keep-alive comments, blank lines, and the OpenAI `[DONE]`
/// sentinel — none of these correspond to a chunk (§4.D).
pub(crate) fn parse_sse_event(event: &Bytes) -> Result<Option<serde_json::Value>, DispatchError> {
    let text = std::str::from_utf8(event)
        .map_err(|err| DispatchError::internal(format!("non-utf8 stream event: {err}")))?;

    for line in text.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|err| DispatchError::internal(format!("malformed stream event: {err}")))?;
        return Ok(Some(value));
    }
    Ok(None)
}

pub(crate) fn build_openai_shaped_request(
    base_url: &str,
    request: &Request,
    key: &Key,
) -> Result<UpstreamHttpRequest, DispatchError> {
    let Some((path, method)) = openai_endpoint(request.request_type) else {
        return Err(DispatchError::invalid_request(format!(
            "request type {:?} has no OpenAI-compatible endpoint",
            request.request_type
        )));
    };

    let url = format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'));
    let mut hdrs = Vec::new();
    headers::bearer(&mut hdrs, &key.value);
    headers::accept_json(&mut hdrs);

    let mut upstream = UpstreamHttpRequest::new(method, url);
    if matches!(method, HttpMethod::Post) {
        headers::content_type_json(&mut hdrs);
        let body = serde_json::to_vec(&request.payload)
            .map_err(|err| DispatchError::internal(format!("failed to encode request body: {err}")))?;
        upstream = upstream.with_body(Bytes::from(body));
    }
    for (name, value) in hdrs {
        upstream = upstream.with_header(name, value);
    }
    if request.request_type.is_stream() {
        upstream = upstream.streaming();
    }
    Ok(upstream)
}

/// A provider reachable at an arbitrary, config-supplied `base_url`
/// speaking the OpenAI wire shape (self-hosted gateways, vLLM, Together,
/// and the like) — one instance per distinct base URL in practice, all
/// sharing this one adapter.
pub struct CompatibleAdapter {
    name: &'static str,
}

impl CompatibleAdapter {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl ProviderAdapter for CompatibleAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn allowed_requests(&self) -> &'static [RequestType] {
        &[
            RequestType::ChatCompletion,
            RequestType::ChatCompletionStream,
            RequestType::TextCompletion,
            RequestType::Embedding,
            RequestType::ListModels,
        ]
    }

    async fn build_request(
        &self,
        config: &ProviderConfig,
        key: &Key,
        request: &Request,
    ) -> Result<UpstreamHttpRequest, DispatchError> {
        if config.network.base_url.is_empty() {
            return Err(DispatchError::invalid_request(format!(
                "provider '{}' has no base_url configured",
                config.name
            )));
        }
        build_openai_shaped_request(&config.network.base_url, request, key)
    }

    fn parse_response(
        &self,
        request: &Request,
        _status: u16,
        body: &Bytes,
    ) -> Result<Response, DispatchError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|err| DispatchError::internal(format!("malformed response body: {err}")))?;
        Ok(Response {
            body: response_body_for(request.request_type, value),
            extra: Default::default(),
        })
    }

    fn parse_stream_event(
        &self,
        _request: &Request,
        event: &Bytes,
    ) -> Result<Option<serde_json::Value>, DispatchError> {
        parse_sse_event(event)
    }
}
