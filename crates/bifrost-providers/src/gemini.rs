//! The Gemini adapter (§4.D). Google's `generateContent`/
//! `streamGenerateContent` REST shape: model name embedded in the path,
//! API key as a query parameter rather than a header.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_core::config::{Key, ProviderConfig};
use bifrost_core::error::DispatchError;
use bifrost_core::provider::{HttpMethod, ProviderAdapter, UpstreamHttpRequest};
use bifrost_core::request::{Request, RequestType};
use bifrost_core::response::{Response, ResponseBody};

use crate::compatible::parse_sse_event;
use crate::headers;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn allowed_requests(&self) -> &'static [RequestType] {
        &[
            RequestType::ChatCompletion,
            RequestType::ChatCompletionStream,
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
        let base_url = if config.network.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            &config.network.base_url
        };
        let base_url = base_url.trim_end_matches('/');
        let model = request.model_name();

        let (url, method, has_body) = match request.request_type {
            RequestType::ChatCompletion => (
                format!("{base_url}/v1beta/models/{model}:generateContent?key={}", key.value),
                HttpMethod::Post,
                true,
            ),
            RequestType::ChatCompletionStream => (
                format!(
                    "{base_url}/v1beta/models/{model}:streamGenerateContent?alt=sse&key={}",
                    key.value
                ),
                HttpMethod::Post,
                true,
            ),
            RequestType::Embedding => (
                format!("{base_url}/v1beta/models/{model}:embedContent?key={}", key.value),
                HttpMethod::Post,
                true,
            ),
            RequestType::ListModels => (
                format!("{base_url}/v1beta/models?key={}", key.value),
                HttpMethod::Get,
                false,
            ),
            other => {
                return Err(DispatchError::invalid_request(format!(
                    "request type {other:?} is not supported by the gemini adapter"
                )));
            }
        };

        let mut hdrs = Vec::new();
        headers::accept_json(&mut hdrs);
        headers::extend(&mut hdrs, &config.network.extra_headers);

        let mut upstream = UpstreamHttpRequest::new(method, url);
        if has_body {
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

    fn parse_response(
        &self,
        request: &Request,
        _status: u16,
        body: &Bytes,
    ) -> Result<Response, DispatchError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|err| DispatchError::internal(format!("malformed response body: {err}")))?;
        let body = match request.request_type {
            RequestType::Embedding => ResponseBody::Embedding(value),
            RequestType::ListModels => ResponseBody::ModelList(value),
            _ => ResponseBody::ChatCompletion(value),
        };
        Ok(Response { body, extra: Default::default() })
    }

    fn parse_stream_event(
        &self,
        _request: &Request,
        event: &Bytes,
    ) -> Result<Option<serde_json::Value>, DispatchError> {
        parse_sse_event(event)
    }
}
