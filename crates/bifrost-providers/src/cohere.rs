//! The Cohere adapter (§4.D): one of the "several OpenAI-compatible
//! providers distinguished by base URL and header quirks" — bearer auth
//! like OpenAI, but its own `/v2/chat` and `/v1/embed` paths.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_core::config::{Key, ProviderConfig};
use bifrost_core::error::DispatchError;
use bifrost_core::provider::{HttpMethod, ProviderAdapter, UpstreamHttpRequest};
use bifrost_core::request::{Request, RequestType};
use bifrost_core::response::{Response, ResponseBody};

use crate::compatible::parse_sse_event;
use crate::headers;

const DEFAULT_BASE_URL: &str = "https://api.cohere.com";

#[derive(Debug, Default)]
pub struct CohereAdapter;

impl CohereAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for CohereAdapter {
    fn name(&self) -> &'static str {
        "cohere"
    }

    fn allowed_requests(&self) -> &'static [RequestType] {
        &[RequestType::ChatCompletion, RequestType::ChatCompletionStream, RequestType::Embedding]
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

        let path = match request.request_type {
            RequestType::ChatCompletion | RequestType::ChatCompletionStream => "/v2/chat",
            RequestType::Embedding => "/v1/embed",
            other => {
                return Err(DispatchError::invalid_request(format!(
                    "request type {other:?} is not supported by the cohere adapter"
                )));
            }
        };

        let mut hdrs = Vec::new();
        headers::bearer(&mut hdrs, &key.value);
        headers::accept_json(&mut hdrs);
        headers::content_type_json(&mut hdrs);
        headers::extend(&mut hdrs, &config.network.extra_headers);

        let body = serde_json::to_vec(&request.payload)
            .map_err(|err| DispatchError::internal(format!("failed to encode request body: {err}")))?;

        let mut upstream =
            UpstreamHttpRequest::new(HttpMethod::Post, format!("{base_url}{path}")).with_body(Bytes::from(body));
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
