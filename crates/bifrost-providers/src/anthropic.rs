//! The Anthropic adapter (§4.D). Messages API: `x-api-key` +
//! `anthropic-version` headers instead of bearer auth, single
//! `/v1/messages` endpoint for both unary and streaming chat.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_core::config::{Key, ProviderConfig};
use bifrost_core::error::DispatchError;
use bifrost_core::provider::{HttpMethod, ProviderAdapter, UpstreamHttpRequest};
use bifrost_core::request::{Request, RequestType};
use bifrost_core::response::{Response, ResponseBody};

use crate::compatible::parse_sse_event;
use crate::headers;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn allowed_requests(&self) -> &'static [RequestType] {
        &[RequestType::ChatCompletion, RequestType::ChatCompletionStream]
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
        let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));

        let mut hdrs = Vec::new();
        headers::api_key(&mut hdrs, "x-api-key", &key.value);
        hdrs.push(("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()));
        headers::accept_json(&mut hdrs);
        headers::content_type_json(&mut hdrs);
        headers::extend(&mut hdrs, &config.network.extra_headers);

        let body = serde_json::to_vec(&request.payload)
            .map_err(|err| DispatchError::internal(format!("failed to encode request body: {err}")))?;

        let mut upstream = UpstreamHttpRequest::new(HttpMethod::Post, url).with_body(Bytes::from(body));
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
        _request: &Request,
        _status: u16,
        body: &Bytes,
    ) -> Result<Response, DispatchError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|err| DispatchError::internal(format!("malformed response body: {err}")))?;
        Ok(Response {
            body: ResponseBody::ChatCompletion(value),
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
