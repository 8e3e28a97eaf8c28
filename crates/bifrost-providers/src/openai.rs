//! The OpenAI adapter (§4.D). Native OpenAI wire shape; every other
//! OpenAI-shaped adapter in this crate (`compatible`, and `cohere`'s
//! chat endpoint) reuses the same path table and SSE framing.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_core::config::{Key, ProviderConfig};
use bifrost_core::error::DispatchError;
use bifrost_core::provider::{ProviderAdapter, UpstreamHttpRequest};
use bifrost_core::request::{Request, RequestType};
use bifrost_core::response::Response;

use crate::compatible::{build_openai_shaped_request, parse_sse_event, response_body_for};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn allowed_requests(&self) -> &'static [RequestType] {
        &[
            RequestType::ChatCompletion,
            RequestType::ChatCompletionStream,
            RequestType::TextCompletion,
            RequestType::Responses,
            RequestType::ResponsesStream,
            RequestType::Embedding,
            RequestType::Speech,
            RequestType::Transcription,
            RequestType::ImageGeneration,
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
        let mut upstream = build_openai_shaped_request(base_url, request, key)?;
        for (name, value) in &config.network.extra_headers {
            upstream = upstream.with_header(name.clone(), value.clone());
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

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_core::config::NetworkConfig;

    fn key() -> Key {
        Key::new("k1", "primary", "sk-test")
    }

    #[tokio::test]
    async fn chat_completion_hits_v1_chat_completions_with_bearer_auth() {
        let adapter = OpenAiAdapter::new();
        let config = ProviderConfig::new("openai");
        let request = Request::new(
            RequestType::ChatCompletion,
            "openai",
            "gpt-4o",
            serde_json::json!({"messages": []}),
        );

        let upstream = adapter.build_request(&config, &key(), &request).await.unwrap();
        assert_eq!(upstream.url, "https://api.openai.com/v1/chat/completions");
        assert!(upstream.headers.iter().any(|(k, v)| k == "Authorization" && v == "Bearer sk-test"));
        assert!(!upstream.is_stream);
    }

    #[tokio::test]
    async fn streaming_request_type_marks_upstream_as_streaming() {
        let adapter = OpenAiAdapter::new();
        let config = ProviderConfig::new("openai");
        let request = Request::new(
            RequestType::ChatCompletionStream,
            "openai",
            "gpt-4o",
            serde_json::json!({}),
        );
        let upstream = adapter.build_request(&config, &key(), &request).await.unwrap();
        assert!(upstream.is_stream);
    }

    #[tokio::test]
    async fn custom_base_url_overrides_the_default() {
        let adapter = OpenAiAdapter::new();
        let config = ProviderConfig::new("openai").with_network(NetworkConfig {
            base_url: "https://my-proxy.internal".to_string(),
            ..NetworkConfig::default()
        });
        let request = Request::new(RequestType::ListModels, "openai", "", serde_json::Value::Null);
        let upstream = adapter.build_request(&config, &key(), &request).await.unwrap();
        assert_eq!(upstream.url, "https://my-proxy.internal/v1/models");
    }
}
