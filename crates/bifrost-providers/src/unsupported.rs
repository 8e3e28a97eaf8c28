//! Adapter stubs for providers named in `CredentialExtra` and the
//! adapter set (bedrock, azure, vertex) whose wire-format translation is
//! out of scope (§1's non-goals: "provider wire-format conversion beyond
//! what is required to name its interface"). Registered so the
//! dispatcher's fallback walk, retry controller and key selector all
//! exercise a real `(provider, model)` target end to end; the upstream
//! call itself is never built.

use async_trait::async_trait;
use bytes::Bytes;

use bifrost_core::config::{Key, ProviderConfig};
use bifrost_core::error::DispatchError;
use bifrost_core::provider::{ProviderAdapter, UpstreamHttpRequest};
use bifrost_core::request::{Request, RequestType};
use bifrost_core::response::Response;

pub struct UnsupportedAdapter {
    name: &'static str,
}

impl UnsupportedAdapter {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl ProviderAdapter for UnsupportedAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn allowed_requests(&self) -> &'static [RequestType] {
        &[RequestType::ChatCompletion, RequestType::ChatCompletionStream]
    }

    async fn build_request(
        &self,
        _config: &ProviderConfig,
        _key: &Key,
        _request: &Request,
    ) -> Result<UpstreamHttpRequest, DispatchError> {
        Err(DispatchError::provider_permanent(format!(
            "the '{}' adapter does not implement wire-format translation",
            self.name
        ))
        .with_provider(self.name.to_string()))
    }

    fn parse_response(
        &self,
        _request: &Request,
        _status: u16,
        _body: &Bytes,
    ) -> Result<Response, DispatchError> {
        Err(DispatchError::provider_permanent(format!("'{}' never produces a response to parse", self.name)))
    }

    fn parse_stream_event(
        &self,
        _request: &Request,
        _event: &Bytes,
    ) -> Result<Option<serde_json::Value>, DispatchError> {
        Err(DispatchError::provider_permanent(format!("'{}' never produces stream events to parse", self.name)))
    }
}
