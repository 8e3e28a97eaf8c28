use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ProviderAdapter;

/// Maps a provider name (as it appears in `config.yaml` / a request's
/// `provider` field) to the adapter that speaks that backend.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Key, ProviderConfig};
    use crate::error::DispatchError;
    use crate::provider::{UpstreamHttpRequest, HttpMethod};
    use crate::request::{Request, RequestType};
    use crate::response::Response;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Stub;

    #[async_trait]
    impl ProviderAdapter for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn allowed_requests(&self) -> &'static [RequestType] {
            &[RequestType::ChatCompletion]
        }

        async fn build_request(
            &self,
            _config: &ProviderConfig,
            _key: &Key,
            _request: &Request,
        ) -> Result<UpstreamHttpRequest, DispatchError> {
            Ok(UpstreamHttpRequest::new(HttpMethod::Post, "https://stub"))
        }

        fn parse_response(
            &self,
            _request: &Request,
            _status: u16,
            _body: &Bytes,
        ) -> Result<Response, DispatchError> {
            unimplemented!()
        }

        fn parse_stream_event(
            &self,
            _request: &Request,
            _event: &Bytes,
        ) -> Result<Option<serde_json::Value>, DispatchError> {
            unimplemented!()
        }
    }

    #[test]
    fn register_then_get_round_trips_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Stub));
        assert!(registry.get("stub").is_some());
        assert!(registry.get("missing").is_none());
    }
}
