//! Concrete provider adapters and the wreq-backed [`HttpClient`] for the
//! Bifrost dispatch engine (§4.D, §6 of the dispatch spec).
//!
//! `bifrost-core` never speaks a provider's wire format; every adapter
//! here turns a normalized `Request` into an `UpstreamHttpRequest` and
//! turns upstream bytes back into a `Response`/stream chunk. `http.rs`
//! is the one place that actually holds a network client.

mod headers;
pub mod http;

pub mod anthropic;
pub mod cohere;
pub mod compatible;
pub mod gemini;
pub mod openai;
pub mod unsupported;

pub use http::WreqHttpClient;

use std::sync::Arc;

use bifrost_core::ProviderRegistry;

/// Builds a registry with every adapter this crate ships, under the
/// names a `ProviderConfig` would reference. A `custom` provider reuses
/// one of these base adapters unchanged — `ProviderConfig::allows`
/// narrows `AllowedRequests` per-config from `CustomProviderSpec`, so no
/// separate wrapper adapter type is needed.
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(openai::OpenAiAdapter::new()));
    registry.register(Arc::new(anthropic::AnthropicAdapter::new()));
    registry.register(Arc::new(gemini::GeminiAdapter::new()));
    registry.register(Arc::new(cohere::CohereAdapter::new()));
    registry.register(Arc::new(compatible::CompatibleAdapter::new("openai-compatible")));
    registry.register(Arc::new(unsupported::UnsupportedAdapter::new("bedrock")));
    registry.register(Arc::new(unsupported::UnsupportedAdapter::new("azure")));
    registry.register(Arc::new(unsupported::UnsupportedAdapter::new("vertex")));
    registry
}
