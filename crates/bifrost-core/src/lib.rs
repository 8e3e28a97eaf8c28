//! The Bifrost request dispatch engine.
//!
//! Ties together object pools, the plugin pipeline, key selection,
//! worker pools, the retry/fallback controller, and the streaming
//! coordinator behind a single [`dispatcher::Dispatcher`]. Transport is
//! a seam (`http_client::HttpClient`) implemented elsewhere
//! (`bifrost-providers`); everything in this crate is transport-agnostic
//! and provider-agnostic.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod http_client;
pub mod key_selector;
pub mod plugin;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod request;
pub mod response;
pub mod retry;
pub mod stream;
pub mod worker_pool;

pub use config::{
    ConcurrencyAndBuffer, ConfigRegistry, ConfigSnapshot, CredentialExtra, CustomProviderSpec,
    Key, KeyId, NetworkConfig, ProviderConfig,
};
pub use dispatcher::{DispatchStreamHandle, Dispatcher};
pub use error::{DispatchError, ErrorKind};
pub use events::{
    CompletionEvent, Event, EventHub, EventSink, OperationalEvent, PoolSaturatedEvent,
    UnavailableEndEvent, UnavailableStartEvent,
};
pub use http_client::{HttpClient, HttpExecuted};
pub use key_selector::KeySelector;
pub use plugin::{Plugin, PluginPipeline, PostOutcome, PreOutcome, ShortCircuit};
pub use pool::{Pool, PoolHandle};
pub use provider::{
    ByteStream, HttpMethod, ProviderAdapter, UpstreamHttpRequest, UpstreamOutcome,
    UpstreamTransportErrorKind, default_classify_http, default_classify_transport,
    unavailable_cooldown,
};
pub use registry::ProviderRegistry;
pub use request::{FallbackEntry, Request, RequestContext, RequestType};
pub use response::{
    CacheDebug, ExtraFields, Response, ResponseBody, StreamChunk, StreamChunkKind, TokenUsage,
};
pub use retry::{AttemptOutcome, run_with_retries};
pub use stream::{MIN_BUFFER, StreamReceiver, coordinate};
pub use worker_pool::WorkerPool;
