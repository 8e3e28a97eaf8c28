//! The dispatcher (§4.H) — the single entry point tying every other
//! component together:
//!
//! `dispatch`/`dispatch_stream` → `PluginPipeline::run_pre` (§4.B) →
//! `WorkerPool::submit` (§4.E) → `KeySelector::select` (§4.C) →
//! `ProviderAdapter` (§4.D) → (unary: `retry::run_with_retries` (§4.F) and
//! fallback walk; stream: `stream::coordinate` (§4.G)) →
//! `PluginPipeline::run_post`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::config::{ConfigRegistry, ConfigSnapshot, KeyId, ProviderConfig};
use crate::error::DispatchError;
use crate::events::{CompletionEvent, Event, EventHub};
use crate::http_client::{HttpClient, HttpExecuted};
use crate::key_selector::KeySelector;
use crate::plugin::{PluginPipeline, PostOutcome, PreOutcome, ShortCircuit};
use crate::pool::Pool;
use crate::provider::{ProviderAdapter, UpstreamOutcome, unavailable_cooldown};
use crate::registry::ProviderRegistry;
use crate::request::Request;
use crate::response::{ExtraFields, Response, ResponseBody, StreamChunk};
use crate::retry::{self, AttemptOutcome};
use crate::stream::{self, StreamReceiver};
use crate::worker_pool::WorkerPool;

/// One `(provider, model)` the dispatcher will try, in order: the
/// request's primary target followed by its fallback list (§3, §4.F).
#[derive(Debug, Clone)]
struct Target {
    provider: String,
    model: String,
}

/// The consumer-facing half of `dispatch_stream`. Wraps the raw
/// coordinator receiver so the dispatcher can fire `PostHook` exactly
/// once, on the terminal chunk (§4.H step 7, §9's resolved open
/// question), without the caller having to know that protocol.
pub struct DispatchStreamHandle {
    pending: VecDeque<StreamChunk>,
    rest: StreamReceiver,
    plugins: Arc<PluginPipeline>,
    pre_ran: usize,
    request: Arc<Request>,
    post_done: bool,
}

impl DispatchStreamHandle {
    pub async fn recv(&mut self) -> Option<StreamChunk> {
        let chunk = match self.pending.pop_front() {
            Some(chunk) => chunk,
            None => self.rest.recv().await?,
        };

        if chunk.is_terminal() && !self.post_done {
            self.post_done = true;
            let mut outcome = match &chunk.kind {
                crate::response::StreamChunkKind::Error(err) => PostOutcome::Failure(err.clone()),
                _ => PostOutcome::Success(Response {
                    body: ResponseBody::ChatCompletion(serde_json::Value::Null),
                    extra: chunk.extra.clone(),
                }),
            };
            self.plugins.run_post(self.pre_ran, &self.request, &mut outcome).await;
        }

        Some(chunk)
    }

    /// A handle whose two chunks (one data chunk carrying `response`, one
    /// end chunk) are already fully resolved — used when `PostHook` has
    /// already run against a unary-shaped outcome (a short-circuited
    /// error, or a plugin upgrading a failure into a success) before any
    /// real upstream call happened.
    fn resolved(request: Arc<Request>, plugins: Arc<PluginPipeline>, pre_ran: usize, response: Response) -> Self {
        let mut pending = VecDeque::with_capacity(2);
        let mut extra = response.extra.clone();
        extra.chunk_index = Some(0);
        pending.push_back(StreamChunk::data(0, response_body_value(response.body), extra.clone()));
        let mut end_extra = extra;
        end_extra.chunk_index = Some(1);
        pending.push_back(StreamChunk::end(1, end_extra));

        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Self {
            pending,
            rest: rx,
            plugins,
            pre_ran,
            request,
            post_done: true,
        }
    }

    /// Same shape as [`Self::resolved`], but `PostHook` has not run yet —
    /// it fires when the consumer drains the end chunk (a `PreHook`
    /// short-circuiting straight to a synthesized response, §4.B, §4.H).
    fn pending_post(request: Arc<Request>, plugins: Arc<PluginPipeline>, pre_ran: usize, response: Response) -> Self {
        let mut handle = Self::resolved(request, plugins, pre_ran, response);
        handle.post_done = false;
        handle
    }
}

fn response_body_value(body: ResponseBody) -> serde_json::Value {
    match body {
        ResponseBody::ChatCompletion(v)
        | ResponseBody::TextCompletion(v)
        | ResponseBody::Responses(v)
        | ResponseBody::Embedding(v)
        | ResponseBody::Speech(v)
        | ResponseBody::Transcription(v)
        | ResponseBody::ImageGeneration(v)
        | ResponseBody::ModelList(v) => v,
    }
}

/// The single entry point for the dispatch engine (§4.H, §6).
pub struct Dispatcher {
    config: ConfigRegistry,
    providers: ProviderRegistry,
    plugins: Arc<PluginPipeline>,
    http: Arc<dyn HttpClient>,
    events: EventHub,
    pools: RwLock<HashMap<String, Arc<WorkerPool>>>,
    selectors: RwLock<HashMap<String, Arc<KeySelector>>>,
    default_stream_buffer: usize,
    request_pool: Pool<Request>,
    response_pool: Pool<Response>,
}

impl Dispatcher {
    pub fn new(
        snapshot: ConfigSnapshot,
        providers: ProviderRegistry,
        plugins: PluginPipeline,
        http: Arc<dyn HttpClient>,
        events: EventHub,
        default_stream_buffer: usize,
    ) -> Self {
        let pools = build_pools(&snapshot, &events);

        Self {
            config: ConfigRegistry::new(snapshot),
            providers,
            plugins: Arc::new(plugins),
            http,
            events,
            pools: RwLock::new(pools),
            selectors: RwLock::new(HashMap::new()),
            default_stream_buffer: default_stream_buffer.max(stream::MIN_BUFFER),
            request_pool: Pool::new(),
            response_pool: Pool::new(),
        }
    }

    /// Acquires a pooled request envelope, writes `incoming`'s fields into
    /// it, and hands back an owned copy for the dispatch to work with
    /// (§4.A, §4.H step 2). The envelope is released back to the pool as
    /// soon as its data has been copied out.
    fn checkout_request(&self, incoming: Request) -> Request {
        let mut handle = self.request_pool.acquire();
        handle.with_mut(|slot| *slot = incoming);
        handle.get()
    }

    /// Acquires a pooled response envelope, writes `response` into it, and
    /// hands back an owned copy to return to the caller (§4.A).
    fn checkout_response(&self, response: Response) -> Response {
        let mut handle = self.response_pool.acquire();
        handle.with_mut(|slot| *slot = response);
        handle.get()
    }

    /// Atomic swap of the provider configuration (§6 `ReloadConfig`).
    /// Workers currently running requests complete against the snapshot
    /// they started with; a fresh worker pool is built per provider and
    /// published for new submissions — the old pools drain in place.
    pub async fn reload_config(&self, snapshot: ConfigSnapshot) {
        let pools = build_pools(&snapshot, &self.events);
        *self.pools.write().await = pools;
        self.config.reload(snapshot);
    }

    async fn pool_for(&self, provider: &str) -> Option<Arc<WorkerPool>> {
        self.pools.read().await.get(provider).cloned()
    }

    async fn selector_for(&self, provider: &str) -> Arc<KeySelector> {
        if let Some(selector) = self.selectors.read().await.get(provider) {
            return selector.clone();
        }
        let mut selectors = self.selectors.write().await;
        selectors
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(KeySelector::new(provider.to_string(), self.events.clone())))
            .clone()
    }

    fn primary_target(request: &Request) -> Target {
        Target {
            provider: request.provider.clone(),
            model: request.model.clone(),
        }
    }

    fn fallback_targets(request: &Request) -> Vec<Target> {
        request
            .fallback_list
            .iter()
            .map(|entry| Target {
                provider: entry.provider.clone(),
                model: entry.model.clone(),
            })
            .collect()
    }

    /// Builds a per-attempt request with `target`'s provider/model
    /// substituted in, sharing the same cancellation token (fallback
    /// targets reuse the original request's payload and context, §3).
    fn request_for_target(base: &Request, target: &Target) -> Arc<Request> {
        let mut request = base.clone();
        request.provider = target.provider.clone();
        request.model = target.model.clone();
        Arc::new(request)
    }

    /// Unary dispatch (§4.H).
    pub async fn dispatch(&self, incoming: Request) -> Result<Response, DispatchError> {
        let mut request = self.checkout_request(incoming);
        let (ran, pre_result) = self.plugins.run_pre(&mut request).await;

        let mut outcome = match pre_result {
            Ok(PreOutcome::Continue) => {
                let mut targets = vec![Self::primary_target(&request)];
                targets.extend(Self::fallback_targets(&request));
                self.walk_unary(&request, &targets, 0).await
            }
            Ok(PreOutcome::ShortCircuit { outcome: ShortCircuit::Response(response), .. }) => {
                PostOutcome::Success(response)
            }
            Ok(PreOutcome::ShortCircuit { outcome: ShortCircuit::Error(err), allow_fallbacks }) => {
                if allow_fallbacks && !request.fallback_list.is_empty() {
                    let targets = Self::fallback_targets(&request);
                    self.walk_unary(&request, &targets, 1).await
                } else {
                    PostOutcome::Failure(err)
                }
            }
            Err(err) => PostOutcome::Failure(err),
        };

        self.plugins.run_post(ran, &request, &mut outcome).await;
        self.emit_completion(&request, &outcome).await;
        outcome.into_result().map(|response| self.checkout_response(response))
    }

    /// Walks `targets` in order starting at fallback index `start_index`,
    /// running the retry controller (§4.F) for each until one succeeds or
    /// the list is exhausted (§4.H steps 4-6). `NumberOfRetries` on the
    /// returned response is cumulative across the whole walk — retries
    /// spent on targets that ultimately failed are still part of the path
    /// that produced the result (§3's "always reflect the path that
    /// produced the returned result").
    async fn walk_unary(&self, base: &Request, targets: &[Target], start_index: usize) -> PostOutcome {
        let mut last_err = DispatchError::no_key_available("no targets to attempt");
        let mut retries_so_far: u32 = 0;

        for (offset, target) in targets.iter().enumerate() {
            let fallback_index = start_index + offset;
            let started_at = Instant::now();

            let (result, retries) = self.run_target_unary(base, target).await;
            match result {
                Ok(mut response) => {
                    response.extra.latency_ms = started_at.elapsed().as_millis() as u64;
                    response.extra.fallback_index = fallback_index;
                    response.extra.number_of_retries = retries_so_far + retries;
                    return PostOutcome::Success(response);
                }
                Err(err) => {
                    retries_so_far += retries;
                    last_err = err;
                    continue;
                }
            }
        }

        PostOutcome::Failure(last_err)
    }

    /// Runs the full retry budget for one `(provider, model)` target.
    /// Always returns the retries actually spent, on both the success and
    /// the failure path, so the caller can carry them into a later
    /// fallback target's result.
    async fn run_target_unary(&self, base: &Request, target: &Target) -> (Result<Response, DispatchError>, u32) {
        let adapter = match self.providers.get(&target.provider) {
            Some(adapter) => adapter,
            None => return (Err(DispatchError::invalid_request(format!("unknown provider '{}'", target.provider))), 0),
        };
        let provider_cfg = match self.config.get(&target.provider) {
            Some(cfg) => cfg,
            None => {
                return (
                    Err(DispatchError::no_key_available(format!("no configuration for provider '{}'", target.provider))),
                    0,
                );
            }
        };

        if !provider_cfg.allows(base.request_type) || !adapter.allowed_requests().contains(&base.request_type) {
            return (
                Err(DispatchError::invalid_request(format!(
                    "request type {:?} is not allowed for provider '{}'",
                    base.request_type, target.provider
                ))),
                0,
            );
        }

        let pool = match self.pool_for(&target.provider).await {
            Some(pool) => pool,
            None => {
                return (
                    Err(DispatchError::internal(format!("no worker pool for provider '{}'", target.provider))),
                    0,
                );
            }
        };
        let selector = self.selector_for(&target.provider).await;
        let attempt_request = Self::request_for_target(base, target);
        let cancellation = attempt_request.context.cancellation_token();

        let outcome: AttemptOutcome<Response> = retry::run_with_retries(
            provider_cfg.network.max_retries,
            provider_cfg.network.backoff_initial,
            provider_cfg.network.backoff_max,
            &cancellation,
            || {
                let pool = pool.clone();
                let adapter = adapter.clone();
                let provider_cfg = provider_cfg.clone();
                let selector = selector.clone();
                let http = self.http.clone();
                let attempt_request = attempt_request.clone();
                async move {
                    flatten(
                        pool.submit(single_attempt_unary(http, adapter, provider_cfg, selector, attempt_request))
                            .await,
                    )
                }
            },
        )
        .await;

        (outcome.result, outcome.retries)
    }

    /// Streaming dispatch (§4.H, §4.G). Commits on the first chunk
    /// received from the first target that produces one — failures
    /// after that point are terminal, never fallback-eligible (§9's
    /// resolved open question).
    pub async fn dispatch_stream(&self, incoming: Request) -> Result<DispatchStreamHandle, DispatchError> {
        let mut request = self.checkout_request(incoming);
        let (ran, pre_result) = self.plugins.run_pre(&mut request).await;
        let request = Arc::new(request);

        match pre_result {
            Ok(PreOutcome::Continue) => {
                let mut targets = vec![Self::primary_target(&request)];
                targets.extend(Self::fallback_targets(&request));
                self.walk_stream(request, ran, &targets, 0).await
            }
            Ok(PreOutcome::ShortCircuit { outcome: ShortCircuit::Response(response), .. }) => Ok(
                DispatchStreamHandle::pending_post(request, self.plugins.clone(), ran, self.checkout_response(response)),
            ),
            Ok(PreOutcome::ShortCircuit { outcome: ShortCircuit::Error(err), allow_fallbacks }) => {
                if allow_fallbacks && !request.fallback_list.is_empty() {
                    let targets = Self::fallback_targets(&request);
                    self.walk_stream(request, ran, &targets, 1).await
                } else {
                    let mut outcome = PostOutcome::Failure(err);
                    self.plugins.run_post(ran, &request, &mut outcome).await;
                    self.emit_completion(&request, &outcome).await;
                    self.resolve_stream_outcome(request, ran, outcome)
                }
            }
            Err(err) => {
                let mut outcome = PostOutcome::Failure(err);
                self.plugins.run_post(ran, &request, &mut outcome).await;
                self.emit_completion(&request, &outcome).await;
                self.resolve_stream_outcome(request, ran, outcome)
            }
        }
    }

    /// Turns a `PostOutcome` that has *already* run through `PostHook`
    /// into either an error or a fully-resolved stream handle — covers a
    /// plugin upgrading a failure into a success for a streaming request.
    fn resolve_stream_outcome(
        &self,
        request: Arc<Request>,
        ran: usize,
        outcome: PostOutcome,
    ) -> Result<DispatchStreamHandle, DispatchError> {
        match outcome {
            PostOutcome::Failure(err) => Err(err),
            PostOutcome::Success(response) => Ok(DispatchStreamHandle::resolved(
                request,
                self.plugins.clone(),
                ran,
                self.checkout_response(response),
            )),
        }
    }

    async fn walk_stream(
        &self,
        request: Arc<Request>,
        ran: usize,
        targets: &[Target],
        start_index: usize,
    ) -> Result<DispatchStreamHandle, DispatchError> {
        let mut last_err = DispatchError::no_key_available("no targets to attempt");
        let mut retries_so_far: u32 = 0;

        for (offset, target) in targets.iter().enumerate() {
            let fallback_index = start_index + offset;
            let (result, retries) = self.run_target_stream(&request, target).await;
            match result {
                Ok((mut first, rest)) => {
                    first.extra.number_of_retries = retries_so_far + retries;
                    first.extra.fallback_index = fallback_index;
                    let mut pending = VecDeque::with_capacity(1);
                    pending.push_back(first);
                    return Ok(DispatchStreamHandle {
                        pending,
                        rest,
                        plugins: self.plugins.clone(),
                        pre_ran: ran,
                        request,
                        post_done: false,
                    });
                }
                Err(err) => {
                    retries_so_far += retries;
                    last_err = err;
                    continue;
                }
            }
        }

        let mut outcome = PostOutcome::Failure(last_err);
        self.plugins.run_post(ran, &request, &mut outcome).await;
        self.emit_completion(&request, &outcome).await;
        self.resolve_stream_outcome(request, ran, outcome)
    }

    async fn run_target_stream(
        &self,
        base: &Request,
        target: &Target,
    ) -> (Result<(StreamChunk, StreamReceiver), DispatchError>, u32) {
        let adapter = match self.providers.get(&target.provider) {
            Some(adapter) => adapter,
            None => return (Err(DispatchError::invalid_request(format!("unknown provider '{}'", target.provider))), 0),
        };
        let provider_cfg = match self.config.get(&target.provider) {
            Some(cfg) => cfg,
            None => {
                return (
                    Err(DispatchError::no_key_available(format!("no configuration for provider '{}'", target.provider))),
                    0,
                );
            }
        };

        if !adapter.allowed_requests().contains(&base.request_type) {
            return (
                Err(DispatchError::invalid_request(format!(
                    "request type {:?} is not allowed for provider '{}'",
                    base.request_type, target.provider
                ))),
                0,
            );
        }

        let pool = match self.pool_for(&target.provider).await {
            Some(pool) => pool,
            None => {
                return (
                    Err(DispatchError::internal(format!("no worker pool for provider '{}'", target.provider))),
                    0,
                );
            }
        };
        let selector = self.selector_for(&target.provider).await;
        let attempt_request = Self::request_for_target(base, target);
        let cancellation = attempt_request.context.cancellation_token();
        let buffer_size = self.default_stream_buffer;
        let plugins = self.plugins.clone();

        let outcome: AttemptOutcome<(StreamChunk, StreamReceiver)> = retry::run_with_retries(
            provider_cfg.network.max_retries,
            provider_cfg.network.backoff_initial,
            provider_cfg.network.backoff_max,
            &cancellation,
            || {
                let pool = pool.clone();
                let adapter = adapter.clone();
                let provider_cfg = provider_cfg.clone();
                let selector = selector.clone();
                let http = self.http.clone();
                let attempt_request = attempt_request.clone();
                let plugins = plugins.clone();
                let cancellation = cancellation.clone();
                async move {
                    flatten(
                        pool.submit(first_chunk_attempt(
                            http,
                            adapter,
                            provider_cfg,
                            selector,
                            attempt_request,
                            plugins,
                            buffer_size,
                            cancellation,
                        ))
                        .await,
                    )
                }
            },
        )
        .await;

        (outcome.result, outcome.retries)
    }

    async fn emit_completion(&self, request: &Request, outcome: &PostOutcome) {
        let (provider, model, error_kind, extra) = match outcome {
            PostOutcome::Success(response) => (
                response.extra.provider.clone(),
                response.extra.model.clone(),
                None,
                response.extra.clone(),
            ),
            PostOutcome::Failure(err) => (
                request.provider.clone(),
                request.model.clone(),
                Some(err.kind.to_string()),
                ExtraFields::default(),
            ),
        };
        self.events
            .emit(Event::Completion(CompletionEvent {
                trace_id: request.context.trace_id.clone(),
                provider,
                model,
                error_kind,
                extra,
            }))
            .await;
    }
}

fn build_pools(snapshot: &ConfigSnapshot, events: &EventHub) -> HashMap<String, Arc<WorkerPool>> {
    snapshot
        .iter()
        .map(|(name, cfg)| {
            (
                name.clone(),
                Arc::new(WorkerPool::new(name.clone(), cfg.concurrency, events.clone())),
            )
        })
        .collect()
}

fn flatten<T>(result: Result<Result<T, DispatchError>, DispatchError>) -> Result<T, DispatchError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(err),
    }
}

async fn single_attempt_unary(
    http: Arc<dyn HttpClient>,
    adapter: Arc<dyn ProviderAdapter>,
    provider_cfg: Arc<ProviderConfig>,
    selector: Arc<KeySelector>,
    request: Arc<Request>,
) -> Result<Response, DispatchError> {
    let key = selector.select(&provider_cfg, request.model_name(), false).await?.clone();
    let http_req = adapter.build_request(&provider_cfg, &key, &request).await?;
    let executed = http.execute(&http_req, request.context.cancellation_token()).await?;

    let HttpExecuted::Unary(raw_outcome) = executed else {
        return Err(DispatchError::internal("adapter returned a stream for a unary request"));
    };

    if let Some(err) = adapter.classify_error(&raw_outcome) {
        if let Some(cooldown) = unavailable_cooldown(err.kind) {
            selector.mark_unavailable(&key.id, cooldown, err.kind.to_string()).await;
        }
        return Err(err.with_provider(provider_cfg.name.clone()));
    }

    let (status, body) = match raw_outcome {
        UpstreamOutcome::Success { status, body } => (status, body),
        UpstreamOutcome::Http { status, body } => (status, body),
        UpstreamOutcome::Transport { .. } => unreachable!("transport failures always classify to Some(err)"),
    };

    let mut response = adapter.parse_response(&request, status, &body)?;
    response.extra.provider = request.provider.clone();
    response.extra.model = request.model.clone();
    response.extra.selected_key_id = Some(key.id.clone());
    response.extra.selected_key_name = Some(key.name.clone());
    Ok(response)
}

/// One attempt of a streaming request: selects a key, opens the upstream
/// call, and waits for the first chunk before declaring success —
/// anything that fails before that point is an ordinary retryable/
/// fallback-eligible error (§9's resolved open question).
#[allow(clippy::too_many_arguments)]
async fn first_chunk_attempt(
    http: Arc<dyn HttpClient>,
    adapter: Arc<dyn ProviderAdapter>,
    provider_cfg: Arc<ProviderConfig>,
    selector: Arc<KeySelector>,
    request: Arc<Request>,
    plugins: Arc<PluginPipeline>,
    buffer_size: usize,
    cancellation: tokio_util::sync::CancellationToken,
) -> Result<(StreamChunk, StreamReceiver), DispatchError> {
    let key = selector.select(&provider_cfg, request.model_name(), false).await?.clone();
    let http_req = adapter.build_request(&provider_cfg, &key, &request).await?;
    let executed = http.execute(&http_req, cancellation.clone()).await?;

    let (status, upstream) = match executed {
        HttpExecuted::Stream { status, body } => (status, body),
        HttpExecuted::Unary(_) => {
            return Err(DispatchError::internal("adapter returned a unary outcome for a streaming request"));
        }
    };

    let preamble = if (200..300).contains(&status) {
        UpstreamOutcome::Success { status, body: bytes::Bytes::new() }
    } else {
        UpstreamOutcome::Http { status, body: bytes::Bytes::new() }
    };
    if let Some(err) = adapter.classify_error(&preamble) {
        if let Some(cooldown) = unavailable_cooldown(err.kind) {
            selector.mark_unavailable(&key.id, cooldown, err.kind.to_string()).await;
        }
        return Err(err.with_provider(provider_cfg.name.clone()));
    }

    let mut base_extra = ExtraFields::default();
    base_extra.provider = request.provider.clone();
    base_extra.model = request.model.clone();
    base_extra.selected_key_id = Some(key.id.clone());
    base_extra.selected_key_name = Some(key.name.clone());

    let mut rx = stream::coordinate(
        adapter,
        request,
        plugins,
        upstream,
        base_extra,
        buffer_size,
        cancellation,
    );

    match rx.recv().await {
        Some(chunk) if matches!(chunk.kind, crate::response::StreamChunkKind::Error(_)) => {
            let crate::response::StreamChunkKind::Error(err) = chunk.kind else {
                unreachable!()
            };
            if let Some(cooldown) = unavailable_cooldown(err.kind) {
                selector.mark_unavailable(&key.id, cooldown, err.kind.to_string()).await;
            }
            Err(err)
        }
        Some(chunk) => Ok((chunk, rx)),
        None => Err(DispatchError::internal("stream producer closed before any chunk")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConcurrencyAndBuffer, Key, NetworkConfig};
    use crate::provider::{HttpMethod, UpstreamHttpRequest};
    use crate::request::RequestType;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_network() -> NetworkConfig {
        NetworkConfig {
            base_url: "https://example".into(),
            timeout: Duration::from_secs(1),
            max_retries: 2,
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            extra_headers: Vec::new(),
            proxy: None,
        }
    }

    fn provider_config(name: &str) -> ProviderConfig {
        ProviderConfig::new(name)
            .with_keys(vec![Key::new("k1", "key-one", "secret")])
            .with_network(fast_network())
            .with_concurrency(ConcurrencyAndBuffer {
                concurrency: 2,
                buffer_size: 8,
                drop_excess_requests: false,
            })
    }

    struct ScriptedAdapter {
        name: &'static str,
        /// Status codes returned on successive `build_request`+`execute`
        /// calls; the last entry repeats once exhausted.
        statuses: Vec<u16>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
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
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let status = *self.statuses.get(n).unwrap_or(self.statuses.last().unwrap());
            Ok(UpstreamHttpRequest::new(HttpMethod::Post, "https://stub").with_header("x-status", status.to_string()))
        }
        fn parse_response(
            &self,
            _request: &Request,
            _status: u16,
            body: &Bytes,
        ) -> Result<Response, DispatchError> {
            Ok(Response {
                body: ResponseBody::ChatCompletion(
                    serde_json::json!({ "text": String::from_utf8_lossy(body) }),
                ),
                extra: ExtraFields::default(),
            })
        }
        fn parse_stream_event(
            &self,
            _request: &Request,
            event: &Bytes,
        ) -> Result<Option<serde_json::Value>, DispatchError> {
            Ok(Some(serde_json::json!({ "text": String::from_utf8_lossy(event) })))
        }
    }

    /// Reads the scripted status back out of the header the adapter
    /// stashed it in and reports success/failure accordingly.
    struct ScriptedHttpClient;

    #[async_trait]
    impl HttpClient for ScriptedHttpClient {
        async fn execute(
            &self,
            request: &UpstreamHttpRequest,
            _cancellation: tokio_util::sync::CancellationToken,
        ) -> Result<HttpExecuted, DispatchError> {
            let status: u16 = request
                .headers
                .iter()
                .find(|(k, _)| k == "x-status")
                .map(|(_, v)| v.parse().unwrap())
                .unwrap_or(200);
            if request.is_stream {
                let (tx, rx) = tokio::sync::mpsc::channel(8);
                if status < 300 {
                    tokio::spawn(async move {
                        for word in ["hi", " there"] {
                            let _ = tx.send(Bytes::from(word)).await;
                        }
                    });
                }
                Ok(HttpExecuted::Stream { status, body: rx })
            } else if status < 300 {
                Ok(HttpExecuted::Unary(UpstreamOutcome::Success { status, body: Bytes::from("hi") }))
            } else {
                Ok(HttpExecuted::Unary(UpstreamOutcome::Http { status, body: Bytes::new() }))
            }
        }
    }

    fn build_dispatcher(providers_and_statuses: Vec<(&'static str, Vec<u16>)>) -> Dispatcher {
        let mut registry = ProviderRegistry::new();
        let mut snapshot = ConfigSnapshot::new();
        for (name, statuses) in providers_and_statuses {
            registry.register(Arc::new(ScriptedAdapter {
                name,
                statuses,
                calls: AtomicU32::new(0),
            }));
            snapshot.insert(name.to_string(), Arc::new(provider_config(name)));
        }
        Dispatcher::new(
            snapshot,
            registry,
            PluginPipeline::new(),
            Arc::new(ScriptedHttpClient),
            EventHub::default(),
            16,
        )
    }

    fn chat_request(provider: &str, model: &str) -> Request {
        Request::new(RequestType::ChatCompletion, provider, model, serde_json::json!({}))
    }

    #[tokio::test]
    async fn scenario_1_retries_then_falls_back_to_anthropic() {
        let dispatcher = build_dispatcher(vec![
            ("openai", vec![500, 500, 500]),
            ("anthropic", vec![200]),
        ]);
        let request = chat_request("openai", "gpt-4o").with_fallbacks(vec![
            crate::request::FallbackEntry::new("anthropic", "claude-3-opus"),
        ]);

        let response = dispatcher.dispatch(request).await.unwrap();
        assert_eq!(response.extra.provider, "anthropic");
        assert_eq!(response.extra.number_of_retries, 2);
        assert_eq!(response.extra.fallback_index, 1);
    }

    #[tokio::test]
    async fn scenario_4_saturated_pool_rejects_overflow_with_queue_full() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedAdapter {
            name: "openai",
            statuses: vec![200],
            calls: AtomicU32::new(0),
        }));
        let mut snapshot = ConfigSnapshot::new();
        snapshot.insert(
            "openai".to_string(),
            Arc::new(
                ProviderConfig::new("openai")
                    .with_keys(vec![Key::new("k1", "k", "v")])
                    .with_network(fast_network())
                    .with_concurrency(ConcurrencyAndBuffer {
                        concurrency: 2,
                        buffer_size: 2,
                        drop_excess_requests: true,
                    }),
            ),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            snapshot,
            registry,
            PluginPipeline::new(),
            Arc::new(SlowHttpClient),
            EventHub::default(),
            16,
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.dispatch(chat_request("openai", "gpt-4o")).await
            }));
        }

        let mut success = 0;
        let mut queue_full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => success += 1,
                Err(err) if err.kind == crate::error::ErrorKind::QueueFull => queue_full += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(success, 4);
        assert_eq!(queue_full, 1);
    }

    struct SlowHttpClient;

    #[async_trait]
    impl HttpClient for SlowHttpClient {
        async fn execute(
            &self,
            _request: &UpstreamHttpRequest,
            _cancellation: tokio_util::sync::CancellationToken,
        ) -> Result<HttpExecuted, DispatchError> {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(HttpExecuted::Unary(UpstreamOutcome::Success { status: 200, body: Bytes::from("hi") }))
        }
    }

    #[tokio::test]
    async fn scenario_5_key_with_empty_models_wins_over_model_scoped_key() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedAdapter {
            name: "openai",
            statuses: vec![200],
            calls: AtomicU32::new(0),
        }));
        let mut snapshot = ConfigSnapshot::new();
        snapshot.insert(
            "openai".to_string(),
            Arc::new(
                ProviderConfig::new("openai")
                    .with_keys(vec![
                        Key::new("k1", "scoped", "v1").with_weight(1).with_models(vec!["gpt-4o".into()]),
                        Key::new("k2", "wild", "v2").with_weight(3),
                    ])
                    .with_network(fast_network()),
            ),
        );
        let dispatcher = Dispatcher::new(
            snapshot,
            registry,
            PluginPipeline::new(),
            Arc::new(ScriptedHttpClient),
            EventHub::default(),
            16,
        );

        for _ in 0..10 {
            let response = dispatcher.dispatch(chat_request("openai", "gpt-3.5")).await.unwrap();
            assert_eq!(response.extra.selected_key_id.unwrap(), KeyId::from("k2"));
        }
    }

    #[tokio::test]
    async fn scenario_3_short_circuit_without_fallbacks_skips_worker_pool() {
        struct CacheHit;
        #[async_trait]
        impl crate::plugin::Plugin for CacheHit {
            fn name(&self) -> &str {
                "cache"
            }
            async fn pre(&self, _request: &mut Request) -> Result<PreOutcome, DispatchError> {
                Ok(PreOutcome::ShortCircuit {
                    outcome: ShortCircuit::Response(Response {
                        body: ResponseBody::ChatCompletion(serde_json::json!({"text": "cached"})),
                        extra: ExtraFields {
                            cache_debug: Some(crate::response::CacheDebug { cache_hit: true }),
                            ..Default::default()
                        },
                    }),
                    allow_fallbacks: false,
                })
            }
        }

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedAdapter {
            name: "openai",
            statuses: vec![200],
            calls: AtomicU32::new(0),
        }));
        let mut snapshot = ConfigSnapshot::new();
        snapshot.insert("openai".to_string(), Arc::new(provider_config("openai")));

        let mut plugins = PluginPipeline::new();
        plugins.push(Arc::new(CacheHit));

        let dispatcher = Dispatcher::new(
            snapshot,
            registry,
            plugins,
            Arc::new(ScriptedHttpClient),
            EventHub::default(),
            16,
        );

        let response = dispatcher.dispatch(chat_request("openai", "gpt-4o")).await.unwrap();
        assert!(response.extra.cache_debug.unwrap().cache_hit);
    }

    #[tokio::test]
    async fn scenario_2_stream_delivers_chunks_then_end_with_post_hook_once() {
        use std::sync::atomic::AtomicUsize;

        struct CountingPost(Arc<AtomicUsize>);
        #[async_trait]
        impl crate::plugin::Plugin for CountingPost {
            fn name(&self) -> &str {
                "telemetry"
            }
            async fn post(&self, _request: &Request, _outcome: &mut PostOutcome) -> Result<(), DispatchError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let post_calls = Arc::new(AtomicUsize::new(0));
        let mut plugins = PluginPipeline::new();
        plugins.push(Arc::new(CountingPost(post_calls.clone())));

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedAdapter {
            name: "openai",
            statuses: vec![200],
            calls: AtomicU32::new(0),
        }));
        let mut snapshot = ConfigSnapshot::new();
        snapshot.insert("openai".to_string(), Arc::new(provider_config("openai")));

        let dispatcher = Dispatcher::new(
            snapshot,
            registry,
            plugins,
            Arc::new(ScriptedHttpClient),
            EventHub::default(),
            16,
        );

        let mut handle = dispatcher
            .dispatch_stream(Request::new(
                RequestType::ChatCompletionStream,
                "openai",
                "gpt-4o",
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = handle.recv().await {
            let terminal = chunk.is_terminal();
            chunks.push(chunk);
            if terminal {
                break;
            }
        }

        assert_eq!(chunks.len(), 3);
        assert!(matches!(chunks[2].kind, crate::response::StreamChunkKind::End));
        assert_eq!(post_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_circuited_stream_yields_one_data_chunk_then_end() {
        struct CacheHit;
        #[async_trait]
        impl crate::plugin::Plugin for CacheHit {
            fn name(&self) -> &str {
                "cache"
            }
            async fn pre(&self, _request: &mut Request) -> Result<PreOutcome, DispatchError> {
                Ok(PreOutcome::ShortCircuit {
                    outcome: ShortCircuit::Response(Response {
                        body: ResponseBody::ChatCompletion(serde_json::json!({"text": "cached"})),
                        extra: ExtraFields::default(),
                    }),
                    allow_fallbacks: false,
                })
            }
        }

        let registry = ProviderRegistry::new();
        let snapshot = ConfigSnapshot::new();
        let mut plugins = PluginPipeline::new();
        plugins.push(Arc::new(CacheHit));

        let dispatcher = Dispatcher::new(
            snapshot,
            registry,
            plugins,
            Arc::new(ScriptedHttpClient),
            EventHub::default(),
            16,
        );

        let mut handle = dispatcher
            .dispatch_stream(Request::new(
                RequestType::ChatCompletionStream,
                "openai",
                "gpt-4o",
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let first = handle.recv().await.unwrap();
        assert!(matches!(first.kind, crate::response::StreamChunkKind::Data(_)));
        let second = handle.recv().await.unwrap();
        assert!(matches!(second.kind, crate::response::StreamChunkKind::End));
        assert!(handle.recv().await.is_none());
    }
}
