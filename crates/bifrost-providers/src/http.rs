//! The concrete [`HttpClient`] (bifrost-core's §6 transport seam),
//! backed by `wreq`.

use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use bifrost_core::error::DispatchError;
use bifrost_core::http_client::{HttpClient, HttpExecuted};
use bifrost_core::provider::{HttpMethod, UpstreamHttpRequest, UpstreamOutcome, UpstreamTransportErrorKind};

static CLIENT_CACHE: OnceLock<Mutex<std::collections::HashMap<Option<String>, wreq::Client>>> =
    OnceLock::new();

fn client_for_proxy(proxy: Option<&str>) -> Result<wreq::Client, DispatchError> {
    let key = proxy.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());

    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(std::collections::HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| DispatchError::internal("http client cache lock poisoned"))?;

    if let Some(client) = guard.get(&key) {
        return Ok(client.clone());
    }

    let mut builder = wreq::Client::builder();
    if let Some(proxy_url) = &key {
        builder = builder.proxy(
            wreq::Proxy::all(proxy_url)
                .map_err(|err| DispatchError::internal(format!("invalid proxy: {err}")))?,
        );
    }
    let client = builder
        .build()
        .map_err(|err| DispatchError::internal(format!("failed to build http client: {err}")))?;
    guard.insert(key, client.clone());
    Ok(client)
}

fn to_wreq_method(method: HttpMethod) -> wreq::Method {
    match method {
        HttpMethod::Get => wreq::Method::GET,
        HttpMethod::Post => wreq::Method::POST,
        HttpMethod::Put => wreq::Method::PUT,
        HttpMethod::Patch => wreq::Method::PATCH,
        HttpMethod::Delete => wreq::Method::DELETE,
    }
}

fn transport_outcome(err: wreq::Error) -> UpstreamOutcome {
    let kind = if err.is_timeout() {
        UpstreamTransportErrorKind::Timeout
    } else if err.is_connect() {
        UpstreamTransportErrorKind::Connect
    } else {
        UpstreamTransportErrorKind::Other
    };
    UpstreamOutcome::Transport { kind, message: err.to_string() }
}

/// Sends [`UpstreamHttpRequest`]s over a process-wide pool of `wreq`
/// clients keyed by outbound proxy, mirroring the teacher's shared
/// client cache (`providers::http_client::client_for_ctx`).
pub struct WreqHttpClient {
    proxy: Option<String>,
}

impl WreqHttpClient {
    pub fn new() -> Self {
        Self { proxy: None }
    }

    pub fn with_proxy(proxy: impl Into<String>) -> Self {
        Self { proxy: Some(proxy.into()) }
    }
}

impl Default for WreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for WreqHttpClient {
    async fn execute(
        &self,
        request: &UpstreamHttpRequest,
        cancellation: CancellationToken,
    ) -> Result<HttpExecuted, DispatchError> {
        let client = client_for_proxy(self.proxy.as_deref())?;

        let mut builder = client.request(to_wreq_method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started_at = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Err(DispatchError::canceled("request canceled before send completed"));
            }
            result = builder.send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    url = %request.url,
                    elapsed_ms = started_at.elapsed().as_millis(),
                    error = %err,
                    "upstream send failed"
                );
                return Ok(HttpExecuted::Unary(transport_outcome(err)));
            }
        };

        let status = response.status().as_u16();
        tracing::debug!(
            url = %request.url,
            status,
            elapsed_ms = started_at.elapsed().as_millis(),
            is_stream = request.is_stream,
            "upstream response"
        );

        if request.is_stream {
            let (tx, rx) = tokio::sync::mpsc::channel(32);
            let mut byte_stream = response.bytes_stream();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => break,
                        item = byte_stream.next() => item,
                    };
                    match next {
                        Some(Ok(bytes)) => {
                            if tx.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
            });
            return Ok(HttpExecuted::Stream { status, body: rx });
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => return Ok(HttpExecuted::Unary(transport_outcome(err))),
        };

        let outcome = if (200..300).contains(&status) {
            UpstreamOutcome::Success { status, body }
        } else {
            UpstreamOutcome::Http { status, body }
        };
        Ok(HttpExecuted::Unary(outcome))
    }
}
