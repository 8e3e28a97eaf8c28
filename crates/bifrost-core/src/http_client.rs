//! The HTTP client seam (§6).
//!
//! The engine never constructs its own HTTP client — it is handed one at
//! startup and only ever calls `execute`. This keeps the dispatch engine
//! testable with a stub and keeps a concrete client (wreq, in
//! `bifrost-providers`) swappable without touching any dispatch logic.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::provider::{ByteStream, UpstreamHttpRequest, UpstreamOutcome};

/// What came back from sending an [`UpstreamHttpRequest`]. Unary calls
/// carry the fully-buffered outcome the adapter classifies; streaming
/// calls carry a byte source the stream coordinator (§4.G) drains.
pub enum HttpExecuted {
    Unary(UpstreamOutcome),
    Stream { status: u16, body: ByteStream },
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends `request`, honoring `cancellation`. Transport-level failures
    /// (timeout, connect, DNS, TLS) are reported as
    /// `Ok(HttpExecuted::Unary(UpstreamOutcome::Transport { .. }))`, not
    /// an `Err` — classification is the adapter's job (§4.D). `Err` is
    /// reserved for cancellation and client-internal failures the core
    /// itself must react to.
    async fn execute(
        &self,
        request: &UpstreamHttpRequest,
        cancellation: CancellationToken,
    ) -> Result<HttpExecuted, DispatchError>;
}
