//! The plugin pipeline (§4.B).
//!
//! Plugins run in a fixed order for `PreHook`, and the *reverse* of that
//! order for `PostHook` — the same unwinding discipline as a stack of
//! middleware. A `PreHook` that short-circuits (returns
//! [`PreOutcome::ShortCircuit`]) skips the worker pool entirely; whatever
//! plugins already ran still get their matching `PostHook` call so
//! resources they acquired in `PreHook` are symmetric.
//!
//! A panicking hook is caught and converted into a
//! [`DispatchError::internal`] attributed to the offending plugin (§9) —
//! one bad plugin must not take down the dispatcher.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::error::DispatchError;
use crate::request::Request;
use crate::response::{Response, StreamChunk};

/// What a short-circuiting `PreHook` produced: a synthesized response (a
/// cache hit, say) or a synthesized error (a governance denial).
pub enum ShortCircuit {
    Response(Response),
    Error(DispatchError),
}

/// What a `PreHook` decided to do with the request.
pub enum PreOutcome {
    /// Continue to the next plugin, then eventually the worker pool.
    Continue,
    /// Stop here; no further `PreHook`s run. `allow_fallbacks` controls
    /// whether the dispatcher still walks the request's fallback list:
    /// a short-circuit `Response` never needs fallbacks, but a
    /// short-circuit `Error` with `allow_fallbacks = true` means the
    /// primary attempt is skipped while the fallback walk still runs
    /// (§4.B, §4.H).
    ShortCircuit {
        outcome: ShortCircuit,
        allow_fallbacks: bool,
    },
}

/// The result of a dispatch (unary, or a stream's final chunk) as seen by
/// `PostHook`. A plugin may rewrite a success in place, or replace this
/// with a different variant entirely — including upgrading a `Failure`
/// into a `Success` (a semantic-cache plugin serving a cached response
/// after the upstream call failed).
pub enum PostOutcome {
    Success(Response),
    Failure(DispatchError),
}

impl PostOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PostOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<Response, DispatchError> {
        match self {
            PostOutcome::Success(response) => Ok(response),
            PostOutcome::Failure(err) => Err(err),
        }
    }
}

/// One plugin in the pipeline. Implementations only override the hooks
/// they care about; the defaults are no-ops.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn pre(&self, _request: &mut Request) -> Result<PreOutcome, DispatchError> {
        Ok(PreOutcome::Continue)
    }

    /// Called once per dispatch, in reverse pipeline order, with the
    /// outcome the attempt/fallback walk produced (or the short-circuit
    /// outcome, if `PreHook` stopped the pipeline). A plugin may mutate
    /// `outcome` in place; returning `Err` replaces it with
    /// `PostOutcome::Failure` for every plugin still left to run.
    async fn post(&self, _request: &Request, _outcome: &mut PostOutcome) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Called once per stream chunk, in reverse pipeline order (same
    /// discipline as `post`), before it's sent downstream. Plugins that
    /// don't touch streaming bodies skip this.
    async fn stream_chunk(
        &self,
        _request: &Request,
        _chunk: &mut StreamChunk,
    ) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// An ordered list of plugins, run `pre` forward and `post`/`stream_chunk`
/// in reverse.
#[derive(Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Runs `PreHook` in pipeline order. Returns the index of the last
    /// plugin that ran (for symmetric unwinding in `run_post`) along with
    /// the outcome.
    pub async fn run_pre(&self, request: &mut Request) -> (usize, Result<PreOutcome, DispatchError>) {
        for (index, plugin) in self.plugins.iter().enumerate() {
            let result = run_guarded(plugin.name(), AssertUnwindSafe(plugin.pre(request))).await;
            match result {
                Ok(Ok(PreOutcome::Continue)) => continue,
                Ok(Ok(outcome @ PreOutcome::ShortCircuit { .. })) => return (index + 1, Ok(outcome)),
                Ok(Err(err)) => return (index + 1, Err(err)),
                Err(err) => return (index + 1, Err(err)),
            }
        }
        (self.plugins.len(), Ok(PreOutcome::Continue))
    }

    /// Runs `PostHook` for the first `ran` plugins (as returned by
    /// `run_pre`), in reverse order. Every plugin up to that point gets
    /// its call regardless of whether an earlier one errored — there's
    /// no further short-circuiting once unwinding has started, but the
    /// final `outcome` reflects the last error seen, if any.
    pub async fn run_post(&self, ran: usize, request: &Request, outcome: &mut PostOutcome) {
        for plugin in self.plugins[..ran].iter().rev() {
            let result = run_guarded(
                plugin.name(),
                AssertUnwindSafe(plugin.post(request, outcome)),
            )
            .await;
            if let Ok(Err(err)) | Err(err) = result {
                *outcome = PostOutcome::Failure(err);
            }
        }
    }

    /// Runs `stream_chunk` for every plugin, in reverse pipeline order,
    /// same as `PostHook`.
    pub async fn run_stream_chunk(
        &self,
        request: &Request,
        chunk: &mut StreamChunk,
    ) -> Result<(), DispatchError> {
        for plugin in self.plugins.iter().rev() {
            run_guarded(
                plugin.name(),
                AssertUnwindSafe(plugin.stream_chunk(request, chunk)),
            )
            .await??;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Awaits `fut`, converting a panic inside it into a
/// [`DispatchError::internal`] attributed to `plugin_name` instead of
/// unwinding through the dispatcher.
async fn run_guarded<F, T>(
    plugin_name: &str,
    fut: AssertUnwindSafe<F>,
) -> Result<Result<T, DispatchError>, DispatchError>
where
    F: std::future::Future<Output = Result<T, DispatchError>>,
{
    match fut.catch_unwind().await {
        Ok(result) => Ok(result),
        Err(payload) => Err(DispatchError::from_plugin_panic(plugin_name, payload.as_ref())),
    }
}
