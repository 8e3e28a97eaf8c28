use std::fmt;
use std::time::Duration;

/// Classification of a dispatch-path failure.
///
/// `retryable()` drives the retry controller (§4.F): only
/// [`ErrorKind::RateLimited`] and [`ErrorKind::ProviderTransient`] are
/// retried within an attempt's backoff budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Auth,
    RateLimited,
    ProviderTransient,
    ProviderPermanent,
    NoKeyAvailable,
    QueueFull,
    Canceled,
    Internal,
}

impl ErrorKind {
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::ProviderTransient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProviderTransient => "provider_transient",
            ErrorKind::ProviderPermanent => "provider_permanent",
            ErrorKind::NoKeyAvailable => "no_key_available",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A first-class dispatch-path error. Every call returns either a response
/// or a `DispatchError`; streams deliver a terminal error chunk carrying
/// one of these instead of silently truncating.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
    /// Provider-indicated retry delay (e.g. `Retry-After`), when present.
    pub retry_after: Option<Duration>,
    /// Set when the error was captured from a panicking plugin hook.
    pub plugin: Option<String>,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: None,
            retry_after: None,
            plugin: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn provider_transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderTransient, message)
    }

    pub fn provider_permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderPermanent, message)
    }

    pub fn no_key_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoKeyAvailable, message)
    }

    pub fn queue_full(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueueFull, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Builds the `internal` error a plugin panic is converted into,
    /// attributed to the plugin that threw it (§4.B, §9).
    pub fn from_plugin_panic(plugin: &str, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "plugin panicked".to_string()
        };
        Self::internal(format!("plugin '{plugin}' panicked: {message}")).with_plugin(plugin)
    }
}
