use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::request::RequestType;

/// Stable identifier for a [`Key`]. Opaque to everything but logging and
/// `ExtraFields`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub String);

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        KeyId(value.to_string())
    }
}

/// Per-provider extension data a key may carry. The key selector never
/// looks inside this; only the matching provider adapter does (§3, §4.D).
#[derive(Debug, Clone, Default)]
pub enum CredentialExtra {
    #[default]
    None,
    Azure {
        deployment_id: String,
    },
    Vertex {
        project_id: String,
        location: String,
    },
    Bedrock {
        role_arn: String,
    },
}

/// One provider credential (§3). Keys are owned by the `ProviderConfig`
/// they belong to and replaced wholesale on reload — never mutated
/// in place.
#[derive(Debug, Clone)]
pub struct Key {
    pub id: KeyId,
    pub name: String,
    pub value: String,
    /// Must be > 0; enforced by [`Key::new`].
    pub weight: u32,
    /// Empty means wildcard — eligible for every model.
    pub models: Vec<String>,
    pub enabled: bool,
    pub use_for_batch_api: bool,
    pub extra: CredentialExtra,
}

impl Key {
    pub fn new(id: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: KeyId(id.into()),
            name: name.into(),
            value: value.into(),
            weight: 1,
            models: Vec::new(),
            enabled: true,
            use_for_batch_api: false,
            extra: CredentialExtra::None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn for_batch_api(mut self) -> Self {
        self.use_for_batch_api = true;
        self
    }

    /// True if this key is eligible for `model` — wildcard or explicit
    /// membership after the provider prefix is stripped (§3's invariant,
    /// §4.C step 1).
    pub fn allows_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

/// Network-level settings for a provider (§3).
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub extra_headers: Vec<(String, String)>,
    pub proxy: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff_initial: Duration::from_millis(250),
            backoff_max: Duration::from_secs(8),
            extra_headers: Vec::new(),
            proxy: None,
        }
    }
}

/// Worker pool sizing for a provider (§4.E).
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyAndBuffer {
    pub concurrency: usize,
    pub buffer_size: usize,
    pub drop_excess_requests: bool,
}

impl Default for ConcurrencyAndBuffer {
    fn default() -> Self {
        Self {
            concurrency: 4,
            buffer_size: 64,
            drop_excess_requests: false,
        }
    }
}

/// A custom provider wraps a base provider type and narrows which
/// request types it accepts (§3, §4.D).
#[derive(Debug, Clone)]
pub struct CustomProviderSpec {
    pub base_type: String,
    pub allowed_requests: Vec<RequestType>,
}

/// Immutable per-provider configuration snapshot (§3). Versions are
/// published wholesale; the dispatcher always reads a consistent
/// snapshot pointer.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub keys: Vec<Key>,
    pub network: NetworkConfig,
    pub concurrency: ConcurrencyAndBuffer,
    pub custom: Option<CustomProviderSpec>,
    pub send_back_raw_response: bool,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            network: NetworkConfig::default(),
            concurrency: ConcurrencyAndBuffer::default(),
            custom: None,
            send_back_raw_response: false,
        }
    }

    pub fn with_keys(mut self, keys: Vec<Key>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyAndBuffer) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn allows(&self, request_type: RequestType) -> bool {
        match &self.custom {
            Some(custom) => custom.allowed_requests.contains(&request_type),
            None => true,
        }
    }
}

/// An immutable version of the full set of provider configurations,
/// keyed by provider name. Readers hold an `Arc` for the duration of a
/// request; writers publish a fully-constructed replacement (§3, §9).
pub type ConfigSnapshot = HashMap<String, Arc<ProviderConfig>>;

/// Process-wide, atomically swapped pointer to the current
/// [`ConfigSnapshot`] (§6's `ReloadConfig`, §9's "process-wide snapshot
/// pointer"). Readers never lock.
#[derive(Default)]
pub struct ConfigRegistry {
    snapshot: ArcSwap<ConfigSnapshot>,
}

impl ConfigRegistry {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, provider: &str) -> Option<Arc<ProviderConfig>> {
        self.snapshot.load().get(provider).cloned()
    }

    /// Atomic swap of the provider configuration (§6 `ReloadConfig`).
    /// Workers currently running requests complete against the snapshot
    /// they started with; only new attempts observe the replacement.
    pub fn reload(&self, snapshot: ConfigSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_allows_model_respects_wildcard_and_explicit_list() {
        let wildcard = Key::new("k1", "wild", "v");
        assert!(wildcard.allows_model("anything"));

        let scoped = Key::new("k2", "scoped", "v").with_models(vec!["gpt-4o".to_string()]);
        assert!(scoped.allows_model("gpt-4o"));
        assert!(!scoped.allows_model("gpt-3.5"));
    }

    #[test]
    fn reload_replaces_the_whole_snapshot_atomically() {
        let mut first = ConfigSnapshot::new();
        first.insert("openai".to_string(), Arc::new(ProviderConfig::new("openai")));
        let registry = ConfigRegistry::new(first);
        assert!(registry.get("openai").is_some());
        assert!(registry.get("anthropic").is_none());

        let mut second = ConfigSnapshot::new();
        second.insert(
            "anthropic".to_string(),
            Arc::new(ProviderConfig::new("anthropic")),
        );
        registry.reload(second);
        assert!(registry.get("openai").is_none());
        assert!(registry.get("anthropic").is_some());
    }
}
