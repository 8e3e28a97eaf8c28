use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged process configuration.
///
/// Merge order: CLI > ENV > config store, then the result is what the
/// dispatcher is bootstrapped with. The config store itself (§6 of the
/// spec) is an external collaborator; this struct is just the shape the
/// merged result takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Default bounded channel capacity for stream coordinators that don't
    /// specify their own.
    pub default_stream_buffer: usize,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            default_stream_buffer: 16,
            proxy: None,
        }
    }
}

/// Optional layer used for merging configuration from CLI/env/store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub default_stream_buffer: Option<usize>,
    pub proxy: Option<String>,
}

impl GatewayConfigPatch {
    /// Applies `other` on top of `self`, field by field, last write wins.
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.default_stream_buffer.is_some() {
            self.default_stream_buffer = other.default_stream_buffer;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
    }

    pub fn into_config(self) -> GatewayConfig {
        let defaults = GatewayConfig::default();
        GatewayConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            default_stream_buffer: self
                .default_stream_buffer
                .unwrap_or(defaults.default_stream_buffer),
            proxy: self.proxy,
        }
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            default_stream_buffer: Some(value.default_stream_buffer),
            proxy: value.proxy,
        }
    }
}

/// A v4 trace id, used for correlating a request across the dispatch path.
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_overlay_keeps_unset_fields() {
        let mut base = GatewayConfigPatch::from(GatewayConfig::default());
        base.overlay(GatewayConfigPatch {
            port: Some(9000),
            ..Default::default()
        });
        let merged = base.into_config();
        assert_eq!(merged.port, 9000);
        assert_eq!(merged.host, GatewayConfig::default().host);
    }

    #[test]
    fn trace_id_is_unique_per_call() {
        assert_ne!(new_trace_id(), new_trace_id());
    }
}
