use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use bifrost_common::GatewayConfigPatch;
use bifrost_core::config::{ConfigSnapshot, Key, ProviderConfig};
use bifrost_core::events::EventHub;
use bifrost_core::plugin::PluginPipeline;
use bifrost_core::Dispatcher;
use bifrost_providers::WreqHttpClient;

mod cli;
mod tracing_sink;

use cli::Cli;

/// Provider credentials come from the config store in production (§6,
/// out of scope here); for this standalone bootstrap a handful of
/// well-known env vars is enough to exercise a live provider.
const ENV_KEYS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("cohere", "COHERE_API_KEY"),
];

fn config_from_env() -> ConfigSnapshot {
    let mut snapshot = ConfigSnapshot::new();
    for (provider, env_var) in ENV_KEYS {
        if let Ok(api_key) = std::env::var(env_var) {
            if api_key.is_empty() {
                continue;
            }
            let config = ProviderConfig::new(*provider)
                .with_keys(vec![Key::new(format!("{provider}-env"), "env", api_key)]);
            snapshot.insert(provider.to_string(), Arc::new(config));
        }
    }
    snapshot
}

fn env_patch() -> GatewayConfigPatch {
    GatewayConfigPatch {
        host: std::env::var("BIFROST_HOST").ok(),
        port: std::env::var("BIFROST_PORT").ok().and_then(|v| v.parse().ok()),
        default_stream_buffer: std::env::var("BIFROST_STREAM_BUFFER").ok().and_then(|v| v.parse().ok()),
        proxy: std::env::var("BIFROST_PROXY").ok(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut patch = env_patch();
    patch.overlay(cli.into_patch());
    let config = patch.into_config();

    let events = EventHub::default();
    events.add_sink(Arc::new(tracing_sink::TracingEventSink)).await;

    let http_client: Arc<dyn bifrost_core::http_client::HttpClient> = match &config.proxy {
        Some(proxy) => Arc::new(WreqHttpClient::with_proxy(proxy.clone())),
        None => Arc::new(WreqHttpClient::new()),
    };

    let dispatcher = Arc::new(Dispatcher::new(
        config_from_env(),
        bifrost_providers::default_registry(),
        PluginPipeline::new(),
        http_client,
        events,
        config.default_stream_buffer,
    ));

    tracing::info!(
        host = %config.host,
        port = config.port,
        default_stream_buffer = config.default_stream_buffer,
        "bifrost dispatch engine initialized"
    );

    // The transport layer (HTTP handlers translating wire requests into
    // `bifrost_core::Request`) is an external collaborator out of scope
    // for this crate (§1, §6); this bootstrap exists to prove the engine
    // assembles and stays alive under a real HTTP client.
    let _dispatcher = dispatcher;
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
