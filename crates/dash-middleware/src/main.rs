//! dash-middleware: caches, records, and reports the callbacks of a Dash app.

mod config;
mod error;
mod intercept;
mod proxy;
mod server;
mod services;
mod stats;

use std::sync::Arc;
use std::time::Duration;

use config::MiddlewareConfig;
use intercept::Interceptor;
use proxy::upstream::Upstream;
use server::AppState;
use stats::ProxyStats;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("DASH_MIDDLEWARE_CONFIG").ok())
        .unwrap_or_else(|| "dash-middleware.toml".to_string());

    let upstream_url_override = args
        .iter()
        .position(|a| a == "--upstream-url")
        .and_then(|i| args.get(i + 1).cloned());

    let mut config = MiddlewareConfig::load(&config_path)?;

    // CLI overrides take precedence over TOML and env vars
    if let Some(url) = upstream_url_override {
        config.upstream.url = url;
    }

    // The gRPC exporter needs a reactor context, so build the runtime first
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = dash_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            upstream_url = %config.upstream.url,
            recorded_urls = ?config.recorded_urls,
            otlp_export = tracing_guard.exporting(),
            "Starting dash-middleware"
        );

        run(config).await
    })
}

async fn run(config: MiddlewareConfig) -> anyhow::Result<()> {
    let upstream_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.timeout_secs))
        .build()?;

    // Cache probe and layout fetch share one client and timeout
    let services_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.services.timeout_secs))
        .build()?;

    // Track reports set a per-request timeout
    let track_client = reqwest::Client::builder().build()?;

    let stats = ProxyStats::new();
    let interceptor = Arc::new(Interceptor::new(
        &config,
        services_client,
        track_client,
        stats.clone(),
    ));
    let upstream = Upstream {
        client: upstream_client,
        base_url: config.upstream.url.clone(),
    };

    let state = AppState {
        config,
        upstream,
        interceptor,
        stats,
    };

    server::run(state).await
}
