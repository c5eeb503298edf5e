//! Configuration types and loading logic.

use dash_tracing::TracingConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level middleware configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    /// URL suffixes whose requests are cache-probed and tracked.
    #[serde(default = "default_recorded_urls")]
    pub recorded_urls: Vec<String>,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Largest inbound request body the pipeline will buffer.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// The Dash application behind the middleware.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,

    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

/// Backend collaborators: result cache, layout service, and track service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_track_url")]
    pub track_url: String,

    #[serde(default = "default_layout_url")]
    pub layout_url: String,

    #[serde(default = "default_result_url")]
    pub result_url: String,

    /// Timeout for the result-cache probe and the layout fetch.
    #[serde(default = "default_services_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_track_timeout")]
    pub track_timeout_secs: u64,

    /// Track reports in flight at once; further reports are dropped.
    #[serde(default = "default_track_max_in_flight")]
    pub track_max_in_flight: usize,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_upstream_url() -> String {
    "http://localhost:8050".to_string()
}

fn default_upstream_timeout() -> u64 {
    300
}

fn default_track_url() -> String {
    "http://backend.dashpool-system:8080/track".to_string()
}

fn default_layout_url() -> String {
    "http://backend.dashpool-system:8080/getlayout".to_string()
}

fn default_result_url() -> String {
    "http://backend.dashpool-system:8080/result".to_string()
}

fn default_services_timeout() -> u64 {
    30
}

fn default_track_timeout() -> u64 {
    10
}

fn default_track_max_in_flight() -> usize {
    256
}

fn default_recorded_urls() -> Vec<String> {
    vec![
        "/_dash-update-component".to_string(),
        "/_dash-layout".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            track_url: default_track_url(),
            layout_url: default_layout_url(),
            result_url: default_result_url(),
            timeout_secs: default_services_timeout(),
            track_timeout_secs: default_track_timeout(),
            track_max_in_flight: default_track_max_in_flight(),
        }
    }
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            services: ServicesConfig::default(),
            recorded_urls: default_recorded_urls(),
            tracing: TracingConfig::default(),
        }
    }
}

impl MiddlewareConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (DASH_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(config_path))
                .merge(Env::prefixed("DASH_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: MiddlewareConfig = figment.extract()?;
        if config.recorded_urls.iter().any(|suffix| suffix.is_empty()) {
            anyhow::bail!("recorded_urls must not contain an empty suffix");
        }
        Ok(config)
    }
}
