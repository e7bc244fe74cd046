//! Gateway configuration: environment-driven, with an optional TOML file
//! for non-secret structural settings (routing rules, cache tuning).
//! Secrets -- the gateway key, provider API keys -- are env-only and never
//! round-trip through a config file example.
//!
//! `Config::load` composes file + env by layering environment variables on
//! top of a parsed TOML document; the order is fixed as file-first,
//! env-second, so an operator can always override a checked-in file with a
//! one-off env var.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gateway_core::rules::RoutingRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    #[serde(with = "gateway_core::providers::duration_serde")]
    pub default_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_body_bytes: 1_048_576,
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(with = "gateway_core::providers::duration_serde")]
    pub timeout: Duration,
    pub max_retries: u32,
    pub rate_limit_capacity: f64,
    pub rate_limit_refill_per_sec: f64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            rate_limit_capacity: 60.0,
            rate_limit_refill_per_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(with = "gateway_core::providers::duration_serde")]
    pub ttl: Duration,
    pub cosine_distance_threshold: f32,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub embedding_endpoint: String,
    pub embedding_model: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            cosine_distance_threshold: 0.05,
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_collection: "gateway_cache".to_string(),
            embedding_endpoint: "http://localhost:8081/v1/embeddings".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    pub window_size: usize,
    pub ema_alpha: f64,
    pub circuit_failure_threshold: u32,
    #[serde(with = "gateway_core::providers::duration_serde")]
    pub circuit_cooldown: Duration,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            ema_alpha: 0.3,
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub gateway_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: HashMap::new(),
            routing: RoutingConfig::default(),
            cache: CacheConfig::default(),
            latency: LatencyConfig::default(),
            auth: AuthConfig {
                gateway_key: String::new(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads structural config from `path` if it exists, then layers
    /// environment variables on top, then validates. A missing file is not
    /// an error -- defaults plus env is a legitimate all-env deployment.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if std::path::Path::new(path).exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = env::var("GATEWAY_PORT") {
            self.server.port = port.parse()?;
        }
        if let Ok(key) = env::var("GATEWAY_KEY") {
            self.auth.gateway_key = key;
        }
        if let Ok(level) = env::var("RUST_LOG") {
            self.logging.level = level;
        }

        for (provider, settings) in self.providers.iter_mut() {
            let env_key = format!("GATEWAY_PROVIDER_{}_API_KEY", provider.to_uppercase());
            if let Ok(api_key) = env::var(&env_key) {
                settings.api_key = api_key;
            }
        }
        Ok(())
    }

    /// Enforces the two startup invariants: the gateway key must be long
    /// enough to resist brute force, and the global request timeout must
    /// never be tighter than the slowest provider's own timeout -- a
    /// request would otherwise be killed by the deadline before a
    /// legitimately slow-but-healthy provider had a chance to answer.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.gateway_key.len() < 32 {
            anyhow::bail!(
                "GATEWAY_KEY must be at least 32 characters, got {}",
                self.auth.gateway_key.len()
            );
        }
        if self.server.port == 0 {
            anyhow::bail!("server port must be nonzero");
        }
        let max_provider_timeout = self
            .providers
            .values()
            .map(|p| p.timeout)
            .max()
            .unwrap_or(Duration::ZERO);
        if self.server.default_timeout < max_provider_timeout {
            anyhow::bail!(
                "global default_timeout ({:?}) must be >= the slowest configured provider timeout ({:?})",
                self.server.default_timeout,
                max_provider_timeout
            );
        }
        Ok(())
    }
}
