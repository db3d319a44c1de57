//! Configuration for the routing engine
//!
//! Everything is read from environment variables once at startup and then
//! handed to [`crate::RouterBuilder`] as plain values.

use lfr_llm::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cost::PriceTable;
use crate::policy::DEFAULT_OPT_OUT_MARKER;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Main router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind address (env: LFR_HOST, LFR_PORT)
    pub server: ServerConfig,
    /// Local models that may be requested by name (env: LOCAL_MODELS, comma-separated)
    pub local_models: Vec<String>,
    /// Model used when the request names none (env: LOCAL_MODEL)
    pub local_model: String,
    /// Default sampling temperature (env: LOCAL_TEMPERATURE)
    pub local_temperature: f32,
    /// Generation cap for local calls (env: LOCAL_MAX_TOKENS)
    pub local_max_tokens: Option<u32>,
    /// Cloud model name (env: CLOUD_MODEL)
    pub cloud_model: String,
    /// Generation cap for cloud calls (env: CLOUD_MAX_TOKENS)
    pub cloud_max_tokens: u32,
    /// Minimum local confidence accepted without escalation (env: CONFIDENCE_THRESHOLD)
    pub confidence_threshold: f64,
    /// Cache entry lifetime (env: CACHE_TTL_SECONDS)
    pub cache_ttl: Duration,
    /// Optional cache size bound (env: CACHE_MAX_ENTRIES)
    pub cache_max_entries: Option<usize>,
    /// Audit rows kept in memory (env: MAX_LOG_ROWS)
    pub max_log_rows: usize,
    /// Cloud prices (env: PRICE_PER_1K_INPUT, PRICE_PER_1K_OUTPUT)
    pub prices: PriceTable,
    /// Policy opt-out marker (env: OPT_OUT_MARKER)
    pub opt_out_marker: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            local_models: vec![
                "llama3.2:latest".to_string(),
                "llama3.1:8b-instruct-q4_K_M".to_string(),
            ],
            local_model: "llama3.2:latest".to_string(),
            local_temperature: 0.7,
            local_max_tokens: None,
            cloud_model: "claude-3-haiku-20240307".to_string(),
            cloud_max_tokens: 1024,
            confidence_threshold: 0.7,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: None,
            max_log_rows: 5000,
            prices: PriceTable::default(),
            opt_out_marker: DEFAULT_OPT_OUT_MARKER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let local_models = match text("LOCAL_MODELS") {
            Some(raw) => raw
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            None => defaults.local_models,
        };

        let config = Self {
            server: ServerConfig {
                host: text("LFR_HOST").unwrap_or(defaults.server.host),
                port: parse(&lookup, "LFR_PORT")?.unwrap_or(defaults.server.port),
            },
            local_models,
            local_model: text("LOCAL_MODEL").unwrap_or(defaults.local_model),
            local_temperature: parse(&lookup, "LOCAL_TEMPERATURE")?
                .unwrap_or(defaults.local_temperature),
            local_max_tokens: parse(&lookup, "LOCAL_MAX_TOKENS")?,
            cloud_model: text("CLOUD_MODEL").unwrap_or(defaults.cloud_model),
            cloud_max_tokens: parse(&lookup, "CLOUD_MAX_TOKENS")?
                .unwrap_or(defaults.cloud_max_tokens),
            confidence_threshold: parse(&lookup, "CONFIDENCE_THRESHOLD")?
                .unwrap_or(defaults.confidence_threshold),
            cache_ttl: parse::<u64, _>(&lookup, "CACHE_TTL_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_max_entries: parse(&lookup, "CACHE_MAX_ENTRIES")?,
            max_log_rows: parse(&lookup, "MAX_LOG_ROWS")?.unwrap_or(defaults.max_log_rows),
            prices: PriceTable::new(
                parse(&lookup, "PRICE_PER_1K_INPUT")?.unwrap_or(defaults.prices.per_1k_input),
                parse(&lookup, "PRICE_PER_1K_OUTPUT")?.unwrap_or(defaults.prices.per_1k_output),
            ),
            opt_out_marker: text("OPT_OUT_MARKER").unwrap_or(defaults.opt_out_marker),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.prices.per_1k_input < 0.0 || self.prices.per_1k_output < 0.0 {
            return Err(ConfigError::Invalid("prices must not be negative".to_string()));
        }
        if self.local_temperature.is_nan() || self.local_temperature < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "LOCAL_TEMPERATURE must not be negative, got {}",
                self.local_temperature
            )));
        }
        if self.local_models.is_empty() || self.local_model.trim().is_empty() {
            return Err(ConfigError::Invalid("no local model configured".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{} has an invalid value: {:?}", name, raw))),
        _ => Ok(None),
    }
}
