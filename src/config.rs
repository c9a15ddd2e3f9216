//! Configuration management for Tollgate.
//!
//! Settings come from an optional YAML file, then the environment. The
//! store's endpoint and token are normally supplied through
//! `UPSTASH_REDIS_REST_URL` and `UPSTASH_REDIS_REST_TOKEN`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::interceptor::UsageFields;
use crate::ratelimit::store::DEFAULT_TIMEOUT;
use crate::ratelimit::{
    CounterStore, FailurePolicy, LimitRule, MemoryStore, RestStore, DEFAULT_PREFIX,
};

/// Environment variable holding the counter store's REST endpoint.
pub const REST_URL_ENV: &str = "UPSTASH_REDIS_REST_URL";
/// Environment variable holding the counter store's REST token.
pub const REST_TOKEN_ENV: &str = "UPSTASH_REDIS_REST_TOKEN";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Quota configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Which counter store backs the limiters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Counters live in this process
    #[default]
    Memory,
    /// Counters live behind a REST endpoint
    Rest,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StoreBackend,

    /// REST endpoint URL
    #[serde(default)]
    pub rest_url: Option<String>,

    /// REST bearer token
    #[serde(default)]
    pub rest_token: Option<String>,

    /// Timeout for one store command in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Namespace for counter keys
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Behaviour when the store is unreachable
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            rest_url: None,
            rest_token: None,
            timeout_ms: default_timeout_ms(),
            prefix: default_prefix(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl StoreConfig {
    /// REST store settings taken from the environment alone.
    pub fn from_env() -> Result<Self> {
        let rest_url = std::env::var(REST_URL_ENV)
            .map_err(|_| TollgateError::Config(format!("{} is not set", REST_URL_ENV)))?;
        let rest_token = std::env::var(REST_TOKEN_ENV)
            .map_err(|_| TollgateError::Config(format!("{} is not set", REST_TOKEN_ENV)))?;

        Ok(Self {
            backend: StoreBackend::Rest,
            rest_url: Some(rest_url),
            rest_token: Some(rest_token),
            ..Self::default()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check that the chosen backend has what it needs.
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Rest {
            if self.rest_url.as_deref().map_or(true, str::is_empty) {
                return Err(TollgateError::Config(format!(
                    "rest backend needs store.rest_url or {}",
                    REST_URL_ENV
                )));
            }
            if self.rest_token.as_deref().map_or(true, str::is_empty) {
                return Err(TollgateError::Config(format!(
                    "rest backend needs store.rest_token or {}",
                    REST_TOKEN_ENV
                )));
            }
        }
        if self.timeout_ms == 0 {
            return Err(TollgateError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.prefix.is_empty() || self.prefix.contains(':') {
            return Err(TollgateError::Config(
                "store.prefix must be non-empty and contain no ':'".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the configured store.
    pub fn build_store(&self) -> Result<Arc<dyn CounterStore>> {
        self.validate()?;
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Rest => {
                let url = self.rest_url.as_deref().unwrap_or_default();
                let token = self.rest_token.as_deref().unwrap_or_default();
                let store = RestStore::new(url, token, self.timeout())
                    .map_err(|e| TollgateError::Config(format!("Failed to build REST store: {}", e)))?;
                info!(url = %store.url(), "Using REST counter store");
                Ok(Arc::new(store))
            }
        }
    }
}

/// Quota configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests per window, checked before the pipeline runs
    #[serde(default)]
    pub request: Option<LimitRule>,

    /// Tokens per window, checked after each result
    #[serde(default)]
    pub token: Option<LimitRule>,

    /// Count completion tokens as well as prompt tokens
    #[serde(default)]
    pub include_output_tokens: bool,

    /// Where token usage lives in result metadata
    #[serde(default)]
    pub fields: UsageFields,
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<()> {
        for rule in self.request.iter().chain(self.token.iter()) {
            rule.validate()?;
        }
        Ok(())
    }
}

impl TollgateConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional YAML file, then apply the environment.
    ///
    /// `UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN` override the
    /// file's store endpoint, and `TOLLGATE__SECTION__KEY` variables
    /// override any other key.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(::config::File::new(path, ::config::FileFormat::Yaml));
        }

        let config: TollgateConfig = builder
            .add_source(
                ::config::Environment::with_prefix("TOLLGATE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("store.rest_url", std::env::var(REST_URL_ENV).ok())
            .and_then(|b| b.set_override_option("store.rest_token", std::env::var(REST_TOKEN_ENV).ok()))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.limits.validate()
    }
}
