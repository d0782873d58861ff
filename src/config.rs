use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CallError;
use crate::llm::{ProviderBackend, RetryConfig};

/// Environment variable that overrides `connection.api_key`
pub const API_KEY_ENV: &str = "LLM_CALLER_API_KEY";

/// Client configuration, usually loaded from a TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Model host family
    pub backend: ProviderBackend,

    /// Where and as whom to connect
    pub connection: ConnectionConfig,

    /// Default sampling parameters
    pub sampling: SamplingConfig,

    /// Retry policy for transient failures
    pub retry: RetryConfig,
}

/// Connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "dummy-key".to_string(),
            model: "default-model".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Sampling defaults, overridable per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 16384,
            stop: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config = Self::from_toml(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?
            .with_api_key_override(std::env::var(API_KEY_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse TOML")
    }

    /// Replace the configured api key when `api_key` is set and non-empty.
    pub fn with_api_key_override(mut self, api_key: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.connection.api_key = key;
        }
        self
    }

    pub fn validate(&self) -> Result<(), CallError> {
        if self.retry.max_attempts == 0 {
            return Err(CallError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.sampling.temperature) {
            return Err(CallError::Config(format!(
                "sampling.temperature must be within 0..=2, got {}",
                self.sampling.temperature
            )));
        }
        if self.connection.model.is_empty() {
            return Err(CallError::Config("connection.model is empty".to_string()));
        }
        if self.connection.timeout_secs == 0 {
            return Err(CallError::Config(
                "connection.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
