//! Configuration management.
//!
//! Loads settings from `$AEGIS_CONFIG`, then `<config dir>/aegis/config.toml`,
//! or falls back to defaults. Configuration is read once at startup and is
//! immutable afterwards.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BackendError, ConfigError};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "AEGIS_CONFIG";

/// Endpoint name used by backends that do not name one
pub const DEFAULT_ENDPOINT: &str = "default";

/// A model-serving endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL, e.g. "https://api.groq.com/openai/v1"
    pub base_url: String,

    /// Environment variable holding the API key. Not needed for local servers.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Transport timeout in seconds
    #[serde(default = "default_endpoint_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint_timeout() -> u64 {
    60
}

impl EndpointConfig {
    /// Resolve the API key from the environment.
    pub fn api_key(&self) -> Result<Option<String>, BackendError> {
        resolve_key(self.api_key_env.as_deref())
    }
}

fn resolve_key(env_var: Option<&str>) -> Result<Option<String>, BackendError> {
    let Some(env_var) = env_var else {
        return Ok(None);
    };
    match env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
        Ok(_) => Err(BackendError::Configuration(format!(
            "API key env var {} is empty",
            env_var
        ))),
        Err(_) => Err(BackendError::Configuration(format!(
            "API key env var {} not found",
            env_var
        ))),
    }
}

/// A named backend with its sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Model identifier sent to the endpoint
    pub name: String,

    /// Endpoint serving this model
    #[serde(default = "default_endpoint_name")]
    pub endpoint: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_endpoint_name() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            name: name.into(),
            endpoint: default_endpoint_name(),
            temperature,
            max_tokens,
        }
    }

    pub fn on_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Backend {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature must be within [0, 2]"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens must be positive"));
        }
        Ok(())
    }
}

/// Consensus fan-out configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Two or three primary backends, in priority order
    #[serde(default = "default_primaries")]
    pub primaries: Vec<BackendConfig>,

    /// The single fallback backend shared by every primary
    #[serde(default = "default_fallback")]
    pub fallback: BackendConfig,

    /// Minimum word overlap for two answers to count as agreeing
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Deadline for each individual backend query in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_primaries() -> Vec<BackendConfig> {
    vec![
        BackendConfig::new("llama3-8b-8192", 0.7, 1000),
        BackendConfig::new("mixtral-8x7b-32768", 0.7, 1000),
    ]
}

fn default_fallback() -> BackendConfig {
    BackendConfig::new("gemma2-9b-it", 0.7, 1000)
}

fn default_similarity_threshold() -> f64 {
    0.5
}

fn default_query_timeout() -> u64 {
    60
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            primaries: default_primaries(),
            fallback: default_fallback(),
            similarity_threshold: default_similarity_threshold(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl ConsensusConfig {
    pub fn new(primaries: Vec<BackendConfig>, fallback: BackendConfig, similarity_threshold: f64) -> Self {
        Self {
            primaries,
            fallback,
            similarity_threshold,
            query_timeout_secs: default_query_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=3).contains(&self.primaries.len()) {
            return Err(ConfigError::PrimaryCount(self.primaries.len()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Threshold(self.similarity_threshold));
        }
        for backend in self.primaries.iter().chain(std::iter::once(&self.fallback)) {
            backend.validate()?;
        }
        Ok(())
    }

    /// Every backend referenced by the consensus, fallback last.
    pub fn backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.primaries.iter().chain(std::iter::once(&self.fallback))
    }
}

/// Risk audit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Judge backend scoring every metric
    #[serde(default = "default_judge")]
    pub judge: BackendConfig,

    /// Delay between a metric's "analyzing" and "complete" events (UI pacing only)
    #[serde(default)]
    pub pacing_ms: u64,
}

fn default_judge() -> BackendConfig {
    BackendConfig::new("gemma-7b-it", 0.0, 200)
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            judge: default_judge(),
            pacing_ms: 0,
        }
    }
}

/// Web search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_enabled")]
    pub enabled: bool,

    #[serde(default = "default_search_url")]
    pub base_url: String,

    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_enabled() -> bool {
    true
}

fn default_search_url() -> String {
    "https://api.tavily.com".to_string()
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_search_timeout() -> u64 {
    15
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: default_search_enabled(),
            base_url: default_search_url(),
            api_key_env: default_search_key_env(),
            max_results: default_max_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl SearchConfig {
    pub fn api_key(&self) -> Result<String, BackendError> {
        resolve_key(Some(&self.api_key_env))?.ok_or_else(|| {
            BackendError::Configuration(format!("API key env var {} not found", self.api_key_env))
        })
    }
}

fn default_endpoints() -> BTreeMap<String, EndpointConfig> {
    let mut endpoints = BTreeMap::new();
    endpoints.insert(
        DEFAULT_ENDPOINT.to_string(),
        EndpointConfig {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: Some("GROQ_API_KEY".to_string()),
            timeout_secs: default_endpoint_timeout(),
        },
    );
    endpoints
}

/// Full configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_endpoints")]
    pub endpoints: BTreeMap<String, EndpointConfig>,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            consensus: ConsensusConfig::default(),
            audit: AuditConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("aegis").join("config.toml"))
    }

    /// Load config from `$AEGIS_CONFIG` or the default location, or return defaults.
    ///
    /// A file named by `$AEGIS_CONFIG` must load; only the default location
    /// is allowed to be missing or broken.
    pub fn load() -> Result<Self> {
        if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            let path = PathBuf::from(path);
            return Self::load_from_path(&path)
                .with_context(|| format!("loading ${} ({})", CONFIG_ENV, path.display()));
        }

        if let Some(path) = Self::default_path().filter(|p| p.exists()) {
            match Self::load_from_path(&path) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Skipping config {}: {:#}", path.display(), e),
            }
        }

        warn!("Config not found, using defaults");
        Ok(Config::default())
    }

    /// Load and validate config from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("parsing config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus.validate()?;
        self.audit.judge.validate()?;
        for backend in self.consensus.backends().chain(std::iter::once(&self.audit.judge)) {
            if !self.endpoints.contains_key(&backend.endpoint) {
                return Err(ConfigError::UnknownEndpoint {
                    backend: backend.name.clone(),
                    endpoint: backend.endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn endpoint_for(&self, backend: &BackendConfig) -> Option<&EndpointConfig> {
        self.endpoints.get(&backend.endpoint)
    }
}
