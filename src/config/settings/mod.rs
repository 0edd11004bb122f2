
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_DATA_DIR: &str = "./data/rag";
pub const METADATA_FILE: &str = "metadata.json";
pub const POSTS_TABLE: &str = "posts";
pub const QUOTES_TABLE: &str = "quotes";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub provider: ProviderChoice,
    /// Probe the remote endpoint during `auto` selection. Turned off for
    /// hermetic runs (tests, CI) so selection never touches the network.
    pub detect_remote: bool,
    pub remote: OllamaConfig,
    pub local: LocalModelConfig,
    pub content: ContentConfig,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            provider: ProviderChoice::Auto,
            detect_remote: true,
            remote: OllamaConfig::default(),
            local: LocalModelConfig::default(),
            content: ContentConfig::default(),
        }
    }
}

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    #[default]
    Auto,
    Local,
    Remote,
}

impl ProviderChoice {
    /// Parse a provider name, accepting the historical backend names as aliases.
    #[inline]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Some(Self::Auto),
            "local" | "transformers" | "fastembed" => Some(Self::Local),
            "remote" | "ollama" => Some(Self::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderChoice {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Local => "local",
            Self::Remote => "remote",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub retry_attempts: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text".to_string(),
            timeout_secs: 60,
            probe_timeout_ms: 2000,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalModelConfig {
    pub model: String,
    pub dimensions: usize,
    /// Inputs are cut to this many characters before embedding
    pub max_input_chars: usize,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model: "all-minilm-l6-v2".to_string(),
            dimensions: 384,
            max_input_chars: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContentConfig {
    pub blog_dir: PathBuf,
    pub quotes_dir: PathBuf,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            blog_dir: PathBuf::from("./src/content/blog"),
            quotes_dir: PathBuf::from("./src/content/bookQuotes"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid timeout: {0}s (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid probe timeout: {0}ms (must be between 100 and 30000)")]
    InvalidProbeTimeout(u64),
    #[error("Invalid local dimensions: {0} (must be between 1 and 4096)")]
    InvalidDimensions(usize),
    #[error("Invalid max input length: {0} (must be at least 1)")]
    InvalidMaxInput(usize),
    #[error("Data directory cannot be empty")]
    EmptyDataDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Config {
    /// Load configuration from a TOML file (missing file means defaults),
    /// then apply environment overrides and validate.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        if !config_path.exists() {
            debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Self::from_env();
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Defaults plus environment overrides
    #[inline]
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }

    /// Apply `RAG_*` and `OLLAMA_*` overrides from a variable lookup.
    #[inline]
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("RAG_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(provider) = lookup("RAG_EMBEDDING_PROVIDER") {
            self.provider = ProviderChoice::parse(&provider).unwrap_or_else(|| {
                warn!(
                    "Unknown RAG_EMBEDDING_PROVIDER '{}', falling back to auto",
                    provider
                );
                ProviderChoice::Auto
            });
        }

        if let Some(base_url) = lookup("OLLAMA_BASE_URL").or_else(|| lookup("OLLAMA_HOST")) {
            if let Err(e) = self.remote.set_base_url(&base_url) {
                warn!("Ignoring Ollama URL override '{}': {}", base_url, e);
            }
        }

        if let Some(model) = lookup("OLLAMA_EMBEDDING_MODEL").filter(|m| !m.trim().is_empty()) {
            self.remote.model = model;
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }
        self.remote.validate()?;
        self.local.validate()?;
        Ok(())
    }

    #[inline]
    pub fn save<P: AsRef<Path>>(&self, config_path: P) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(METADATA_FILE)
    }

    #[inline]
    pub fn posts_table_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.lance", POSTS_TABLE))
    }

    #[inline]
    pub fn quotes_table_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.lance", QUOTES_TABLE))
    }

    /// Config for hermetic runs: storage under `data_dir`, no network probing
    #[inline]
    pub fn hermetic<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            detect_remote: false,
            ..Self::default()
        }
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.ollama_url()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if !(100..=30_000).contains(&self.probe_timeout_ms) {
            return Err(ConfigError::InvalidProbeTimeout(self.probe_timeout_ms));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    /// Set protocol, host and port from a full base URL such as
    /// `http://gpu-box:11434`. A bare host name is treated as `http://<host>`.
    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), ConfigError> {
        let candidate = if base_url.contains("://") {
            base_url.to_string()
        } else {
            format!("http://{}", base_url)
        };
        let url = Url::parse(&candidate).map_err(|_| ConfigError::InvalidUrl(candidate.clone()))?;

        let protocol = url.scheme().to_string();
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidUrl(candidate.clone()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(11434);

        self.protocol = protocol;
        self.host = host;
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[inline]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl LocalModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }
        if !(1..=4096).contains(&self.dimensions) {
            return Err(ConfigError::InvalidDimensions(self.dimensions));
        }
        if self.max_input_chars == 0 {
            return Err(ConfigError::InvalidMaxInput(self.max_input_chars));
        }
        Ok(())
    }
}
