// Configuration management module
// TOML settings file with RAG_* / OLLAMA_* environment overrides

pub mod display;
pub mod settings;

#[cfg(test)]
mod tests;

pub use display::show_config;
pub use settings::{
    Config, ConfigError, ContentConfig, LocalModelConfig, OllamaConfig, ProviderChoice,
};

/// Default location of the optional settings file
pub const DEFAULT_CONFIG_FILE: &str = "rag.toml";
