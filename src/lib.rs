use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error(
        "Embedding dimension mismatch: index has {index_dim}d ({index_model}) but provider uses {provider_dim}d ({provider_model}). Rebuild the index to switch models."
    )]
    DimensionMismatch {
        index_dim: usize,
        index_model: String,
        provider_dim: usize,
        provider_model: String,
    },

    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Content error: {0}")]
    Content(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod content;
pub mod database;
pub mod embeddings;
pub mod service;
pub mod synthesis;

#[cfg(test)]
pub(crate) mod test_support;

pub use service::RagService;
