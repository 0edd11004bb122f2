
use async_trait::async_trait;
use tracing::debug;

use super::{EMBED_BATCH_SIZE, EmbeddingProvider};
use crate::config::LocalModelConfig;
use crate::{RagError, Result};

/// In-process embedding model. Models are downloaded on first use and
/// cached; later runs embed offline.
pub struct LocalEmbeddingProvider {
    name: String,
    dimensions: usize,
    max_input_chars: usize,
    #[cfg(feature = "local-embeddings")]
    model_kind: fastembed::EmbeddingModel,
    #[cfg(feature = "local-embeddings")]
    model: tokio::sync::OnceCell<std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>>,
}

impl std::fmt::Debug for LocalEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEmbeddingProvider")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions)
            .field("max_input_chars", &self.max_input_chars)
            .finish_non_exhaustive()
    }
}

/// Cut `text` to at most `max_chars` characters
#[inline]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(RagError::Config(format!(
            "Unknown local embedding model: '{}'. Supported models: all-minilm-l6-v2, \
             all-minilm-l12-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ))),
    }
}

impl LocalEmbeddingProvider {
    #[cfg(feature = "local-embeddings")]
    #[inline]
    pub fn new(config: &LocalModelConfig) -> Result<Self> {
        Ok(Self {
            name: format!("fastembed/{}", config.model),
            dimensions: config.dimensions,
            max_input_chars: config.max_input_chars,
            model_kind: fastembed_model(&config.model)?,
            model: tokio::sync::OnceCell::new(),
        })
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[inline]
    pub fn new(config: &LocalModelConfig) -> Result<Self> {
        Err(RagError::ProviderUnavailable(format!(
            "local embedding model '{}' requires the `local-embeddings` feature",
            config.model
        )))
    }

    #[inline]
    pub fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    #[cfg(feature = "local-embeddings")]
    async fn model(&self) -> Result<std::sync::Arc<std::sync::Mutex<fastembed::TextEmbedding>>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let kind = self.model_kind.clone();
                let name = self.name.clone();
                tokio::task::spawn_blocking(move || {
                    debug!("Loading local embedding model {}", name);
                    fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(kind))
                        .map(|m| std::sync::Arc::new(std::sync::Mutex::new(m)))
                        .map_err(|e| {
                            RagError::Embedding(format!(
                                "Failed to initialize local embedding model: {}",
                                e
                            ))
                        })
                })
                .await
                .map_err(|e| RagError::Embedding(format!("Model loading task failed: {}", e)))?
            })
            .await?;
        Ok(std::sync::Arc::clone(model))
    }

    #[cfg(feature = "local-embeddings")]
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model().await?;
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| RagError::Embedding("Local embedding model lock poisoned".to_string()))?;
            let count = texts.len();
            model
                .embed(texts, Some(count))
                .map_err(|e| RagError::Embedding(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
    }

    #[cfg(not(feature = "local-embeddings"))]
    async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(RagError::ProviderUnavailable(
            "local embeddings are not compiled in".to_string(),
        ))
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let truncated = batch
                .iter()
                .map(|text| truncate_chars(text, self.max_input_chars).to_string())
                .collect();
            let batch_embeddings = self.embed_batch(truncated).await?;

            if let Some(bad) = batch_embeddings.iter().find(|e| e.len() != self.dimensions) {
                return Err(RagError::Embedding(format!(
                    "Local model {} produced {}d vectors, expected {}d",
                    self.name,
                    bad.len(),
                    self.dimensions
                )));
            }
            embeddings.extend(batch_embeddings);

            if texts.len() > 20 && embeddings.len() % 50 == 0 {
                debug!("Embedded {}/{} texts", embeddings.len(), texts.len());
            }
        }

        Ok(embeddings)
    }

    #[inline]
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::Embedding("Local model returned no embedding".to_string()))
    }
}
