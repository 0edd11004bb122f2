pub mod chunking;
pub mod local;
pub mod ollama;


use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, ProviderChoice};
use crate::database::IndexMetadata;
use crate::{RagError, Result};

pub use chunking::{
    BookMetadata, Chunk, ChunkMetadata, MAX_PARAGRAPH_LENGTH, MIN_PARAGRAPH_LENGTH, PostChunkMetadata,
    PostMetadata, PostType, QuoteChunkMetadata, QuoteInput, chunk_book_quotes, chunk_post_content,
    validate_chunk,
};
pub use local::LocalEmbeddingProvider;
pub use ollama::{OllamaClient, RemoteEmbeddingProvider};

/// Texts are embedded in sequential sub-batches of this size
pub const EMBED_BATCH_SIZE: usize = 10;

/// Index dimension produced by the local model
pub const LOCAL_MODEL_DIM: usize = 384;
/// Index dimensions produced by the supported remote models
pub const REMOTE_MODEL_DIMS: [usize; 2] = [768, 1024];

/// A backend that maps text to fixed-length vectors.
///
/// `dimensions()` may report 0 until the first embedding call when the
/// backend discovers its vector width lazily.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier, recorded as the index's embedding model
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed `texts`, returning vectors in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>>;
}

/// Pick the embedding provider for this process.
///
/// An existing index pins the provider family through its recorded dimension
/// unless the configuration forces one. Otherwise the remote endpoint is
/// probed (when `detect_remote` is set) and the local model is the fallback.
/// A forced remote provider falls back to local too, except over an index
/// whose dimension only the remote model produces.
#[inline]
pub async fn select_provider(
    config: &Config,
    existing: Option<&IndexMetadata>,
) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.provider == ProviderChoice::Auto {
        if let Some(metadata) = existing {
            let dim = metadata.embedding_dim;
            if dim == LOCAL_MODEL_DIM {
                info!(
                    "Existing index uses {}d ({}), selecting local provider",
                    dim, metadata.embedding_model
                );
                return local_provider(config);
            }

            if REMOTE_MODEL_DIMS.contains(&dim) {
                info!(
                    "Existing index uses {}d ({}), remote provider required",
                    dim, metadata.embedding_model
                );
                return connect_remote(config)
                    .await
                    .map_err(|e| remote_required(config, metadata, &e));
            }

            if dim != 0 {
                warn!(
                    "Existing index has unrecognized dimension {}d, auto-detecting provider",
                    dim
                );
            }
        }
    }

    match config.provider {
        ProviderChoice::Local => {
            info!("Using local embedding provider (forced by configuration)");
            local_provider(config)
        }
        ProviderChoice::Remote => match connect_remote(config).await {
            Ok(provider) => {
                info!("Using remote embedding provider (forced by configuration)");
                Ok(provider)
            }
            Err(e) => match existing {
                // A local fallback could never open this index
                Some(metadata) if REMOTE_MODEL_DIMS.contains(&metadata.embedding_dim) => {
                    Err(remote_required(config, metadata, &e))
                }
                _ => {
                    warn!(
                        "Remote embedding provider unavailable ({}), falling back to local",
                        e
                    );
                    local_provider(config)
                }
            },
        },
        ProviderChoice::Auto => {
            if !config.detect_remote {
                info!("Remote detection disabled, using local embedding provider");
                return local_provider(config);
            }

            match connect_remote(config).await {
                Ok(provider) => {
                    info!(
                        "Detected remote embedding server with model {}",
                        config.remote.model
                    );
                    Ok(provider)
                }
                Err(e) => {
                    info!("Remote embedding server not detected ({}), using local", e);
                    local_provider(config)
                }
            }
        }
    }
}

fn remote_required(config: &Config, metadata: &IndexMetadata, cause: &RagError) -> RagError {
    RagError::ProviderUnavailable(format!(
        "index at {} was built with {} ({}d) but the remote endpoint {} is unavailable: {}. \
         Start the embedding server or rebuild the index with another provider.",
        config.data_dir.display(),
        metadata.embedding_model,
        metadata.embedding_dim,
        config.remote.host,
        cause
    ))
}

fn local_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(LocalEmbeddingProvider::new(&config.local)?))
}

async fn connect_remote(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = RemoteEmbeddingProvider::new(&config.remote)?;
    provider.check_available().await?;
    Ok(Arc::new(provider))
}

/// Cosine similarity of two equal-length vectors, 0 when either has no magnitude
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RagError::Embedding(format!(
            "Vectors must have the same length: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / denominator)
}
