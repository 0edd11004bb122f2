// Deterministic embedders for hermetic unit tests

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embeddings::EmbeddingProvider;
use crate::{RagError, Result};

pub(crate) const DIM: usize = 16;

/// Bag-of-words hashing embedder: identical texts map to identical vectors
pub(crate) struct HashEmbedder {
    name: String,
    dimensions: AtomicUsize,
    pub(crate) calls: AtomicUsize,
}

impl HashEmbedder {
    pub(crate) fn new() -> Self {
        Self::named("test/hash-embedder", DIM)
    }

    fn named(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions: AtomicUsize::new(dimensions),
            calls: AtomicUsize::new(0),
        }
    }

    /// Reports 0 until the first embedding call
    pub(crate) fn lazy() -> Self {
        Self::named("test/lazy-embedder", 0)
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % DIM as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions.load(Ordering::SeqCst)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dimensions.store(DIM, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }
}

/// Always fails to embed
pub(crate) struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    fn name(&self) -> &str {
        "test/broken"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("backend offline".to_string()))
    }

    async fn embed_single(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::Embedding("backend offline".to_string()))
    }
}

/// One-hot embedder keyed on the first listed topic a text mentions, so
/// related texts score exactly 1 and unrelated texts exactly 0
pub(crate) struct TopicEmbedder {
    topics: Vec<&'static str>,
}

impl TopicEmbedder {
    pub(crate) fn new(topics: &[&'static str]) -> Self {
        Self {
            topics: topics.to_vec(),
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let axis = self
            .topics
            .iter()
            .position(|topic| lower.contains(topic))
            .unwrap_or(self.topics.len());
        let mut v = vec![0.0f32; self.topics.len() + 1];
        v[axis] = 1.0;
        v
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn name(&self) -> &str {
        "test/topic-embedder"
    }

    fn dimensions(&self) -> usize {
        self.topics.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }
}
