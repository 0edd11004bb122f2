
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::Result;

pub const INDEX_VERSION: &str = "1.0.0";

/// The single record describing a persisted index, stored as `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub version: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub embedding_model: String,
    /// 0 while the dimension of the index's model is still unknown
    pub embedding_dim: usize,
    pub stats: IndexCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCounts {
    pub total_posts: usize,
    pub total_paragraphs: usize,
    pub total_quotes: usize,
}

/// Partial update of [`IndexCounts`]; `None` fields keep their stored value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsUpdate {
    pub total_posts: Option<usize>,
    pub total_paragraphs: Option<usize>,
    pub total_quotes: Option<usize>,
}

impl IndexMetadata {
    #[inline]
    pub fn new(embedding_model: &str, embedding_dim: usize) -> Self {
        let now = Utc::now();
        Self {
            version: INDEX_VERSION.to_string(),
            created: now,
            last_updated: now,
            embedding_model: embedding_model.to_string(),
            embedding_dim,
            stats: IndexCounts::default(),
        }
    }

    /// Read the metadata file. A missing or unparseable file means there is
    /// no usable index yet.
    #[inline]
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index metadata at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&data) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                warn!("Ignoring invalid index metadata at {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Merge `update` into the stored counts and refresh `last_updated`
    #[inline]
    pub fn apply_stats(&mut self, update: StatsUpdate) {
        if let Some(posts) = update.total_posts {
            self.stats.total_posts = posts;
        }
        if let Some(paragraphs) = update.total_paragraphs {
            self.stats.total_paragraphs = paragraphs;
        }
        if let Some(quotes) = update.total_quotes {
            self.stats.total_quotes = quotes;
        }
        self.last_updated = Utc::now();
    }
}

impl From<IndexCounts> for StatsUpdate {
    #[inline]
    fn from(counts: IndexCounts) -> Self {
        Self {
            total_posts: Some(counts.total_posts),
            total_paragraphs: Some(counts.total_paragraphs),
            total_quotes: Some(counts.total_quotes),
        }
    }
}
