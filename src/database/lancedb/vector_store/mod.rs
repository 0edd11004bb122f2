#[cfg(test)]
mod tests;

use super::{RowCounts, SearchResult, TableKind, chunk_schema, id_list_predicate};
use crate::config::Config;
use crate::database::metadata::{IndexMetadata, StatsUpdate};
use crate::embeddings::chunking::{Chunk, ChunkMetadata};
use crate::{RagError, Result};
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Two-table vector store plus the index metadata file.
///
/// Opening the store performs the whole initialization: the data directory
/// is created, both tables are opened or created, and the metadata record is
/// loaded or written. Table handles are reused for every later call.
pub struct VectorStore {
    data_dir: PathBuf,
    metadata_path: PathBuf,
    posts: Table,
    quotes: Table,
    vector_dimension: usize,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("data_dir", &self.data_dir)
            .field("vector_dimension", &self.vector_dimension)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Open (or create) the index under `config.data_dir` for vectors of
    /// `embedding_dim` produced by `embedding_model`.
    ///
    /// An existing metadata record keeps its dimension unless it is the 0
    /// placeholder; a real mismatch is logged and left for the caller to
    /// refuse.
    #[inline]
    pub async fn open(config: &Config, embedding_dim: usize, embedding_model: &str) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            RagError::Database(format!(
                "Failed to create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let absolute = std::fs::canonicalize(&data_dir)?;
        let uri = format!("file://{}", absolute.display());
        info!("Connecting to LanceDB at {}", absolute.display());

        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        let metadata_path = config.metadata_path();
        let metadata = Self::reconcile_metadata(&metadata_path, embedding_dim, embedding_model)?;

        let vector_dimension = if metadata.embedding_dim == 0 {
            embedding_dim
        } else {
            metadata.embedding_dim
        };

        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;

        let posts =
            Self::open_or_create_table(&connection, &table_names, TableKind::Posts, vector_dimension)
                .await?;
        let quotes =
            Self::open_or_create_table(&connection, &table_names, TableKind::Quotes, vector_dimension)
                .await?;

        info!("Vector store ready ({}d)", vector_dimension);
        Ok(Self {
            data_dir,
            metadata_path,
            posts,
            quotes,
            vector_dimension,
        })
    }

    fn reconcile_metadata(
        path: &Path,
        embedding_dim: usize,
        embedding_model: &str,
    ) -> Result<IndexMetadata> {
        let Some(mut metadata) = IndexMetadata::load(path)? else {
            let metadata = IndexMetadata::new(embedding_model, embedding_dim);
            metadata.save(path)?;
            debug!("Created index metadata at {}", path.display());
            return Ok(metadata);
        };

        let mut changed = false;

        if metadata.embedding_dim == embedding_dim && metadata.embedding_model != embedding_model {
            info!(
                "Updating embedding model: {} -> {}",
                metadata.embedding_model, embedding_model
            );
            metadata.embedding_model = embedding_model.to_string();
            changed = true;
        }

        if metadata.embedding_dim != embedding_dim {
            if metadata.embedding_dim == 0 && embedding_dim > 0 {
                info!(
                    "Updating metadata with detected dimensions: {}d",
                    embedding_dim
                );
                metadata.embedding_dim = embedding_dim;
                metadata.embedding_model = embedding_model.to_string();
                changed = true;
            } else {
                warn!(
                    "Dimension mismatch: existing index has {}d, but initializing with {}d. Keeping existing metadata.",
                    metadata.embedding_dim, embedding_dim
                );
            }
        }

        if changed {
            metadata.save(path)?;
        }
        Ok(metadata)
    }

    async fn open_or_create_table(
        connection: &Connection,
        existing: &[String],
        kind: TableKind,
        vector_dim: usize,
    ) -> Result<Table> {
        let name = kind.table_name();

        if existing.iter().any(|t| t == name) {
            debug!("Opening existing {} table", name);
            return connection
                .open_table(name)
                .execute()
                .await
                .map_err(|e| RagError::Database(format!("Failed to open {} table: {}", name, e)));
        }

        if vector_dim == 0 {
            return Err(RagError::Database(format!(
                "Cannot create {} table before the embedding dimension is known",
                name
            )));
        }

        info!("Creating {} table with {} dimensions", name, vector_dim);
        connection
            .create_empty_table(name, chunk_schema(vector_dim))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create {} table: {}", name, e)))
    }

    fn table(&self, kind: TableKind) -> &Table {
        match kind {
            TableKind::Posts => &self.posts,
            TableKind::Quotes => &self.quotes,
        }
    }

    #[inline]
    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[inline]
    pub async fn upsert_posts(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        self.append(TableKind::Posts, chunks, embeddings).await
    }

    #[inline]
    pub async fn upsert_quotes(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        self.append(TableKind::Quotes, chunks, embeddings).await
    }

    /// Append chunk rows. Existing rows with the same ids are not replaced;
    /// callers delete the document first.
    async fn append(&self, kind: TableKind, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::Database(format!(
                "Number of chunks ({}) must match number of embeddings ({})",
                chunks.len(),
                embeddings.len()
            )));
        }
        if chunks.is_empty() {
            debug!("No {} chunks to store", kind.table_name());
            return Ok(());
        }

        let record_batch = self.create_record_batch(chunks, embeddings)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        self.table(kind)
            .add(reader)
            .execute()
            .await
            .map_err(|e| {
                RagError::Database(format!("Failed to insert {} chunks: {}", kind.table_name(), e))
            })?;

        debug!("Added {} {} chunks", chunks.len(), kind.table_name());
        Ok(())
    }

    fn create_record_batch(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<RecordBatch> {
        let vector_dim = self.vector_dimension;

        let mut ids = Vec::with_capacity(chunks.len());
        let mut contents = Vec::with_capacity(chunks.len());
        let mut metadata = Vec::with_capacity(chunks.len());
        let mut flat_values = Vec::with_capacity(chunks.len() * vector_dim);

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if embedding.len() != vector_dim {
                return Err(RagError::Database(format!(
                    "Embedding for {} has {} dimensions, index expects {}",
                    chunk.id,
                    embedding.len(),
                    vector_dim
                )));
            }
            ids.push(chunk.id.as_str());
            contents.push(chunk.content.as_str());
            metadata.push(serde_json::to_string(&chunk.metadata)?);
            flat_values.extend_from_slice(embedding);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(metadata)),
        ];

        RecordBatch::try_new(chunk_schema(vector_dim), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Remove every chunk of a post. Deleting an unknown slug is a no-op.
    #[inline]
    pub async fn delete_post(&self, slug: &str) -> Result<()> {
        self.delete_document(TableKind::Posts, slug).await
    }

    /// Remove every chunk of a quote collection
    #[inline]
    pub async fn delete_quotes(&self, quotes_ref: &str) -> Result<()> {
        self.delete_document(TableKind::Quotes, quotes_ref).await
    }

    async fn delete_document(&self, kind: TableKind, key: &str) -> Result<()> {
        let ids = self.document_ids(kind, key).await?;
        if ids.is_empty() {
            debug!("No {} chunks stored for {}", kind.table_name(), key);
            return Ok(());
        }

        self.table(kind)
            .delete(&id_list_predicate(&ids))
            .await
            .map_err(|e| RagError::Database(format!("Failed to delete {}: {}", key, e)))?;

        debug!("Deleted {} {} chunks for {}", ids.len(), kind.table_name(), key);
        Ok(())
    }

    /// Ids of the chunks belonging to exactly one document
    async fn document_ids(&self, kind: TableKind, key: &str) -> Result<Vec<String>> {
        let prefix = kind.document_prefix(key);

        let mut batches = self
            .table(kind)
            .query()
            .only_if(kind.document_predicate(key))
            .select(Select::Columns(vec!["id".to_string()]))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to look up {}: {}", key, e)))?;

        let mut ids = Vec::new();
        while let Some(batch) = batches
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read id stream: {}", e)))?
        {
            let column = string_column(&batch, "id")?;
            ids.extend(
                (0..batch.num_rows())
                    .map(|row| column.value(row))
                    .filter(|id| id.starts_with(&prefix))
                    .map(str::to_string),
            );
        }

        Ok(ids)
    }

    #[inline]
    pub async fn search_posts(&self, query_vector: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        self.search(TableKind::Posts, query_vector, limit).await
    }

    #[inline]
    pub async fn search_quotes(&self, query_vector: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        self.search(TableKind::Quotes, query_vector, limit).await
    }

    /// Nearest neighbours by cosine distance, closest first
    async fn search(
        &self,
        kind: TableKind,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if query_vector.len() != self.vector_dimension {
            return Err(RagError::Database(format!(
                "Query vector has {} dimensions, index expects {}",
                query_vector.len(),
                self.vector_dimension
            )));
        }

        debug!("Searching {} with limit {}", kind.table_name(), limit);

        let mut results = self
            .table(kind)
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut search_results = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            search_results.extend(parse_search_batch(&batch)?);
        }

        search_results.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!("Found {} results in {}", search_results.len(), kind.table_name());
        Ok(search_results)
    }

    #[inline]
    pub fn get_metadata(&self) -> Result<Option<IndexMetadata>> {
        IndexMetadata::load(&self.metadata_path)
    }

    /// Merge `update` into the stored counts; always refreshes `lastUpdated`
    #[inline]
    pub fn update_stats(&self, update: StatsUpdate) -> Result<()> {
        match IndexMetadata::load(&self.metadata_path)? {
            Some(mut metadata) => {
                metadata.apply_stats(update);
                metadata.save(&self.metadata_path)
            }
            None => {
                warn!("No index metadata to update at {}", self.metadata_path.display());
                Ok(())
            }
        }
    }

    /// Delete every row from both tables
    #[inline]
    pub async fn clear_all(&self) -> Result<()> {
        for kind in [TableKind::Posts, TableKind::Quotes] {
            self.table(kind).delete("true").await.map_err(|e| {
                RagError::Database(format!("Failed to clear {} table: {}", kind.table_name(), e))
            })?;
        }
        info!("Cleared all data from the index");
        Ok(())
    }

    #[inline]
    pub async fn row_counts(&self) -> Result<RowCounts> {
        Ok(RowCounts {
            posts: self.count_rows(TableKind::Posts).await?,
            quotes: self.count_rows(TableKind::Quotes).await?,
        })
    }

    async fn count_rows(&self, kind: TableKind) -> Result<usize> {
        self.table(kind).count_rows(None).await.map_err(|e| {
            RagError::Database(format!(
                "Failed to count {} rows: {}",
                kind.table_name(),
                e
            ))
        })
    }

    /// Compact both tables and prune old versions
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        debug!("Optimizing vector tables");

        for kind in [TableKind::Posts, TableKind::Quotes] {
            self.table(kind)
                .optimize(lancedb::table::OptimizeAction::All)
                .await
                .map_err(|e| {
                    RagError::Database(format!(
                        "Failed to optimize {} table: {}",
                        kind.table_name(),
                        e
                    ))
                })?;
        }

        info!("Vector table optimization completed");
        Ok(())
    }
}

/// Turn one result batch into search hits. Rows whose metadata cannot be
/// decoded are skipped; a batch without distances is an error.
fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    let contents = string_column(batch, "content")?;
    let metadata = string_column(batch, "metadata")?;
    let distances = batch
        .column_by_name("_distance")
        .ok_or_else(|| RagError::Database("Missing _distance column".to_string()))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| RagError::Database("Invalid _distance column type".to_string()))?;

    let mut results = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let chunk_metadata: ChunkMetadata = match serde_json::from_str(metadata.value(row)) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping search result with unreadable metadata: {}", e);
                continue;
            }
        };

        if distances.is_null(row) {
            warn!("Skipping search result without a distance");
            continue;
        }
        let distance = distances.value(row);

        results.push(SearchResult {
            content: contents.value(row).to_string(),
            score: distance_to_score(distance),
            metadata: chunk_metadata,
        });
    }

    Ok(results)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

/// Cosine distance lies in `[0, 2]`; similarity is `1 - distance`, clamped
/// against float error to `[-1, 1]`
#[inline]
pub fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance).clamp(-1.0, 1.0)
}
