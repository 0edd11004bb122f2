// Orchestrates chunking, embedding and storage behind one handle


use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::content::{ContentSource, SourcePost};
use crate::database::{
    IndexCounts, IndexMetadata, RowCounts, SearchResult, StatsUpdate, VectorStore,
};
use crate::embeddings::chunking::{
    BookMetadata, ChunkMetadata, PostMetadata, PostType, QuoteInput, chunk_book_quotes,
    chunk_post_content,
};
use crate::embeddings::{EmbeddingProvider, select_provider};
use crate::{RagError, Result};

pub const DEFAULT_TOP_K: usize = 5;
/// Candidates fetched per requested result when a filter may discard hits
const FILTER_OVERFETCH: usize = 4;
const PROGRESS_LOG_INTERVAL: usize = 10;
const UNKNOWN_BOOK_FIELD: &str = "Unknown";

/// Which tables a query searches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Posts,
    Quotes,
    #[default]
    All,
}

impl ContentType {
    fn includes_posts(self) -> bool {
        matches!(self, Self::Posts | Self::All)
    }

    fn includes_quotes(self) -> bool {
        matches!(self, Self::Quotes | Self::All)
    }
}

impl FromStr for ContentType {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "posts" | "post" => Ok(Self::Posts),
            "quotes" | "quote" => Ok(Self::Quotes),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown content type '{}' (expected posts, quotes or all)",
                other
            )),
        }
    }
}

impl fmt::Display for ContentType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Posts => "posts",
            Self::Quotes => "quotes",
            Self::All => "all",
        })
    }
}

/// Post-search narrowing of results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Keep only posts of these types; quotes are unaffected
    pub post_types: Option<Vec<PostType>>,
    /// Keep only chunks sharing at least one of these tags
    pub tags: Option<Vec<String>>,
}

impl QueryFilter {
    #[inline]
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let (Some(post_types), Some(post)) = (&self.post_types, metadata.as_post()) {
            if !post_types.contains(&post.post_type) {
                return false;
            }
        }

        if let Some(wanted) = &self.tags {
            let Some(tags) = metadata.tags() else {
                return false;
            };
            if !tags.iter().any(|tag| wanted.contains(tag)) {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub top_k: usize,
    pub content_type: ContentType,
    pub filter: Option<QueryFilter>,
}

impl Default for QueryOptions {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            content_type: ContentType::All,
            filter: None,
        }
    }
}

/// A ranked hit with its presentation link. Only posts carry a `url`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub content: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<SearchResult> for QueryResult {
    #[inline]
    fn from(result: SearchResult) -> Self {
        let url = result
            .metadata
            .as_post()
            .map(|post| format!("/blog/{}#para-{}", post.slug, post.paragraph_index));
        Self {
            content: result.content,
            score: result.score,
            metadata: result.metadata,
            url,
        }
    }
}

/// Post fields supplied by a save handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostData {
    pub title: String,
    pub content: String,
    pub post_type: PostType,
    pub tags: Option<Vec<String>>,
    pub series: Option<String>,
    pub pub_date: Option<String>,
}

impl PostData {
    fn metadata(&self, slug: &str) -> PostMetadata {
        PostMetadata {
            slug: slug.to_string(),
            title: self.title.clone(),
            post_type: self.post_type,
            tags: self.tags.clone(),
            series: self.series.clone(),
            pub_date: self.pub_date.clone(),
        }
    }
}

impl From<&SourcePost> for PostData {
    #[inline]
    fn from(post: &SourcePost) -> Self {
        Self {
            title: post.title.clone(),
            content: post.body.clone(),
            post_type: post.post_type,
            tags: post.tags.clone(),
            series: post.series.clone(),
            pub_date: post.pub_date.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildStats {
    pub posts_processed: usize,
    pub paragraphs_indexed: usize,
    pub quotes_indexed: usize,
    pub time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub version: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub provider: String,
    pub created: chrono::DateTime<chrono::Utc>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
    pub stats: IndexCounts,
}

struct ServiceState {
    provider: Arc<dyn EmbeddingProvider>,
    store: VectorStore,
}

/// The indexing and query entry point.
///
/// Construct one per process and share it by reference. The first operation
/// initializes the provider and store; later calls reuse them.
pub struct RagService {
    config: Config,
    provider_override: Option<Arc<dyn EmbeddingProvider>>,
    state: OnceCell<ServiceState>,
}

impl fmt::Debug for RagService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagService")
            .field("data_dir", &self.config.data_dir)
            .field("initialized", &self.state.initialized())
            .finish_non_exhaustive()
    }
}

impl RagService {
    #[inline]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider_override: None,
            state: OnceCell::new(),
        }
    }

    /// Use `provider` instead of running provider selection
    #[inline]
    pub fn with_provider(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            provider_override: Some(provider),
            state: OnceCell::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Initialize once; later calls are no-ops
    #[inline]
    pub async fn initialize(&self) -> Result<()> {
        self.state().await.map(|_| ())
    }

    async fn state(&self) -> Result<&ServiceState> {
        self.state.get_or_try_init(|| self.init_state()).await
    }

    async fn init_state(&self) -> Result<ServiceState> {
        info!("Initializing RAG service at {}", self.config.data_dir.display());

        let existing = IndexMetadata::load(&self.config.metadata_path())?;

        let provider = match &self.provider_override {
            Some(provider) => Arc::clone(provider),
            None => select_provider(&self.config, existing.as_ref()).await?,
        };

        if provider.dimensions() == 0 {
            info!("Detecting embedding dimensions for {}", provider.name());
            provider.embed_single("test").await?;
            info!(
                "Detected {}d for model '{}'",
                provider.dimensions(),
                provider.name()
            );
        }

        let provider_dim = provider.dimensions();
        if provider_dim == 0 {
            return Err(RagError::Embedding(format!(
                "Provider {} did not report its embedding dimension",
                provider.name()
            )));
        }

        let store = VectorStore::open(&self.config, provider_dim, provider.name()).await?;

        if let Some(metadata) = store.get_metadata()? {
            if metadata.embedding_dim != provider_dim {
                error!(
                    "Dimension mismatch: index {} ({}d), provider {} ({}d)",
                    metadata.embedding_model,
                    metadata.embedding_dim,
                    provider.name(),
                    provider_dim
                );
                return Err(RagError::DimensionMismatch {
                    index_dim: metadata.embedding_dim,
                    index_model: metadata.embedding_model,
                    provider_dim,
                    provider_model: provider.name().to_string(),
                });
            }
        }

        info!("RAG service initialized with {}", provider.name());
        Ok(ServiceState { provider, store })
    }

    /// Name of the active embedding provider
    #[inline]
    pub async fn provider_name(&self) -> Result<String> {
        Ok(self.state().await?.provider.name().to_string())
    }

    /// Re-index one post. Failures are logged, never returned.
    #[inline]
    pub async fn upsert_post(&self, slug: &str, data: &PostData) {
        if let Err(e) = self.try_upsert_post(slug, data).await {
            error!("Failed to upsert post {}: {}", slug, e);
        }
    }

    async fn try_upsert_post(&self, slug: &str, data: &PostData) -> Result<usize> {
        let state = self.state().await?;
        debug!("Indexing post: {}", slug);

        state.store.delete_post(slug).await?;

        let chunks = chunk_post_content(&data.content, &data.metadata(slug));
        if chunks.is_empty() {
            info!("No chunks generated for post: {}", slug);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = state.provider.embed(&texts).await?;
        state.store.upsert_posts(&chunks, &embeddings).await?;

        info!("Indexed {} chunks for post: {}", chunks.len(), slug);
        Ok(chunks.len())
    }

    /// Drop a post from the index. Failures are logged, never returned.
    #[inline]
    pub async fn delete_post(&self, slug: &str) {
        let result = async { self.state().await?.store.delete_post(slug).await }.await;
        match result {
            Ok(()) => info!("Deleted post from index: {}", slug),
            Err(e) => error!("Failed to delete post {}: {}", slug, e),
        }
    }

    /// Re-index a quote collection. Failures are logged, never returned.
    #[inline]
    pub async fn upsert_quotes(
        &self,
        quotes_ref: &str,
        quotes: &[QuoteInput],
        book_title: &str,
        book_author: &str,
    ) {
        let book = BookMetadata {
            quotes_ref: quotes_ref.to_string(),
            book_title: book_title.to_string(),
            book_author: book_author.to_string(),
        };
        if let Err(e) = self.try_upsert_quotes(quotes, &book).await {
            error!("Failed to upsert quotes {}: {}", quotes_ref, e);
        }
    }

    async fn try_upsert_quotes(
        &self,
        quotes: &[QuoteInput],
        book: &BookMetadata,
    ) -> Result<usize> {
        let state = self.state().await?;
        Self::index_quotes(state, quotes, book).await
    }

    async fn index_quotes(
        state: &ServiceState,
        quotes: &[QuoteInput],
        book: &BookMetadata,
    ) -> Result<usize> {
        debug!("Indexing quotes: {}", book.quotes_ref);

        state.store.delete_quotes(&book.quotes_ref).await?;

        let chunks = chunk_book_quotes(quotes, book);
        if chunks.is_empty() {
            info!("No chunks generated for quotes: {}", book.quotes_ref);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = state.provider.embed(&texts).await?;
        state.store.upsert_quotes(&chunks, &embeddings).await?;

        info!("Indexed {} quotes for: {}", chunks.len(), book.quotes_ref);
        Ok(chunks.len())
    }

    /// Drop a quote collection from the index. Failures are logged, never returned.
    #[inline]
    pub async fn delete_quotes(&self, quotes_ref: &str) {
        let result = async { self.state().await?.store.delete_quotes(quotes_ref).await }.await;
        match result {
            Ok(()) => info!("Deleted quotes from index: {}", quotes_ref),
            Err(e) => error!("Failed to delete quotes {}: {}", quotes_ref, e),
        }
    }

    /// Ranked hits for `text`, highest score first, at most `top_k`
    #[inline]
    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<Vec<QueryResult>> {
        let state = self.state().await?;
        if options.top_k == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let query_vector = state.provider.embed_single(text).await?;

        let limit = match options.filter {
            Some(_) => options.top_k.saturating_mul(FILTER_OVERFETCH),
            None => options.top_k,
        };

        let mut results = Vec::new();
        if options.content_type.includes_posts() {
            results.extend(state.store.search_posts(&query_vector, limit).await?);
        }
        if options.content_type.includes_quotes() {
            results.extend(state.store.search_quotes(&query_vector, limit).await?);
        }

        if let Some(filter) = &options.filter {
            results.retain(|r| filter.matches(&r.metadata));
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.top_k);

        debug!(
            "Query completed in {}ms, found {} results",
            started.elapsed().as_millis(),
            results.len()
        );

        Ok(results.into_iter().map(QueryResult::from).collect())
    }

    /// Clear the index and re-embed every document of `source`
    #[inline]
    pub async fn rebuild(&self, source: &dyn ContentSource) -> Result<RebuildStats> {
        self.rebuild_with_progress(source, |_, _| {}).await
    }

    /// [`rebuild`](Self::rebuild), calling `on_post(done, total)` after each post
    #[inline]
    pub async fn rebuild_with_progress<F>(
        &self,
        source: &dyn ContentSource,
        mut on_post: F,
    ) -> Result<RebuildStats>
    where
        F: FnMut(usize, usize) + Send,
    {
        let state = self.state().await?;
        let started = Instant::now();
        let mut stats = RebuildStats::default();

        info!("Starting full index rebuild");
        let posts = source.load_posts().await?;
        info!("Found {} posts to index", posts.len());

        state.store.clear_all().await?;

        for post in &posts {
            let chunks = chunk_post_content(&post.body, &post.post_metadata());
            if !chunks.is_empty() {
                let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
                let embeddings = state.provider.embed(&texts).await?;
                state.store.upsert_posts(&chunks, &embeddings).await?;
                stats.paragraphs_indexed += chunks.len();
            }

            if post.post_type == PostType::BookNote {
                if let Some(quotes_ref) = &post.quotes_ref {
                    match Self::rebuild_quotes(state, source, post, quotes_ref).await {
                        Ok(count) => stats.quotes_indexed += count,
                        Err(e) => warn!("Failed to index quotes for {}: {}", quotes_ref, e),
                    }
                }
            }

            stats.posts_processed += 1;
            if stats.posts_processed % PROGRESS_LOG_INTERVAL == 0 {
                info!("Processed {}/{} posts", stats.posts_processed, posts.len());
            }
            on_post(stats.posts_processed, posts.len());
        }

        state.store.update_stats(StatsUpdate {
            total_posts: Some(stats.posts_processed),
            total_paragraphs: Some(stats.paragraphs_indexed),
            total_quotes: Some(stats.quotes_indexed),
        })?;

        stats.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Rebuild completed in {:.1}s: {} posts, {} paragraphs, {} quotes",
            stats.time_ms as f64 / 1000.0,
            stats.posts_processed,
            stats.paragraphs_indexed,
            stats.quotes_indexed
        );

        Ok(stats)
    }

    async fn rebuild_quotes(
        state: &ServiceState,
        source: &dyn ContentSource,
        post: &SourcePost,
        quotes_ref: &str,
    ) -> Result<usize> {
        let Some(collection) = source.load_book_quotes(quotes_ref).await? else {
            return Ok(0);
        };

        let book = BookMetadata {
            quotes_ref: quotes_ref.to_string(),
            book_title: post
                .book_title
                .clone()
                .or_else(|| non_empty(&collection.book_title))
                .unwrap_or_else(|| UNKNOWN_BOOK_FIELD.to_string()),
            book_author: post
                .book_author
                .clone()
                .or_else(|| non_empty(&collection.book_author))
                .unwrap_or_else(|| UNKNOWN_BOOK_FIELD.to_string()),
        };

        Self::index_quotes(state, &collection.quotes, &book).await
    }

    /// Persisted index metadata with the active provider, `None` before the
    /// first index exists
    #[inline]
    pub async fn get_stats(&self) -> Result<Option<IndexStats>> {
        let state = self.state().await?;
        Ok(state.store.get_metadata()?.map(|metadata| IndexStats {
            version: metadata.version,
            embedding_model: metadata.embedding_model,
            embedding_dim: metadata.embedding_dim,
            provider: state.provider.name().to_string(),
            created: metadata.created,
            last_updated: metadata.last_updated,
            stats: metadata.stats,
        }))
    }

    #[inline]
    pub async fn row_counts(&self) -> Result<RowCounts> {
        self.state().await?.store.row_counts().await
    }

    /// Compact both tables
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        self.state().await?.store.optimize().await
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_string())
}
