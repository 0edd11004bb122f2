use super::*;
use crate::embeddings::chunking::{
    BookMetadata, PostMetadata, PostType, QuoteInput, chunk_book_quotes, chunk_post_content,
};
use tempfile::TempDir;

const DIM: usize = 4;
const MODEL: &str = "test/hash-embedder";

fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::hermetic(temp_dir.path().join("rag"));
    (config, temp_dir)
}

async fn open_store(config: &Config) -> VectorStore {
    VectorStore::open(config, DIM, MODEL)
        .await
        .expect("should open vector store")
}

fn post_chunks(slug: &str, paragraphs: usize) -> Vec<Chunk> {
    let body = (0..paragraphs)
        .map(|i| format!("Paragraph {} of {} carries enough text to clear the minimum length.", i, slug))
        .collect::<Vec<_>>()
        .join("\n\n");
    let metadata = PostMetadata {
        slug: slug.to_string(),
        title: format!("Title of {}", slug),
        post_type: PostType::Standard,
        tags: Some(vec!["rust".to_string()]),
        series: None,
        pub_date: None,
    };
    chunk_post_content(&body, &metadata)
}

fn unit(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[axis % DIM] = 1.0;
    v
}

#[tokio::test]
async fn open_creates_tables_and_metadata() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;

    assert_eq!(store.vector_dimension(), DIM);
    assert_eq!(
        store.row_counts().await.expect("should count rows"),
        RowCounts::default()
    );
    assert!(config.posts_table_path().exists());
    assert!(config.quotes_table_path().exists());

    let metadata = store
        .get_metadata()
        .expect("should read metadata")
        .expect("metadata should exist");
    assert_eq!(metadata.embedding_dim, DIM);
    assert_eq!(metadata.embedding_model, MODEL);
}

#[tokio::test]
async fn reopen_keeps_data_and_updates_model_name() {
    let (config, _temp_dir) = create_test_config();
    {
        let store = open_store(&config).await;
        let chunks = post_chunks("first", 2);
        store
            .upsert_posts(&chunks, &[unit(0), unit(1)])
            .await
            .expect("should insert");
    }

    let store = VectorStore::open(&config, DIM, "test/renamed-model")
        .await
        .expect("should reopen");
    assert_eq!(store.row_counts().await.expect("count").posts, 2);

    let metadata = store.get_metadata().expect("read").expect("exists");
    assert_eq!(metadata.embedding_model, "test/renamed-model");
    assert_eq!(metadata.embedding_dim, DIM);
}

#[tokio::test]
async fn placeholder_dimension_is_resolved() {
    let (config, _temp_dir) = create_test_config();
    IndexMetadata::new("ollama/nomic-embed-text", 0)
        .save(&config.metadata_path())
        .expect("should write placeholder metadata");

    let store = open_store(&config).await;

    let metadata = store.get_metadata().expect("read").expect("exists");
    assert_eq!(metadata.embedding_dim, DIM);
    assert_eq!(metadata.embedding_model, MODEL);
    assert_eq!(store.vector_dimension(), DIM);
}

#[tokio::test]
async fn real_dimension_mismatch_keeps_existing_metadata() {
    let (config, _temp_dir) = create_test_config();
    drop(open_store(&config).await);

    let store = VectorStore::open(&config, 768, "ollama/nomic-embed-text")
        .await
        .expect("store opens, the caller refuses the mismatch");

    let metadata = store.get_metadata().expect("read").expect("exists");
    assert_eq!(metadata.embedding_dim, DIM);
    assert_eq!(metadata.embedding_model, MODEL);
    assert_eq!(store.vector_dimension(), DIM);
}

#[tokio::test]
async fn upsert_requires_matching_lengths() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;
    let chunks = post_chunks("mismatch", 2);

    let result = store.upsert_posts(&chunks, &[unit(0)]).await;
    assert!(matches!(result, Err(RagError::Database(_))));

    let wrong_width = store.upsert_posts(&chunks[..1], &[vec![1.0; DIM + 1]]).await;
    assert!(wrong_width.is_err());

    assert_eq!(store.row_counts().await.expect("count").posts, 0);
}

#[tokio::test]
async fn search_orders_by_cosine_similarity() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;

    let chunks = post_chunks("search", 3);
    let embeddings = vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.7, 0.7, 0.0, 0.0],
        vec![-1.0, 0.0, 0.0, 0.0],
    ];
    store
        .upsert_posts(&chunks, &embeddings)
        .await
        .expect("should insert");

    let results = store
        .search_posts(&[1.0, 0.0, 0.0, 0.0], 3)
        .await
        .expect("should search");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].content, chunks[0].content);
    assert_eq!(results[1].content, chunks[1].content);
    assert_eq!(results[2].content, chunks[2].content);

    assert!((results[0].score - 1.0).abs() < 1e-4);
    assert!((results[2].score + 1.0).abs() < 1e-4);
    for window in results.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
    for result in &results {
        assert!((-1.0..=1.0).contains(&result.score));
    }

    assert_eq!(results[0].metadata, chunks[0].metadata);
}

#[tokio::test]
async fn search_respects_limit_and_table() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;

    let posts = post_chunks("limited", 4);
    let post_vectors: Vec<Vec<f32>> = (0..4).map(unit).collect();
    store
        .upsert_posts(&posts, &post_vectors)
        .await
        .expect("should insert posts");

    let book = BookMetadata {
        quotes_ref: "book".to_string(),
        book_title: "Book".to_string(),
        book_author: "Author".to_string(),
    };
    let quotes = chunk_book_quotes(&[QuoteInput::new("Hi."), QuoteInput::new("Bye.")], &book);
    store
        .upsert_quotes(&quotes, &[unit(0), unit(1)])
        .await
        .expect("should insert quotes");

    let results = store.search_posts(&unit(0), 2).await.expect("search");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.metadata.as_post().is_some()));

    let results = store.search_quotes(&unit(0), 10).await.expect("search");
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.metadata.as_quote().is_some()));
    assert_eq!(results[0].content, "Hi.");

    assert!(store.search_posts(&unit(0), 0).await.expect("search").is_empty());
    assert!(store.search_posts(&[1.0; DIM + 2], 3).await.is_err());
}

#[tokio::test]
async fn delete_post_removes_only_that_slug() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;

    let a = post_chunks("a", 2);
    let ab = post_chunks("ab", 3);
    store.upsert_posts(&a, &[unit(0), unit(1)]).await.expect("insert a");
    store
        .upsert_posts(&ab, &[unit(0), unit(1), unit(2)])
        .await
        .expect("insert ab");
    assert_eq!(store.row_counts().await.expect("count").posts, 5);

    store.delete_post("a").await.expect("should delete");

    assert_eq!(store.row_counts().await.expect("count").posts, 3);
    let remaining = store.search_posts(&unit(0), 10).await.expect("search");
    assert!(
        remaining
            .iter()
            .all(|r| r.metadata.as_post().map(|m| m.slug.as_str()) == Some("ab"))
    );
}

#[tokio::test]
async fn wildcard_characters_in_keys_match_literally() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;

    let dashed = post_chunks("my-post", 2);
    let underscored = post_chunks("my_post", 1);
    store
        .upsert_posts(&dashed, &[unit(0), unit(1)])
        .await
        .expect("insert my-post");
    store
        .upsert_posts(&underscored, &[unit(2)])
        .await
        .expect("insert my_post");

    store.delete_post("my_post").await.expect("should delete");

    assert_eq!(store.row_counts().await.expect("count").posts, 2);
    let remaining = store.search_posts(&unit(0), 10).await.expect("search");
    assert!(
        remaining
            .iter()
            .all(|r| r.metadata.as_post().map(|m| m.slug.as_str()) == Some("my-post"))
    );

    let book = |quotes_ref: &str| BookMetadata {
        quotes_ref: quotes_ref.to_string(),
        book_title: "Deep Work".to_string(),
        book_author: "Cal Newport".to_string(),
    };
    let kept = chunk_book_quotes(&[QuoteInput::new("Kept quote.")], &book("deep-work"));
    let removed = chunk_book_quotes(&[QuoteInput::new("Removed quote.")], &book("deep%work"));
    store.upsert_quotes(&kept, &[unit(0)]).await.expect("insert kept");
    store.upsert_quotes(&removed, &[unit(1)]).await.expect("insert removed");

    store.delete_quotes("deep%work").await.expect("should delete");

    assert_eq!(store.row_counts().await.expect("count").quotes, 1);
}

#[tokio::test]
async fn deleting_unknown_documents_is_a_no_op() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;
    let chunks = post_chunks("kept", 1);
    store.upsert_posts(&chunks, &[unit(0)]).await.expect("insert");

    store.delete_post("never-indexed").await.expect("no-op delete");
    store.delete_quotes("never-indexed").await.expect("no-op delete");

    assert_eq!(
        store.row_counts().await.expect("count"),
        RowCounts {
            posts: 1,
            quotes: 0
        }
    );
}

#[tokio::test]
async fn clear_all_empties_both_tables() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;

    store
        .upsert_posts(&post_chunks("p", 2), &[unit(0), unit(1)])
        .await
        .expect("insert posts");
    let book = BookMetadata {
        quotes_ref: "q".to_string(),
        book_title: "T".to_string(),
        book_author: "A".to_string(),
    };
    store
        .upsert_quotes(&chunk_book_quotes(&[QuoteInput::new("Hi.")], &book), &[unit(2)])
        .await
        .expect("insert quotes");

    store.clear_all().await.expect("should clear");

    assert_eq!(
        store.row_counts().await.expect("count"),
        RowCounts::default()
    );
}

#[tokio::test]
async fn update_stats_merges_and_touches_timestamp() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;
    let before = store.get_metadata().expect("read").expect("exists");

    store
        .update_stats(StatsUpdate {
            total_posts: Some(4),
            total_paragraphs: Some(40),
            ..StatsUpdate::default()
        })
        .expect("should update stats");

    let after = store.get_metadata().expect("read").expect("exists");
    assert_eq!(after.stats.total_posts, 4);
    assert_eq!(after.stats.total_paragraphs, 40);
    assert_eq!(after.stats.total_quotes, 0);
    assert!(after.last_updated >= before.last_updated);
    assert_eq!(after.created, before.created);
}

#[tokio::test]
async fn optimize_keeps_rows() {
    let (config, _temp_dir) = create_test_config();
    let store = open_store(&config).await;
    store
        .upsert_posts(&post_chunks("opt", 2), &[unit(0), unit(1)])
        .await
        .expect("insert");
    store.delete_post("opt").await.expect("delete");
    store
        .upsert_posts(&post_chunks("opt", 2), &[unit(0), unit(1)])
        .await
        .expect("insert");

    store.optimize().await.expect("should optimize");

    assert_eq!(store.row_counts().await.expect("count").posts, 2);
}

#[test]
fn distance_conversion() {
    assert_eq!(distance_to_score(0.0), 1.0);
    assert_eq!(distance_to_score(1.0), 0.0);
    assert_eq!(distance_to_score(2.0), -1.0);
    assert_eq!(distance_to_score(2.000_001), -1.0);
    assert_eq!(distance_to_score(-0.000_001), 1.0);
}

fn result_batch(with_distance: bool) -> RecordBatch {
    let metadata = serde_json::to_string(&post_chunks("scored", 1)[0].metadata)
        .expect("metadata serializes");
    let mut fields = vec![
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
    ];
    let mut columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(vec!["Some stored paragraph."])),
        Arc::new(StringArray::from(vec![metadata])),
    ];
    if with_distance {
        fields.push(Field::new("_distance", DataType::Float32, true));
        columns.push(Arc::new(Float32Array::from(vec![0.25])));
    }
    RecordBatch::try_new(Arc::new(arrow::datatypes::Schema::new(fields)), columns)
        .expect("valid batch")
}

#[test]
fn search_batch_scores_from_distance() {
    let results = parse_search_batch(&result_batch(true)).expect("should parse");
    assert_eq!(results.len(), 1);
    assert!((results[0].score - 0.75).abs() < f32::EPSILON);
}

#[test]
fn search_batch_without_distance_is_an_error() {
    let result = parse_search_batch(&result_batch(false));
    assert!(matches!(result, Err(RagError::Database(_))));
}
