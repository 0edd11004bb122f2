// LanceDB vector storage for post paragraphs and book quotes


pub mod vector_store;

use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

use crate::config::settings::{POSTS_TABLE, QUOTES_TABLE};
use crate::embeddings::chunking::{ChunkMetadata, post_id_prefix, quote_id_prefix};

/// The two independent chunk collections of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Posts,
    Quotes,
}

impl TableKind {
    #[inline]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Posts => POSTS_TABLE,
            Self::Quotes => QUOTES_TABLE,
        }
    }

    /// Id prefix shared by every chunk of one document, keyed by slug or quotes ref
    #[inline]
    pub fn document_prefix(self, key: &str) -> String {
        match self {
            Self::Posts => post_id_prefix(key),
            Self::Quotes => quote_id_prefix(key),
        }
    }

    /// Coarse filter for the chunks of one document. `_` and `%` in the key
    /// still act as wildcards, so hits must be checked against
    /// [`Self::document_prefix`].
    #[inline]
    pub fn document_predicate(self, key: &str) -> String {
        format!("id LIKE '{}%'", escape_literal(&self.document_prefix(key)))
    }
}

/// Exact-match filter for a set of chunk ids
#[inline]
pub fn id_list_predicate<S: AsRef<str>>(ids: &[S]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("'{}'", escape_literal(id.as_ref())))
        .collect();
    format!("id IN ({})", quoted.join(", "))
}

/// A similarity hit. `score` is cosine similarity in `[-1, 1]`, higher is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub content: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub posts: usize,
    pub quotes: usize,
}

/// Row layout shared by both tables: `{id, content, vector, metadata}` with
/// the chunk metadata stored as JSON text
#[inline]
pub fn chunk_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("metadata", DataType::Utf8, false),
    ]))
}

/// Quote a value for use inside a single-quoted SQL string literal
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
