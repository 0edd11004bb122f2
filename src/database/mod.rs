pub mod lancedb;
pub mod metadata;

pub use self::lancedb::{RowCounts, SearchResult, TableKind, vector_store::VectorStore};
pub use metadata::{INDEX_VERSION, IndexCounts, IndexMetadata, StatsUpdate};
