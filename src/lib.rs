//! Quantized repository embedding indexes with brute-force similarity search.
//!
//! The crate stores per-repository code and text embeddings as `i8`
//! matrices, streams them to and from a blob store, keeps recently used
//! indexes in a memory-bounded cache, and answers top-k queries across many
//! repositories at once.

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod logging;
pub mod search;
pub mod storage;
pub mod vector;

// Explicit exports for better API clarity
pub use cache::{
    AtomicCacheMetrics, BlobIndexFetcher, CacheEntry, CacheMetrics, InMemoryJobFinishTimes,
    IndexFetcher, JobFinishTimes, NoopCacheMetrics, RepoEmbeddingIndexCache,
};
pub use config::Settings;
pub use embeddings::{
    EmbeddingIndex, RepoEmbeddingIndex, RepoEmbeddingIndexName, RepoId, RowMetadata,
};
pub use error::{EmbeddingsError, Result};
pub use search::{
    EmbeddingSearchResult, QueryEmbedder, QueryEmbedding, SearchParams, SearchResults, Searcher,
};
pub use storage::{BlobStore, FsBlobStore, InMemoryBlobStore};
pub use vector::{SearchHit, SearchOptions, WorkerOptions, dequantize, quantize};
