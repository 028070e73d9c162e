//! Process-local cache of repository embedding indexes.
//!
//! The cache is bounded by the estimated in-memory size of its indexes and
//! evicts least recently used entries first. Entries are invalidated by
//! comparing their load time against the last finished embeddings job.

mod fetcher;
mod index_cache;
mod metrics;

pub use fetcher::{BlobIndexFetcher, InMemoryJobFinishTimes, IndexFetcher, JobFinishTimes};
pub use index_cache::{CacheEntry, RepoEmbeddingIndexCache};
pub use metrics::{AtomicCacheMetrics, CacheMetrics, CacheMetricsSnapshot, NoopCacheMetrics};
