//! Search orchestration across repositories.
//!
//! [`Searcher::search`] embeds the query, loads each repository's index
//! through the cache (or hands the repository to a remote backend), runs the
//! similarity scan off the async runtime and merges the per-repository
//! results with [`merge_truncate`].

mod context;
mod merge;
mod query;
mod searcher;
mod types;

pub use context::ContextDetectionIndex;
pub use merge::merge_truncate;
pub use query::{CachedQueryEmbedder, QueryEmbedder, QueryEmbedding};
pub use searcher::{FileReader, RemoteSearcher, Searcher};
pub use types::{EmbeddingSearchResult, SearchParams, SearchResults};
