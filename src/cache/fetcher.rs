//! Collaborators the cache loads through: where indexes come from and when
//! they were last recomputed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::embeddings::{
    RepoEmbeddingIndex, RepoEmbeddingIndexName, RepoId, download_repo_embedding_index,
};
use crate::error::{EmbeddingsError, Result};
use crate::storage::BlobStore;

/// Loads a repository's index on a cache miss.
#[async_trait]
pub trait IndexFetcher: Send + Sync {
    async fn fetch(&self, repo_id: RepoId, repo_name: &str) -> Result<RepoEmbeddingIndex>;
}

/// Finish time of the most recent successful embeddings job per repository.
///
/// A cached index is stale once a job finished after it was loaded.
#[async_trait]
pub trait JobFinishTimes: Send + Sync {
    /// `None` when no job has ever finished for the repository.
    async fn last_finished_at(&self, repo_id: RepoId) -> Result<Option<DateTime<Utc>>>;
}

/// Fetches indexes from a blob store through the streaming decoder.
#[derive(Clone)]
pub struct BlobIndexFetcher {
    store: Arc<dyn BlobStore>,
}

impl BlobIndexFetcher {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IndexFetcher for BlobIndexFetcher {
    async fn fetch(&self, repo_id: RepoId, repo_name: &str) -> Result<RepoEmbeddingIndex> {
        let name = RepoEmbeddingIndexName::for_repo(repo_id);
        download_repo_embedding_index(self.store.as_ref(), &name)
            .await?
            .ok_or_else(|| EmbeddingsError::NotFound {
                repo_name: repo_name.to_string(),
            })
    }
}

/// Job finish times kept in process, for single-node setups and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobFinishTimes {
    finished: Arc<RwLock<HashMap<RepoId, DateTime<Utc>>>>,
}

impl InMemoryJobFinishTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished job. Earlier timestamps than the known one are ignored.
    pub fn record(&self, repo_id: RepoId, finished_at: DateTime<Utc>) {
        let mut finished = self.finished.write();
        let entry = finished.entry(repo_id).or_insert(finished_at);
        if finished_at > *entry {
            *entry = finished_at;
        }
    }
}

#[async_trait]
impl JobFinishTimes for InMemoryJobFinishTimes {
    async fn last_finished_at(&self, repo_id: RepoId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.finished.read().get(&repo_id).copied())
    }
}
