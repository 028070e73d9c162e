//! Shared fixtures for the integration tests.

use async_trait::async_trait;
use chrono::Utc;
use repo_embeddings::{
    BlobStore, EmbeddingIndex, InMemoryJobFinishTimes, QueryEmbedder, QueryEmbedding,
    RepoEmbeddingIndex, RepoEmbeddingIndexName, RepoId, Result, RowMetadata,
};
use repo_embeddings::embeddings::upload_repo_embedding_index;

pub const TEST_MODEL: &str = "test/embedding-model";

/// Always embeds to the same vector.
pub struct FixedEmbedder {
    pub embedding: Vec<f32>,
    pub model: String,
}

impl FixedEmbedder {
    pub fn unit_x() -> Self {
        Self {
            embedding: vec![1.0, 0.0, 0.0, 0.0],
            model: TEST_MODEL.to_string(),
        }
    }
}

#[async_trait]
impl QueryEmbedder for FixedEmbedder {
    async fn embed_query(&self, _query: &str) -> Result<QueryEmbedding> {
        Ok(QueryEmbedding {
            embedding: self.embedding.clone(),
            model: self.model.clone(),
        })
    }
}

/// A repository whose code and text indexes each hold the four basis rows
/// `[w,0,0,0]`, `[0,w,0,0]`, `[0,0,w,0]` and `[0,0,0,w]`.
///
/// Row 0 covers lines `[0, 3)` of `main.go` (code) and `README.md` (text).
pub fn basis_index(repo_name: &str, weight: i8, model: &str) -> RepoEmbeddingIndex {
    let basis = |files: [&str; 4]| {
        let mut embeddings = vec![0i8; 16];
        for axis in 0..4 {
            embeddings[axis * 4 + axis] = weight;
        }
        let rows = files
            .iter()
            .enumerate()
            .map(|(i, file)| RowMetadata::new(*file, 10 * i as u32, 10 * i as u32 + 3))
            .collect();
        EmbeddingIndex::new(embeddings, 4, rows, vec![]).unwrap()
    };
    RepoEmbeddingIndex {
        repo_name: repo_name.to_string(),
        revision: format!("{repo_name}-rev"),
        embedding_model: model.to_string(),
        code_index: basis(["main.go", "cache.go", "search.go", "codec.go"]),
        text_index: basis(["README.md", "CHANGELOG.md", "docs/cache.md", "docs/search.md"]),
    }
}

/// Uploads `index` for `repo_id` and marks its embeddings job as finished.
pub async fn publish(
    store: &dyn BlobStore,
    jobs: &InMemoryJobFinishTimes,
    repo_id: RepoId,
    index: &RepoEmbeddingIndex,
) {
    upload_repo_embedding_index(store, &RepoEmbeddingIndexName::for_repo(repo_id), index)
        .await
        .unwrap();
    jobs.record(repo_id, Utc::now());
}
