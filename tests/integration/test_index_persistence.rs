//! Indexes persisted to a filesystem blob store and loaded back through the
//! cache.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use repo_embeddings::embeddings::{download_repo_embedding_index, upload_repo_embedding_index};
use repo_embeddings::{
    AtomicCacheMetrics, BlobIndexFetcher, EmbeddingIndex, FsBlobStore, InMemoryJobFinishTimes,
    RepoEmbeddingIndex, RepoEmbeddingIndexCache, RepoEmbeddingIndexName, RepoId, RowMetadata,
    SearchOptions, WorkerOptions, quantize,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::{TEST_MODEL, basis_index, publish};

fn random_index(rows: usize, dimension: usize) -> RepoEmbeddingIndex {
    let mut rng = rand::rng();
    let floats: Vec<f32> = (0..rows * dimension)
        .map(|_| rng.random_range(-1.0..1.0))
        .collect();
    let metadata = (0..rows)
        .map(|i| RowMetadata::new(format!("src/mod_{}.rs", i % 17), i as u32, i as u32 + 20))
        .collect();
    let ranks = (0..rows).map(|_| rng.random_range(0.0..40.0)).collect();

    RepoEmbeddingIndex {
        repo_name: "github.com/example/large".to_string(),
        revision: "0123abcd".to_string(),
        embedding_model: TEST_MODEL.to_string(),
        code_index: EmbeddingIndex::new(quantize(&floats), dimension, metadata, ranks).unwrap(),
        text_index: EmbeddingIndex::empty(dimension),
    }
}

#[tokio::test]
async fn test_fs_store_round_trip_preserves_search_results() {
    let dir = TempDir::new().unwrap();
    let store = FsBlobStore::new(dir.path().join("indexes"));
    let name = RepoEmbeddingIndexName::for_repo(RepoId(11));
    let index = random_index(3_000, 64);

    let written = upload_repo_embedding_index(&store, &name, &index).await.unwrap();
    assert!(written > 3_000 * 64);
    assert!(dir.path().join("indexes").join(name.as_str()).exists());

    let loaded = download_repo_embedding_index(&store, &name)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, index);

    let query = quantize(&[0.125; 64]);
    let options = SearchOptions {
        use_document_ranks: true,
    };
    let workers = WorkerOptions {
        num_workers: 4,
        min_rows_to_split: 100,
    };
    assert_eq!(
        loaded.code_index.similarity_search(&query, 25, workers, options),
        index
            .code_index
            .similarity_search(&query, 25, WorkerOptions::single_threaded(), options)
    );
}

#[tokio::test]
async fn test_cache_loads_from_fs_store_and_reloads_after_new_job() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::new(dir.path()));
    let jobs = Arc::new(InMemoryJobFinishTimes::new());
    let metrics = Arc::new(AtomicCacheMetrics::new());
    let cache = RepoEmbeddingIndexCache::new(
        1 << 20,
        Arc::new(BlobIndexFetcher::new(store.clone())),
        jobs.clone(),
        metrics.clone(),
    );
    let token = CancellationToken::new();

    let mut index = basis_index("repo1", 10, TEST_MODEL);
    publish(store.as_ref(), &jobs, RepoId(1), &index).await;
    let first = cache.get(&token, RepoId(1), "repo1").await.unwrap();
    assert_eq!(first.revision, "repo1-rev");

    // Incremental update to a new revision, published by a later job.
    let added =
        EmbeddingIndex::new(vec![0, 5, 0, 0], 4, vec![RowMetadata::new("lib.go", 0, 9)], vec![])
            .unwrap();
    index
        .apply_update("repo1-rev2", &HashSet::new(), added, EmbeddingIndex::empty(4))
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    publish(store.as_ref(), &jobs, RepoId(1), &index).await;

    let second = cache.get(&token, RepoId(1), "repo1").await.unwrap();
    assert_eq!(second.revision, "repo1-rev2");
    assert_eq!(second.code_index.n_rows(), 5);
    assert_eq!(cache.len(), 1);
    assert_eq!(metrics.snapshot().misses, 2);
}

#[tokio::test]
async fn test_cache_capacity_holds_across_many_repos() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::new(dir.path()));
    let jobs = Arc::new(InMemoryJobFinishTimes::new());
    let size = basis_index("repo1", 1, TEST_MODEL).estimate_size();
    let metrics = Arc::new(AtomicCacheMetrics::new());
    let cache = RepoEmbeddingIndexCache::new(
        size * 3,
        Arc::new(BlobIndexFetcher::new(store.clone())),
        jobs.clone(),
        metrics.clone(),
    );
    let token = CancellationToken::new();

    for i in 1..=6u32 {
        let name = format!("repo{i}");
        publish(store.as_ref(), &jobs, RepoId(i), &basis_index(&name, 1, TEST_MODEL)).await;
        cache.get(&token, RepoId(i), &name).await.unwrap();
    }

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.remaining_capacity(), 0);
    assert_eq!(metrics.snapshot().evictions, 3);
    for evicted in 1..=3 {
        assert!(cache.get_cached(&RepoEmbeddingIndexName::for_repo(RepoId(evicted))).is_none());
    }
}
