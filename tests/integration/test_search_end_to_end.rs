//! End-to-end searches through blob store, cache and searcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use repo_embeddings::search::{FileReader, RemoteSearcher};
use repo_embeddings::{
    AtomicCacheMetrics, BlobIndexFetcher, EmbeddingSearchResult, EmbeddingsError,
    InMemoryBlobStore, InMemoryJobFinishTimes, NoopCacheMetrics, QueryEmbedding,
    RepoEmbeddingIndexCache, RepoEmbeddingIndexName, RepoId, Result, SearchParams, SearchResults,
    Searcher, Settings, WorkerOptions,
};
use tokio_util::sync::CancellationToken;

use crate::common::{FixedEmbedder, TEST_MODEL, basis_index, publish};

struct Fixture {
    store: Arc<InMemoryBlobStore>,
    jobs: Arc<InMemoryJobFinishTimes>,
    metrics: Arc<AtomicCacheMetrics>,
}

impl Fixture {
    /// repo1..repo4 with basis rows scaled by `10 * i`.
    async fn four_repos() -> Self {
        let fixture = Self {
            store: Arc::new(InMemoryBlobStore::new()),
            jobs: Arc::new(InMemoryJobFinishTimes::new()),
            metrics: Arc::new(AtomicCacheMetrics::new()),
        };
        for i in 1..=4u32 {
            let name = format!("repo{i}");
            let index = basis_index(&name, (10 * i) as i8, TEST_MODEL);
            publish(fixture.store.as_ref(), &fixture.jobs, RepoId(i), &index).await;
        }
        fixture
    }

    fn searcher(&self) -> Searcher {
        let cache = RepoEmbeddingIndexCache::new(
            1 << 20,
            Arc::new(BlobIndexFetcher::new(self.store.clone())),
            self.jobs.clone(),
            self.metrics.clone(),
        );
        Searcher::new(Arc::new(FixedEmbedder::unit_x()), cache, WorkerOptions::default())
    }
}

fn params(repos: &[u32], code: usize, text: usize) -> SearchParams {
    SearchParams {
        repo_names: repos.iter().map(|i| format!("repo{i}")).collect(),
        repo_ids: repos.iter().map(|&i| RepoId(i)).collect(),
        query: "where is the cache".to_string(),
        code_results_count: code,
        text_results_count: text,
        use_document_ranks: false,
        debug: false,
    }
}

fn repo_names(results: &[EmbeddingSearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.repo_name.as_str()).collect()
}

#[tokio::test]
async fn test_top_two_across_four_repos() {
    let fixture = Fixture::four_repos().await;
    let searcher = fixture.searcher();

    let results = searcher
        .search(&CancellationToken::new(), params(&[1, 2, 3, 4], 2, 2))
        .await
        .unwrap();

    assert_eq!(repo_names(&results.code_results), vec!["repo4", "repo3"]);
    assert_eq!(repo_names(&results.text_results), vec!["repo4", "repo3"]);

    let best = &results.code_results[0];
    assert_eq!(best.file_name, "main.go");
    assert_eq!(best.revision, "repo4-rev");
    assert_eq!(best.score, 2 * 127 * 40);
    assert_eq!(best.similarity_score, best.score);
    assert!(best.debug.is_none());
}

#[tokio::test]
async fn test_repeated_search_is_served_from_cache() {
    let fixture = Fixture::four_repos().await;
    let searcher = fixture.searcher();
    let token = CancellationToken::new();

    let first = searcher.search(&token, params(&[1, 2, 3, 4], 3, 1)).await.unwrap();
    let second = searcher.search(&token, params(&[1, 2, 3, 4], 3, 1)).await.unwrap();

    assert_eq!(first, second);
    let snapshot = fixture.metrics.snapshot();
    assert_eq!(snapshot.misses, 4);
    assert_eq!(snapshot.hits, 4);
    assert_eq!(searcher.cache().len(), 4);
}

#[tokio::test]
async fn test_repo_order_does_not_change_top_k() {
    let fixture = Fixture::four_repos().await;
    let searcher = fixture.searcher();
    let token = CancellationToken::new();

    let forward = searcher.search(&token, params(&[1, 2, 3, 4], 3, 3)).await.unwrap();
    let backward = searcher.search(&token, params(&[4, 3, 2, 1], 3, 3)).await.unwrap();
    assert_eq!(forward, backward);
}

#[tokio::test]
async fn test_debug_scores_are_attached() {
    let fixture = Fixture::four_repos().await;
    let mut request = params(&[2], 1, 1);
    request.debug = true;

    let results = fixture
        .searcher()
        .search(&CancellationToken::new(), request)
        .await
        .unwrap();

    let debug = results.code_results[0].debug.as_deref().unwrap();
    assert_eq!(debug, "score: 5080, similarity: 5080, rank: 0");
}

#[tokio::test]
async fn test_unknown_repo_fails_the_whole_search() {
    let fixture = Fixture::four_repos().await;
    let err = fixture
        .searcher()
        .search(&CancellationToken::new(), params(&[1, 2, 9], 2, 2))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(err.to_string().contains("repo9"));
}

#[tokio::test]
async fn test_model_mismatch_is_reported() {
    let fixture = Fixture::four_repos().await;
    let other = basis_index("repo5", 50, "another/model");
    publish(fixture.store.as_ref(), &fixture.jobs, RepoId(5), &other).await;

    let err = fixture
        .searcher()
        .search(&CancellationToken::new(), params(&[1, 5], 2, 2))
        .await
        .unwrap_err();

    match err {
        EmbeddingsError::ModelMismatch {
            repo_name,
            index_model,
            query_model,
        } => {
            assert_eq!(repo_name, "repo5");
            assert_eq!(index_model, "another/model");
            assert_eq!(query_model, TEST_MODEL);
        }
        other => panic!("expected model mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_index_without_model_is_searchable() {
    let fixture = Fixture::four_repos().await;
    let unlabeled = basis_index("repo6", 100, "");
    publish(fixture.store.as_ref(), &fixture.jobs, RepoId(6), &unlabeled).await;

    let results = fixture
        .searcher()
        .search(&CancellationToken::new(), params(&[4, 6], 1, 0))
        .await
        .unwrap();
    assert_eq!(repo_names(&results.code_results), vec!["repo6"]);
    assert!(results.text_results.is_empty());
}

#[tokio::test]
async fn test_cancelled_search_returns_cancelled() {
    let fixture = Fixture::four_repos().await;
    let token = CancellationToken::new();
    token.cancel();

    let err = fixture
        .searcher()
        .search(&token, params(&[1, 2], 2, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, EmbeddingsError::Cancelled));
}

#[tokio::test]
async fn test_mismatched_repo_lists_are_rejected() {
    let fixture = Fixture::four_repos().await;
    let mut request = params(&[1, 2], 2, 2);
    request.repo_ids.pop();

    let err = fixture
        .searcher()
        .search(&CancellationToken::new(), request)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), "INVALID_REQUEST");
}

/// Serves one repository with a fixed, very high scoring result.
struct FixedRemote {
    repo_name: String,
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteSearcher for FixedRemote {
    fn enabled_for(&self, repo_name: &str) -> bool {
        repo_name == self.repo_name
    }

    async fn search(
        &self,
        _cancel: &CancellationToken,
        _repo_id: RepoId,
        repo_name: &str,
        query: &QueryEmbedding,
        _params: &SearchParams,
    ) -> Result<SearchResults> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(query.model, TEST_MODEL);
        Ok(SearchResults {
            code_results: vec![EmbeddingSearchResult {
                repo_name: repo_name.to_string(),
                revision: "remote".to_string(),
                file_name: "remote.go".to_string(),
                start_line: 0,
                end_line: 1,
                row_num: 0,
                content: None,
                score: 1_000_000,
                similarity_score: 1_000_000,
                debug: None,
            }],
            text_results: vec![],
        })
    }
}

#[tokio::test]
async fn test_remote_backend_replaces_local_search_for_flagged_repo() {
    let fixture = Fixture::four_repos().await;
    let remote = Arc::new(FixedRemote {
        repo_name: "repo1".to_string(),
        calls: AtomicUsize::new(0),
    });
    let searcher = fixture.searcher().with_remote_searcher(remote.clone());

    let results = searcher
        .search(&CancellationToken::new(), params(&[1, 2, 3, 4], 2, 4))
        .await
        .unwrap();

    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    assert_eq!(repo_names(&results.code_results), vec!["repo1", "repo4"]);
    assert_eq!(results.code_results[0].file_name, "remote.go");
    // repo1 has no local text results because the remote returned none
    assert_eq!(
        repo_names(&results.text_results[..3]),
        vec!["repo4", "repo3", "repo2"]
    );
    assert_eq!(results.text_results[3].score, 0);
    let repo1 = RepoEmbeddingIndexName::for_repo(RepoId(1));
    assert!(searcher.cache().get_cached(&repo1).is_none());
}

struct MapFileReader {
    files: HashMap<String, String>,
}

#[async_trait]
impl FileReader for MapFileReader {
    async fn read_file(
        &self,
        _repo_name: &str,
        _revision: &str,
        file_name: &str,
    ) -> Result<Option<String>> {
        Ok(self.files.get(file_name).cloned())
    }
}

#[tokio::test]
async fn test_results_are_hydrated_with_line_ranges() {
    let fixture = Fixture::four_repos().await;
    let files = MapFileReader {
        files: HashMap::from([(
            "main.go".to_string(),
            "package main\n\nfunc main() {}\n// trailing".to_string(),
        )]),
    };
    let searcher = fixture.searcher().with_file_reader(Arc::new(files));

    let results = searcher
        .search(&CancellationToken::new(), params(&[3], 1, 1))
        .await
        .unwrap();

    assert_eq!(
        results.code_results[0].content.as_deref(),
        Some("package main\n\nfunc main() {}")
    );
    // README.md is unknown to the reader
    assert!(results.text_results[0].content.is_none());
}

#[tokio::test]
async fn test_searcher_from_settings() {
    let fixture = Fixture::four_repos().await;
    let mut settings = Settings::default();
    settings.cache.max_size_bytes = 1 << 20;
    settings.search.num_workers = 2;
    settings.search.min_rows_to_split = 0;

    let searcher = Searcher::from_settings(
        &settings,
        Arc::new(FixedEmbedder::unit_x()),
        Arc::new(BlobIndexFetcher::new(fixture.store.clone())),
        fixture.jobs.clone(),
        Arc::new(NoopCacheMetrics),
        None,
    );
    assert_eq!(searcher.cache().max_size_bytes(), 1 << 20);

    let results = searcher
        .search(&CancellationToken::new(), params(&[1, 2, 3, 4], 1, 1))
        .await
        .unwrap();
    assert_eq!(repo_names(&results.code_results), vec!["repo4"]);
}

#[tokio::test]
async fn test_from_settings_gates_remote_by_configured_repos() {
    let fixture = Fixture::four_repos().await;
    let mut settings = Settings::default();
    settings.remote_search.enabled_repos = vec!["repo2".to_string()];
    // The backend itself only takes repo1.
    let remote = Arc::new(FixedRemote {
        repo_name: "repo1".to_string(),
        calls: AtomicUsize::new(0),
    });

    let searcher = Searcher::from_settings(
        &settings,
        Arc::new(FixedEmbedder::unit_x()),
        Arc::new(BlobIndexFetcher::new(fixture.store.clone())),
        fixture.jobs.clone(),
        Arc::new(NoopCacheMetrics),
        Some(remote.clone() as Arc<dyn RemoteSearcher>),
    );
    let results = searcher
        .search(&CancellationToken::new(), params(&[1, 2, 3, 4], 1, 1))
        .await
        .unwrap();

    assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    assert_eq!(repo_names(&results.code_results), vec!["repo4"]);
    assert_eq!(searcher.cache().len(), 4);

    settings.remote_search.enabled_repos = vec!["*".to_string()];
    let searcher = Searcher::from_settings(
        &settings,
        Arc::new(FixedEmbedder::unit_x()),
        Arc::new(BlobIndexFetcher::new(fixture.store.clone())),
        fixture.jobs.clone(),
        Arc::new(NoopCacheMetrics),
        Some(remote.clone() as Arc<dyn RemoteSearcher>),
    );
    let results = searcher
        .search(&CancellationToken::new(), params(&[1, 2, 3, 4], 1, 1))
        .await
        .unwrap();
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    assert_eq!(results.code_results[0].file_name, "remote.go");
}

/// Never answers.
struct StalledRemote;

#[async_trait]
impl RemoteSearcher for StalledRemote {
    fn enabled_for(&self, _repo_name: &str) -> bool {
        true
    }

    async fn search(
        &self,
        _cancel: &CancellationToken,
        _repo_id: RepoId,
        _repo_name: &str,
        _query: &QueryEmbedding,
        _params: &SearchParams,
    ) -> Result<SearchResults> {
        std::future::pending().await
    }
}

struct StalledFileReader;

#[async_trait]
impl FileReader for StalledFileReader {
    async fn read_file(
        &self,
        _repo_name: &str,
        _revision: &str,
        _file_name: &str,
    ) -> Result<Option<String>> {
        std::future::pending().await
    }
}

async fn search_cancelled_after(searcher: &Searcher, delay: Duration) -> EmbeddingsError {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        canceller.cancel();
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        searcher.search(&token, params(&[1, 2], 2, 2)),
    )
    .await
    .expect("search did not return after cancellation")
    .unwrap_err()
}

#[tokio::test]
async fn test_cancel_unblocks_stalled_remote_search() {
    let fixture = Fixture::four_repos().await;
    let searcher = fixture.searcher().with_remote_searcher(Arc::new(StalledRemote));

    let err = search_cancelled_after(&searcher, Duration::from_millis(50)).await;
    assert!(matches!(err, EmbeddingsError::Cancelled));
}

#[tokio::test]
async fn test_cancel_unblocks_stalled_hydration() {
    let fixture = Fixture::four_repos().await;
    let searcher = fixture.searcher().with_file_reader(Arc::new(StalledFileReader));

    let err = search_cancelled_after(&searcher, Duration::from_millis(50)).await;
    assert!(matches!(err, EmbeddingsError::Cancelled));
}
