//! Multi-repository search: embeds the query once, searches each
//! repository's code and text index, and merges everything into two top-k
//! lists.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheMetrics, IndexFetcher, JobFinishTimes, RepoEmbeddingIndexCache};
use crate::config::{RemoteSearchConfig, Settings};
use crate::embeddings::{EmbeddingIndex, RepoEmbeddingIndex, RepoId};
use crate::error::{EmbeddingsError, Result};
use crate::search::{
    CachedQueryEmbedder, EmbeddingSearchResult, QueryEmbedder, QueryEmbedding, SearchParams,
    SearchResults, merge_truncate,
};
use crate::vector::{SearchOptions, WorkerOptions, kernel, quantize};

/// Alternative vector-search backend that can take over individual
/// repositories from the local cache.
#[async_trait]
pub trait RemoteSearcher: Send + Sync {
    /// Runtime switch, checked per repository and per request.
    fn enabled_for(&self, repo_name: &str) -> bool;

    /// Searches one repository. Results must use the local result shape and
    /// be ordered by descending score.
    ///
    /// The searcher stops waiting once `cancel` fires; implementations may
    /// watch it to abort their own request.
    async fn search(
        &self,
        cancel: &CancellationToken,
        repo_id: RepoId,
        repo_name: &str,
        query: &QueryEmbedding,
        params: &SearchParams,
    ) -> Result<SearchResults>;
}

/// Source of file contents for result hydration.
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Full contents of `file_name` at `revision`, `None` if it does not exist.
    async fn read_file(
        &self,
        repo_name: &str,
        revision: &str,
        file_name: &str,
    ) -> Result<Option<String>>;
}

/// Runs searches against cached repository indexes.
pub struct Searcher {
    embedder: Arc<dyn QueryEmbedder>,
    cache: RepoEmbeddingIndexCache,
    workers: WorkerOptions,
    remote: Option<Arc<dyn RemoteSearcher>>,
    files: Option<Arc<dyn FileReader>>,
}

impl Searcher {
    pub fn new(
        embedder: Arc<dyn QueryEmbedder>,
        cache: RepoEmbeddingIndexCache,
        workers: WorkerOptions,
    ) -> Self {
        Self {
            embedder,
            cache,
            workers,
            remote: None,
            files: None,
        }
    }

    /// Wires a searcher from startup settings: selects the dot kernel, sizes
    /// the index cache and the query cache, and sets worker partitioning.
    ///
    /// `remote` only serves repositories listed in `remote_search.enabled_repos`.
    pub fn from_settings(
        settings: &Settings,
        embedder: Arc<dyn QueryEmbedder>,
        fetcher: Arc<dyn IndexFetcher>,
        jobs: Arc<dyn JobFinishTimes>,
        metrics: Arc<dyn CacheMetrics>,
        remote: Option<Arc<dyn RemoteSearcher>>,
    ) -> Self {
        kernel::configure(settings.kernel.simd_enabled);
        let cache =
            RepoEmbeddingIndexCache::new(settings.cache.max_size_bytes, fetcher, jobs, metrics);
        let embedder = Arc::new(CachedQueryEmbedder::new(
            embedder,
            settings.search.query_cache_size,
        ));
        let searcher = Self::new(embedder, cache, settings.search.worker_options());
        match remote {
            Some(inner) => searcher.with_remote_searcher(Arc::new(ConfiguredRemote {
                inner,
                config: settings.remote_search.clone(),
            })),
            None => searcher,
        }
    }

    pub fn with_remote_searcher(mut self, remote: Arc<dyn RemoteSearcher>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_file_reader(mut self, files: Arc<dyn FileReader>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn cache(&self) -> &RepoEmbeddingIndexCache {
        &self.cache
    }

    /// Searches every repository in `params` and returns the merged top
    /// `code_results_count` code and `text_results_count` text results.
    ///
    /// Repositories are visited in request order. The first failing
    /// repository fails the whole search.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        params: SearchParams,
    ) -> Result<SearchResults> {
        params.validate()?;

        let query = cancellable(cancel, self.embedder.embed_query(&params.query)).await?;
        let quantized: Arc<[i8]> = quantize(&query.embedding).into();

        let mut combined = SearchResults::default();
        for (repo_name, repo_id) in params.repos() {
            if cancel.is_cancelled() {
                return Err(EmbeddingsError::Cancelled);
            }

            let partial = match &self.remote {
                Some(remote) if remote.enabled_for(repo_name) => {
                    tracing::debug!("[search] {repo_name} served by remote backend");
                    let remote_search = remote.search(cancel, repo_id, repo_name, &query, &params);
                    cancellable(cancel, remote_search)
                        .await
                        .map_err(|err| match err {
                            err @ (EmbeddingsError::Remote { .. } | EmbeddingsError::Cancelled) => {
                                err
                            }
                            other => EmbeddingsError::Remote {
                                repo_name: repo_name.to_string(),
                                reason: other.to_string(),
                            },
                        })?
                }
                _ => {
                    let quantized = Arc::clone(&quantized);
                    self.search_repo(cancel, repo_id, repo_name, &query, quantized, &params)
                        .await?
                }
            };

            merge_truncate(
                &mut combined.code_results,
                partial.code_results,
                params.code_results_count,
            );
            merge_truncate(
                &mut combined.text_results,
                partial.text_results,
                params.text_results_count,
            );
        }

        tracing::debug!(
            "[search] {} repos: {} code and {} text results",
            params.repo_names.len(),
            combined.code_results.len(),
            combined.text_results.len()
        );
        Ok(combined)
    }

    async fn search_repo(
        &self,
        cancel: &CancellationToken,
        repo_id: RepoId,
        repo_name: &str,
        query: &QueryEmbedding,
        quantized: Arc<[i8]>,
        params: &SearchParams,
    ) -> Result<SearchResults> {
        let index = self.cache.get(cancel, repo_id, repo_name).await?;

        if !index.embedding_model.is_empty() && index.embedding_model != query.model {
            return Err(EmbeddingsError::ModelMismatch {
                repo_name: repo_name.to_string(),
                index_model: index.embedding_model.clone(),
                query_model: query.model.clone(),
            });
        }
        check_dimension(repo_name, &index.code_index, quantized.len())?;
        check_dimension(repo_name, &index.text_index, quantized.len())?;

        let workers = self.workers;
        let options = SearchOptions {
            use_document_ranks: params.use_document_ranks,
        };
        let (code_count, text_count) = (params.code_results_count, params.text_results_count);
        let scanned = Arc::clone(&index);
        let scan = tokio::task::spawn_blocking(move || {
            (
                scanned.code_index.similarity_search(&quantized, code_count, workers, options),
                scanned.text_index.similarity_search(&quantized, text_count, workers, options),
            )
        });
        let scan = async move { scan.await.map_err(EmbeddingsError::from) };
        let (code_hits, text_hits) = cancellable(cancel, scan).await?;

        let revision = index.revision.as_str();
        let mut results = SearchResults {
            code_results: index.code_index.to_search_results(
                &code_hits,
                repo_name,
                revision,
                params.debug,
            ),
            text_results: index.text_index.to_search_results(
                &text_hits,
                repo_name,
                revision,
                params.debug,
            ),
        };
        if let Some(files) = &self.files {
            cancellable(cancel, hydrate(files.as_ref(), &index, &mut results)).await?;
        }
        Ok(results)
    }
}

/// Remote backend restricted to the repositories enabled in configuration.
struct ConfiguredRemote {
    inner: Arc<dyn RemoteSearcher>,
    config: RemoteSearchConfig,
}

#[async_trait]
impl RemoteSearcher for ConfiguredRemote {
    fn enabled_for(&self, repo_name: &str) -> bool {
        self.config.is_enabled_for(repo_name) && self.inner.enabled_for(repo_name)
    }

    async fn search(
        &self,
        cancel: &CancellationToken,
        repo_id: RepoId,
        repo_name: &str,
        query: &QueryEmbedding,
        params: &SearchParams,
    ) -> Result<SearchResults> {
        self.inner.search(cancel, repo_id, repo_name, query, params).await
    }
}

/// Races `future` against `cancel`. The future is dropped on cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EmbeddingsError::Cancelled),
        result = future => result,
    }
}

fn check_dimension(repo_name: &str, index: &EmbeddingIndex, query_dimension: usize) -> Result<()> {
    if !index.is_empty() && index.column_dimension() != query_dimension {
        return Err(EmbeddingsError::InvalidRequest {
            reason: format!(
                "query embedding has dimension {query_dimension}, index of {repo_name} has {}",
                index.column_dimension()
            ),
        });
    }
    Ok(())
}

/// Fills `content` of every result with its line range. Each file is read
/// at most once per repository.
async fn hydrate(
    files: &dyn FileReader,
    index: &RepoEmbeddingIndex,
    results: &mut SearchResults,
) -> Result<()> {
    let mut contents: HashMap<String, Option<String>> = HashMap::new();
    let all = results.code_results.iter_mut().chain(results.text_results.iter_mut());
    for result in all {
        if !contents.contains_key(&result.file_name) {
            let content = files
                .read_file(&index.repo_name, &index.revision, &result.file_name)
                .await?;
            contents.insert(result.file_name.clone(), content);
        }
        if let Some(Some(content)) = contents.get(&result.file_name) {
            result.content = Some(line_range(content, result));
        }
    }
    Ok(())
}

fn line_range(content: &str, result: &EmbeddingSearchResult) -> String {
    let start = result.start_line as usize;
    let len = result.end_line.saturating_sub(result.start_line) as usize;
    content.lines().skip(start).take(len).collect::<Vec<_>>().join("\n")
}
