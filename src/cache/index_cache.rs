//! Memory-bounded LRU cache of repository indexes.
//!
//! Capacity is accounted in estimated bytes, not entries. Concurrent misses
//! for the same repository share one background fetch; the fetch runs on its
//! own task so a caller that gives up does not waste the work for the others.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheMetrics, IndexFetcher, JobFinishTimes};
use crate::embeddings::{RepoEmbeddingIndex, RepoEmbeddingIndexName, RepoId};
use crate::error::{EmbeddingsError, Result};

/// A resident index and the finish time of the job that produced it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub index: Arc<RepoEmbeddingIndex>,
    pub finished_at: DateTime<Utc>,
}

struct Resident {
    entry: CacheEntry,
    size: u64,
}

struct CacheState {
    entries: LruCache<RepoEmbeddingIndexName, Resident>,
    remaining_capacity: u64,
}

/// Shared outcome of one in-flight fetch, `None` until it completes.
type FetchOutcome = Option<Result<Arc<RepoEmbeddingIndex>>>;

struct CacheInner {
    max_size_bytes: u64,
    state: Mutex<CacheState>,
    inflight: DashMap<RepoEmbeddingIndexName, watch::Receiver<FetchOutcome>>,
    fetcher: Arc<dyn IndexFetcher>,
    jobs: Arc<dyn JobFinishTimes>,
    metrics: Arc<dyn CacheMetrics>,
}

/// Process-local cache of [`RepoEmbeddingIndex`]es bounded by total size.
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct RepoEmbeddingIndexCache {
    inner: Arc<CacheInner>,
}

enum Lookup {
    Hit(Arc<RepoEmbeddingIndex>),
    Pending(watch::Receiver<FetchOutcome>),
}

impl RepoEmbeddingIndexCache {
    pub fn new(
        max_size_bytes: u64,
        fetcher: Arc<dyn IndexFetcher>,
        jobs: Arc<dyn JobFinishTimes>,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                max_size_bytes,
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    remaining_capacity: max_size_bytes,
                }),
                inflight: DashMap::new(),
                fetcher,
                jobs,
                metrics,
            }),
        }
    }

    /// Returns the current index of `repo_id`, loading it on a miss.
    ///
    /// A resident entry is current if no embeddings job finished after it was
    /// loaded. Misses for the same repository are coalesced onto one fetch.
    /// Cancelling `cancel` returns [`EmbeddingsError::Cancelled`] right away;
    /// the fetch keeps running and still populates the cache.
    pub async fn get(
        &self,
        cancel: &CancellationToken,
        repo_id: RepoId,
        repo_name: &str,
    ) -> Result<Arc<RepoEmbeddingIndex>> {
        if cancel.is_cancelled() {
            return Err(EmbeddingsError::Cancelled);
        }

        let finished_at = self
            .inner
            .jobs
            .last_finished_at(repo_id)
            .await?
            .ok_or_else(|| EmbeddingsError::NotFound {
                repo_name: repo_name.to_string(),
            })?;
        let key = RepoEmbeddingIndexName::for_repo(repo_id);

        let receiver = match self.lookup(key, repo_id, repo_name, finished_at) {
            Lookup::Hit(index) => return Ok(index),
            Lookup::Pending(receiver) => receiver,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("[cache] {repo_name}: caller cancelled, fetch continues");
                Err(EmbeddingsError::Cancelled)
            }
            outcome = wait_for_outcome(receiver) => outcome,
        }
    }

    fn lookup(
        &self,
        key: RepoEmbeddingIndexName,
        repo_id: RepoId,
        repo_name: &str,
        finished_at: DateTime<Utc>,
    ) -> Lookup {
        if let Some(index) = self.fresh_index(&key, finished_at) {
            return Lookup::Hit(index);
        }

        match self.inner.inflight.entry(key.clone()) {
            Entry::Occupied(pending) => Lookup::Pending(pending.get().clone()),
            Entry::Vacant(slot) => {
                // A fetch may have completed between the first check and
                // taking the slot.
                if let Some(index) = self.fresh_index(&key, finished_at) {
                    return Lookup::Hit(index);
                }

                let (sender, receiver) = watch::channel(None);
                slot.insert(receiver.clone());

                let inner = Arc::clone(&self.inner);
                let repo_name = repo_name.to_string();
                tokio::spawn(async move {
                    inner.fetch(key, repo_id, repo_name, finished_at, sender).await;
                });
                Lookup::Pending(receiver)
            }
        }
    }

    fn fresh_index(
        &self,
        key: &RepoEmbeddingIndexName,
        finished_at: DateTime<Utc>,
    ) -> Option<Arc<RepoEmbeddingIndex>> {
        let mut state = self.inner.state.lock();
        let resident = state.entries.get(key)?;
        if resident.entry.finished_at < finished_at {
            tracing::debug!("[cache] {key} superseded by a job finished at {finished_at}");
            return None;
        }
        self.inner.metrics.hit();
        Some(Arc::clone(&resident.entry.index))
    }

    /// Inserts `entry` under `key`, evicting least recently used entries
    /// until it fits. Returns false if the entry is larger than the whole
    /// cache and was not admitted.
    pub fn add(&self, key: RepoEmbeddingIndexName, entry: CacheEntry) -> bool {
        self.inner.add(key, entry)
    }

    /// The resident entry for `key`, without freshness checks.
    pub fn get_cached(&self, key: &RepoEmbeddingIndexName) -> Option<CacheEntry> {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map(|resident| resident.entry.clone())
    }

    pub fn remaining_capacity(&self) -> u64 {
        self.inner.state.lock().remaining_capacity
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.inner.max_size_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheInner {
    fn add(&self, key: RepoEmbeddingIndexName, entry: CacheEntry) -> bool {
        let size = entry.index.estimate_size();
        if size > self.max_size_bytes {
            tracing::debug!(
                "[cache] not caching {key}: {size} bytes exceeds the cache size of {} bytes",
                self.max_size_bytes
            );
            self.metrics.rejected();
            return false;
        }

        let mut state = self.state.lock();
        if let Some(replaced) = state.entries.pop(&key) {
            state.remaining_capacity += replaced.size;
        }
        while state.remaining_capacity < size {
            let Some((evicted_key, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.remaining_capacity += evicted.size;
            self.metrics.evicted();
            tracing::debug!("[cache] evicted {evicted_key} ({} bytes)", evicted.size);
        }

        state.remaining_capacity -= size;
        state.entries.put(key, Resident { entry, size });
        true
    }

    async fn fetch(
        &self,
        key: RepoEmbeddingIndexName,
        repo_id: RepoId,
        repo_name: String,
        finished_at: DateTime<Utc>,
        sender: watch::Sender<FetchOutcome>,
    ) {
        // Also runs if the fetcher panics; waiters then see a closed channel.
        let _slot = InflightSlot {
            inflight: &self.inflight,
            key: &key,
        };

        self.metrics.miss();
        let started = Instant::now();
        let outcome = self.fetcher.fetch(repo_id, &repo_name).await.map(|index| {
            let index = Arc::new(index);
            let size = index.estimate_size();
            self.metrics.loaded(size);
            self.add(
                key.clone(),
                CacheEntry {
                    index: Arc::clone(&index),
                    finished_at,
                },
            );
            tracing::info!(
                "[cache] loaded {repo_name} as {key}: {size} bytes in {:?}",
                started.elapsed()
            );
            index
        });

        if let Err(err) = &outcome {
            tracing::warn!("[cache] failed to load index for {repo_name}: {err}");
        }
        // No receivers left is fine, the cache is populated either way.
        let _ = sender.send(Some(outcome));
    }
}

struct InflightSlot<'a> {
    inflight: &'a DashMap<RepoEmbeddingIndexName, watch::Receiver<FetchOutcome>>,
    key: &'a RepoEmbeddingIndexName,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.inflight.remove(self.key);
    }
}

async fn wait_for_outcome(
    mut receiver: watch::Receiver<FetchOutcome>,
) -> Result<Arc<RepoEmbeddingIndex>> {
    let outcome = match receiver.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| {
        Err(EmbeddingsError::TaskFailed(
            "index fetch ended without a result".to_string(),
        ))
    })
}
