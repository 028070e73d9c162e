//! Query embedding provider interface and a caching wrapper.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;

/// A query embedding and the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEmbedding {
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Turns search queries into normalized float embeddings.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed_query(&self, query: &str) -> Result<QueryEmbedding>;
}

/// Remembers the embeddings of recent queries.
///
/// Users tend to repeat or page through the same query, and the provider
/// call is the slowest step of a search. Errors are not cached.
pub struct CachedQueryEmbedder {
    inner: Arc<dyn QueryEmbedder>,
    cache: Option<Mutex<LruCache<String, QueryEmbedding>>>,
}

impl CachedQueryEmbedder {
    /// Caches up to `capacity` queries; zero disables caching.
    pub fn new(inner: Arc<dyn QueryEmbedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.lock().len())
    }
}

#[async_trait]
impl QueryEmbedder for CachedQueryEmbedder {
    async fn embed_query(&self, query: &str) -> Result<QueryEmbedding> {
        let Some(cache) = &self.cache else {
            return self.inner.embed_query(query).await;
        };

        let cached = cache.lock().get(query).cloned();
        if let Some(hit) = cached {
            tracing::debug!("[query] embedding cache hit");
            return Ok(hit);
        }

        let embedding = self.inner.embed_query(query).await?;
        cache.lock().put(query.to_string(), embedding.clone());
        Ok(embedding)
    }
}
