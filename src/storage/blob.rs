//! Minimal blob-store interface the index codec is built on, plus in-memory
//! and filesystem implementations.
//!
//! Both directions are streams so a multi-gigabyte index never has to exist
//! as one contiguous byte buffer on the caller's side.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};

use crate::error::{EmbeddingsError, Result};

/// Byte stream returned by [`BlobStore::get`].
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Opaque key/value storage for encoded indexes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Opens the blob stored under `key`, `None` if there is none.
    async fn get(&self, key: &str) -> Result<Option<BlobReader>>;

    /// Stores everything `reader` yields under `key`, replacing any previous
    /// blob. Returns the number of bytes stored.
    async fn upload(&self, key: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Process-local blob store, mostly for tests and single-node setups.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes directly, bypassing the streaming interface.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.write().insert(key.into(), Arc::new(bytes));
    }

    /// Size of the blob under `key`.
    pub fn blob_len(&self, key: &str) -> Option<usize> {
        self.blobs.read().get(key).map(|bytes| bytes.len())
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<BlobReader>> {
        let bytes = self.blobs.read().get(key).cloned();
        Ok(bytes.map(|bytes| Box::new(io::Cursor::new(SharedBytes(bytes))) as BlobReader))
    }

    async fn upload(&self, key: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let mut buffer = Vec::new();
        let written = reader.read_to_end(&mut buffer).await?;
        self.insert(key, buffer);
        Ok(written as u64)
    }
}

/// Blob store backed by one file per key under a root directory.
///
/// Uploads go to a temporary file that is renamed into place, so readers
/// never observe a partially written blob. Concurrent uploads of one key
/// each write their own temp file; the last rename wins.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\'])
            && !key.ends_with(".tmp");
        if !valid {
            return Err(EmbeddingsError::InvalidRequest {
                reason: format!("invalid blob key '{key}'"),
            });
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<BlobReader>> {
        let path = self.path_for(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(BufReader::new(file)) as BlobReader)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn upload(&self, key: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Each upload writes its own temp file; the path removes it on drop
        // unless it was persisted.
        let (file, tmp) = tempfile::Builder::new()
            .prefix(&format!(".{key}."))
            .suffix(".tmp")
            .tempfile_in(&self.root)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tmp.persist(&path).map_err(|err| err.error)?;
        Ok(written)
    }
}
