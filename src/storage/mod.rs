//! Blob storage for encoded embedding indexes.

mod blob;

pub use blob::{BlobReader, BlobStore, FsBlobStore, InMemoryBlobStore};
