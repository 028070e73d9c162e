//! Per-repository embedding indexes and their persisted form.

mod codec;
mod index;
mod legacy;

pub use codec::{
    EMBEDDINGS_CHUNK_SIZE, FORMAT_VERSION, MAGIC_BYTES, decode_repo_embedding_index,
    download_repo_embedding_index, encode_repo_embedding_index, upload_repo_embedding_index,
};
pub use index::{EmbeddingIndex, RepoEmbeddingIndex, RepoEmbeddingIndexName, RepoId, RowMetadata};
pub use legacy::{OldEmbeddingIndex, OldRepoEmbeddingIndex};
