//! Decoder for the legacy (version 1) index layout.
//!
//! Version 1 stored unquantized `f32` embeddings as one unchunked sequence
//! and had no header. Blobs in that layout are still readable: they decode
//! into [`OldRepoEmbeddingIndex`] and are quantized on load, so the store can
//! be migrated lazily instead of in one rewrite.
//!
//! ```text
//! string:repo_name string:revision
//! code index, text index, each:
//!     u32:column_dimension
//!     u64:value_count { f32 }*
//!     u64:row_count { string:file_name u32:start_line u32:end_line }*
//!     u64:rank_count { f32 }*
//! ```

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::embeddings::codec::{read_f32s, read_rows, read_string, read_string_of_len};
use crate::embeddings::{EmbeddingIndex, RepoEmbeddingIndex, RowMetadata};
use crate::error::{EmbeddingsError, Result};
use crate::vector::quantize;

/// Float embeddings in the legacy layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OldEmbeddingIndex {
    pub embeddings: Vec<f32>,
    pub column_dimension: usize,
    pub row_metadata: Vec<RowMetadata>,
    pub ranks: Vec<f32>,
}

impl OldEmbeddingIndex {
    /// Quantizes the embeddings into the current representation.
    pub fn to_new_index(&self) -> Result<EmbeddingIndex> {
        EmbeddingIndex::new(
            quantize(&self.embeddings),
            self.column_dimension,
            self.row_metadata.clone(),
            self.ranks.clone(),
        )
    }
}

/// Repository index in the legacy layout. Legacy indexes did not record
/// their embeddings model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OldRepoEmbeddingIndex {
    pub repo_name: String,
    pub revision: String,
    pub code_index: OldEmbeddingIndex,
    pub text_index: OldEmbeddingIndex,
}

impl OldRepoEmbeddingIndex {
    /// Converts to the current representation, model left empty.
    pub fn to_new_index(&self) -> Result<RepoEmbeddingIndex> {
        Ok(RepoEmbeddingIndex {
            repo_name: self.repo_name.clone(),
            revision: self.revision.clone(),
            embedding_model: String::new(),
            code_index: self.code_index.to_new_index()?,
            text_index: self.text_index.to_new_index()?,
        })
    }
}

/// Decodes a legacy index whose first four bytes (the repo name length)
/// were already consumed while probing for the format header.
pub(crate) async fn decode_old_repo_embedding_index<R>(
    reader: &mut R,
    repo_name_len: u32,
) -> Result<OldRepoEmbeddingIndex>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let repo_name = read_string_of_len(reader, repo_name_len as usize).await?;
    let revision = read_string(reader).await?;
    let code_index = decode_old_embedding_index(reader).await?;
    let text_index = decode_old_embedding_index(reader).await?;

    Ok(OldRepoEmbeddingIndex {
        repo_name,
        revision,
        code_index,
        text_index,
    })
}

async fn decode_old_embedding_index<R>(reader: &mut R) -> Result<OldEmbeddingIndex>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let column_dimension = reader.read_u32_le().await? as usize;
    let embeddings = read_f32s(reader).await?;
    let row_metadata = read_rows(reader).await?;
    let ranks = read_f32s(reader).await?;

    if embeddings.len() != row_metadata.len() * column_dimension {
        return Err(EmbeddingsError::InvalidFormat(format!(
            "legacy index has {} values for {} rows of dimension {column_dimension}",
            embeddings.len(),
            row_metadata.len()
        )));
    }

    Ok(OldEmbeddingIndex {
        embeddings,
        column_dimension,
        row_metadata,
        ranks,
    })
}
