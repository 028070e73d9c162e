//! Streaming binary codec for [`RepoEmbeddingIndex`].
//!
//! # Format (version 2)
//!
//! All integers are little-endian, strings are `u32` length + UTF-8 bytes.
//!
//! ```text
//! "REIX" u8:version
//! string:repo_name string:revision string:embedding_model
//! code index, text index, each:
//!     u32:chunk_count { u32:len  len x i8 }*   (len <= EMBEDDINGS_CHUNK_SIZE)
//!     u32:column_dimension
//!     u64:row_count { string:file_name u32:start_line u32:end_line }*
//!     u64:rank_count { f32 }*
//! ```
//!
//! There is no end marker; counts drive termination. Streams without the
//! magic prefix are decoded as the legacy float layout, see
//! [`super::legacy`].
//!
//! Encoding never materializes the whole blob: [`upload_repo_embedding_index`]
//! pipes the encoder straight into the blob-store upload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::embeddings::legacy;
use crate::embeddings::{EmbeddingIndex, RepoEmbeddingIndex, RepoEmbeddingIndexName, RowMetadata};
use crate::error::{EmbeddingsError, Result};
use crate::storage::BlobStore;

/// Magic bytes identifying the versioned format.
pub const MAGIC_BYTES: &[u8; 4] = b"REIX";

/// Current format version.
pub const FORMAT_VERSION: u8 = 2;

/// Upper bound for the number of embedding values in one chunk (and thus
/// in one write).
pub const EMBEDDINGS_CHUNK_SIZE: usize = 1000;

/// In-memory pipe capacity between encoder and uploader.
const PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// Largest string the decoder accepts; guards allocations on corrupt input.
const MAX_STRING_LEN: usize = 1 << 20;

/// Largest up-front allocation for a decoded sequence.
const MAX_PREALLOCATION: usize = 1 << 16;

/// Writes `index` in the current format.
pub async fn encode_repo_embedding_index<W>(
    writer: &mut W,
    index: &RepoEmbeddingIndex,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(MAGIC_BYTES).await?;
    writer.write_u8(FORMAT_VERSION).await?;
    write_string(writer, &index.repo_name).await?;
    write_string(writer, &index.revision).await?;
    write_string(writer, &index.embedding_model).await?;
    encode_embedding_index(writer, &index.code_index).await?;
    encode_embedding_index(writer, &index.text_index).await?;
    Ok(())
}

async fn encode_embedding_index<W>(writer: &mut W, index: &EmbeddingIndex) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let chunks = index.embeddings().chunks(EMBEDDINGS_CHUNK_SIZE);
    writer.write_u32_le(len_u32(chunks.len())?).await?;

    let mut buffer = Vec::with_capacity(EMBEDDINGS_CHUNK_SIZE);
    for chunk in chunks {
        buffer.clear();
        buffer.extend(chunk.iter().map(|&value| value as u8));
        writer.write_u32_le(len_u32(buffer.len())?).await?;
        writer.write_all(&buffer).await?;
    }

    writer.write_u32_le(len_u32(index.column_dimension())?).await?;
    write_rows(writer, index.row_metadata()).await?;
    write_f32s(writer, index.ranks()).await?;
    Ok(())
}

/// Reads an index in the current or the legacy format.
pub async fn decode_repo_embedding_index<R>(reader: &mut R) -> Result<RepoEmbeddingIndex>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;

    if &prefix != MAGIC_BYTES {
        // Legacy blobs start directly with the repo name length.
        tracing::debug!("[codec] no format header, decoding legacy float index");
        let repo_name_len = u32::from_le_bytes(prefix);
        let old = legacy::decode_old_repo_embedding_index(reader, repo_name_len).await?;
        return old.to_new_index();
    }

    let version = reader.read_u8().await?;
    if version != FORMAT_VERSION {
        return Err(EmbeddingsError::InvalidFormat(format!(
            "unsupported index format version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let repo_name = read_string(reader).await?;
    let revision = read_string(reader).await?;
    let embedding_model = read_string(reader).await?;
    let code_index = decode_embedding_index(reader).await?;
    let text_index = decode_embedding_index(reader).await?;

    Ok(RepoEmbeddingIndex {
        repo_name,
        revision,
        embedding_model,
        code_index,
        text_index,
    })
}

async fn decode_embedding_index<R>(reader: &mut R) -> Result<EmbeddingIndex>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let chunk_count = reader.read_u32_le().await? as usize;
    let capacity = chunk_count.saturating_mul(EMBEDDINGS_CHUNK_SIZE);
    let mut embeddings: Vec<i8> = Vec::with_capacity(capacity.min(MAX_PREALLOCATION));
    let mut buffer = vec![0u8; EMBEDDINGS_CHUNK_SIZE];
    for _ in 0..chunk_count {
        let len = reader.read_u32_le().await? as usize;
        if len > EMBEDDINGS_CHUNK_SIZE {
            return Err(EmbeddingsError::InvalidFormat(format!(
                "embeddings chunk of {len} values exceeds the chunk size {EMBEDDINGS_CHUNK_SIZE}"
            )));
        }
        reader.read_exact(&mut buffer[..len]).await?;
        embeddings.extend(buffer[..len].iter().map(|&byte| byte as i8));
    }

    let column_dimension = reader.read_u32_le().await? as usize;
    let row_metadata = read_rows(reader).await?;
    let ranks = read_f32s(reader).await?;

    EmbeddingIndex::new(embeddings, column_dimension, row_metadata, ranks)
}

/// Encodes `index` into the blob store under `name` without buffering the
/// whole blob. Returns the number of bytes uploaded.
///
/// The encoder and the upload run concurrently on the two ends of a pipe;
/// the first failure on either side cancels the other. An upload that
/// returns before consuming the whole stream fails the encoder with a
/// broken pipe.
pub async fn upload_repo_embedding_index(
    store: &dyn BlobStore,
    name: &RepoEmbeddingIndexName,
    index: &RepoEmbeddingIndex,
) -> Result<u64> {
    let (pipe_writer, mut pipe_reader) = tokio::io::duplex(PIPE_BUFFER_SIZE);

    let encode = async move {
        let mut writer = BufWriter::new(pipe_writer);
        encode_repo_embedding_index(&mut writer, index).await?;
        // Closes the write half so the uploader sees end of stream.
        writer.shutdown().await?;
        Ok::<_, EmbeddingsError>(())
    };
    // The read half is dropped as soon as the upload returns.
    let upload = async move { store.upload(name.as_str(), &mut pipe_reader).await };

    let ((), written) = tokio::try_join!(encode, upload)?;
    tracing::debug!(
        "[codec] uploaded {name} ({written} bytes, {} code rows, {} text rows)",
        index.code_index.n_rows(),
        index.text_index.n_rows()
    );
    Ok(written)
}

/// Streams the blob `name` through the decoder. `None` if no blob exists.
pub async fn download_repo_embedding_index(
    store: &dyn BlobStore,
    name: &RepoEmbeddingIndexName,
) -> Result<Option<RepoEmbeddingIndex>> {
    let Some(blob) = store.get(name.as_str()).await? else {
        return Ok(None);
    };
    let mut reader = BufReader::new(blob);
    decode_repo_embedding_index(&mut reader).await.map(Some)
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        EmbeddingsError::InvalidFormat(format!("length {len} does not fit the index format"))
    })
}

pub(super) async fn write_string<W>(writer: &mut W, value: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_u32_le(len_u32(value.len())?).await?;
    writer.write_all(value.as_bytes()).await?;
    Ok(())
}

pub(super) async fn read_string<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u32_le().await? as usize;
    read_string_of_len(reader, len).await
}

pub(super) async fn read_string_of_len<R>(reader: &mut R, len: usize) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if len > MAX_STRING_LEN {
        return Err(EmbeddingsError::InvalidFormat(format!(
            "string of {len} bytes exceeds the limit of {MAX_STRING_LEN}"
        )));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes)
        .map_err(|e| EmbeddingsError::InvalidFormat(format!("string is not UTF-8: {e}")))
}

pub(super) async fn write_rows<W>(writer: &mut W, rows: &[RowMetadata]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_u64_le(rows.len() as u64).await?;
    for row in rows {
        write_string(writer, &row.file_name).await?;
        writer.write_u32_le(row.start_line).await?;
        writer.write_u32_le(row.end_line).await?;
    }
    Ok(())
}

pub(super) async fn read_rows<R>(reader: &mut R) -> Result<Vec<RowMetadata>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let count = read_count(reader).await?;
    let mut rows = Vec::with_capacity(count.min(MAX_PREALLOCATION));
    for _ in 0..count {
        let file_name = read_string(reader).await?;
        let start_line = reader.read_u32_le().await?;
        let end_line = reader.read_u32_le().await?;
        rows.push(RowMetadata {
            file_name,
            start_line,
            end_line,
        });
    }
    Ok(rows)
}

pub(super) async fn write_f32s<W>(writer: &mut W, values: &[f32]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_u64_le(values.len() as u64).await?;
    for &value in values {
        writer.write_f32_le(value).await?;
    }
    Ok(())
}

pub(super) async fn read_f32s<R>(reader: &mut R) -> Result<Vec<f32>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let count = read_count(reader).await?;
    let mut values = Vec::with_capacity(count.min(MAX_PREALLOCATION));
    for _ in 0..count {
        values.push(reader.read_f32_le().await?);
    }
    Ok(values)
}

async fn read_count<R>(reader: &mut R) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let count = reader.read_u64_le().await?;
    usize::try_from(count)
        .map_err(|_| EmbeddingsError::InvalidFormat(format!("count {count} is too large")))
}
