//! In-memory embedding indexes for one repository.
//!
//! An [`EmbeddingIndex`] is a flat row-major `i8` matrix plus one metadata
//! entry (and optionally one rank) per row. A [`RepoEmbeddingIndex`] pairs a
//! code index with a text index for a single revision of a repository.
//!
//! Indexes are treated as immutable once they are published behind an `Arc`.
//! [`EmbeddingIndex::filter`] and [`EmbeddingIndex::append`] take `&mut self`
//! and are meant for the window between construction and publication.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingsError, Result};
use crate::search::EmbeddingSearchResult;
use crate::vector::SearchHit;

/// Fixed per-row bookkeeping counted by [`EmbeddingIndex::estimate_size`]:
/// two line numbers plus the string header of the file name.
const ROW_METADATA_OVERHEAD: usize = 8 + std::mem::size_of::<String>();

/// Numeric repository identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId(pub u32);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blob-store key and cache key of a repository's embedding index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoEmbeddingIndexName(String);

impl RepoEmbeddingIndexName {
    /// Bumped whenever the key scheme changes.
    const KEY_VERSION: u32 = 1;

    /// Name derived from the stable repository identifier, not the repo name,
    /// so renames keep their index.
    pub fn for_repo(repo_id: RepoId) -> Self {
        Self(format!(
            "repo_{}_v{}.embeddingindex",
            repo_id.0,
            Self::KEY_VERSION
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoEmbeddingIndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of an embedded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMetadata {
    pub file_name: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl RowMetadata {
    pub fn new(file_name: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            file_name: file_name.into(),
            start_line,
            end_line,
        }
    }
}

/// Quantized embeddings of one kind of content (code or text).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingIndex {
    embeddings: Vec<i8>,
    column_dimension: usize,
    row_metadata: Vec<RowMetadata>,
    ranks: Vec<f32>,
}

impl EmbeddingIndex {
    /// Builds an index, checking that the matrix, metadata and ranks agree.
    ///
    /// `ranks` may be empty, meaning rank zero for every row.
    pub fn new(
        embeddings: Vec<i8>,
        column_dimension: usize,
        row_metadata: Vec<RowMetadata>,
        ranks: Vec<f32>,
    ) -> Result<Self> {
        let n_rows = row_metadata.len();
        if column_dimension == 0 && !embeddings.is_empty() {
            return Err(EmbeddingsError::InvalidFormat(
                "non-empty embeddings with column dimension 0".to_string(),
            ));
        }
        if embeddings.len() != n_rows * column_dimension {
            return Err(EmbeddingsError::InvalidFormat(format!(
                "{} embedding values do not form {n_rows} rows of dimension {column_dimension}",
                embeddings.len()
            )));
        }
        if !ranks.is_empty() && ranks.len() != n_rows {
            return Err(EmbeddingsError::InvalidFormat(format!(
                "{} ranks for {n_rows} rows",
                ranks.len()
            )));
        }

        Ok(Self {
            embeddings,
            column_dimension,
            row_metadata,
            ranks,
        })
    }

    /// An index without rows.
    pub fn empty(column_dimension: usize) -> Self {
        Self {
            column_dimension,
            ..Self::default()
        }
    }

    pub fn embeddings(&self) -> &[i8] {
        &self.embeddings
    }

    pub fn column_dimension(&self) -> usize {
        self.column_dimension
    }

    pub fn row_metadata(&self) -> &[RowMetadata] {
        &self.row_metadata
    }

    pub fn ranks(&self) -> &[f32] {
        &self.ranks
    }

    pub fn n_rows(&self) -> usize {
        self.row_metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_metadata.is_empty()
    }

    /// The embedding of row `i`.
    ///
    /// # Panics
    /// Panics if `i >= n_rows()`.
    #[inline]
    pub fn row(&self, i: usize) -> &[i8] {
        let start = i * self.column_dimension;
        &self.embeddings[start..start + self.column_dimension]
    }

    /// Rank of row `i`, zero when the index carries no ranks.
    #[inline]
    pub fn rank(&self, i: usize) -> f32 {
        self.ranks.get(i).copied().unwrap_or(0.0)
    }

    /// Approximate resident size in bytes, used for cache accounting.
    pub fn estimate_size(&self) -> u64 {
        let metadata: usize = self
            .row_metadata
            .iter()
            .map(|row| row.file_name.len() + ROW_METADATA_OVERHEAD)
            .sum();
        (self.embeddings.len() + metadata + self.ranks.len() * std::mem::size_of::<f32>()) as u64
    }

    /// Removes every row that belongs to one of `file_names`, keeping the
    /// order of the remaining rows. Returns the number of removed rows.
    pub fn filter(&mut self, file_names: &HashSet<String>) -> usize {
        if file_names.is_empty() || self.is_empty() {
            return 0;
        }

        let dimension = self.column_dimension;
        let has_ranks = !self.ranks.is_empty();
        let mut kept = 0;
        for i in 0..self.row_metadata.len() {
            if file_names.contains(&self.row_metadata[i].file_name) {
                continue;
            }
            if kept != i {
                self.embeddings
                    .copy_within(i * dimension..(i + 1) * dimension, kept * dimension);
                self.row_metadata.swap(kept, i);
                if has_ranks {
                    self.ranks[kept] = self.ranks[i];
                }
            }
            kept += 1;
        }

        let removed = self.row_metadata.len() - kept;
        self.embeddings.truncate(kept * dimension);
        self.row_metadata.truncate(kept);
        if has_ranks {
            self.ranks.truncate(kept);
        }
        removed
    }

    /// Appends the rows of `other`.
    ///
    /// Ranks are kept only if both sides have them (or one side is empty).
    pub fn append(&mut self, other: EmbeddingIndex) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.column_dimension != self.column_dimension {
            return Err(dimension_mismatch(&other, self));
        }

        let keep_ranks = !self.ranks.is_empty() && !other.ranks.is_empty();
        self.embeddings.extend_from_slice(&other.embeddings);
        self.row_metadata.extend(other.row_metadata);
        if keep_ranks {
            self.ranks.extend_from_slice(&other.ranks);
        } else {
            self.ranks.clear();
        }
        Ok(())
    }

    /// Fails if `other` could not be appended once the rows of `removed`
    /// files are filtered out.
    fn check_append_after_filter(
        &self,
        other: &EmbeddingIndex,
        removed: &HashSet<String>,
    ) -> Result<()> {
        let survives = self
            .row_metadata
            .iter()
            .any(|row| !removed.contains(&row.file_name));
        if other.is_empty() || !survives || other.column_dimension == self.column_dimension {
            return Ok(());
        }
        Err(dimension_mismatch(other, self))
    }

    /// Attaches row metadata to similarity-search hits.
    pub fn to_search_results(
        &self,
        hits: &[SearchHit],
        repo_name: &str,
        revision: &str,
        debug: bool,
    ) -> Vec<EmbeddingSearchResult> {
        hits.iter()
            .map(|hit| {
                let row = &self.row_metadata[hit.row_num];
                EmbeddingSearchResult {
                    repo_name: repo_name.to_string(),
                    revision: revision.to_string(),
                    file_name: row.file_name.clone(),
                    start_line: row.start_line,
                    end_line: row.end_line,
                    row_num: hit.row_num,
                    content: None,
                    score: hit.score,
                    similarity_score: hit.similarity_score,
                    debug: debug.then(|| {
                        format!(
                            "score: {}, similarity: {}, rank: {}",
                            hit.score, hit.similarity_score, hit.rank_score
                        )
                    }),
                }
            })
            .collect()
    }
}

fn dimension_mismatch(other: &EmbeddingIndex, index: &EmbeddingIndex) -> EmbeddingsError {
    EmbeddingsError::InvalidFormat(format!(
        "cannot append rows of dimension {} to an index of dimension {}",
        other.column_dimension, index.column_dimension
    ))
}

/// Code and text embeddings of one repository revision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepoEmbeddingIndex {
    pub repo_name: String,
    pub revision: String,
    /// Model the index was computed with; empty when unknown.
    pub embedding_model: String,
    pub code_index: EmbeddingIndex,
    pub text_index: EmbeddingIndex,
}

impl RepoEmbeddingIndex {
    pub fn estimate_size(&self) -> u64 {
        (self.repo_name.len() + self.revision.len() + self.embedding_model.len()) as u64
            + self.code_index.estimate_size()
            + self.text_index.estimate_size()
    }

    /// Moves the index to `revision`: rows of `deleted_files` (and of files
    /// that were re-embedded) are dropped, then the new rows are appended.
    ///
    /// On error the index is left untouched.
    pub fn apply_update(
        &mut self,
        revision: impl Into<String>,
        deleted_files: &HashSet<String>,
        code_update: EmbeddingIndex,
        text_update: EmbeddingIndex,
    ) -> Result<()> {
        let mut stale = deleted_files.clone();
        stale.extend(
            code_update
                .row_metadata()
                .iter()
                .chain(text_update.row_metadata())
                .map(|row| row.file_name.clone()),
        );

        self.code_index.check_append_after_filter(&code_update, &stale)?;
        self.text_index.check_append_after_filter(&text_update, &stale)?;

        let removed = self.code_index.filter(&stale) + self.text_index.filter(&stale);
        self.code_index.append(code_update)?;
        self.text_index.append(text_update)?;
        self.revision = revision.into();

        tracing::debug!(
            "[index] updated {} to {}: removed {removed} stale rows",
            self.repo_name,
            self.revision
        );
        Ok(())
    }
}
