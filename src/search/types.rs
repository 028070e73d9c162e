//! Request and response types of the search API.

use serde::{Deserialize, Serialize};

use crate::embeddings::RepoId;
use crate::error::{EmbeddingsError, Result};

/// One ranked code or text chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSearchResult {
    pub repo_name: String,
    pub revision: String,
    pub file_name: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Row of the hit in the index it came from
    pub row_num: usize,
    /// Lines `[start_line, end_line)` of the file, when a file reader is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub score: i32,
    pub similarity_score: i32,
    /// Score breakdown, only with `SearchParams::debug`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

/// Search request over one or more repositories.
///
/// `repo_names` and `repo_ids` are parallel lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub repo_names: Vec<String>,
    pub repo_ids: Vec<RepoId>,
    pub query: String,
    pub code_results_count: usize,
    pub text_results_count: usize,
    #[serde(default)]
    pub use_document_ranks: bool,
    #[serde(default)]
    pub debug: bool,
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if self.repo_names.len() != self.repo_ids.len() {
            return Err(EmbeddingsError::InvalidRequest {
                reason: format!(
                    "got {} repo names but {} repo ids",
                    self.repo_names.len(),
                    self.repo_ids.len()
                ),
            });
        }
        Ok(())
    }

    /// Pairs each repository name with its id, in request order.
    pub fn repos(&self) -> impl Iterator<Item = (&str, RepoId)> {
        self.repo_names
            .iter()
            .map(String::as_str)
            .zip(self.repo_ids.iter().copied())
    }
}

/// Merged results, each list ordered by descending score.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub code_results: Vec<EmbeddingSearchResult>,
    pub text_results: Vec<EmbeddingSearchResult>,
}
