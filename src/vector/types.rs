//! Options and result types shared by the similarity search functions.

use std::cmp::Ordering;

/// Horizontal partitioning of a row scan across the rayon pool.
///
/// The scan is split only when `num_workers > 1` and the index has at least
/// `min_rows_to_split` rows. Results are identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub num_workers: usize,
    pub min_rows_to_split: usize,
}

impl WorkerOptions {
    /// Always scan on the calling thread.
    pub const fn single_threaded() -> Self {
        Self {
            num_workers: 1,
            min_rows_to_split: 0,
        }
    }

    pub(crate) fn partitions_for(&self, n_rows: usize) -> usize {
        if self.num_workers > 1 && n_rows >= self.min_rows_to_split {
            self.num_workers.min(n_rows.max(1))
        } else {
            1
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::single_threaded()
    }
}

/// Scoring options for a similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOptions {
    /// Blend per-row document ranks into the score.
    pub use_document_ranks: bool,
}

/// One scored row of an embedding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    /// Row position in the index
    pub row_num: usize,
    /// Combined score used for ordering
    pub score: i32,
    /// Similarity component of the score
    pub similarity_score: i32,
    /// Document-rank component of the score (zero when ranks are off)
    pub rank_score: i32,
}

impl Ord for SearchHit {
    /// Higher score is greater; on equal scores the earlier row is greater,
    /// so sorting descending keeps row order for ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.row_num.cmp(&self.row_num))
    }
}

impl PartialOrd for SearchHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
