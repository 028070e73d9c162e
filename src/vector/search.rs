//! Brute-force top-k similarity search over an [`EmbeddingIndex`].
//!
//! Every row is scored against the query with the integer dot product. The
//! best `k` rows are kept in a bounded min-heap, so memory stays at `O(k)`
//! regardless of index size. Large indexes can be partitioned across the
//! rayon pool; each partition keeps its own heap and the heaps are merged.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::Range;

use rayon::prelude::*;

use crate::embeddings::EmbeddingIndex;
use crate::vector::kernel::dot;
use crate::vector::{SearchHit, SearchOptions, WorkerOptions};

/// Multiplier applied to the raw dot product.
const SIMILARITY_WEIGHT: i32 = 2;

/// Score contributed by a maximally ranked document.
const FILE_RANK_WEIGHT: f32 = 1000.0;

/// Ranks are log2 reference counts; anything at or above this is maximal.
const MAX_LOG_RANK: f32 = 32.0;

impl EmbeddingIndex {
    /// Returns the `k` rows most similar to `query`, best first.
    ///
    /// `k` is clamped to the number of rows; `k == 0` returns immediately.
    ///
    /// # Panics
    /// Panics if `query.len()` differs from the column dimension.
    pub fn similarity_search(
        &self,
        query: &[i8],
        k: usize,
        workers: WorkerOptions,
        options: SearchOptions,
    ) -> Vec<SearchHit> {
        let k = k.min(self.n_rows());
        if k == 0 {
            return Vec::new();
        }
        assert_eq!(
            query.len(),
            self.column_dimension(),
            "query dimension does not match index column dimension"
        );

        let partitions = workers.partitions_for(self.n_rows());
        let heap = if partitions <= 1 {
            self.scan_rows(query, k, 0..self.n_rows(), options)
        } else {
            let rows_per_partition = self.n_rows().div_ceil(partitions);
            let partial: Vec<BinaryHeap<Reverse<SearchHit>>> = (0..partitions)
                .into_par_iter()
                .map(|p| {
                    let start = (p * rows_per_partition).min(self.n_rows());
                    let end = ((p + 1) * rows_per_partition).min(self.n_rows());
                    self.scan_rows(query, k, start..end, options)
                })
                .collect();

            let mut merged = BinaryHeap::with_capacity(k);
            for heap in partial {
                for Reverse(hit) in heap {
                    push_bounded(&mut merged, hit, k);
                }
            }
            merged
        };

        // Ascending in Reverse order is descending by score.
        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse(hit)| hit)
            .collect()
    }

    fn scan_rows(
        &self,
        query: &[i8],
        k: usize,
        rows: Range<usize>,
        options: SearchOptions,
    ) -> BinaryHeap<Reverse<SearchHit>> {
        let mut heap = BinaryHeap::with_capacity(k);
        for row_num in rows {
            push_bounded(&mut heap, self.score(query, row_num, options), k);
        }
        heap
    }

    fn score(&self, query: &[i8], row_num: usize, options: SearchOptions) -> SearchHit {
        let similarity_score = SIMILARITY_WEIGHT.wrapping_mul(dot(self.row(row_num), query));
        let rank_score = if options.use_document_ranks {
            rank_score(self.rank(row_num))
        } else {
            0
        };

        SearchHit {
            row_num,
            score: similarity_score.wrapping_add(rank_score),
            similarity_score,
            rank_score,
        }
    }
}

fn rank_score(rank: f32) -> i32 {
    let normalized = (rank / MAX_LOG_RANK).clamp(0.0, 1.0);
    (FILE_RANK_WEIGHT * normalized).round() as i32
}

/// Keeps the `k` greatest hits: fills up to `k`, then replaces the minimum
/// only when the candidate beats it.
fn push_bounded(heap: &mut BinaryHeap<Reverse<SearchHit>>, hit: SearchHit, k: usize) {
    if heap.len() < k {
        heap.push(Reverse(hit));
    } else if let Some(mut min) = heap.peek_mut() {
        if hit > min.0 {
            *min = Reverse(hit);
        }
    }
}
