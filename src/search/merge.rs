//! Combining per-repository result lists into one top-k list.

use crate::search::EmbeddingSearchResult;

/// Appends `partial` to `combined`, re-sorts by descending score and keeps
/// the best `max_results`.
///
/// The sort is stable, so results with equal scores keep the order in which
/// they were merged. The final top-k set does not depend on how the inputs
/// were partitioned.
pub fn merge_truncate(
    combined: &mut Vec<EmbeddingSearchResult>,
    partial: Vec<EmbeddingSearchResult>,
    max_results: usize,
) {
    combined.extend(partial);
    combined.sort_by(|a, b| b.score.cmp(&a.score));
    combined.truncate(max_results);
}
