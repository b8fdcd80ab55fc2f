//! Score normalization shared by both backends.
//!
//! The contract is [0, 1] with higher = better regardless of what the
//! underlying engine returns.

use brain_core::SearchResult;

/// Convert a cosine distance in [0, 2] to a similarity score in [0, 1].
///
/// Backends that already return a similarity in [0, 1] pass it through
/// unchanged instead of calling this.
pub fn score_from_cosine_distance(distance: f32) -> f32 {
  (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Normalize raw keyword scores by the maximum in the result set.
///
/// BM25 scores are unbounded and query-dependent; dividing by the set's max
/// preserves ordering while bringing values into [0, 1]. Scores are not
/// comparable across queries, which is accepted.
pub fn normalize_keyword_scores(results: &mut [SearchResult]) {
  let max = results.iter().map(|r| r.score).fold(0.0f32, f32::max);
  if max <= 0.0 {
    for r in results.iter_mut() {
      r.score = 0.0;
      r.keyword_score = Some(0.0);
    }
    return;
  }

  for r in results.iter_mut() {
    r.score = (r.score / max).clamp(0.0, 1.0);
    r.keyword_score = Some(r.score);
  }
}
