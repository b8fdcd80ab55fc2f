//! Rank fusion: relative-score fusion for hybrid, RRF for multi.
//!
//! Both are deterministic: equal final scores order by chunk id ascending.

use std::collections::HashMap;

use brain_core::SearchResult;

/// Weighted relative-score fusion of a vector and a keyword ranking.
///
/// `final = alpha * vector + (1 - alpha) * keyword`, with a missing
/// contribution counting as 0. Results carry both component scores.
pub fn relative_score_fusion(vector: Vec<SearchResult>, keyword: Vec<SearchResult>, alpha: f32) -> Vec<SearchResult> {
  let alpha = alpha.clamp(0.0, 1.0);
  let mut merged: HashMap<String, SearchResult> = HashMap::new();

  for result in vector {
    let score = result.score;
    let entry = merged.entry(result.chunk_id.clone()).or_insert(result);
    entry.vector_score = Some(score);
  }

  for result in keyword {
    let score = result.score;
    match merged.get_mut(&result.chunk_id) {
      Some(entry) => entry.keyword_score = Some(score),
      None => {
        let mut entry = result;
        entry.keyword_score = Some(score);
        merged.insert(entry.chunk_id.clone(), entry);
      }
    }
  }

  let mut results: Vec<SearchResult> = merged
    .into_values()
    .map(|mut r| {
      let v = r.vector_score.unwrap_or(0.0);
      let k = r.keyword_score.unwrap_or(0.0);
      r.score = alpha * v + (1.0 - alpha) * k;
      r
    })
    .collect();

  SearchResult::sort_ranked(&mut results);
  results
}

/// Reciprocal Rank Fusion over any number of rankings.
///
/// `RRF(d) = sum over rankings of 1 / (k + rank(d))`, ranks 1-based, absent
/// rankings contributing 0. With the conventional k this stays well inside
/// [0, 1].
pub fn reciprocal_rank_fusion(rankings: Vec<Vec<SearchResult>>, k: f32) -> Vec<SearchResult> {
  let mut merged: HashMap<String, SearchResult> = HashMap::new();
  let mut rrf: HashMap<String, f32> = HashMap::new();

  for ranking in rankings {
    for (i, result) in ranking.into_iter().enumerate() {
      let rank = (i + 1) as f32;
      *rrf.entry(result.chunk_id.clone()).or_insert(0.0) += 1.0 / (k + rank);

      match merged.get_mut(&result.chunk_id) {
        Some(entry) => {
          // Keep whichever component scores each retriever attached
          entry.vector_score = entry.vector_score.or(result.vector_score);
          entry.keyword_score = entry.keyword_score.or(result.keyword_score);
          entry.graph_score = entry.graph_score.or(result.graph_score);
        }
        None => {
          merged.insert(result.chunk_id.clone(), result);
        }
      }
    }
  }

  let mut results: Vec<SearchResult> = merged
    .into_values()
    .map(|mut r| {
      r.score = rrf.get(&r.chunk_id).copied().unwrap_or(0.0);
      r
    })
    .collect();

  SearchResult::sort_ranked(&mut results);
  results
}
