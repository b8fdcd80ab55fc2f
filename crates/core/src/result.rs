use serde::{Deserialize, Serialize};

use crate::chunk::ChunkMetadata;

/// Backend-agnostic search hit.
///
/// `score` is always normalized to [0, 1] with higher = better, whatever the
/// backend produced internally. Component scores are attached when a fusion
/// mode contributed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
  pub chunk_id: String,
  pub text: String,
  pub metadata: ChunkMetadata,
  pub score: f32,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub vector_score: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub keyword_score: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub graph_score: Option<f32>,
}

impl SearchResult {
  pub fn new(chunk_id: String, text: String, metadata: ChunkMetadata, score: f32) -> Self {
    Self {
      chunk_id,
      text,
      metadata,
      score,
      vector_score: None,
      keyword_score: None,
      graph_score: None,
    }
  }

  /// Sort results descending by score, breaking ties by chunk id ascending
  /// so rankings stay deterministic.
  pub fn sort_ranked(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
  }
}
