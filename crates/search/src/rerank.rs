//! Rule-based reranking applied after retrieval.
//!
//! Cheap lexical signals adjust fused scores before truncation: exact query
//! terms appearing in a symbol name or text, and query terms appearing in
//! the source path. No model calls; the provider/model fields of the config
//! are reserved for a future learned reranker.

use brain_core::{RerankerConfig, SearchResult};

const EXACT_MATCH_BOOST: f32 = 0.10;
const SYMBOL_MATCH_BOOST: f32 = 0.15;
const PATH_MATCH_BOOST: f32 = 0.05;

#[derive(Debug, Clone)]
pub struct RuleBasedReranker {
  /// Results to keep after reranking
  pub top_k: usize,
  /// Results fed into the reranker from retrieval
  pub initial_top_k: usize,
}

impl RuleBasedReranker {
  /// Build from the provider settings section; `None` when disabled
  pub fn from_config(config: &RerankerConfig) -> Option<Self> {
    if !config.enabled {
      return None;
    }
    let top_k = config.top_k.max(1);
    Some(Self {
      top_k,
      initial_top_k: config.initial_top_k.max(top_k),
    })
  }

  /// Adjust scores in place and re-sort. Scores stay within [0, 1].
  pub fn rerank(&self, query: &str, results: &mut Vec<SearchResult>) {
    let terms: Vec<String> = query
      .split(|c: char| !c.is_alphanumeric() && c != '_')
      .filter(|t| t.len() > 1)
      .map(|t| t.to_lowercase())
      .collect();

    if terms.is_empty() {
      return;
    }

    for result in results.iter_mut() {
      let mut boost = 0.0f32;

      let text = result.text.to_lowercase();
      let path = result.metadata.source.to_lowercase();
      let symbol = result.metadata.symbol_name.as_deref().map(str::to_lowercase);

      for term in &terms {
        if let Some(symbol) = &symbol
          && symbol == term
        {
          boost += SYMBOL_MATCH_BOOST;
        }
        if text.contains(term) {
          boost += EXACT_MATCH_BOOST / terms.len() as f32;
        }
        if path.contains(term) {
          boost += PATH_MATCH_BOOST / terms.len() as f32;
        }
      }

      result.score = (result.score + boost).min(1.0);
    }

    SearchResult::sort_ranked(results);
    results.truncate(self.top_k);
  }
}
