//! Graph-mode retrieval: match query tokens against known entities, then
//! walk the triplet graph and hydrate the chunks the edges came from.

use std::collections::HashMap;

use brain_core::{Result, SearchResult};
use storage::StorageBackend;
use tracing::debug;

/// Entity names whose lowercase form appears as a token in the query
pub fn match_entities(query: &str, entities: &[String]) -> Vec<String> {
  let tokens: std::collections::HashSet<String> = tokenize(query).collect();

  let mut matched: Vec<String> = entities
    .iter()
    .filter(|e| tokens.contains(&e.to_lowercase()))
    .cloned()
    .collect();
  matched.sort();
  matched.dedup();
  matched
}

fn tokenize(query: &str) -> impl Iterator<Item = String> + '_ {
  query
    .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
    .flat_map(|t| t.split('.'))
    .filter(|t| !t.is_empty())
    .map(|t| t.to_lowercase())
}

/// Execute a graph query: traverse from every matched entity, keep the best
/// score per chunk, and hydrate chunk text and metadata from the backend.
///
/// No entity match is an empty result, not an error.
pub async fn graph_search(backend: &dyn StorageBackend, query: &str, depth: usize) -> Result<Vec<SearchResult>> {
  let entities = backend.graph_entities().await?;
  let matched = match_entities(query, &entities);

  if matched.is_empty() {
    debug!(query, "No graph entities matched");
    return Ok(Vec::new());
  }

  // chunk id -> best traversal score
  let mut best: HashMap<String, f32> = HashMap::new();
  for entity in &matched {
    for neighbor in backend.graph_neighbors(entity, depth).await? {
      let score = best.entry(neighbor.chunk_id).or_insert(0.0);
      if neighbor.score > *score {
        *score = neighbor.score;
      }
    }
  }

  let mut results = Vec::with_capacity(best.len());
  for (chunk_id, score) in best {
    // Triplets can outlive their chunk briefly; skip dangling references
    let Some(mut hit) = backend.get_by_id(&chunk_id).await? else {
      continue;
    };
    hit.score = score;
    hit.graph_score = Some(score);
    results.push(hit);
  }

  brain_core::SearchResult::sort_ranked(&mut results);
  Ok(results)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_match_entities_token_match() {
    let entities = vec!["jwt".to_string(), "AuthService".to_string(), "renderer".to_string()];

    let matched = match_entities("what imports jwt", &entities);
    assert_eq!(matched, vec!["jwt"]);
  }

  #[test]
  fn test_match_entities_case_insensitive() {
    let entities = vec!["AuthService".to_string()];
    let matched = match_entities("who calls authservice?", &entities);
    assert_eq!(matched, vec!["AuthService"]);
  }

  #[test]
  fn test_match_entities_dotted_query() {
    let entities = vec!["os".to_string(), "path".to_string()];
    let matched = match_entities("uses of os.path here", &entities);
    assert_eq!(matched, vec!["os", "path"]);
  }

  #[test]
  fn test_match_entities_none() {
    let entities = vec!["jwt".to_string()];
    assert!(match_entities("completely unrelated", &entities).is_empty());
  }

  #[test]
  fn test_match_entities_no_substring_match() {
    // "auth" the entity must not match inside "author"
    let entities = vec!["auth".to_string()];
    assert!(match_entities("the author wrote this", &entities).is_empty());
  }
}
