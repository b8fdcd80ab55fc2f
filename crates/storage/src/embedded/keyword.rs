// On-disk inverted keyword index built on the `bm25` crate.
//
// The scorer lives in memory; document texts are persisted under
// `embedded_keyword/` and the scorer is rebuilt from them on open. Removed
// documents are dropped from the text map immediately and filtered out of
// match results; the stale scorer entries disappear on the next rebuild.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use bm25::{Embedder, EmbedderBuilder, Scorer};
use brain_core::paths::atomic_write;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Term-frequency saturation; lowered from the textbook 1.2 because code and
/// API docs repeat identifiers heavily.
const BM25_K1: f32 = 0.9;
/// Length normalization; prose-leaning middle ground.
const BM25_B: f32 = 0.6;
const DEFAULT_AVGDL: f32 = 100.0;

const INDEX_FILE: &str = "keyword_index.json";

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
  avgdl: f32,
  /// chunk id -> indexed text
  docs: HashMap<String, String>,
}

/// BM25 keyword index over chunk texts
pub struct KeywordIndex {
  embedder: Embedder,
  scorer: Scorer<String>,
  docs: HashMap<String, String>,
  avgdl: f32,
  path: PathBuf,
}

impl KeywordIndex {
  /// Load the index from `dir`, or start empty if nothing is persisted yet
  pub fn open(dir: &Path) -> std::io::Result<Self> {
    let path = dir.join(INDEX_FILE);

    let persisted: Option<PersistedIndex> = match std::fs::read_to_string(&path) {
      Ok(contents) => serde_json::from_str(&contents).ok(),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
      Err(e) => return Err(e),
    };

    let (avgdl, docs) = match persisted {
      Some(p) => (p.avgdl, p.docs),
      None => (DEFAULT_AVGDL, HashMap::new()),
    };

    let mut index = Self {
      embedder: build_embedder(avgdl),
      scorer: Scorer::new(),
      docs: HashMap::new(),
      avgdl,
      path,
    };

    // Rebuild the scorer by re-embedding persisted texts; sparse embeddings
    // cannot be restored directly.
    let count = docs.len();
    for (id, text) in docs {
      index.insert(id, text);
    }
    if count > 0 {
      debug!(count, "Rebuilt keyword scorer from persisted texts");
    }

    Ok(index)
  }

  fn insert(&mut self, id: String, text: String) {
    let embedding = self.embedder.embed(&text);
    self.scorer.upsert(&id, embedding);
    self.docs.insert(id, text);
  }

  /// Add or replace documents in the index
  pub fn upsert(&mut self, docs: impl IntoIterator<Item = (String, String)>) {
    for (id, text) in docs {
      self.insert(id, text);
    }
    self.refresh_avgdl();
  }

  /// Remove documents by id. Unknown ids are ignored.
  pub fn remove(&mut self, ids: &[String]) {
    for id in ids {
      self.docs.remove(id);
    }
  }

  /// Raw BM25 matches, best first. Scores are unbounded; callers normalize.
  pub fn search(&self, query: &str, limit: usize) -> Vec<(String, f32)> {
    let query_embedding = self.embedder.embed(query);

    self
      .scorer
      .matches(&query_embedding)
      .into_iter()
      .filter(|m| self.docs.contains_key(&m.id))
      .take(limit)
      .map(|m| (m.id, m.score))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.docs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.docs.is_empty()
  }

  pub fn clear(&mut self) {
    self.docs.clear();
    self.scorer = Scorer::new();
    self.avgdl = DEFAULT_AVGDL;
    self.embedder = build_embedder(self.avgdl);
  }

  /// Serialized form for persistence; written by the owning backend
  pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&PersistedIndex {
      avgdl: self.avgdl,
      docs: self.docs.clone(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Persist the index to disk atomically
  pub fn save(&self) -> std::io::Result<()> {
    let json = self.to_json()?;
    atomic_write(&self.path, &json)
  }

  fn refresh_avgdl(&mut self) {
    if self.docs.is_empty() {
      return;
    }

    let total: usize = self.docs.values().map(|t| t.split_whitespace().count()).sum();
    let avgdl = (total as f32 / self.docs.len() as f32).max(1.0);

    // Rebuilding the embedder for every small drift would churn; only do it
    // when the average moved noticeably.
    if (avgdl - self.avgdl).abs() / self.avgdl > 0.25 {
      self.avgdl = avgdl;
      self.embedder = build_embedder(avgdl);
      let docs = std::mem::take(&mut self.docs);
      self.scorer = Scorer::new();
      for (id, text) in docs {
        self.insert(id, text);
      }
    }
  }
}

fn build_embedder(avgdl: f32) -> Embedder {
  EmbedderBuilder::with_avgdl(avgdl).k1(BM25_K1).b(BM25_B).build()
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  fn index(temp: &TempDir) -> KeywordIndex {
    KeywordIndex::open(temp.path()).unwrap()
  }

  #[test]
  fn test_exact_term_ranks_first() {
    let temp = TempDir::new().unwrap();
    let mut idx = index(&temp);

    idx.upsert([
      ("a".to_string(), "def authenticate_user(token): validate token".to_string()),
      ("b".to_string(), "def render_page(template): return html".to_string()),
    ]);

    let hits = idx.search("authenticate_user", 5);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].0, "a");
  }

  #[test]
  fn test_limit_larger_than_corpus_is_fine() {
    let temp = TempDir::new().unwrap();
    let mut idx = index(&temp);
    idx.upsert([("a".to_string(), "one two three".to_string())]);

    let hits = idx.search("two", 50);
    assert_eq!(hits.len(), 1);
  }

  #[test]
  fn test_removed_docs_do_not_match() {
    let temp = TempDir::new().unwrap();
    let mut idx = index(&temp);
    idx.upsert([("a".to_string(), "needle in haystack".to_string())]);
    idx.remove(&["a".to_string()]);

    assert!(idx.search("needle", 5).is_empty());
    assert!(idx.is_empty());
  }

  #[test]
  fn test_persistence_roundtrip() {
    let temp = TempDir::new().unwrap();
    {
      let mut idx = index(&temp);
      idx.upsert([("a".to_string(), "persistent keyword search".to_string())]);
      idx.save().unwrap();
    }

    let idx = index(&temp);
    assert_eq!(idx.len(), 1);
    let hits = idx.search("persistent", 5);
    assert_eq!(hits[0].0, "a");
  }

  #[test]
  fn test_clear_empties_index() {
    let temp = TempDir::new().unwrap();
    let mut idx = index(&temp);
    idx.upsert([("a".to_string(), "something".to_string())]);
    idx.clear();
    assert!(idx.search("something", 5).is_empty());
  }
}
