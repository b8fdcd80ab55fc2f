// In-memory property graph persisted as a single JSON file.
//
// Triplets are value records keyed by entity name; traversal is BFS with a
// depth bound over an entity -> triplet-ids index. No pointer graphs, so
// cycles among entities are harmless.

use std::{
  collections::{HashMap, HashSet, VecDeque},
  path::{Path, PathBuf},
};

use brain_core::{Triplet, paths::atomic_write};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::GraphNeighbor;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedGraph {
  triplets: Vec<Triplet>,
  /// entity -> triplet indexes. Rebuilt from the triplet list on load; kept
  /// in the file so it is inspectable without replaying the list.
  #[serde(default)]
  entity_index: HashMap<String, Vec<usize>>,
}

/// Triplet store with an entity index for traversal
#[derive(Debug)]
pub struct GraphStore {
  triplets: Vec<Triplet>,
  /// lowercased entity name -> indexes into `triplets` where it appears
  entity_index: HashMap<String, Vec<usize>>,
  /// lowercased entity name -> display form
  display: HashMap<String, String>,
  path: PathBuf,
}

impl GraphStore {
  /// Load the graph from `path`, or start empty
  pub fn open(path: &Path) -> std::io::Result<Self> {
    let persisted: PersistedGraph = match std::fs::read_to_string(path) {
      Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedGraph::default(),
      Err(e) => return Err(e),
    };

    let mut store = Self {
      triplets: Vec::new(),
      entity_index: HashMap::new(),
      display: HashMap::new(),
      path: path.to_path_buf(),
    };

    let count = persisted.triplets.len();
    store.put(persisted.triplets);
    if count > 0 {
      debug!(triplets = count, "Loaded graph store");
    }

    Ok(store)
  }

  /// Insert triplets, deduplicating on `(subject, predicate, object, chunk)`
  pub fn put(&mut self, triplets: Vec<Triplet>) {
    let mut seen: HashSet<String> = self.triplets.iter().map(Triplet::key).collect();

    for triplet in triplets {
      if !seen.insert(triplet.key()) {
        continue;
      }

      let idx = self.triplets.len();
      for entity in [&triplet.subject, &triplet.object] {
        let key = entity.to_lowercase();
        self.entity_index.entry(key.clone()).or_default().push(idx);
        self.display.entry(key).or_insert_with(|| entity.clone());
      }
      self.triplets.push(triplet);
    }
  }

  /// Drop every triplet derived from the given chunks and reindex
  pub fn remove_chunks(&mut self, chunk_ids: &[String]) {
    if chunk_ids.is_empty() {
      return;
    }

    let doomed: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
    let remaining: Vec<Triplet> = self
      .triplets
      .drain(..)
      .filter(|t| !doomed.contains(t.source_chunk_id.as_str()))
      .collect();

    self.entity_index.clear();
    self.display.clear();
    self.put(remaining);
  }

  /// Known entity display names
  pub fn entities(&self) -> Vec<String> {
    self.display.values().cloned().collect()
  }

  pub fn triplet_count(&self) -> usize {
    self.triplets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.triplets.is_empty()
  }

  pub fn clear(&mut self) {
    self.triplets.clear();
    self.entity_index.clear();
    self.display.clear();
  }

  /// BFS out from `entity`, collecting the source chunks of every edge
  /// encountered within `depth` hops.
  ///
  /// Chunks reached through a shorter walk score higher (`1 / distance`);
  /// ties are broken by how frequently the reached entity appears in the
  /// graph, then by chunk id.
  pub fn neighbors(&self, entity: &str, depth: usize) -> Vec<GraphNeighbor> {
    let start = entity.to_lowercase();
    if !self.entity_index.contains_key(&start) {
      return Vec::new();
    }

    // entity -> (distance, path of display names)
    let mut visited: HashMap<String, (usize, Vec<String>)> = HashMap::new();
    let mut queue = VecDeque::new();
    let start_display = self.display.get(&start).cloned().unwrap_or_else(|| entity.to_string());
    visited.insert(start.clone(), (0, vec![start_display]));
    queue.push_back(start);

    // chunk id -> (best distance, path, frequency of the entity that led here)
    let mut hits: HashMap<String, (usize, Vec<String>, usize)> = HashMap::new();

    while let Some(current) = queue.pop_front() {
      let (dist, path) = visited[&current].clone();
      if dist >= depth {
        continue;
      }

      let Some(indexes) = self.entity_index.get(&current) else {
        continue;
      };

      for &idx in indexes {
        let triplet = &self.triplets[idx];

        // The edge itself is reached at dist + 1
        let edge_dist = dist + 1;
        let other = if triplet.subject.to_lowercase() == current {
          &triplet.object
        } else {
          &triplet.subject
        };
        let other_key = other.to_lowercase();
        let frequency = self.entity_index.get(&other_key).map_or(0, Vec::len);

        let mut edge_path = path.clone();
        edge_path.push(other.clone());

        match hits.get(&triplet.source_chunk_id) {
          Some((best, _, _)) if *best <= edge_dist => {}
          _ => {
            hits.insert(triplet.source_chunk_id.clone(), (edge_dist, edge_path.clone(), frequency));
          }
        }

        if !visited.contains_key(&other_key) {
          visited.insert(other_key.clone(), (edge_dist, edge_path));
          queue.push_back(other_key);
        }
      }
    }

    let mut neighbors: Vec<(GraphNeighbor, usize)> = hits
      .into_iter()
      .map(|(chunk_id, (dist, path, frequency))| {
        (
          GraphNeighbor {
            chunk_id,
            path,
            score: 1.0 / dist as f32,
          },
          frequency,
        )
      })
      .collect();

    neighbors.sort_by(|(a, freq_a), (b, freq_b)| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| freq_b.cmp(freq_a))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    neighbors.into_iter().map(|(n, _)| n).collect()
  }

  /// Serialized form for persistence; written by the owning backend
  pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&PersistedGraph {
      triplets: self.triplets.clone(),
      entity_index: self.entity_index.clone(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Persist the graph atomically
  pub fn save(&self) -> std::io::Result<()> {
    let json = self.to_json()?;
    atomic_write(&self.path, &json)
  }
}

#[cfg(test)]
mod tests {
  use brain_core::predicates;
  use tempfile::TempDir;

  use super::*;

  fn store(temp: &TempDir) -> GraphStore {
    GraphStore::open(&temp.path().join("graph_store.json")).unwrap()
  }

  fn triplet(s: &str, p: &str, o: &str, chunk: &str) -> Triplet {
    Triplet::new(s, "module", p, o, "module", chunk)
  }

  #[test]
  fn test_put_dedups() {
    let temp = TempDir::new().unwrap();
    let mut graph = store(&temp);

    graph.put(vec![
      triplet("auth", predicates::IMPORTS, "jwt", "c0"),
      triplet("auth", predicates::IMPORTS, "jwt", "c0"),
    ]);

    assert_eq!(graph.triplet_count(), 1);
  }

  #[test]
  fn test_neighbors_depth_one() {
    let temp = TempDir::new().unwrap();
    let mut graph = store(&temp);
    graph.put(vec![triplet("auth", predicates::IMPORTS, "jwt", "chunk_auth.py_0")]);

    let hits = graph.neighbors("jwt", 2);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "chunk_auth.py_0");
    assert_eq!(hits[0].score, 1.0);
    assert_eq!(hits[0].path, vec!["jwt".to_string(), "auth".to_string()]);
  }

  #[test]
  fn test_neighbors_depth_bound() {
    let temp = TempDir::new().unwrap();
    let mut graph = store(&temp);
    graph.put(vec![
      triplet("a", predicates::IMPORTS, "b", "c_ab"),
      triplet("b", predicates::IMPORTS, "c", "c_bc"),
      triplet("c", predicates::IMPORTS, "d", "c_cd"),
    ]);

    let depth1: Vec<String> = graph.neighbors("a", 1).into_iter().map(|n| n.chunk_id).collect();
    assert_eq!(depth1, vec!["c_ab"]);

    let depth2: Vec<String> = graph.neighbors("a", 2).into_iter().map(|n| n.chunk_id).collect();
    assert_eq!(depth2, vec!["c_ab", "c_bc"]);

    // Closer chunks score higher
    let hits = graph.neighbors("a", 3);
    assert!(hits[0].score > hits[1].score);
    assert!(hits[1].score > hits[2].score);
  }

  #[test]
  fn test_cycles_terminate() {
    let temp = TempDir::new().unwrap();
    let mut graph = store(&temp);
    graph.put(vec![
      triplet("a", predicates::IMPORTS, "b", "c_ab"),
      triplet("b", predicates::IMPORTS, "a", "c_ba"),
    ]);

    let hits = graph.neighbors("a", 4);
    assert_eq!(hits.len(), 2);
  }

  #[test]
  fn test_unknown_entity_is_empty() {
    let temp = TempDir::new().unwrap();
    let graph = store(&temp);
    assert!(graph.neighbors("ghost", 2).is_empty());
  }

  #[test]
  fn test_remove_chunks_prunes_edges() {
    let temp = TempDir::new().unwrap();
    let mut graph = store(&temp);
    graph.put(vec![
      triplet("a", predicates::IMPORTS, "b", "c0"),
      triplet("a", predicates::CONTAINS, "c", "c1"),
    ]);

    graph.remove_chunks(&["c0".to_string()]);
    assert_eq!(graph.triplet_count(), 1);
    assert!(graph.neighbors("b", 2).is_empty());
  }

  #[test]
  fn test_persistence_roundtrip() {
    let temp = TempDir::new().unwrap();
    {
      let mut graph = store(&temp);
      graph.put(vec![triplet("auth", predicates::IMPORTS, "jwt", "c0")]);
      graph.save().unwrap();
    }

    let graph = store(&temp);
    assert_eq!(graph.triplet_count(), 1);
    assert_eq!(graph.neighbors("jwt", 1).len(), 1);
  }
}
