//! Embedded storage backend.
//!
//! Pairs a LanceDB ANN store (`embedded_vector/`) with a BM25 inverted
//! keyword index (`embedded_keyword/`) and an in-memory property graph
//! persisted as JSON (`graph_index/graph_store.json`). All three live under
//! the per-project state directory.

mod graph;
mod keyword;
mod store;

use std::{
  path::Path,
  sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use brain_core::{BackendKind, Chunk, EmbeddingMetadata, Error, Result, SearchResult, StateDir, Triplet};
use tokio::sync::RwLock;
use tracing::debug;

pub use self::store::DELETE_BATCH;
use self::{graph::GraphStore, keyword::KeywordIndex, store::ChunkTable};
use crate::{
  backend::{GraphNeighbor, MetadataFilter, StorageBackend},
  scores::{normalize_keyword_scores, score_from_cosine_distance},
};

/// Oversampling factor applied when a keyword search carries a filter: the
/// inverted index knows nothing about metadata, so extra candidates are
/// fetched before filtering.
const KEYWORD_OVERSAMPLE: usize = 4;

pub struct EmbeddedBackend {
  state: StateDir,
  table: ChunkTable,
  keyword: RwLock<KeywordIndex>,
  graph: RwLock<GraphStore>,
  initialized: AtomicBool,
}

impl EmbeddedBackend {
  /// Open the embedded stores under the state directory
  pub async fn open(state: StateDir, dimensions: usize) -> Result<Self> {
    state.ensure()?;

    let table = ChunkTable::open(&state.embedded_vector(), dimensions).await?;

    // Index loads re-embed persisted texts; keep that off the request loop.
    let keyword_dir = state.embedded_keyword();
    let keyword = spawn_io(move || KeywordIndex::open(&keyword_dir)).await?;

    let graph_path = state.graph_store();
    let graph = spawn_io(move || GraphStore::open(&graph_path)).await?;

    Ok(Self {
      state,
      table,
      keyword: RwLock::new(keyword),
      graph: RwLock::new(graph),
      initialized: AtomicBool::new(false),
    })
  }

  async fn persist_keyword(&self) -> Result<()> {
    let (json, path) = {
      let index = self.keyword.read().await;
      (index.to_json()?, index.path().to_path_buf())
    };
    atomic_write_async(&path, json).await
  }

  async fn persist_graph(&self) -> Result<()> {
    let (json, path) = {
      let graph = self.graph.read().await;
      (graph.to_json()?, graph.path().to_path_buf())
    };
    atomic_write_async(&path, json).await
  }
}

#[async_trait]
impl StorageBackend for EmbeddedBackend {
  fn kind(&self) -> BackendKind {
    BackendKind::Embedded
  }

  fn is_initialized(&self) -> bool {
    self.initialized.load(Ordering::Acquire)
  }

  async fn initialize(&self) -> Result<()> {
    self.table.ensure().await?;
    self.initialized.store(true, Ordering::Release);
    Ok(())
  }

  async fn upsert_documents(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize> {
    if chunks.len() != embeddings.len() {
      return Err(Error::Validation(format!(
        "chunk/embedding count mismatch: {} vs {}",
        chunks.len(),
        embeddings.len()
      )));
    }
    if chunks.is_empty() {
      return Ok(0);
    }

    // Replace-by-id semantics: clear any previous rows for these ids first
    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    self.table.delete_ids(&ids).await?;
    self.table.add(chunks, embeddings).await?;
    self.table.ensure_ann_index().await?;

    {
      let mut index = self.keyword.write().await;
      index.upsert(chunks.iter().map(|c| (c.id.clone(), c.text.clone())));
    }
    self.persist_keyword().await?;

    Ok(chunks.len())
  }

  async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
    // Empty input deletes nothing. This must never fall through to an
    // unfiltered delete.
    if ids.is_empty() {
      return Ok(());
    }

    self.table.delete_ids(ids).await?;

    {
      let mut index = self.keyword.write().await;
      index.remove(ids);
    }
    self.persist_keyword().await?;

    {
      let mut graph = self.graph.write().await;
      graph.remove_chunks(ids);
    }
    self.persist_graph().await?;

    Ok(())
  }

  async fn delete_by_source(&self, source: &str) -> Result<()> {
    let ids = self.table.ids_for_source(source).await?;
    debug!(source, count = ids.len(), "Deleting chunks by source");
    self.delete_by_ids(&ids).await
  }

  async fn vector_search(
    &self,
    embedding: &[f32],
    top_k: usize,
    min_score: f32,
    filter: Option<&MetadataFilter>,
  ) -> Result<Vec<SearchResult>> {
    let hits = self
      .table
      .vector_search(embedding, top_k, store::filter_sql(filter))
      .await?;

    let mut results: Vec<SearchResult> = hits
      .into_iter()
      .map(|(row, distance)| {
        let score = score_from_cosine_distance(distance);
        let mut result = SearchResult::new(row.id, row.text, row.metadata, score);
        result.vector_score = Some(score);
        result
      })
      .filter(|r| r.score >= min_score)
      .collect();

    SearchResult::sort_ranked(&mut results);
    Ok(results)
  }

  async fn keyword_search(&self, query: &str, top_k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchResult>> {
    let fetch = if filter.is_some() { top_k * KEYWORD_OVERSAMPLE } else { top_k };

    let matches = {
      let index = self.keyword.read().await;
      index.search(query, fetch)
    };
    if matches.is_empty() {
      return Ok(Vec::new());
    }

    let ids: Vec<String> = matches.iter().map(|(id, _)| id.clone()).collect();
    let rows = self.table.get_many(&ids).await?;
    let by_id: std::collections::HashMap<String, store::StoredChunk> =
      rows.into_iter().map(|r| (r.id.clone(), r)).collect();

    let mut results = Vec::new();
    for (id, raw_score) in matches {
      let Some(row) = by_id.get(&id) else {
        continue;
      };
      if let Some(filter) = filter
        && !filter.matches(&row.metadata)
      {
        continue;
      }
      results.push(SearchResult::new(id, row.text.clone(), row.metadata.clone(), raw_score));
      if results.len() >= top_k {
        break;
      }
    }

    normalize_keyword_scores(&mut results);
    SearchResult::sort_ranked(&mut results);
    Ok(results)
  }

  async fn get_count(&self, filter: Option<&MetadataFilter>) -> Result<usize> {
    self.table.count(store::filter_sql(filter)).await
  }

  async fn get_by_id(&self, id: &str) -> Result<Option<SearchResult>> {
    Ok(self.table.get(id).await?.map(|row| {
      SearchResult::new(row.id, row.text, row.metadata, 1.0)
    }))
  }

  async fn reset(&self) -> Result<()> {
    debug!("Resetting embedded backend");

    self.table.drop().await?;
    self.table.ensure().await?;

    {
      let mut index = self.keyword.write().await;
      index.clear();
    }
    self.persist_keyword().await?;

    {
      let mut graph = self.graph.write().await;
      graph.clear();
    }
    self.persist_graph().await?;

    match tokio::fs::remove_file(self.state.embedding_meta()).await {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }

    Ok(())
  }

  async fn get_embedding_metadata(&self) -> Result<Option<EmbeddingMetadata>> {
    match tokio::fs::read_to_string(self.state.embedding_meta()).await {
      Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  async fn set_embedding_metadata(&self, meta: &EmbeddingMetadata) -> Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    atomic_write_async(&self.state.embedding_meta(), json).await
  }

  fn supports_graph(&self) -> bool {
    true
  }

  async fn graph_put_triplets(&self, triplets: &[Triplet]) -> Result<()> {
    if triplets.is_empty() {
      return Ok(());
    }

    {
      let mut graph = self.graph.write().await;
      graph.put(triplets.to_vec());
    }
    self.persist_graph().await
  }

  async fn graph_neighbors(&self, entity: &str, depth: usize) -> Result<Vec<GraphNeighbor>> {
    let graph = self.graph.read().await;
    Ok(graph.neighbors(entity, depth))
  }

  async fn graph_entities(&self) -> Result<Vec<String>> {
    let graph = self.graph.read().await;
    Ok(graph.entities())
  }
}

/// Run synchronous store IO on the blocking pool
async fn spawn_io<T, F>(f: F) -> Result<T>
where
  T: Send + 'static,
  F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| Error::storage(BackendKind::Embedded, e))?
    .map_err(Error::from)
}

/// Atomic write with async file IO: temp sibling then rename
async fn atomic_write_async(path: &Path, contents: Vec<u8>) -> Result<()> {
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  let tmp = path.with_extension("tmp");
  tokio::fs::write(&tmp, contents).await?;
  tokio::fs::rename(&tmp, path).await?;
  Ok(())
}
