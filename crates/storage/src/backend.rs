//! Storage backend contract.
//!
//! The retrieval engine and the indexing pipeline depend only on this trait;
//! implementations normalize scores, errors and metadata so callers never
//! see backend-specific shapes. All scores leaving a backend are in [0, 1],
//! higher = better.

use async_trait::async_trait;
use brain_core::{
  BackendKind, Chunk, EmbeddingMetadata, Error, Result, SearchResult, SourceType, Triplet,
  meta::validate_compatibility,
};
use serde::{Deserialize, Serialize};

/// Metadata predicate understood by every backend.
///
/// Fields compose with AND semantics; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_type: Option<SourceType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,
}

impl MetadataFilter {
  pub fn source(path: impl Into<String>) -> Self {
    Self {
      source: Some(path.into()),
      ..Default::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.source.is_none() && self.source_type.is_none() && self.language.is_none()
  }

  /// Evaluate the filter against chunk metadata in memory
  pub fn matches(&self, metadata: &brain_core::ChunkMetadata) -> bool {
    if let Some(source) = &self.source
      && metadata.source != *source
    {
      return false;
    }
    if let Some(source_type) = self.source_type
      && metadata.source_type != source_type
    {
      return false;
    }
    if let Some(language) = &self.language
      && metadata.language.as_deref() != Some(language.as_str())
    {
      return false;
    }
    true
  }
}

/// One hit from a graph traversal: the chunk that produced the edge, the
/// entity path walked to reach it, and a score from inverse traversal depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNeighbor {
  pub chunk_id: String,
  pub path: Vec<String>,
  pub score: f32,
}

/// Async operations every storage implementation provides.
///
/// Writes within one `upsert_documents` call are atomic. `delete_by_ids`
/// treats an empty list as a no-op; it must never be interpreted as
/// "delete everything".
#[async_trait]
pub trait StorageBackend: Send + Sync {
  fn kind(&self) -> BackendKind;

  /// Readiness flag; true once `initialize` has succeeded
  fn is_initialized(&self) -> bool;

  /// Create or validate schemas and indexes. Idempotent.
  async fn initialize(&self) -> Result<()>;

  /// Write chunks and their embeddings; returns the number written
  async fn upsert_documents(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize>;

  async fn delete_by_ids(&self, ids: &[String]) -> Result<()>;

  /// Bulk delete via metadata predicate `source == path`
  async fn delete_by_source(&self, source: &str) -> Result<()>;

  /// Nearest-neighbor search; results sorted descending by normalized score,
  /// scores below `min_score` dropped.
  async fn vector_search(
    &self,
    embedding: &[f32],
    top_k: usize,
    min_score: f32,
    filter: Option<&MetadataFilter>,
  ) -> Result<Vec<SearchResult>>;

  /// Keyword (BM25-family) search; scores max-normalized per result set
  async fn keyword_search(&self, query: &str, top_k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchResult>>;

  async fn get_count(&self, filter: Option<&MetadataFilter>) -> Result<usize>;

  async fn get_by_id(&self, id: &str) -> Result<Option<SearchResult>>;

  /// Drop all indexed data, including embedding metadata
  async fn reset(&self) -> Result<()>;

  async fn get_embedding_metadata(&self) -> Result<Option<EmbeddingMetadata>>;

  /// Controlled mutation of the embedding metadata record
  async fn set_embedding_metadata(&self, meta: &EmbeddingMetadata) -> Result<()>;

  /// Fetch stored metadata and fail with a mismatch error unless the current
  /// provider configuration is compatible with it.
  async fn check_embedding_compatibility(&self, current: &EmbeddingMetadata) -> Result<()> {
    let stored = self.get_embedding_metadata().await?;
    validate_compatibility(current, stored.as_ref())
  }

  // --- graph capability (optional) -----------------------------------------

  fn supports_graph(&self) -> bool {
    false
  }

  async fn graph_put_triplets(&self, _triplets: &[Triplet]) -> Result<()> {
    Err(self.graph_unsupported("graph writes"))
  }

  /// Traverse up to `depth` edges out from `entity`, collecting source chunks
  async fn graph_neighbors(&self, _entity: &str, _depth: usize) -> Result<Vec<GraphNeighbor>> {
    Err(self.graph_unsupported("graph search"))
  }

  /// Known entity names, used for query-token matching
  async fn graph_entities(&self) -> Result<Vec<String>> {
    Err(self.graph_unsupported("graph search"))
  }
}

trait GraphUnsupported {
  fn graph_unsupported(&self, operation: &'static str) -> Error;
}

impl<T: StorageBackend + ?Sized> GraphUnsupported for T {
  fn graph_unsupported(&self, operation: &'static str) -> Error {
    Error::BackendUnsupported {
      operation,
      backend: self.kind(),
      required: BackendKind::Embedded,
    }
  }
}
