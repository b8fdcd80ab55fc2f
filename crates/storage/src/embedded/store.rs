// LanceDB-backed chunk table: ANN vector search plus row storage.

use std::{path::Path, sync::Arc};

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array};
use arrow_schema::{DataType, Field, Schema};
use brain_core::{BackendKind, Chunk, ChunkMetadata, Error, Result};
use futures::TryStreamExt;
use lancedb::{
  Connection, connect,
  query::{ExecutableQuery, QueryBase},
};
use tracing::{debug, trace};

use crate::backend::MetadataFilter;

const CHUNKS_TABLE: &str = "chunks";

/// Maximum ids per delete predicate, to bound statement size
pub const DELETE_BATCH: usize = 512;

/// A chunk row as stored, with its metadata decoded
#[derive(Debug, Clone)]
pub struct StoredChunk {
  pub id: String,
  pub text: String,
  pub token_count: usize,
  pub metadata: ChunkMetadata,
}

fn chunks_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("source", DataType::Utf8, false),
    Field::new("chunk_index", DataType::UInt32, false),
    Field::new("source_type", DataType::Utf8, false),
    Field::new("language", DataType::Utf8, true),
    Field::new("text", DataType::Utf8, false),
    Field::new("token_count", DataType::UInt32, false),
    Field::new("metadata", DataType::Utf8, false), // full ChunkMetadata as JSON
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      true,
    ),
  ]))
}

fn db_err(e: impl std::fmt::Display) -> Error {
  Error::storage(BackendKind::Embedded, e)
}

fn escape_sql(s: &str) -> String {
  s.replace('\'', "''")
}

/// Compile a metadata filter to a LanceDB SQL predicate
pub fn filter_sql(filter: Option<&MetadataFilter>) -> Option<String> {
  let filter = filter?;
  let mut parts = Vec::new();

  if let Some(source) = &filter.source {
    parts.push(format!("source = '{}'", escape_sql(source)));
  }
  if let Some(source_type) = filter.source_type {
    parts.push(format!("source_type = '{}'", source_type.as_str()));
  }
  if let Some(language) = &filter.language {
    parts.push(format!("language = '{}'", escape_sql(language)));
  }

  if parts.is_empty() { None } else { Some(parts.join(" AND ")) }
}

/// Rows before an ANN index is worth building; brute-force scan wins below
const ANN_INDEX_THRESHOLD: usize = 256;

/// Chunk table handle for one project database
pub struct ChunkTable {
  connection: Connection,
  vector_dim: usize,
  ann_indexed: std::sync::atomic::AtomicBool,
}

impl ChunkTable {
  /// Open (or create) the database under `dir`
  pub async fn open(dir: &Path, vector_dim: usize) -> Result<Self> {
    if let Some(parent) = dir.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    debug!(path = %dir.display(), vector_dim, "Opening embedded vector store");
    let connection = connect(dir.to_string_lossy().as_ref()).execute().await.map_err(db_err)?;

    Ok(Self {
      connection,
      vector_dim,
      ann_indexed: std::sync::atomic::AtomicBool::new(false),
    })
  }

  /// Build the ANN index once the corpus is large enough to need one.
  /// Safe to call after every write batch.
  pub async fn ensure_ann_index(&self) -> Result<()> {
    use std::sync::atomic::Ordering;

    if self.ann_indexed.load(Ordering::Acquire) {
      return Ok(());
    }

    let table = self.table().await?;
    let rows = table.count_rows(None).await.map_err(db_err)?;
    if rows < ANN_INDEX_THRESHOLD {
      return Ok(());
    }

    table
      .create_index(&["vector"], lancedb::index::Index::Auto)
      .execute()
      .await
      .map_err(db_err)?;
    self.ann_indexed.store(true, Ordering::Release);
    debug!(rows, "ANN index ready on vector column");
    Ok(())
  }

  /// Create the chunks table if missing. Idempotent.
  pub async fn ensure(&self) -> Result<()> {
    let names = self.connection.table_names().execute().await.map_err(db_err)?;
    if !names.contains(&CHUNKS_TABLE.to_string()) {
      debug!("Creating chunks table");
      self
        .connection
        .create_empty_table(CHUNKS_TABLE, chunks_schema(self.vector_dim))
        .execute()
        .await
        .map_err(db_err)?;
    }
    Ok(())
  }

  async fn table(&self) -> Result<lancedb::Table> {
    self
      .connection
      .open_table(CHUNKS_TABLE)
      .execute()
      .await
      .map_err(db_err)
  }

  /// Insert chunk rows with their embeddings
  pub async fn add(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
    if chunks.is_empty() {
      return Ok(());
    }

    trace!(batch_size = chunks.len(), "Adding chunk batch");
    let table = self.table().await?;

    let batch = chunks_to_batch(chunks, embeddings, self.vector_dim)?;
    let iter = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema(self.vector_dim));
    table.add(Box::new(iter)).execute().await.map_err(db_err)?;

    Ok(())
  }

  /// Delete rows by id, in bounded batches. Empty input is a no-op.
  pub async fn delete_ids(&self, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }

    let table = self.table().await?;
    for batch in ids.chunks(DELETE_BATCH) {
      let list = batch
        .iter()
        .map(|id| format!("'{}'", escape_sql(id)))
        .collect::<Vec<_>>()
        .join(", ");
      table.delete(&format!("id IN ({})", list)).await.map_err(db_err)?;
    }

    Ok(())
  }

  /// Ids of every chunk stored for a source path
  pub async fn ids_for_source(&self, source: &str) -> Result<Vec<String>> {
    let table = self.table().await?;

    let batches: Vec<RecordBatch> = table
      .query()
      .only_if(format!("source = '{}'", escape_sql(source)))
      .execute()
      .await
      .map_err(db_err)?
      .try_collect()
      .await
      .map_err(db_err)?;

    let mut ids = Vec::new();
    for batch in batches {
      let column = string_column(&batch, "id")?;
      for i in 0..batch.num_rows() {
        ids.push(column.value(i).to_string());
      }
    }
    Ok(ids)
  }

  pub async fn get(&self, id: &str) -> Result<Option<StoredChunk>> {
    let table = self.table().await?;

    let batches: Vec<RecordBatch> = table
      .query()
      .only_if(format!("id = '{}'", escape_sql(id)))
      .limit(1)
      .execute()
      .await
      .map_err(db_err)?
      .try_collect()
      .await
      .map_err(db_err)?;

    for batch in batches {
      if batch.num_rows() > 0 {
        return Ok(Some(row_to_chunk(&batch, 0)?));
      }
    }
    Ok(None)
  }

  /// Fetch many rows by id, preserving no particular order
  pub async fn get_many(&self, ids: &[String]) -> Result<Vec<StoredChunk>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let table = self.table().await?;
    let mut rows = Vec::new();

    for batch_ids in ids.chunks(DELETE_BATCH) {
      let list = batch_ids
        .iter()
        .map(|id| format!("'{}'", escape_sql(id)))
        .collect::<Vec<_>>()
        .join(", ");

      let batches: Vec<RecordBatch> = table
        .query()
        .only_if(format!("id IN ({})", list))
        .execute()
        .await
        .map_err(db_err)?
        .try_collect()
        .await
        .map_err(db_err)?;

      for batch in batches {
        for i in 0..batch.num_rows() {
          rows.push(row_to_chunk(&batch, i)?);
        }
      }
    }

    Ok(rows)
  }

  pub async fn count(&self, filter: Option<String>) -> Result<usize> {
    let table = self.table().await?;
    table.count_rows(filter).await.map_err(db_err)
  }

  /// ANN search returning rows with their cosine distances
  pub async fn vector_search(
    &self,
    embedding: &[f32],
    limit: usize,
    filter: Option<String>,
  ) -> Result<Vec<(StoredChunk, f32)>> {
    let table = self.table().await?;

    // Cosine distances land in [0, 2], which the score normalization expects
    let mut query = table
      .vector_search(embedding.to_vec())
      .map_err(db_err)?
      .distance_type(lancedb::DistanceType::Cosine)
      .limit(limit);
    if let Some(f) = filter {
      query = query.only_if(f);
    }

    let batches: Vec<RecordBatch> = query
      .execute()
      .await
      .map_err(db_err)?
      .try_collect()
      .await
      .map_err(db_err)?;

    let mut rows = Vec::new();
    for batch in batches {
      let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

      for i in 0..batch.num_rows() {
        let row = row_to_chunk(&batch, i)?;
        let distance = distances.map(|d| d.value(i)).unwrap_or(0.0);
        rows.push((row, distance));
      }
    }

    Ok(rows)
  }

  /// Drop the table entirely; `ensure` recreates it
  pub async fn drop(&self) -> Result<()> {
    let names = self.connection.table_names().execute().await.map_err(db_err)?;
    if names.contains(&CHUNKS_TABLE.to_string()) {
      self.connection.drop_table(CHUNKS_TABLE).await.map_err(db_err)?;
    }
    self.ann_indexed.store(false, std::sync::atomic::Ordering::Release);
    Ok(())
  }
}

fn chunks_to_batch(chunks: &[Chunk], embeddings: &[Vec<f32>], vector_dim: usize) -> Result<RecordBatch> {
  let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
  let sources: Vec<String> = chunks.iter().map(|c| c.metadata.source.clone()).collect();
  let indexes: Vec<u32> = chunks.iter().map(|c| c.metadata.chunk_index as u32).collect();
  let source_types: Vec<String> = chunks.iter().map(|c| c.metadata.source_type.as_str().to_string()).collect();
  let languages: Vec<Option<String>> = chunks.iter().map(|c| c.metadata.language.clone()).collect();
  let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
  let token_counts: Vec<u32> = chunks.iter().map(|c| c.token_count as u32).collect();
  let metadatas: Vec<String> = chunks
    .iter()
    .map(|c| serde_json::to_string(&c.metadata))
    .collect::<std::result::Result<_, _>>()?;

  let mut flat = Vec::with_capacity(chunks.len() * vector_dim);
  for embedding in embeddings {
    let mut padded = embedding.clone();
    padded.resize(vector_dim, 0.0);
    flat.extend_from_slice(&padded);
  }

  let field = Arc::new(Field::new("item", DataType::Float32, true));
  let vectors = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(Float32Array::from(flat)), None)
    .map_err(db_err)?;

  RecordBatch::try_new(
    chunks_schema(vector_dim),
    vec![
      Arc::new(StringArray::from(ids)),
      Arc::new(StringArray::from(sources)),
      Arc::new(UInt32Array::from(indexes)),
      Arc::new(StringArray::from(source_types)),
      Arc::new(StringArray::from(languages)),
      Arc::new(StringArray::from(texts)),
      Arc::new(UInt32Array::from(token_counts)),
      Arc::new(StringArray::from(metadatas)),
      Arc::new(vectors),
    ],
  )
  .map_err(db_err)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
  batch
    .column_by_name(name)
    .and_then(|c| c.as_any().downcast_ref::<StringArray>())
    .ok_or_else(|| db_err(format!("missing column {}", name)))
}

fn row_to_chunk(batch: &RecordBatch, row: usize) -> Result<StoredChunk> {
  let id = string_column(batch, "id")?.value(row).to_string();
  let text = string_column(batch, "text")?.value(row).to_string();
  let metadata_json = string_column(batch, "metadata")?.value(row);

  let token_count = batch
    .column_by_name("token_count")
    .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
    .map(|a| a.value(row) as usize)
    .unwrap_or(0);

  let metadata: ChunkMetadata = serde_json::from_str(metadata_json)?;

  Ok(StoredChunk {
    id,
    text,
    token_count,
    metadata,
  })
}

#[cfg(test)]
mod tests {
  use brain_core::SourceType;
  use tempfile::TempDir;

  use super::*;

  fn chunk(source: &str, index: usize, text: &str) -> Chunk {
    Chunk::new(text.to_string(), ChunkMetadata::doc(source, index))
  }

  async fn open_table(temp: &TempDir) -> ChunkTable {
    let table = ChunkTable::open(&temp.path().join("embedded_vector"), 8).await.unwrap();
    table.ensure().await.unwrap();
    table
  }

  #[tokio::test]
  async fn test_add_and_get_roundtrip() {
    let temp = TempDir::new().unwrap();
    let table = open_table(&temp).await;

    let c = chunk("notes.md", 0, "hello world");
    table.add(&[c.clone()], &[vec![0.5; 8]]).await.unwrap();

    let stored = table.get(&c.id).await.unwrap().unwrap();
    assert_eq!(stored.text, "hello world");
    assert_eq!(stored.metadata, c.metadata);
  }

  #[tokio::test]
  async fn test_delete_ids_empty_is_noop() {
    let temp = TempDir::new().unwrap();
    let table = open_table(&temp).await;

    table.add(&[chunk("a.md", 0, "x")], &[vec![0.1; 8]]).await.unwrap();
    table.delete_ids(&[]).await.unwrap();

    assert_eq!(table.count(None).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_ids_for_source() {
    let temp = TempDir::new().unwrap();
    let table = open_table(&temp).await;

    let chunks = vec![chunk("a.md", 0, "x"), chunk("a.md", 1, "y"), chunk("b.md", 0, "z")];
    let vectors = vec![vec![0.1; 8], vec![0.2; 8], vec![0.3; 8]];
    table.add(&chunks, &vectors).await.unwrap();

    let mut ids = table.ids_for_source("a.md").await.unwrap();
    ids.sort();
    assert_eq!(ids, vec!["chunk_a.md_0", "chunk_a.md_1"]);
  }

  #[tokio::test]
  async fn test_filter_sql_compilation() {
    let filter = MetadataFilter {
      source: Some("a'b.md".to_string()),
      source_type: Some(SourceType::Code),
      language: Some("rust".to_string()),
    };
    let sql = filter_sql(Some(&filter)).unwrap();
    assert!(sql.contains("source = 'a''b.md'"));
    assert!(sql.contains("source_type = 'code'"));
    assert!(sql.contains("language = 'rust'"));
    assert_eq!(filter_sql(None), None);
  }

  #[tokio::test]
  async fn test_vector_search_returns_distances() {
    let temp = TempDir::new().unwrap();
    let table = open_table(&temp).await;

    let chunks = vec![chunk("a.md", 0, "x"), chunk("b.md", 0, "y")];
    let mut near = vec![0.0; 8];
    near[0] = 1.0;
    let mut far = vec![0.0; 8];
    far[1] = 1.0;
    table.add(&chunks, &[near.clone(), far]).await.unwrap();

    let hits = table.vector_search(&near, 2, None).await.unwrap();
    assert_eq!(hits.len(), 2);
    // The identical vector comes back closest
    assert_eq!(hits[0].0.metadata.source, "a.md");
    assert!(hits[0].1 <= hits[1].1);
  }
}
