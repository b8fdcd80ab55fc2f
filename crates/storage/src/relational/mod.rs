//! Relational storage backend: a single Postgres database with the pgvector
//! extension for ANN and native full-text ranking for keyword search.
//!
//! Graph operations are not available on this backend in the current
//! release; callers get a `BackendUnsupported` error naming the embedded
//! backend as the required one.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use brain_core::{BackendKind, Chunk, ChunkMetadata, EmbeddingMetadata, Error, RelationalConfig, Result, SearchResult};
use sqlx::{
  Row,
  postgres::{PgConnectOptions, PgPool, PgPoolOptions},
};
use tracing::{debug, info};

use crate::{
  backend::{MetadataFilter, StorageBackend},
  embedded::DELETE_BATCH,
  scores::normalize_keyword_scores,
};

pub struct RelationalBackend {
  pool: PgPool,
  dimensions: usize,
  hnsw_m: u32,
  hnsw_ef_construction: u32,
  initialized: AtomicBool,
}

fn db_err(e: impl std::fmt::Display) -> Error {
  Error::storage(BackendKind::Relational, e)
}

/// Render an embedding as a pgvector literal: `[0.1,0.2,...]`
fn vector_literal(embedding: &[f32]) -> String {
  let mut out = String::with_capacity(embedding.len() * 8 + 2);
  out.push('[');
  for (i, v) in embedding.iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    out.push_str(&format!("{}", v));
  }
  out.push(']');
  out
}

/// Compile a metadata filter into SQL conditions and their bind values.
/// Conditions reference binds starting at `$<first_bind>`.
fn filter_conditions(filter: Option<&MetadataFilter>, first_bind: usize) -> (Vec<String>, Vec<String>) {
  let mut conditions = Vec::new();
  let mut binds = Vec::new();

  if let Some(filter) = filter {
    if let Some(source) = &filter.source {
      conditions.push(format!("source = ${}", first_bind + binds.len()));
      binds.push(source.clone());
    }
    if let Some(source_type) = filter.source_type {
      conditions.push(format!("source_type = ${}", first_bind + binds.len()));
      binds.push(source_type.as_str().to_string());
    }
    if let Some(language) = &filter.language {
      conditions.push(format!("language = ${}", first_bind + binds.len()));
      binds.push(language.clone());
    }
  }

  (conditions, binds)
}

impl RelationalBackend {
  /// Connect to the configured database. The password is read from the
  /// environment variable named in the config, never from the config itself.
  pub async fn connect(config: &RelationalConfig, dimensions: usize) -> Result<Self> {
    let mut options = PgConnectOptions::new()
      .host(&config.host)
      .port(config.port)
      .database(&config.database)
      .username(&config.user);

    if let Ok(password) = std::env::var(&config.password_env) {
      options = options.password(&password);
    }

    info!(
      host = %config.host,
      port = config.port,
      database = %config.database,
      "Connecting to relational backend"
    );

    let pool = PgPoolOptions::new()
      .max_connections(config.pool_size + config.pool_max_overflow)
      .connect_with(options)
      .await
      .map_err(db_err)?;

    Ok(Self {
      pool,
      dimensions,
      hnsw_m: config.hnsw_m,
      hnsw_ef_construction: config.hnsw_ef_construction,
      initialized: AtomicBool::new(false),
    })
  }

  fn row_to_result(row: &sqlx::postgres::PgRow, score: f32) -> Result<SearchResult> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let text: String = row.try_get("text_content").map_err(db_err)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(db_err)?;
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;
    Ok(SearchResult::new(id, text, metadata, score))
  }
}

#[async_trait]
impl StorageBackend for RelationalBackend {
  fn kind(&self) -> BackendKind {
    BackendKind::Relational
  }

  fn is_initialized(&self) -> bool {
    self.initialized.load(Ordering::Acquire)
  }

  async fn initialize(&self) -> Result<()> {
    // DDL cannot take bind parameters; the interpolated values are numeric
    // config fields, not user input.
    let statements = vec![
      "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
      format!(
        "CREATE TABLE IF NOT EXISTS chunks (
           id TEXT PRIMARY KEY,
           source TEXT NOT NULL,
           chunk_index INTEGER NOT NULL,
           source_type TEXT NOT NULL,
           language TEXT,
           text_content TEXT NOT NULL,
           token_count INTEGER NOT NULL,
           metadata JSONB NOT NULL,
           embedding vector({})
         )",
        self.dimensions
      ),
      format!(
        "CREATE INDEX IF NOT EXISTS chunks_embedding_idx ON chunks
           USING hnsw (embedding vector_cosine_ops)
           WITH (m = {}, ef_construction = {})",
        self.hnsw_m, self.hnsw_ef_construction
      ),
      "CREATE INDEX IF NOT EXISTS chunks_tsv_idx ON chunks
         USING GIN (to_tsvector('english', text_content))"
        .to_string(),
      "CREATE INDEX IF NOT EXISTS chunks_source_idx ON chunks (source)".to_string(),
      "CREATE TABLE IF NOT EXISTS index_meta (
         id INTEGER PRIMARY KEY CHECK (id = 1),
         provider TEXT NOT NULL,
         model TEXT NOT NULL,
         dimensions INTEGER NOT NULL
       )"
      .to_string(),
    ];

    for statement in statements {
      sqlx::query(&statement).execute(&self.pool).await.map_err(db_err)?;
    }

    self.initialized.store(true, Ordering::Release);
    debug!("Relational schema ready");
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

    let mut tx = self.pool.begin().await.map_err(db_err)?;

    for (chunk, embedding) in chunks.iter().zip(embeddings) {
      let metadata_json = serde_json::to_string(&chunk.metadata)?;

      sqlx::query(
        "INSERT INTO chunks
           (id, source, chunk_index, source_type, language, text_content, token_count, metadata, embedding)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb, $9::vector)
         ON CONFLICT (id) DO UPDATE SET
           source = EXCLUDED.source,
           chunk_index = EXCLUDED.chunk_index,
           source_type = EXCLUDED.source_type,
           language = EXCLUDED.language,
           text_content = EXCLUDED.text_content,
           token_count = EXCLUDED.token_count,
           metadata = EXCLUDED.metadata,
           embedding = EXCLUDED.embedding",
      )
      .bind(&chunk.id)
      .bind(&chunk.metadata.source)
      .bind(chunk.metadata.chunk_index as i32)
      .bind(chunk.metadata.source_type.as_str())
      .bind(chunk.metadata.language.as_deref())
      .bind(&chunk.text)
      .bind(chunk.token_count as i32)
      .bind(&metadata_json)
      .bind(vector_literal(embedding))
      .execute(&mut *tx)
      .await
      .map_err(db_err)?;
    }

    tx.commit().await.map_err(db_err)?;
    Ok(chunks.len())
  }

  async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
    // Empty input is a no-op, never an unfiltered delete
    if ids.is_empty() {
      return Ok(());
    }

    for batch in ids.chunks(DELETE_BATCH) {
      sqlx::query("DELETE FROM chunks WHERE id = ANY($1)")
        .bind(batch)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
    }
    Ok(())
  }

  async fn delete_by_source(&self, source: &str) -> Result<()> {
    sqlx::query("DELETE FROM chunks WHERE source = $1")
      .bind(source)
      .execute(&self.pool)
      .await
      .map_err(db_err)?;
    Ok(())
  }

  async fn vector_search(
    &self,
    embedding: &[f32],
    top_k: usize,
    min_score: f32,
    filter: Option<&MetadataFilter>,
  ) -> Result<Vec<SearchResult>> {
    let (conditions, binds) = filter_conditions(filter, 3);
    let where_clause = if conditions.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", conditions.join(" AND "))
    };

    // `<=>` is pgvector cosine distance in [0, 2]; normalize to [0, 1]
    let sql = format!(
      "SELECT id, text_content, metadata::text AS metadata_json,
              CAST(1.0 - (embedding <=> $1::vector) / 2.0 AS DOUBLE PRECISION) AS score
       FROM chunks
       {}
       ORDER BY embedding <=> $1::vector
       LIMIT $2",
      where_clause
    );

    let mut query = sqlx::query(&sql).bind(vector_literal(embedding)).bind(top_k as i64);
    for bind in &binds {
      query = query.bind(bind);
    }

    let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;

    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
      let score: f64 = row.try_get("score").map_err(db_err)?;
      let score = (score as f32).clamp(0.0, 1.0);
      if score < min_score {
        continue;
      }
      let mut result = Self::row_to_result(row, score)?;
      result.vector_score = Some(score);
      results.push(result);
    }

    SearchResult::sort_ranked(&mut results);
    Ok(results)
  }

  async fn keyword_search(&self, query: &str, top_k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchResult>> {
    let (conditions, binds) = filter_conditions(filter, 3);
    let extra = if conditions.is_empty() {
      String::new()
    } else {
      format!("AND {}", conditions.join(" AND "))
    };

    let sql = format!(
      "SELECT id, text_content, metadata::text AS metadata_json,
              CAST(ts_rank(to_tsvector('english', text_content),
                           plainto_tsquery('english', $1)) AS DOUBLE PRECISION) AS score
       FROM chunks
       WHERE to_tsvector('english', text_content) @@ plainto_tsquery('english', $1)
       {}
       ORDER BY score DESC
       LIMIT $2",
      extra
    );

    let mut q = sqlx::query(&sql).bind(query).bind(top_k as i64);
    for bind in &binds {
      q = q.bind(bind);
    }

    let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;

    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
      let score: f64 = row.try_get("score").map_err(db_err)?;
      results.push(Self::row_to_result(row, score as f32)?);
    }

    normalize_keyword_scores(&mut results);
    SearchResult::sort_ranked(&mut results);
    Ok(results)
  }

  async fn get_count(&self, filter: Option<&MetadataFilter>) -> Result<usize> {
    let (conditions, binds) = filter_conditions(filter, 1);
    let where_clause = if conditions.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!("SELECT COUNT(*) AS count FROM chunks {}", where_clause);
    let mut query = sqlx::query(&sql);
    for bind in &binds {
      query = query.bind(bind);
    }

    let row = query.fetch_one(&self.pool).await.map_err(db_err)?;
    let count: i64 = row.try_get("count").map_err(db_err)?;
    Ok(count as usize)
  }

  async fn get_by_id(&self, id: &str) -> Result<Option<SearchResult>> {
    let row = sqlx::query("SELECT id, text_content, metadata::text AS metadata_json FROM chunks WHERE id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_err)?;

    row.as_ref().map(|r| Self::row_to_result(r, 1.0)).transpose()
  }

  async fn reset(&self) -> Result<()> {
    debug!("Resetting relational backend");
    sqlx::query("TRUNCATE chunks").execute(&self.pool).await.map_err(db_err)?;
    sqlx::query("DELETE FROM index_meta")
      .execute(&self.pool)
      .await
      .map_err(db_err)?;
    Ok(())
  }

  async fn get_embedding_metadata(&self) -> Result<Option<EmbeddingMetadata>> {
    let row = sqlx::query("SELECT provider, model, dimensions FROM index_meta WHERE id = 1")
      .fetch_optional(&self.pool)
      .await
      .map_err(db_err)?;

    match row {
      None => Ok(None),
      Some(row) => {
        let provider: String = row.try_get("provider").map_err(db_err)?;
        let model: String = row.try_get("model").map_err(db_err)?;
        let dimensions: i32 = row.try_get("dimensions").map_err(db_err)?;
        Ok(Some(EmbeddingMetadata::new(provider, model, dimensions as usize)))
      }
    }
  }

  async fn set_embedding_metadata(&self, meta: &EmbeddingMetadata) -> Result<()> {
    sqlx::query(
      "INSERT INTO index_meta (id, provider, model, dimensions)
       VALUES (1, $1, $2, $3)
       ON CONFLICT (id) DO UPDATE SET
         provider = EXCLUDED.provider,
         model = EXCLUDED.model,
         dimensions = EXCLUDED.dimensions",
    )
    .bind(&meta.provider)
    .bind(&meta.model)
    .bind(meta.dimensions as i32)
    .execute(&self.pool)
    .await
    .map_err(db_err)?;
    Ok(())
  }
}
