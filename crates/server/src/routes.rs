//! The small HTTP API: search, index, jobs, status.

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
  routing::{delete, get, post},
};
use brain_core::EmbeddingMetadata;
use queue::{EnqueueOutcome, EnqueueRequest, JobRecord, QueueStatus};
use search::{SearchRequest, SearchResponse};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState};

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/search", post(search))
    .route("/index", post(index))
    .route("/jobs", get(list_jobs))
    .route("/jobs/{id}", get(get_job))
    .route("/jobs/{id}", delete(cancel_job))
    .route("/status", get(status))
    .route("/health", get(health))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn search(
  State(state): State<Arc<AppState>>,
  Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
  let response = state.engine.search(&request).await?;
  Ok(Json(response))
}

async fn index(
  State(state): State<Arc<AppState>>,
  Json(request): Json<EnqueueRequest>,
) -> Result<Json<EnqueueOutcome>, ApiError> {
  let outcome = state.queue.enqueue(request).await?;
  Ok(Json(outcome))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
  Json(state.queue.list().await)
}

async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<JobRecord>, StatusCode> {
  match state.queue.get(&id).await {
    Some(job) => Ok(Json(job)),
    None => Err(StatusCode::NOT_FOUND),
  }
}

#[derive(Serialize)]
struct CancelResponse {
  job_id: String,
  status: queue::JobStatus,
}

async fn cancel_job(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
  let status = state.queue.cancel(&id).await?;
  Ok(Json(CancelResponse { job_id: id, status }))
}

#[derive(Serialize)]
struct StatusResponse {
  backend: String,
  graph_available: bool,
  chunk_count: usize,
  embedding: Option<EmbeddingMetadata>,
  queue: QueueStatus,
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
  // Queue status is a lock-free snapshot; only the counts go to the backend
  let queue = state.queue.status();
  let chunk_count = state.backend.get_count(None).await?;
  let embedding = state.backend.get_embedding_metadata().await?;

  Ok(Json(StatusResponse {
    backend: state.backend.kind().to_string(),
    graph_available: state.backend.supports_graph(),
    chunk_count,
    embedding,
    queue,
  }))
}

async fn health() -> impl IntoResponse {
  (StatusCode::OK, "ok")
}
