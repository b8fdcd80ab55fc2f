//! End-to-end flow over the composition root: enqueue an indexing job, let
//! the worker drain it, then query every mode against the result.

use std::{sync::Arc, time::Duration};

use brain_core::SourceType;
use queue::{EnqueueRequest, JobStatus, Worker, WorkerConfig};
use search::{SearchMode, SearchRequest};
use server::{AppConfig, AppState};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
  _temp: TempDir,
  project: std::path::PathBuf,
  state: Arc<AppState>,
  shutdown: CancellationToken,
}

impl Harness {
  async fn start() -> Self {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    let project = project.canonicalize().unwrap();

    let mut config = AppConfig::default();
    config.state_dir = temp.path().join("state");
    config.project_root = Some(project.clone());
    config.embedding = brain_core::ProviderConfig {
      provider: "hash".to_string(),
      model: "token-hash".to_string(),
      params: [("dimensions".to_string(), serde_json::json!(64))].into_iter().collect(),
      ..Default::default()
    };

    let state = Arc::new(AppState::build(&config).await.unwrap());

    let shutdown = CancellationToken::new();
    let worker = Worker::new(
      Arc::clone(&state.queue),
      Arc::clone(&state.runner),
      WorkerConfig {
        job_timeout: Duration::from_secs(60),
        poll_interval: Duration::from_millis(10),
      },
    );
    tokio::spawn(worker.run(shutdown.clone()));

    Self {
      _temp: temp,
      project,
      state,
      shutdown,
    }
  }

  fn write(&self, rel: &str, contents: &str) {
    let path = self.project.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
  }

  async fn index_and_wait(&self) {
    let outcome = self
      .state
      .queue
      .enqueue(EnqueueRequest {
        folder: self.project.clone(),
        force_new: true,
        ..Default::default()
      })
      .await
      .unwrap();

    for _ in 0..500 {
      let job = self.state.queue.get(&outcome.job_id).await.unwrap();
      match job.status {
        JobStatus::Done => return,
        JobStatus::Failed => panic!("job failed: {:?}", job.error),
        _ => tokio::time::sleep(Duration::from_millis(10)).await,
      }
    }
    panic!("job never finished");
  }
}

impl Drop for Harness {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

#[tokio::test]
async fn test_index_then_keyword_search_exact_symbol() {
  let harness = Harness::start().await;
  harness.write(
    "auth.py",
    "import jwt\n\ndef authenticate_user(token, secret):\n    \"\"\"Check a token.\"\"\"\n    return jwt.decode(token, secret)\n",
  );
  harness.write("render.py", "def render_page(template):\n    return template\n");

  harness.index_and_wait().await;

  let mut request = SearchRequest::new("authenticate_user", SearchMode::Keyword);
  request.top_k = Some(5);
  let response = harness.state.engine.search(&request).await.unwrap();

  assert!(!response.results.is_empty());
  let top = &response.results[0];
  assert!(top.text.contains("def authenticate_user"));
  assert_eq!(top.metadata.source_type, SourceType::Code);
  assert_eq!(top.metadata.language.as_deref(), Some("python"));
  assert_eq!(top.metadata.symbol_name.as_deref(), Some("authenticate_user"));
}

#[tokio::test]
async fn test_graph_query_finds_importing_chunk() {
  let harness = Harness::start().await;
  harness.write("auth.py", "import jwt\n\ndef check(token):\n    return jwt.decode(token)\n");

  harness.index_and_wait().await;

  let response = harness
    .state
    .engine
    .search(&SearchRequest::new("what imports jwt", SearchMode::Graph))
    .await
    .unwrap();

  assert!(!response.results.is_empty());
  assert!(response.results.iter().any(|r| r.metadata.source == "auth.py"));
}

#[tokio::test]
async fn test_multi_mode_over_indexed_corpus() {
  let harness = Harness::start().await;
  harness.write("auth.py", "import jwt\n\ndef authenticate_user(token):\n    return jwt.decode(token)\n");
  harness.write("README.md", "# Auth\n\nHow authentication works in this service.\n");

  harness.index_and_wait().await;

  let response = harness
    .state
    .engine
    .search(&SearchRequest::new("authenticate_user jwt", SearchMode::Multi))
    .await
    .unwrap();

  assert_eq!(response.mode, SearchMode::Multi);
  assert!(!response.degraded);
  assert!(!response.results.is_empty());
  for result in &response.results {
    assert!((0.0..=1.0).contains(&result.score));
  }
}

#[tokio::test]
async fn test_dedupe_returns_same_job() {
  let harness = Harness::start().await;
  harness.write("a.md", "# A\n\ntext");

  // Two identical enqueues while the first is still live
  let first = harness
    .state
    .queue
    .enqueue(EnqueueRequest {
      folder: harness.project.clone(),
      ..Default::default()
    })
    .await
    .unwrap();
  let second = harness
    .state
    .queue
    .enqueue(EnqueueRequest {
      folder: harness.project.clone(),
      ..Default::default()
    })
    .await
    .unwrap();

  assert!(second.dedupe_hit);
  assert_eq!(second.job_id, first.job_id);
}

#[tokio::test]
async fn test_reindex_after_shrink_prunes_chunks() {
  let harness = Harness::start().await;

  let long: String = (0..6)
    .map(|i| format!("# Section {}\n\n{}\n\n", i, "paragraph with plenty of words inside it. ".repeat(20)))
    .collect();
  harness.write("notes.md", &long);
  harness.index_and_wait().await;

  let before = harness
    .state
    .backend
    .get_count(Some(&storage::MetadataFilter::source("notes.md")))
    .await
    .unwrap();
  assert!(before >= 2);

  harness.write("notes.md", "# Only\n\nshort now");
  harness.index_and_wait().await;

  let after = harness
    .state
    .backend
    .get_count(Some(&storage::MetadataFilter::source("notes.md")))
    .await
    .unwrap();
  assert!(after < before);

  let ghost = harness
    .state
    .backend
    .get_by_id(&brain_core::Chunk::stable_id("notes.md", before - 1))
    .await
    .unwrap();
  assert!(ghost.is_none());
}
