//! Application composition root: backend, providers, queue and engine are
//! built once and passed around explicitly.

use std::sync::Arc;

use brain_core::{Result, StateDir};
use index::{IndexPipeline, PipelineOptions};
use queue::{JobOutcome, JobProgress, JobQueue, JobRecord, JobRunner};
use search::SearchEngine;
use storage::StorageBackend;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;

pub struct AppState {
  pub state_dir: StateDir,
  pub backend: Arc<dyn StorageBackend>,
  pub engine: SearchEngine,
  pub queue: Arc<JobQueue>,
  pub runner: Arc<dyn JobRunner>,
}

impl AppState {
  pub async fn build(config: &AppConfig) -> Result<Self> {
    let state_dir = StateDir::new(&config.state_dir);
    state_dir.ensure()?;

    let settings = config.provider_settings();

    let embedding = embedding::from_config(&settings.embedding)?;
    let summarizer = llm::from_config(&settings.summarization)?;
    let backend = storage::open_backend(&settings, &state_dir, embedding.dimensions()).await?;

    info!(
      backend = %backend.kind(),
      embedding = embedding.name(),
      model = embedding.model_id(),
      dimensions = embedding.dimensions(),
      summarization = summarizer.is_some(),
      "Composition complete"
    );

    let reranker = settings.reranker.as_ref().and_then(search::RuleBasedReranker::from_config);
    let engine = SearchEngine::new(Arc::clone(&backend), Arc::clone(&embedding)).with_reranker(reranker);

    let queue = Arc::new(JobQueue::open(&state_dir, Some(config.resolved_project_root()))?);

    let runner: Arc<dyn JobRunner> = Arc::new(PipelineRunner {
      backend: Arc::clone(&backend),
      embedding,
      summarizer,
      state_dir: state_dir.clone(),
    });

    Ok(Self {
      state_dir,
      backend,
      engine,
      queue,
      runner,
    })
  }
}

/// Bridges the job queue to the indexing pipeline
pub struct PipelineRunner {
  backend: Arc<dyn StorageBackend>,
  embedding: Arc<dyn embedding::EmbeddingProvider>,
  summarizer: Option<Arc<dyn llm::SummarizationProvider>>,
  state_dir: StateDir,
}

#[async_trait::async_trait]
impl JobRunner for PipelineRunner {
  async fn run(
    &self,
    job: &JobRecord,
    progress: mpsc::Sender<JobProgress>,
    cancel: CancellationToken,
  ) -> Result<JobOutcome> {
    let options = PipelineOptions {
      include_code: job.options.include_code,
      include_patterns: job.options.patterns.clone(),
      force: job.options.force,
      ..Default::default()
    };

    let pipeline = IndexPipeline::new(
      Arc::clone(&self.backend),
      Arc::clone(&self.embedding),
      self.summarizer.clone(),
      self.state_dir.clone(),
      options,
    );

    // Translate pipeline progress into queue checkpoints
    let (pipeline_tx, mut pipeline_rx) = mpsc::channel::<index::IndexProgress>(16);
    let forward = tokio::spawn(async move {
      while let Some(p) = pipeline_rx.recv().await {
        let _ = progress
          .send(JobProgress {
            files_processed: p.files_processed,
            files_total: p.files_total,
            chunks_created: p.chunks_created,
            current_file: p.current_file,
            percent: p.percent,
          })
          .await;
      }
    });

    let report = pipeline.run(&job.folder, Some(pipeline_tx), &cancel).await;
    let _ = forward.await;
    let report = report?;

    Ok(JobOutcome {
      files_processed: report.files_processed,
      files_skipped: report.files_skipped_unchanged,
      chunks_created: report.chunks_created,
      cancelled: report.cancelled,
    })
  }
}
