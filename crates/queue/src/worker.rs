//! Single background worker: polls the queue, runs jobs under a wall-clock
//! timeout, mirrors progress into checkpoints, and observes cancellation at
//! checkpoint boundaries.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use brain_core::{Error, Result, config::DEFAULT_JOB_TIMEOUT_SECS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
  job::{JobProgress, JobRecord},
  queue::JobQueue,
};

/// What a completed job produced, for postcondition checks
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
  pub files_processed: usize,
  /// Files skipped because their content was unchanged
  pub files_skipped: usize,
  pub chunks_created: usize,
  pub cancelled: bool,
}

/// Executes one job; the queue crate stays ignorant of the pipeline
#[async_trait]
pub trait JobRunner: Send + Sync {
  async fn run(
    &self,
    job: &JobRecord,
    progress: mpsc::Sender<JobProgress>,
    cancel: CancellationToken,
  ) -> Result<JobOutcome>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Wall-clock budget per job
  pub job_timeout: Duration,
  /// Idle poll interval when the queue is empty
  pub poll_interval: Duration,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
      poll_interval: Duration::from_millis(500),
    }
  }
}

pub struct Worker {
  queue: Arc<JobQueue>,
  runner: Arc<dyn JobRunner>,
  config: WorkerConfig,
}

impl Worker {
  pub fn new(queue: Arc<JobQueue>, runner: Arc<dyn JobRunner>, config: WorkerConfig) -> Self {
    Self { queue, runner, config }
  }

  /// Run until the shutdown token fires. The job in flight finishes its
  /// current file before a shutdown takes effect.
  pub async fn run(self, shutdown: CancellationToken) {
    info!("Worker started");

    loop {
      if shutdown.is_cancelled() {
        break;
      }

      let job = match self.queue.claim_next().await {
        Ok(Some(job)) => job,
        Ok(None) => {
          tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(self.config.poll_interval) => continue,
          }
        }
        Err(e) => {
          error!(error = %e, "Failed to poll queue");
          tokio::time::sleep(self.config.poll_interval).await;
          continue;
        }
      };

      self.execute(job, &shutdown).await;
    }

    info!("Worker stopped");
  }

  async fn execute(&self, job: JobRecord, shutdown: &CancellationToken) {
    info!(job_id = %job.id, folder = %job.folder.display(), "Job started");

    let job_cancel = shutdown.child_token();
    let (progress_tx, mut progress_rx) = mpsc::channel::<JobProgress>(16);

    // Mirror pipeline progress into checkpoints and watch for cancellation:
    // the flag is only observed here, at checkpoint boundaries.
    let queue = Arc::clone(&self.queue);
    let watcher_job_id = job.id.clone();
    let watcher_cancel = job_cancel.clone();
    let watcher = tokio::spawn(async move {
      while let Some(progress) = progress_rx.recv().await {
        if let Err(e) = queue.checkpoint(&watcher_job_id, progress).await {
          warn!(job_id = %watcher_job_id, error = %e, "Failed to persist checkpoint");
        }
        if queue.is_cancel_requested(&watcher_job_id).await {
          watcher_cancel.cancel();
        }
      }
    });

    let outcome = tokio::time::timeout(
      self.config.job_timeout,
      self.runner.run(&job, progress_tx, job_cancel.clone()),
    )
    .await;

    let _ = watcher.await;

    // A cancel requested after the final checkpoint still counts
    let cancel_requested = self.queue.is_cancel_requested(&job.id).await;

    let (error, cancelled) = match outcome {
      Ok(Ok(result)) => {
        let cancelled = result.cancelled || cancel_requested;
        // Postcondition: freshly processed files must have produced chunks.
        // Unchanged files and cancellations are legitimate zero-chunk runs.
        let fresh_files = result.files_processed.saturating_sub(result.files_skipped);
        if !cancelled && fresh_files > 0 && result.chunks_created == 0 {
          warn!(job_id = %job.id, files = fresh_files, "Job processed files but indexed no chunks");
          (
            Some(format!("processed {} files but indexed no chunks", fresh_files)),
            false,
          )
        } else {
          (None, cancelled)
        }
      }
      Ok(Err(e)) => {
        error!(job_id = %job.id, error = %e, "Job failed");
        (Some(e.to_string()), cancel_requested)
      }
      Err(_) => {
        let e = Error::JobTimeout {
          seconds: self.config.job_timeout.as_secs(),
        };
        error!(job_id = %job.id, "Job timed out");
        (Some(e.to_string()), cancel_requested)
      }
    };

    if let Err(e) = self.queue.finish(&job.id, error, cancelled).await {
      error!(job_id = %job.id, error = %e, "Failed to persist job completion");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
  };

  use brain_core::StateDir;
  use tempfile::TempDir;

  use super::*;
  use crate::{
    job::JobStatus,
    queue::{EnqueueRequest, JobQueue},
  };

  struct Fixture {
    _temp: TempDir,
    project: PathBuf,
    queue: Arc<JobQueue>,
  }

  fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    let project = project.canonicalize().unwrap();

    let queue = Arc::new(JobQueue::open(&StateDir::new(temp.path().join("state")), Some(project.clone())).unwrap());

    Fixture {
      _temp: temp,
      project,
      queue,
    }
  }

  async fn enqueue(fx: &Fixture) -> String {
    fx.queue
      .enqueue(EnqueueRequest {
        folder: fx.project.clone(),
        ..Default::default()
      })
      .await
      .unwrap()
      .job_id
  }

  struct OkRunner {
    runs: AtomicUsize,
  }

  #[async_trait]
  impl JobRunner for OkRunner {
    async fn run(
      &self,
      _job: &JobRecord,
      progress: mpsc::Sender<JobProgress>,
      _cancel: CancellationToken,
    ) -> Result<JobOutcome> {
      self.runs.fetch_add(1, Ordering::SeqCst);
      let _ = progress
        .send(JobProgress {
          files_processed: 1,
          files_total: 1,
          chunks_created: 3,
          current_file: None,
          percent: 100.0,
        })
        .await;
      Ok(JobOutcome {
        files_processed: 1,
        chunks_created: 3,
        ..Default::default()
      })
    }
  }

  struct SlowRunner;

  #[async_trait]
  impl JobRunner for SlowRunner {
    async fn run(
      &self,
      _job: &JobRecord,
      progress: mpsc::Sender<JobProgress>,
      cancel: CancellationToken,
    ) -> Result<JobOutcome> {
      for i in 0..50 {
        if cancel.is_cancelled() {
          return Ok(JobOutcome {
            files_processed: i,
            chunks_created: i,
            cancelled: true,
            ..Default::default()
          });
        }
        let _ = progress.send(JobProgress::default()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
      }
      Ok(JobOutcome::default())
    }
  }

  struct HangingRunner;

  #[async_trait]
  impl JobRunner for HangingRunner {
    async fn run(
      &self,
      _job: &JobRecord,
      _progress: mpsc::Sender<JobProgress>,
      _cancel: CancellationToken,
    ) -> Result<JobOutcome> {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      Ok(JobOutcome::default())
    }
  }

  fn fast_config() -> WorkerConfig {
    WorkerConfig {
      job_timeout: Duration::from_secs(30),
      poll_interval: Duration::from_millis(10),
    }
  }

  async fn wait_for<F: Fn(JobStatus) -> bool>(queue: &JobQueue, job_id: &str, pred: F) -> JobStatus {
    for _ in 0..300 {
      let status = queue.get(job_id).await.unwrap().status;
      if pred(status) {
        return status;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    queue.get(job_id).await.unwrap().status
  }

  #[tokio::test]
  async fn test_worker_runs_job_to_done() {
    let fx = fixture();
    let job_id = enqueue(&fx).await;

    let shutdown = CancellationToken::new();
    let runner = Arc::new(OkRunner {
      runs: AtomicUsize::new(0),
    });
    let worker = Worker::new(Arc::clone(&fx.queue), runner.clone(), fast_config());
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let status = wait_for(&fx.queue, &job_id, |s| s == JobStatus::Done).await;
    assert_eq!(status, JobStatus::Done);
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

    // Checkpoint made it into the record
    let job = fx.queue.get(&job_id).await.unwrap();
    assert_eq!(job.progress.unwrap().chunks_created, 3);

    shutdown.cancel();
    let _ = handle.await;
  }

  #[tokio::test]
  async fn test_worker_times_out_hanging_job() {
    let fx = fixture();
    let job_id = enqueue(&fx).await;

    let shutdown = CancellationToken::new();
    let worker = Worker::new(
      Arc::clone(&fx.queue),
      Arc::new(HangingRunner),
      WorkerConfig {
        job_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
      },
    );
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let status = wait_for(&fx.queue, &job_id, |s| s == JobStatus::Failed).await;
    assert_eq!(status, JobStatus::Failed);

    let job = fx.queue.get(&job_id).await.unwrap();
    assert!(job.error.unwrap().contains("time budget"));

    shutdown.cancel();
    let _ = handle.await;
  }

  #[tokio::test]
  async fn test_cancel_running_job_observed_at_checkpoint() {
    let fx = fixture();
    let job_id = enqueue(&fx).await;

    let shutdown = CancellationToken::new();
    let worker = Worker::new(Arc::clone(&fx.queue), Arc::new(SlowRunner), fast_config());
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    wait_for(&fx.queue, &job_id, |s| s == JobStatus::Running).await;
    fx.queue.cancel(&job_id).await.unwrap();

    let status = wait_for(&fx.queue, &job_id, |s| s == JobStatus::Cancelled).await;
    assert_eq!(status, JobStatus::Cancelled);

    shutdown.cancel();
    let _ = handle.await;
  }

  #[tokio::test]
  async fn test_worker_processes_queue_in_order() {
    let fx = fixture();

    let sub = fx.project.join("sub");
    std::fs::create_dir_all(&sub).unwrap();
    let first = enqueue(&fx).await;
    let second = fx
      .queue
      .enqueue(EnqueueRequest {
        folder: sub,
        ..Default::default()
      })
      .await
      .unwrap()
      .job_id;

    let shutdown = CancellationToken::new();
    let worker = Worker::new(
      Arc::clone(&fx.queue),
      Arc::new(OkRunner {
        runs: AtomicUsize::new(0),
      }),
      fast_config(),
    );
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    assert_eq!(wait_for(&fx.queue, &first, |s| s == JobStatus::Done).await, JobStatus::Done);
    assert_eq!(wait_for(&fx.queue, &second, |s| s == JobStatus::Done).await, JobStatus::Done);

    let first_job = fx.queue.get(&first).await.unwrap();
    let second_job = fx.queue.get(&second).await.unwrap();
    assert!(first_job.finished_at.unwrap() <= second_job.started_at.unwrap());

    shutdown.cancel();
    let _ = handle.await;
  }
}
