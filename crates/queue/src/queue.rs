//! In-memory queue state over the durable log.
//!
//! Status reads never touch the queue mutex: a snapshot behind an RwLock is
//! refreshed on every write, so `/status` stays responsive during indexing.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::RwLock,
};

use brain_core::{Error, MAX_QUEUE_LENGTH, MAX_RETRIES, Result, StateDir};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
  job::{JobOperation, JobOptions, JobProgress, JobRecord, JobStatus, dedupe_key},
  log::QueueLog,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueRequest {
  pub folder: PathBuf,
  #[serde(default)]
  pub options: JobOptions,
  /// Bypass deduplication and enqueue a fresh job
  #[serde(default)]
  pub force_new: bool,
  /// Allow folders outside the project root
  #[serde(default)]
  pub allow_external: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOutcome {
  pub job_id: String,
  pub queue_position: usize,
  pub queue_length: usize,
  pub dedupe_hit: bool,
}

/// Lock-free status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
  pub pending: usize,
  pub running: Option<RunningSummary>,
  pub done: usize,
  pub failed: usize,
  pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningSummary {
  pub job_id: String,
  pub folder: PathBuf,
  pub progress: Option<JobProgress>,
}

struct QueueState {
  /// FIFO order of every known job
  jobs: Vec<JobRecord>,
  by_id: HashMap<String, usize>,
}

impl QueueState {
  fn get(&self, id: &str) -> Option<&JobRecord> {
    self.by_id.get(id).map(|&i| &self.jobs[i])
  }

  fn get_mut(&mut self, id: &str) -> Option<&mut JobRecord> {
    self.by_id.get(id).map(|&i| &mut self.jobs[i])
  }

  fn push(&mut self, record: JobRecord) {
    self.by_id.insert(record.id.clone(), self.jobs.len());
    self.jobs.push(record);
  }

  fn pending_count(&self) -> usize {
    self.jobs.iter().filter(|j| j.status == JobStatus::Pending).count()
  }
}

pub struct JobQueue {
  state: Mutex<QueueState>,
  log: QueueLog,
  status: RwLock<QueueStatus>,
  project_root: Option<PathBuf>,
}

impl JobQueue {
  /// Open the queue, replaying the log and recovering from a crash: any
  /// `running` job goes back to `pending` with its retry count incremented,
  /// or to `failed` once retries are exhausted.
  pub fn open(state_dir: &StateDir, project_root: Option<PathBuf>) -> Result<Self> {
    let log = QueueLog::open(state_dir)?;
    let mut jobs = log.load()?;

    for job in &mut jobs {
      if job.status == JobStatus::Running {
        job.retry_count += 1;
        job.started_at = None;
        if job.retry_count > MAX_RETRIES {
          job.status = JobStatus::Failed;
          job.finished_at = Some(Utc::now());
          job.error = Some(format!("gave up after {} interrupted attempts", job.retry_count));
          warn!(job_id = %job.id, "Recovered job exceeded retry budget, marking failed");
        } else {
          job.status = JobStatus::Pending;
          info!(job_id = %job.id, retry = job.retry_count, "Recovered interrupted job");
        }
        log.append(job)?;
      }
    }

    let mut state = QueueState {
      jobs: Vec::new(),
      by_id: HashMap::new(),
    };
    for job in jobs {
      state.push(job);
    }

    let queue = Self {
      status: RwLock::new(QueueStatus::default()),
      state: Mutex::new(state),
      log,
      project_root,
    };

    // status snapshot for the freshly loaded state
    {
      let state = queue.state.try_lock().map_err(|_| Error::Configuration("queue state locked at open".into()))?;
      queue.refresh_status(&state);
    }

    Ok(queue)
  }

  /// Enqueue an indexing job.
  ///
  /// The folder is normalized (symlinks resolved, absolute form) and must
  /// live inside the project root unless `allow_external` is set. A pending
  /// or running job with the same dedup key is returned as-is unless
  /// `force_new` bypasses it. A full queue is rejected with backpressure.
  pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome> {
    let folder = normalize_folder(&request.folder)?;

    if !request.allow_external
      && let Some(root) = &self.project_root
      && !folder.starts_with(root)
    {
      return Err(Error::Validation(format!(
        "{} is outside the project root {}",
        folder.display(),
        root.display()
      )));
    }

    let key = dedupe_key(&folder, JobOperation::IndexFolder, &request.options);

    let mut state = self.state.lock().await;

    if !request.force_new
      && let Some(existing) = state.jobs.iter().find(|j| j.dedupe_key == key && j.status.is_active())
    {
      debug!(job_id = %existing.id, "Dedupe hit on enqueue");
      let outcome = EnqueueOutcome {
        job_id: existing.id.clone(),
        queue_position: queue_position(&state, &existing.id),
        queue_length: state.pending_count(),
        dedupe_hit: true,
      };
      return Ok(outcome);
    }

    let pending = state.pending_count();
    if pending >= MAX_QUEUE_LENGTH {
      return Err(Error::QueueFull {
        pending,
        max: MAX_QUEUE_LENGTH,
      });
    }

    let mut record = JobRecord::new(JobOperation::IndexFolder, folder, request.options);
    record.dedupe_key = key;
    self.log.append(&record)?;

    let outcome = EnqueueOutcome {
      job_id: record.id.clone(),
      queue_position: pending + 1,
      queue_length: pending + 1,
      dedupe_hit: false,
    };

    info!(job_id = %record.id, folder = %record.folder.display(), "Job enqueued");
    state.push(record);
    self.refresh_status(&state);

    Ok(outcome)
  }

  /// Claim the next pending job for the worker. Returns `None` while a job
  /// is running: at most one job runs at a time.
  pub async fn claim_next(&self) -> Result<Option<JobRecord>> {
    let mut state = self.state.lock().await;

    if state.jobs.iter().any(|j| j.status == JobStatus::Running) {
      return Ok(None);
    }

    let Some(index) = state.jobs.iter().position(|j| j.status == JobStatus::Pending) else {
      return Ok(None);
    };

    state.jobs[index].status = JobStatus::Running;
    state.jobs[index].started_at = Some(Utc::now());
    let claimed = state.jobs[index].clone();
    self.log.append(&claimed)?;
    self.refresh_status(&state);

    Ok(Some(claimed))
  }

  /// Persist a progress checkpoint for the running job
  pub async fn checkpoint(&self, job_id: &str, progress: JobProgress) -> Result<()> {
    let mut state = self.state.lock().await;
    let Some(job) = state.get_mut(job_id) else {
      return Err(Error::Validation(format!("unknown job {}", job_id)));
    };

    job.progress = Some(progress);
    let snapshot = job.clone();
    self.log.append(&snapshot)?;
    self.refresh_status(&state);
    Ok(())
  }

  /// Mark the running job finished. `error == None` means success, and the
  /// status accounts for a cancellation observed by the worker.
  pub async fn finish(&self, job_id: &str, error: Option<String>, was_cancelled: bool) -> Result<()> {
    let mut state = self.state.lock().await;
    let Some(job) = state.get_mut(job_id) else {
      return Err(Error::Validation(format!("unknown job {}", job_id)));
    };

    job.finished_at = Some(Utc::now());
    job.status = if was_cancelled {
      JobStatus::Cancelled
    } else if error.is_some() {
      JobStatus::Failed
    } else {
      JobStatus::Done
    };
    job.error = error;

    let snapshot = job.clone();
    self.log.append(&snapshot)?;

    if self.log.needs_compaction() {
      self.log.compact(&state.jobs)?;
    }

    self.refresh_status(&state);
    Ok(())
  }

  /// Cancel a job. Pending jobs cancel immediately; a running job gets its
  /// `cancel_requested` flag set for the worker to observe at the next
  /// checkpoint. Returns the status after the request.
  pub async fn cancel(&self, job_id: &str) -> Result<JobStatus> {
    let mut state = self.state.lock().await;
    let Some(job) = state.get_mut(job_id) else {
      return Err(Error::Validation(format!("unknown job {}", job_id)));
    };

    match job.status {
      JobStatus::Pending => {
        job.status = JobStatus::Cancelled;
        job.finished_at = Some(Utc::now());
        info!(job_id, "Pending job cancelled");
      }
      JobStatus::Running => {
        job.cancel_requested = true;
        info!(job_id, "Cancellation requested for running job");
      }
      // Terminal states stay as they are
      _ => return Ok(job.status),
    }

    let snapshot = job.clone();
    let status = snapshot.status;
    self.log.append(&snapshot)?;
    self.refresh_status(&state);
    Ok(status)
  }

  pub async fn is_cancel_requested(&self, job_id: &str) -> bool {
    let state = self.state.lock().await;
    state.get(job_id).map(|j| j.cancel_requested).unwrap_or(false)
  }

  pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
    let state = self.state.lock().await;
    state.get(job_id).cloned()
  }

  pub async fn list(&self) -> Vec<JobRecord> {
    let state = self.state.lock().await;
    state.jobs.clone()
  }

  /// Current status snapshot. Never takes the queue mutex and never blocks
  /// on a running job.
  pub fn status(&self) -> QueueStatus {
    self.status.read().map(|s| s.clone()).unwrap_or_default()
  }

  fn refresh_status(&self, state: &QueueState) {
    let mut snapshot = QueueStatus::default();
    for job in &state.jobs {
      match job.status {
        JobStatus::Pending => snapshot.pending += 1,
        JobStatus::Done => snapshot.done += 1,
        JobStatus::Failed => snapshot.failed += 1,
        JobStatus::Cancelled => snapshot.cancelled += 1,
        JobStatus::Running => {
          snapshot.running = Some(RunningSummary {
            job_id: job.id.clone(),
            folder: job.folder.clone(),
            progress: job.progress.clone(),
          });
        }
      }
    }

    if let Ok(mut guard) = self.status.write() {
      *guard = snapshot;
    }
  }
}

/// Position of a job among pending jobs (1-based); 0 when running
fn queue_position(state: &QueueState, job_id: &str) -> usize {
  let mut position = 0;
  for job in &state.jobs {
    if job.status == JobStatus::Pending {
      position += 1;
    }
    if job.id == job_id {
      return if job.status == JobStatus::Pending { position } else { 0 };
    }
  }
  0
}

/// Resolve symlinks and produce an absolute path
fn normalize_folder(folder: &Path) -> Result<PathBuf> {
  folder
    .canonicalize()
    .map_err(|e| Error::Validation(format!("cannot resolve folder {}: {}", folder.display(), e)))
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  struct Fixture {
    temp: TempDir,
    project: PathBuf,
    state_dir: StateDir,
  }

  fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    let project = project.canonicalize().unwrap();
    let state_dir = StateDir::new(temp.path().join("state"));
    Fixture {
      temp,
      project,
      state_dir,
    }
  }

  fn request(folder: &Path) -> EnqueueRequest {
    EnqueueRequest {
      folder: folder.to_path_buf(),
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn test_enqueue_and_dedupe() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    let first = queue.enqueue(request(&fx.project)).await.unwrap();
    assert!(!first.dedupe_hit);
    assert_eq!(first.queue_length, 1);

    let second = queue.enqueue(request(&fx.project)).await.unwrap();
    assert!(second.dedupe_hit);
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(second.queue_length, 1);
  }

  #[tokio::test]
  async fn test_force_new_bypasses_dedupe() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    let first = queue.enqueue(request(&fx.project)).await.unwrap();
    let mut forced = request(&fx.project);
    forced.force_new = true;
    let second = queue.enqueue(forced).await.unwrap();

    assert!(!second.dedupe_hit);
    assert_ne!(second.job_id, first.job_id);
  }

  #[tokio::test]
  async fn test_external_folder_rejected() {
    let fx = fixture();
    let outside = fx.temp.path().join("elsewhere");
    std::fs::create_dir_all(&outside).unwrap();

    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    let err = queue.enqueue(request(&outside)).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let mut allowed = request(&outside);
    allowed.allow_external = true;
    assert!(queue.enqueue(allowed).await.is_ok());
  }

  #[tokio::test]
  async fn test_backpressure() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    for i in 0..MAX_QUEUE_LENGTH {
      let folder = fx.project.join(format!("sub{}", i));
      std::fs::create_dir_all(&folder).unwrap();
      queue.enqueue(request(&folder)).await.unwrap();
    }

    let overflow = fx.project.join("overflow");
    std::fs::create_dir_all(&overflow).unwrap();
    let err = queue.enqueue(request(&overflow)).await.unwrap_err();
    assert!(matches!(err, Error::QueueFull { .. }));
  }

  #[tokio::test]
  async fn test_single_running_job() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    let sub = fx.project.join("a");
    std::fs::create_dir_all(&sub).unwrap();
    queue.enqueue(request(&fx.project)).await.unwrap();
    queue.enqueue(request(&sub)).await.unwrap();

    let first = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Running);

    // Second claim yields nothing while one is running
    assert!(queue.claim_next().await.unwrap().is_none());

    queue.finish(&first.id, None, false).await.unwrap();
    let second = queue.claim_next().await.unwrap().unwrap();
    assert_ne!(second.id, first.id);
  }

  #[tokio::test]
  async fn test_fifo_order() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    let mut ids = Vec::new();
    for i in 0..3 {
      let folder = fx.project.join(format!("s{}", i));
      std::fs::create_dir_all(&folder).unwrap();
      ids.push(queue.enqueue(request(&folder)).await.unwrap().job_id);
    }

    for expected in ids {
      let claimed = queue.claim_next().await.unwrap().unwrap();
      assert_eq!(claimed.id, expected);
      queue.finish(&claimed.id, None, false).await.unwrap();
    }
  }

  #[tokio::test]
  async fn test_cancel_pending_and_running() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    let sub = fx.project.join("a");
    std::fs::create_dir_all(&sub).unwrap();
    let first = queue.enqueue(request(&fx.project)).await.unwrap();
    let second = queue.enqueue(request(&sub)).await.unwrap();

    let running = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(running.id, first.job_id);

    // Pending cancels immediately
    let status = queue.cancel(&second.job_id).await.unwrap();
    assert_eq!(status, JobStatus::Cancelled);

    // Running only gets the flag
    let status = queue.cancel(&first.job_id).await.unwrap();
    assert_eq!(status, JobStatus::Running);
    assert!(queue.is_cancel_requested(&first.job_id).await);

    queue.finish(&first.job_id, None, true).await.unwrap();
    assert_eq!(queue.get(&first.job_id).await.unwrap().status, JobStatus::Cancelled);
  }

  #[tokio::test]
  async fn test_crash_recovery_requeues_running() {
    let fx = fixture();

    let job_id = {
      let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();
      let outcome = queue.enqueue(request(&fx.project)).await.unwrap();
      queue.claim_next().await.unwrap().unwrap();
      outcome.job_id
      // Queue dropped with the job still marked running: a crash
    };

    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();
    let job = queue.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert!(job.started_at.is_none());
  }

  #[tokio::test]
  async fn test_crash_recovery_exhausts_retries() {
    let fx = fixture();

    let job_id = {
      let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();
      queue.enqueue(request(&fx.project)).await.unwrap().job_id
    };

    for _ in 0..=MAX_RETRIES {
      let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();
      let job = queue.get(&job_id).await.unwrap();
      if job.status == JobStatus::Failed {
        break;
      }
      queue.claim_next().await.unwrap().unwrap();
      // crash again
    }

    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();
    let job = queue.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.retry_count > MAX_RETRIES);
  }

  #[tokio::test]
  async fn test_status_reads_without_blocking() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    queue.enqueue(request(&fx.project)).await.unwrap();
    let running = queue.claim_next().await.unwrap().unwrap();

    // Hold the queue mutex and read status anyway
    let _guard = queue.state.lock().await;
    let status = queue.status();
    assert_eq!(status.pending, 0);
    assert_eq!(status.running.as_ref().unwrap().job_id, running.id);
  }

  #[tokio::test]
  async fn test_checkpoint_updates_status_snapshot() {
    let fx = fixture();
    let queue = JobQueue::open(&fx.state_dir, Some(fx.project.clone())).unwrap();

    queue.enqueue(request(&fx.project)).await.unwrap();
    let running = queue.claim_next().await.unwrap().unwrap();

    queue
      .checkpoint(
        &running.id,
        JobProgress {
          files_processed: 10,
          files_total: 100,
          chunks_created: 42,
          current_file: Some("src/lib.rs".to_string()),
          percent: 10.0,
        },
      )
      .await
      .unwrap();

    let status = queue.status();
    let progress = status.running.unwrap().progress.unwrap();
    assert_eq!(progress.files_processed, 10);
    assert_eq!(progress.chunks_created, 42);
  }
}
