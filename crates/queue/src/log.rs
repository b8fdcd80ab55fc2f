//! Durable persistence for the job queue.
//!
//! Append-only newline-delimited JSON, one full `JobRecord` snapshot per
//! line, plus periodic snapshot compaction. Writes are serialized by an
//! in-process mutex and guarded by an OS-level file lock so two daemons
//! cannot share a queue directory. Every append is flushed and fsynced.

use std::{
  fs::{File, OpenOptions},
  io::Write,
  path::PathBuf,
  sync::Mutex,
};

use brain_core::{Error, Result, StateDir};
use fs2::FileExt;
use tracing::{debug, warn};

use crate::job::JobRecord;

/// Log lines before an automatic compaction
pub const COMPACT_THRESHOLD: usize = 1000;

pub struct QueueLog {
  log_path: PathBuf,
  snapshot_path: PathBuf,
  /// Held (exclusively) for the lifetime of the queue
  _lock_file: File,
  state: Mutex<LogState>,
}

struct LogState {
  /// Lines appended since the last compaction
  line_count: usize,
}

impl QueueLog {
  /// Open the queue's persistence, acquiring the OS lock.
  pub fn open(state: &StateDir) -> Result<Self> {
    std::fs::create_dir_all(state.jobs_dir())?;

    let lock_path = state.queue_lock();
    let lock_file = OpenOptions::new().create(true).truncate(false).write(true).open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(|_| {
      Error::Configuration(format!(
        "queue lock at {} is held by another process",
        lock_path.display()
      ))
    })?;

    let log_path = state.queue_log();
    let line_count = match std::fs::read_to_string(&log_path) {
      Ok(contents) => contents.lines().count(),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
      Err(e) => return Err(e.into()),
    };

    Ok(Self {
      log_path,
      snapshot_path: state.queue_snapshot(),
      _lock_file: lock_file,
      state: Mutex::new(LogState { line_count }),
    })
  }

  /// Append one record snapshot, flushed and fsynced before returning.
  pub fn append(&self, record: &JobRecord) -> Result<()> {
    let line = serde_json::to_string(record)?;

    let mut guard = self.state.lock().map_err(|_| Error::Configuration("queue log mutex poisoned".into()))?;

    let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    file.sync_all()?;

    guard.line_count += 1;
    Ok(())
  }

  /// Whether the log has grown enough to warrant compaction
  pub fn needs_compaction(&self) -> bool {
    self
      .state
      .lock()
      .map(|guard| guard.line_count >= COMPACT_THRESHOLD)
      .unwrap_or(false)
  }

  /// Write the current state to the snapshot (temp + atomic rename), then
  /// truncate the log.
  pub fn compact(&self, records: &[JobRecord]) -> Result<()> {
    let mut guard = self.state.lock().map_err(|_| Error::Configuration("queue log mutex poisoned".into()))?;

    let mut out = String::new();
    for record in records {
      out.push_str(&serde_json::to_string(record)?);
      out.push('\n');
    }

    let tmp = self.snapshot_path.with_extension("snapshot.tmp");
    {
      let mut file = File::create(&tmp)?;
      file.write_all(out.as_bytes())?;
      file.sync_all()?;
    }
    std::fs::rename(&tmp, &self.snapshot_path)?;

    let file = File::create(&self.log_path)?; // truncates
    file.sync_all()?;
    guard.line_count = 0;

    debug!(records = records.len(), "Queue log compacted");
    Ok(())
  }

  /// Replay snapshot then log. Later lines for the same job id win; order
  /// of first appearance is preserved (it is the FIFO order).
  pub fn load(&self) -> Result<Vec<JobRecord>> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: std::collections::HashMap<String, JobRecord> = std::collections::HashMap::new();

    for path in [&self.snapshot_path, &self.log_path] {
      let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => return Err(e.into()),
      };

      for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
          continue;
        }
        match serde_json::from_str::<JobRecord>(line) {
          Ok(record) => {
            if !by_id.contains_key(&record.id) {
              order.push(record.id.clone());
            }
            by_id.insert(record.id.clone(), record);
          }
          Err(e) => {
            // A torn final line after a crash is expected; anything else in
            // the middle of the log is worth a warning too, but never fatal.
            warn!(error = %e, "Skipping unparseable queue log line");
          }
        }
      }
    }

    Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
  }
}
