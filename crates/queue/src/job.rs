use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Pending,
  Running,
  Done,
  Failed,
  Cancelled,
}

impl JobStatus {
  /// Whether the job can still run (or is running)
  pub fn is_active(&self) -> bool {
    matches!(self, JobStatus::Pending | JobStatus::Running)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOperation {
  IndexFolder,
}

impl JobOperation {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobOperation::IndexFolder => "index_folder",
    }
  }
}

/// Options that shape an indexing job and participate in deduplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
  pub include_code: bool,
  /// Include/exclude patterns forwarded to the pipeline
  pub patterns: Vec<String>,
  /// Authorizes an embedding-metadata reset
  pub force: bool,
}

impl Default for JobOptions {
  fn default() -> Self {
    Self {
      include_code: true,
      patterns: Vec::new(),
      force: false,
    }
  }
}

/// Progress checkpoint mirrored from the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
  pub files_processed: usize,
  pub files_total: usize,
  pub chunks_created: usize,
  pub current_file: Option<String>,
  pub percent: f32,
}

/// One job, as persisted to the queue log. Every log line is a full
/// snapshot of this record at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
  pub id: String,
  pub dedupe_key: String,
  pub operation: JobOperation,
  pub folder: PathBuf,
  pub options: JobOptions,
  pub status: JobStatus,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  pub retry_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub progress: Option<JobProgress>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default)]
  pub cancel_requested: bool,
}

impl JobRecord {
  pub fn new(operation: JobOperation, folder: PathBuf, options: JobOptions) -> Self {
    let dedupe_key = dedupe_key(&folder, operation, &options);
    Self {
      id: uuid::Uuid::now_v7().to_string(),
      dedupe_key,
      operation,
      folder,
      options,
      status: JobStatus::Pending,
      created_at: Utc::now(),
      started_at: None,
      finished_at: None,
      retry_count: 0,
      progress: None,
      error: None,
      cancel_requested: false,
    }
  }
}

/// Deduplication key over the normalized job parameters:
/// `sha256(path || operation || include_code || sorted(patterns))`
pub fn dedupe_key(folder: &Path, operation: JobOperation, options: &JobOptions) -> String {
  let mut patterns = options.patterns.clone();
  patterns.sort();

  let mut hasher = Sha256::new();
  hasher.update(normalized_path_str(folder).as_bytes());
  hasher.update(b"\0");
  hasher.update(operation.as_str().as_bytes());
  hasher.update(b"\0");
  hasher.update(if options.include_code { b"1" } else { b"0" });
  for pattern in &patterns {
    hasher.update(b"\0");
    hasher.update(pattern.as_bytes());
  }

  hex::encode(hasher.finalize())
}

/// Path string used for hashing. Case-folded on platforms whose default
/// filesystems are case-insensitive, so `/Docs` and `/docs` collapse to one
/// job.
fn normalized_path_str(path: &Path) -> String {
  let s = path.to_string_lossy().to_string();
  if cfg!(any(target_os = "macos", target_os = "windows")) {
    s.to_lowercase()
  } else {
    s
  }
}
