//! Layout of the per-project state directory.
//!
//! ```text
//! <state>/
//!   embedded_vector/            LanceDB database (ANN index + chunk rows)
//!   embedded_keyword/           on-disk inverted keyword index
//!   graph_index/graph_store.json
//!   manifest.jsonl
//!   jobs/index_queue.jsonl      append-only job log
//!   jobs/index_queue.snapshot   compacted queue state
//!   jobs/.queue.lock
//!   runtime.json                server descriptor, written by the host
//! ```

use std::path::{Path, PathBuf};

/// Resolved per-project state directory
#[derive(Debug, Clone)]
pub struct StateDir {
  root: PathBuf,
}

impl StateDir {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn embedded_vector(&self) -> PathBuf {
    self.root.join("embedded_vector")
  }

  pub fn embedded_keyword(&self) -> PathBuf {
    self.root.join("embedded_keyword")
  }

  pub fn graph_store(&self) -> PathBuf {
    self.root.join("graph_index").join("graph_store.json")
  }

  pub fn embedding_meta(&self) -> PathBuf {
    self.root.join("embedding_meta.json")
  }

  pub fn manifest(&self) -> PathBuf {
    self.root.join("manifest.jsonl")
  }

  pub fn jobs_dir(&self) -> PathBuf {
    self.root.join("jobs")
  }

  pub fn queue_log(&self) -> PathBuf {
    self.jobs_dir().join("index_queue.jsonl")
  }

  pub fn queue_snapshot(&self) -> PathBuf {
    self.jobs_dir().join("index_queue.snapshot")
  }

  pub fn queue_lock(&self) -> PathBuf {
    self.jobs_dir().join(".queue.lock")
  }

  pub fn runtime_descriptor(&self) -> PathBuf {
    self.root.join("runtime.json")
  }

  /// Create every directory the layout needs
  pub fn ensure(&self) -> std::io::Result<()> {
    std::fs::create_dir_all(self.embedded_vector())?;
    std::fs::create_dir_all(self.embedded_keyword())?;
    if let Some(parent) = self.graph_store().parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(self.jobs_dir())?;
    Ok(())
  }
}

/// Write a file atomically: write to a sibling temp path, then rename over
/// the destination so readers never observe a partial file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
  let tmp = path.with_extension("tmp");
  std::fs::write(&tmp, contents)?;
  std::fs::rename(&tmp, path)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_layout_paths() {
    let state = StateDir::new("/proj/.brain");
    assert!(state.graph_store().ends_with("graph_index/graph_store.json"));
    assert!(state.queue_log().ends_with("jobs/index_queue.jsonl"));
    assert!(state.queue_lock().ends_with("jobs/.queue.lock"));
  }

  #[test]
  fn test_ensure_creates_directories() {
    let temp = TempDir::new().unwrap();
    let state = StateDir::new(temp.path().join("state"));
    state.ensure().unwrap();

    assert!(state.embedded_vector().is_dir());
    assert!(state.embedded_keyword().is_dir());
    assert!(state.jobs_dir().is_dir());
  }

  #[test]
  fn test_atomic_write_replaces_content() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("meta.json");

    atomic_write(&path, b"one").unwrap();
    atomic_write(&path, b"two").unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    assert!(!path.with_extension("tmp").exists());
  }
}
