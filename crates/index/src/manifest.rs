//! Pipeline-owned file manifest, persisted as JSONL next to the backend
//! state. One line per indexed file.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use brain_core::{ManifestEntry, Result, paths::atomic_write};

#[derive(Debug)]
pub struct Manifest {
  path: PathBuf,
  entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
  /// Load the manifest, tolerating a missing file (fresh project)
  pub fn load(path: &Path) -> Result<Self> {
    let mut entries = HashMap::new();

    match std::fs::read_to_string(path) {
      Ok(contents) => {
        for line in contents.lines() {
          let line = line.trim();
          if line.is_empty() {
            continue;
          }
          let entry: ManifestEntry = serde_json::from_str(line)?;
          entries.insert(entry.path.clone(), entry);
        }
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }

    Ok(Self {
      path: path.to_path_buf(),
      entries,
    })
  }

  pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
    self.entries.get(path)
  }

  pub fn upsert(&mut self, entry: ManifestEntry) {
    self.entries.insert(entry.path.clone(), entry);
  }

  pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
    self.entries.remove(path)
  }

  pub fn paths(&self) -> Vec<String> {
    self.entries.keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Find a previously indexed path with this content hash (rename detection)
  pub fn path_with_hash(&self, content_hash: &str) -> Option<&str> {
    self
      .entries
      .values()
      .find(|e| e.content_hash == content_hash)
      .map(|e| e.path.as_str())
  }

  /// Write the whole manifest atomically. Lines are sorted by path so the
  /// file diffs cleanly.
  pub fn save(&self) -> Result<()> {
    let mut sorted: Vec<&ManifestEntry> = self.entries.values().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut out = String::new();
    for entry in sorted {
      out.push_str(&serde_json::to_string(entry)?);
      out.push('\n');
    }

    atomic_write(&self.path, out.as_bytes())?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use brain_core::manifest::content_hash;
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn test_load_missing_is_empty() {
    let temp = TempDir::new().unwrap();
    let manifest = Manifest::load(&temp.path().join("manifest.jsonl")).unwrap();
    assert!(manifest.is_empty());
  }

  #[test]
  fn test_save_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.jsonl");

    let mut manifest = Manifest::load(&path).unwrap();
    manifest.upsert(ManifestEntry::new("b.md", 2, content_hash("b")));
    manifest.upsert(ManifestEntry::new("a.md", 5, content_hash("a")));
    manifest.save().unwrap();

    let reloaded = Manifest::load(&path).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get("a.md").unwrap().chunk_count, 5);

    // Sorted output
    let contents = std::fs::read_to_string(&path).unwrap();
    let first_line = contents.lines().next().unwrap();
    assert!(first_line.contains("a.md"));
  }

  #[test]
  fn test_rename_detection_by_hash() {
    let temp = TempDir::new().unwrap();
    let mut manifest = Manifest::load(&temp.path().join("m.jsonl")).unwrap();

    let hash = content_hash("same content");
    manifest.upsert(ManifestEntry::new("old.md", 3, hash.clone()));

    assert_eq!(manifest.path_with_hash(&hash), Some("old.md"));
    assert_eq!(manifest.path_with_hash("other"), None);
  }
}
