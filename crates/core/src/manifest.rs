use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-file record of what was indexed last, used to detect additions,
/// shrinks, renames and deletions between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
  /// Path relative to the indexed folder root
  pub path: String,
  pub chunk_count: usize,
  pub content_hash: String,
  pub indexed_at: DateTime<Utc>,
}

impl ManifestEntry {
  pub fn new(path: impl Into<String>, chunk_count: usize, content_hash: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      chunk_count,
      content_hash: content_hash.into(),
      indexed_at: Utc::now(),
    }
  }
}

/// SHA-256 content hash in lowercase hex
pub fn content_hash(content: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(content.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_content_hash_stable() {
    assert_eq!(content_hash("hello"), content_hash("hello"));
    assert_ne!(content_hash("hello"), content_hash("hello "));
  }

  #[test]
  fn test_entry_roundtrip() {
    let entry = ManifestEntry::new("docs/notes.md", 5, content_hash("body"));
    let line = serde_json::to_string(&entry).unwrap();
    let back: ManifestEntry = serde_json::from_str(&line).unwrap();
    assert_eq!(entry, back);
  }
}
