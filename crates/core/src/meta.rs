use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Single record describing the embedding configuration that produced the
/// current index. Mutable only through the backend's `set_embedding_metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
  pub provider: String,
  pub model: String,
  pub dimensions: usize,
}

impl EmbeddingMetadata {
  pub fn new(provider: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
    Self {
      provider: provider.into(),
      model: model.into(),
      dimensions,
    }
  }

  fn describe(&self) -> String {
    format!("{}/{} ({} dims)", self.provider, self.model, self.dimensions)
  }
}

impl std::fmt::Display for EmbeddingMetadata {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.describe())
  }
}

/// Synchronous compatibility check between the current provider configuration
/// and what the index was built with.
///
/// No stored metadata (fresh index) is always compatible. Any drift in
/// provider, model or dimensions fails with a mismatch error; the caller must
/// perform an explicit reset before proceeding.
pub fn validate_compatibility(current: &EmbeddingMetadata, stored: Option<&EmbeddingMetadata>) -> Result<()> {
  match stored {
    None => Ok(()),
    Some(stored) if stored == current => Ok(()),
    Some(stored) => Err(Error::ProviderMismatch {
      stored: stored.describe(),
      current: current.describe(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fresh_index_is_compatible() {
    let current = EmbeddingMetadata::new("ollama", "qwen3-embedding", 1024);
    assert!(validate_compatibility(&current, None).is_ok());
  }

  #[test]
  fn test_identical_metadata_is_compatible() {
    let current = EmbeddingMetadata::new("ollama", "qwen3-embedding", 1024);
    let stored = current.clone();
    assert!(validate_compatibility(&current, Some(&stored)).is_ok());
  }

  #[test]
  fn test_model_drift_fails() {
    let current = EmbeddingMetadata::new("ollama", "nomic-embed-text", 768);
    let stored = EmbeddingMetadata::new("ollama", "qwen3-embedding", 1024);
    let err = validate_compatibility(&current, Some(&stored)).unwrap_err();
    assert!(matches!(err, Error::ProviderMismatch { .. }));
  }

  #[test]
  fn test_dimension_drift_fails() {
    let current = EmbeddingMetadata::new("openai", "text-embedding-3-small", 512);
    let stored = EmbeddingMetadata::new("openai", "text-embedding-3-small", 1536);
    assert!(validate_compatibility(&current, Some(&stored)).is_err());
  }
}
