use async_trait::async_trait;
use std::fmt::Debug;

/// Port implemented by every embedding provider the pipeline can use
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + Debug {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
  async fn is_available(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("No api key configured: set {0}")]
  NoApiKey(String),
  #[error("Unknown embedding provider: {0}")]
  UnknownProvider(String),
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Endpoint returned {status}: {detail}")]
  Http { status: u16, detail: String },
  #[error("Malformed provider response: {0}")]
  Malformed(String),
  #[error("Request timed out")]
  Timeout,
}

impl EmbeddingError {
  /// Whether retrying the same call can plausibly succeed.
  ///
  /// Rate limits and upstream hiccups are transient; auth, validation and
  /// shape problems are not.
  pub fn is_transient(&self) -> bool {
    match self {
      EmbeddingError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
      EmbeddingError::Request(e) => e.is_timeout() || e.is_connect(),
      EmbeddingError::Timeout => true,
      EmbeddingError::NoApiKey(_) | EmbeddingError::UnknownProvider(_) | EmbeddingError::Malformed(_) => false,
    }
  }
}

impl From<EmbeddingError> for brain_core::Error {
  fn from(e: EmbeddingError) -> Self {
    brain_core::Error::Provider(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(EmbeddingError::Http {
      status: 429,
      detail: String::new()
    }
    .is_transient());
    assert!(EmbeddingError::Http {
      status: 503,
      detail: String::new()
    }
    .is_transient());
    assert!(EmbeddingError::Timeout.is_transient());

    assert!(!EmbeddingError::Http {
      status: 400,
      detail: String::new()
    }
    .is_transient());
    assert!(!EmbeddingError::Http {
      status: 401,
      detail: String::new()
    }
    .is_transient());
    assert!(!EmbeddingError::NoApiKey("KEY".into()).is_transient());
    assert!(!EmbeddingError::Malformed("bad".into()).is_transient());
  }
}
