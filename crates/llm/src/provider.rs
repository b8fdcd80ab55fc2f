use async_trait::async_trait;

/// Port for text-completion providers used by the graph extractor
#[async_trait]
pub trait SummarizationProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;

  /// Complete a prompt and return the raw text response
  async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
  #[error("No api key configured: set {0}")]
  NoApiKey(String),
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Provider error: {0}")]
  ProviderError(String),
  #[error("Request timed out")]
  Timeout,
}

impl From<LlmError> for brain_core::Error {
  fn from(e: LlmError) -> Self {
    brain_core::Error::Provider(e.to_string())
  }
}
