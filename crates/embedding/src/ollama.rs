//! Ollama adapter, speaking the `/api/embed` endpoint.
//!
//! `/api/embed` accepts an array of inputs and returns one embedding per
//! input, so batches go over the wire as single requests. Large batches are
//! chunked to keep request bodies bounded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::{EmbeddingError, EmbeddingProvider};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_DIMENSIONS: usize = 768;

/// Inputs per request; beyond this the body gets split
const MAX_INPUTS_PER_REQUEST: usize = 64;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
  http: reqwest::Client,
  base_url: String,
  model: String,
  dimensions: usize,
}

impl Default for OllamaProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl OllamaProvider {
  pub fn new() -> Self {
    Self {
      http: reqwest::Client::new(),
      base_url: DEFAULT_BASE_URL.to_string(),
      model: DEFAULT_MODEL.to_string(),
      dimensions: DEFAULT_DIMENSIONS,
    }
  }

  pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
    self.base_url = url.into();
    self
  }

  pub fn with_model(mut self, model: impl Into<String>) -> Self {
    self.model = model.into();
    self
  }

  pub fn with_dimensions(mut self, dimensions: usize) -> Self {
    self.dimensions = dimensions;
    self
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), path)
  }

  /// One `/api/embed` round trip for up to `MAX_INPUTS_PER_REQUEST` inputs
  async fn embed_call(&self, input: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    trace!(inputs = input.len(), model = %self.model, "Calling /api/embed");

    let response = self
      .http
      .post(self.endpoint("api/embed"))
      .json(&EmbedPayload {
        model: &self.model,
        input,
      })
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(EmbeddingError::Http {
        status: status.as_u16(),
        detail: response.text().await.unwrap_or_default(),
      });
    }

    let reply: EmbedReply = response.json().await?;

    if reply.embeddings.len() != input.len() {
      return Err(EmbeddingError::Malformed(format!(
        "asked for {} embeddings, got {}",
        input.len(),
        reply.embeddings.len()
      )));
    }

    if let Some(first) = reply.embeddings.first()
      && first.len() != self.dimensions
    {
      warn!(
        got = first.len(),
        configured = self.dimensions,
        "Model returned a different embedding width than configured"
      );
    }

    Ok(reply.embeddings)
  }
}

#[derive(Debug, Serialize)]
struct EmbedPayload<'a> {
  model: &'a str,
  input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedReply {
  embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
  fn name(&self) -> &str {
    "ollama"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    self
      .embed_call(&[text])
      .await?
      .pop()
      .ok_or_else(|| EmbeddingError::Malformed("empty embeddings array".into()))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut embeddings = Vec::with_capacity(texts.len());
    for group in texts.chunks(MAX_INPUTS_PER_REQUEST) {
      embeddings.extend(self.embed_call(group).await?);
    }
    Ok(embeddings)
  }

  async fn is_available(&self) -> bool {
    self
      .http
      .get(self.endpoint("api/version"))
      .send()
      .await
      .map(|r| r.status().is_success())
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let provider = OllamaProvider::new();
    assert_eq!(provider.name(), "ollama");
    assert_eq!(provider.model_id(), DEFAULT_MODEL);
    assert_eq!(provider.dimensions(), DEFAULT_DIMENSIONS);
  }

  #[test]
  fn test_endpoint_handles_trailing_slash() {
    let provider = OllamaProvider::new().with_base_url("http://embed-host:11434/");
    assert_eq!(provider.endpoint("api/embed"), "http://embed-host:11434/api/embed");
    assert_eq!(provider.endpoint("api/version"), "http://embed-host:11434/api/version");
  }

  #[test]
  fn test_builder_overrides() {
    let provider = OllamaProvider::new().with_model("qwen3-embedding").with_dimensions(1024);
    assert_eq!(provider.model_id(), "qwen3-embedding");
    assert_eq!(provider.dimensions(), 1024);
  }

  #[test]
  fn test_payload_shape() {
    let payload = EmbedPayload {
      model: "m",
      input: &["one", "two"],
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["model"], "m");
    assert_eq!(value["input"], serde_json::json!(["one", "two"]));
  }

  #[test]
  fn test_reply_shape() {
    let reply: EmbedReply = serde_json::from_str(r#"{"model":"m","embeddings":[[0.1,0.2]]}"#).unwrap();
    assert_eq!(reply.embeddings.len(), 1);
    assert_eq!(reply.embeddings[0].len(), 2);
  }
}
