//! OpenAI-compatible embeddings adapter.
//!
//! Every call sends `input` as an array, even for a single text, so there is
//! one request path. The response rows carry an `index` field and are not
//! guaranteed to arrive in input order; rows are slotted back by index
//! before returning, since upsert order downstream must match input order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{EmbeddingError, EmbeddingProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;

/// Inputs per request; the API caps arrays well above this, but smaller
/// bodies keep failures cheap to retry
const MAX_INPUTS_PER_REQUEST: usize = 256;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
  http: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
  dimensions: usize,
}

impl OpenAiProvider {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      api_key: api_key.into(),
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

  fn endpoint(&self) -> String {
    format!("{}/embeddings", self.base_url.trim_end_matches('/'))
  }

  async fn embed_call(&self, input: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    trace!(inputs = input.len(), model = %self.model, "Requesting embeddings");

    let response = self
      .http
      .post(self.endpoint())
      .bearer_auth(&self.api_key)
      .json(&EmbeddingsPayload {
        model: &self.model,
        input,
        encoding_format: "float",
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

    let reply: EmbeddingsReply = response.json().await?;
    reorder_rows(reply.data, input.len())
  }
}

#[derive(Debug, Serialize)]
struct EmbeddingsPayload<'a> {
  model: &'a str,
  input: &'a [&'a str],
  encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsReply {
  data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
  index: usize,
  embedding: Vec<f32>,
}

/// Slot rows back into input order, rejecting gaps and duplicates
fn reorder_rows(rows: Vec<EmbeddingRow>, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
  if rows.len() != expected {
    return Err(EmbeddingError::Malformed(format!(
      "asked for {} embeddings, got {}",
      expected,
      rows.len()
    )));
  }

  let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
  for row in rows {
    let Some(slot) = ordered.get_mut(row.index) else {
      return Err(EmbeddingError::Malformed(format!("row index {} out of range", row.index)));
    };
    if slot.replace(row.embedding).is_some() {
      return Err(EmbeddingError::Malformed(format!("duplicate row index {}", row.index)));
    }
  }

  // Every slot is filled: lengths matched and no index repeated
  Ok(ordered.into_iter().flatten().collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
  fn name(&self) -> &str {
    "openai"
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
      .ok_or_else(|| EmbeddingError::Malformed("empty data array".into()))
  }

  async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut embeddings = Vec::with_capacity(texts.len());
    for group in texts.chunks(MAX_INPUTS_PER_REQUEST) {
      embeddings.extend(self.embed_call(group).await?);
    }
    Ok(embeddings)
  }

  async fn is_available(&self) -> bool {
    !self.api_key.trim().is_empty()
  }
}
