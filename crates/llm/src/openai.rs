use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{LlmError, SummarizationProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible chat-completions provider
#[derive(Debug, Clone)]
pub struct OpenAiChatProvider {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl OpenAiChatProvider {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      api_key: api_key.into(),
      base_url: DEFAULT_BASE_URL.to_string(),
      model: DEFAULT_MODEL.to_string(),
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

  fn completions_url(&self) -> String {
    format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
  }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
  content: String,
}

#[async_trait]
impl SummarizationProvider for OpenAiChatProvider {
  fn name(&self) -> &str {
    "openai"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
    let request = ChatRequest {
      model: &self.model,
      messages: vec![ChatMessage {
        role: "user",
        content: prompt,
      }],
      temperature: 0.0,
    };

    debug!(model = %self.model, prompt_chars = prompt.len(), "Sending completion request");

    let response = self
      .client
      .post(self.completions_url())
      .header("Authorization", format!("Bearer {}", self.api_key))
      .json(&request)
      .send()
      .await?;

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      warn!(%status, "Completion request failed");
      return Err(LlmError::ProviderError(format!("Provider returned {}: {}", status, body)));
    }

    let result: ChatResponse = response.json().await?;

    result
      .choices
      .into_iter()
      .next()
      .map(|c| c.message.content)
      .ok_or_else(|| LlmError::ProviderError("No completion in response".into()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_completions_url() {
    let provider = OpenAiChatProvider::new("k").with_base_url("http://proxy:9999/v1/");
    assert_eq!(provider.completions_url(), "http://proxy:9999/v1/chat/completions");
  }

  #[test]
  fn test_model_override() {
    let provider = OpenAiChatProvider::new("k").with_model("gpt-4o");
    assert_eq!(provider.model_id(), "gpt-4o");
  }
}
