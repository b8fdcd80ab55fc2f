mod extraction;
mod openai;
pub mod prompts;
mod provider;

use std::sync::Arc;

use brain_core::ProviderConfig;
pub use extraction::{MAX_TRIPLETS_PER_CHUNK, extract_triplets, parse_triplets};
pub use openai::OpenAiChatProvider;
pub use provider::{LlmError, SummarizationProvider};

/// Build the summarization provider named by a config section.
///
/// Returns `None` when the section is disabled; callers must skip the LLM
/// extraction pass entirely in that case.
pub fn from_config(config: &ProviderConfig) -> Result<Option<Arc<dyn SummarizationProvider>>, LlmError> {
  if !config.is_enabled() {
    return Ok(None);
  }

  match config.provider.as_str() {
    "openai" => {
      let var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
      let api_key = std::env::var(var).map_err(|_| LlmError::NoApiKey(var.to_string()))?;

      let mut provider = OpenAiChatProvider::new(api_key);
      if let Some(url) = &config.base_url {
        provider = provider.with_base_url(url);
      }
      if !config.model.is_empty() {
        provider = provider.with_model(&config.model);
      }
      Ok(Some(Arc::new(provider)))
    }
    other => Err(LlmError::ProviderError(format!("Unknown summarization provider: {}", other))),
  }
}
