mod hash;
mod ollama;
mod openai;
mod provider;
mod resilient;

use std::sync::Arc;

use brain_core::{EmbeddingMetadata, ProviderConfig};
pub use hash::HashProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{EmbeddingError, EmbeddingProvider};
pub use resilient::{ResilientProvider, RetryPolicy};

/// Build the embedding provider named by a config section.
///
/// Network providers get a retry wrapper: a short fuse for localhost, a
/// patient one for rate-limited cloud APIs.
pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
  match config.provider.as_str() {
    "ollama" => {
      let mut provider = OllamaProvider::new();
      if let Some(url) = &config.base_url {
        provider = provider.with_base_url(url);
      }
      if !config.model.is_empty() {
        provider = provider.with_model(&config.model);
      }
      let default_dimensions = provider.dimensions();
      provider = provider.with_dimensions(config.param_usize("dimensions", default_dimensions));
      Ok(Arc::new(ResilientProvider::wrap(provider, RetryPolicy::snappy())))
    }
    "openai" => {
      let api_key = resolve_api_key(config)?;
      let mut provider = OpenAiProvider::new(api_key);
      if let Some(url) = &config.base_url {
        provider = provider.with_base_url(url);
      }
      if !config.model.is_empty() {
        provider = provider.with_model(&config.model);
      }
      let default_dimensions = provider.dimensions();
      provider = provider.with_dimensions(config.param_usize("dimensions", default_dimensions));
      Ok(Arc::new(ResilientProvider::wrap(provider, RetryPolicy::patient())))
    }
    "hash" => {
      let dimensions = config.param_usize("dimensions", 256);
      Ok(Arc::new(HashProvider::new(dimensions)))
    }
    other => Err(EmbeddingError::UnknownProvider(other.to_string())),
  }
}

/// Embedding metadata describing the given provider, for compatibility checks
pub fn metadata_for(provider: &dyn EmbeddingProvider) -> EmbeddingMetadata {
  EmbeddingMetadata::new(provider.name(), provider.model_id(), provider.dimensions())
}

fn resolve_api_key(config: &ProviderConfig) -> Result<String, EmbeddingError> {
  let var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
  std::env::var(var).map_err(|_| EmbeddingError::NoApiKey(var.to_string()))
}
