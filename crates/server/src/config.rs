//! Host configuration: YAML file layered under `BRAIN_*` environment
//! overrides, resolving to the provider settings the core consumes.

use std::path::{Path, PathBuf};

use brain_core::{Error, ProviderSettings, Result};
use figment::{
  Figment,
  providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Per-project state directory
  pub state_dir: PathBuf,
  /// Project root used to validate enqueue paths; defaults to the state
  /// directory's parent
  pub project_root: Option<PathBuf>,
  pub host: String,
  pub port: u16,
  /// Whether the process runs attached to a terminal
  pub foreground: bool,

  pub embedding: brain_core::ProviderConfig,
  pub summarization: brain_core::ProviderConfig,
  pub reranker: Option<brain_core::RerankerConfig>,
  pub storage: brain_core::StorageSettings,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      state_dir: PathBuf::from(".agentbrain"),
      project_root: None,
      host: "127.0.0.1".to_string(),
      port: 7171,
      foreground: true,
      embedding: brain_core::ProviderConfig {
        provider: "ollama".to_string(),
        model: "nomic-embed-text".to_string(),
        ..Default::default()
      },
      summarization: brain_core::ProviderConfig::default(),
      reranker: None,
      storage: brain_core::StorageSettings::default(),
    }
  }
}

impl AppConfig {
  /// Load configuration: defaults < YAML file < `BRAIN_*` environment.
  ///
  /// Nested keys use double underscores: `BRAIN_EMBEDDING__MODEL`,
  /// `BRAIN_STORAGE__BACKEND`.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = path {
      if !path.exists() {
        return Err(Error::Configuration(format!("config file not found: {}", path.display())));
      }
      figment = figment.merge(Yaml::file(path));
    } else {
      figment = figment.merge(Yaml::file("agentbrain.yaml"));
    }

    let mut config: AppConfig = figment
      .merge(Env::prefixed("BRAIN_").split("__"))
      .extract()
      .map_err(|e| Error::Configuration(e.to_string()))?;

    let mut settings = config.provider_settings();
    settings.apply_env_overrides().map_err(Error::Configuration)?;
    config.storage = settings.storage;

    config.validate()?;
    Ok(config)
  }

  /// The provider-settings view the core components consume
  pub fn provider_settings(&self) -> ProviderSettings {
    ProviderSettings {
      embedding: self.embedding.clone(),
      summarization: self.summarization.clone(),
      reranker: self.reranker.clone(),
      storage: self.storage.clone(),
    }
  }

  pub fn resolved_project_root(&self) -> PathBuf {
    match &self.project_root {
      Some(root) => root.clone(),
      None => self.state_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
    }
  }

  fn validate(&self) -> Result<()> {
    if !self.embedding.is_enabled() {
      return Err(Error::Configuration("an embedding provider is required".into()));
    }
    if self.embedding.model.is_empty() && self.embedding.provider != "hash" {
      return Err(Error::Configuration("embedding.model must be set".into()));
    }
    if self.storage.resolved_backend() == brain_core::BackendKind::Relational && self.storage.relational.is_none() {
      return Err(Error::Configuration(
        "storage.relational must be configured for the relational backend".into(),
      ));
    }
    Ok(())
  }
}
