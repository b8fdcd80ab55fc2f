//! Provider and storage settings consumed by the retrieval core.
//!
//! Resolution order for the storage backend: environment override
//! (`BRAIN_STORAGE_BACKEND`) > configuration file > default (embedded).
//! `BRAIN_DATABASE_URL`, when set, overrides only the relational connection
//! fields; pool and index tuning stay as configured.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Limits and defaults
// ============================================================================

pub const MAX_TOP_K: usize = 100;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_ALPHA: f32 = 0.5;
pub const DEFAULT_RRF_K: f32 = 60.0;
pub const DEFAULT_GRAPH_DEPTH: usize = 2;
pub const MAX_GRAPH_DEPTH: usize = 4;

pub const MAX_QUEUE_LENGTH: usize = 128;
pub const MAX_RETRIES: u32 = 3;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 7200;
pub const PROGRESS_EVERY_FILES: usize = 50;

/// Environment variable that forces a storage backend
pub const BACKEND_ENV: &str = "BRAIN_STORAGE_BACKEND";
/// Environment variable carrying a full relational connection string
pub const DATABASE_URL_ENV: &str = "BRAIN_DATABASE_URL";

// ============================================================================
// Backend selection
// ============================================================================

/// Which storage implementation backs the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  #[default]
  Embedded,
  Relational,
}

impl BackendKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      BackendKind::Embedded => "embedded",
      BackendKind::Relational => "relational",
    }
  }
}

impl std::fmt::Display for BackendKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for BackendKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "embedded" => Ok(BackendKind::Embedded),
      "relational" => Ok(BackendKind::Relational),
      _ => Err(format!("Unknown storage backend: {}", s)),
    }
  }
}

// ============================================================================
// Provider configuration
// ============================================================================

/// One provider section (embedding or summarization)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
  /// Provider identifier (e.g. "ollama", "openai", "hash", "none")
  pub provider: String,
  /// Model name passed to the provider
  pub model: String,
  /// Environment variable holding the API key, if one is needed
  #[serde(skip_serializing_if = "Option::is_none")]
  pub api_key_env: Option<String>,
  /// Base URL override for self-hosted or proxied endpoints
  #[serde(skip_serializing_if = "Option::is_none")]
  pub base_url: Option<String>,
  /// Provider-specific parameters forwarded verbatim
  #[serde(skip_serializing_if = "HashMap::is_empty")]
  pub params: HashMap<String, serde_json::Value>,
}

impl Default for ProviderConfig {
  fn default() -> Self {
    Self {
      provider: "none".to_string(),
      model: String::new(),
      api_key_env: None,
      base_url: None,
      params: HashMap::new(),
    }
  }
}

impl ProviderConfig {
  /// Whether this section names a usable provider
  pub fn is_enabled(&self) -> bool {
    !matches!(self.provider.as_str(), "" | "none" | "disabled")
  }

  /// Read an integer parameter with a fallback
  pub fn param_usize(&self, key: &str, default: usize) -> usize {
    self
      .params
      .get(key)
      .and_then(|v| v.as_u64())
      .map(|v| v as usize)
      .unwrap_or(default)
  }
}

/// Optional reranker stage settings (not applied by the core engine)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RerankerConfig {
  pub enabled: bool,
  pub provider: String,
  pub model: String,
  pub top_k: usize,
  pub initial_top_k: usize,
}

// ============================================================================
// Storage configuration
// ============================================================================

/// Connection and tuning settings for the relational backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
  pub host: String,
  pub port: u16,
  pub database: String,
  pub user: String,
  /// Environment variable holding the password
  pub password_env: String,
  pub pool_size: u32,
  pub pool_max_overflow: u32,
  pub hnsw_m: u32,
  pub hnsw_ef_construction: u32,
}

impl Default for RelationalConfig {
  fn default() -> Self {
    Self {
      host: "localhost".to_string(),
      port: 5432,
      database: "agentbrain".to_string(),
      user: "agentbrain".to_string(),
      password_env: "BRAIN_DB_PASSWORD".to_string(),
      pool_size: 5,
      pool_max_overflow: 10,
      hnsw_m: 16,
      hnsw_ef_construction: 64,
    }
  }
}

impl RelationalConfig {
  /// Apply a `postgres://user@host:port/database` connection string over the
  /// connection fields, leaving pool and index tuning untouched.
  pub fn apply_connection_url(&mut self, url: &str) -> Result<(), String> {
    let rest = url
      .strip_prefix("postgres://")
      .or_else(|| url.strip_prefix("postgresql://"))
      .ok_or_else(|| format!("Unsupported connection scheme in {}", url))?;

    let (userinfo, hostpart) = match rest.rsplit_once('@') {
      Some((u, h)) => (Some(u), h),
      None => (None, rest),
    };

    if let Some(userinfo) = userinfo {
      // A literal password in the URL is intentionally ignored; the password
      // always comes from `password_env`.
      let user = userinfo.split(':').next().unwrap_or(userinfo);
      if !user.is_empty() {
        self.user = user.to_string();
      }
    }

    let (hostport, database) = hostpart.split_once('/').unwrap_or((hostpart, ""));
    if !database.is_empty() {
      self.database = database.split('?').next().unwrap_or(database).to_string();
    }

    if let Some((host, port)) = hostport.rsplit_once(':') {
      self.host = host.to_string();
      self.port = port.parse::<u16>().map_err(|_| format!("Invalid port in {}", url))?;
    } else if !hostport.is_empty() {
      self.host = hostport.to_string();
    }

    Ok(())
  }
}

/// Storage section of the provider settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSettings {
  pub backend: BackendKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub relational: Option<RelationalConfig>,
}

impl StorageSettings {
  /// Backend after applying the environment override
  pub fn resolved_backend(&self) -> BackendKind {
    std::env::var(BACKEND_ENV)
      .ok()
      .and_then(|v| v.parse().ok())
      .unwrap_or(self.backend)
  }
}

// ============================================================================
// Top-level settings
// ============================================================================

/// Full provider settings consumed by the retrieval core
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderSettings {
  pub embedding: ProviderConfig,
  pub summarization: ProviderConfig,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reranker: Option<RerankerConfig>,
  pub storage: StorageSettings,
}

impl ProviderSettings {
  /// Apply the connection-string environment override, if present
  pub fn apply_env_overrides(&mut self) -> Result<(), String> {
    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
      let relational = self.storage.relational.get_or_insert_with(RelationalConfig::default);
      relational.apply_connection_url(&url)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backend_kind_parse() {
    assert_eq!("embedded".parse::<BackendKind>().unwrap(), BackendKind::Embedded);
    assert_eq!("Relational".parse::<BackendKind>().unwrap(), BackendKind::Relational);
    assert!("chroma".parse::<BackendKind>().is_err());
  }

  #[test]
  fn test_connection_url_overrides_connection_fields_only() {
    let mut config = RelationalConfig {
      pool_size: 20,
      hnsw_m: 32,
      ..Default::default()
    };

    config
      .apply_connection_url("postgres://svc@db.internal:6432/brain_prod")
      .unwrap();

    assert_eq!(config.user, "svc");
    assert_eq!(config.host, "db.internal");
    assert_eq!(config.port, 6432);
    assert_eq!(config.database, "brain_prod");
    // Pool and index tuning untouched
    assert_eq!(config.pool_size, 20);
    assert_eq!(config.hnsw_m, 32);
  }

  #[test]
  fn test_connection_url_rejects_unknown_scheme() {
    let mut config = RelationalConfig::default();
    assert!(config.apply_connection_url("mysql://db/x").is_err());
  }

  #[test]
  fn test_provider_enabled() {
    let mut config = ProviderConfig::default();
    assert!(!config.is_enabled());
    config.provider = "ollama".to_string();
    assert!(config.is_enabled());
  }
}
