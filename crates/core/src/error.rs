use thiserror::Error;

use crate::config::BackendKind;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Configuration: {0}")]
  Configuration(String),

  #[error("Embedding metadata mismatch: index was built with {stored}, current provider is {current}")]
  ProviderMismatch { stored: String, current: String },

  #[error("Storage ({backend}): {message}")]
  Storage { backend: BackendKind, message: String },

  #[error("{operation} requires the {required} backend; current backend is {backend}")]
  BackendUnsupported {
    operation: &'static str,
    backend: BackendKind,
    required: BackendKind,
  },

  #[error("Queue is full: {pending} pending jobs (max {max})")]
  QueueFull { pending: usize, max: usize },

  #[error("Exceeded the time budget of {seconds}s")]
  JobTimeout { seconds: u64 },

  #[error("Provider: {0}")]
  Provider(String),

  #[error("Validation: {0}")]
  Validation(String),

  #[error("IO: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a backend failure with the backend kind that produced it
  pub fn storage(backend: BackendKind, message: impl std::fmt::Display) -> Self {
    Error::Storage {
      backend,
      message: message.to_string(),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
