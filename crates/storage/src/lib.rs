pub mod backend;
pub mod embedded;
pub mod relational;
pub mod scores;

use std::sync::Arc;

use brain_core::{BackendKind, ProviderSettings, Result, StateDir};

pub use backend::{GraphNeighbor, MetadataFilter, StorageBackend};
pub use embedded::EmbeddedBackend;
pub use relational::RelationalBackend;

/// Open the backend selected by the storage settings.
///
/// `dimensions` is the embedding width the index will be created with; an
/// existing index keeps its stored width and compatibility is enforced via
/// the embedding metadata check before any write.
pub async fn open_backend(
  settings: &ProviderSettings,
  state: &StateDir,
  dimensions: usize,
) -> Result<Arc<dyn StorageBackend>> {
  let backend: Arc<dyn StorageBackend> = match settings.storage.resolved_backend() {
    BackendKind::Embedded => Arc::new(EmbeddedBackend::open(state.clone(), dimensions).await?),
    BackendKind::Relational => {
      let config = settings
        .storage
        .relational
        .clone()
        .ok_or_else(|| brain_core::Error::Configuration("relational backend selected but not configured".into()))?;
      Arc::new(RelationalBackend::connect(&config, dimensions).await?)
    }
  };

  backend.initialize().await?;
  Ok(backend)
}
