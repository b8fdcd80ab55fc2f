pub mod chunk;
pub mod config;
pub mod error;
pub mod manifest;
pub mod meta;
pub mod paths;
pub mod result;
pub mod triplet;

pub use chunk::{CHARS_PER_TOKEN, Chunk, ChunkMetadata, SourceType, SymbolKind};
pub use config::{
  BackendKind, DEFAULT_ALPHA, DEFAULT_GRAPH_DEPTH, DEFAULT_RRF_K, DEFAULT_TOP_K, MAX_GRAPH_DEPTH, MAX_QUEUE_LENGTH,
  MAX_RETRIES, MAX_TOP_K, ProviderConfig, ProviderSettings, RelationalConfig, RerankerConfig, StorageSettings,
};
pub use error::{Error, Result};
pub use manifest::ManifestEntry;
pub use meta::EmbeddingMetadata;
pub use paths::StateDir;
pub use result::SearchResult;
pub use triplet::{Triplet, predicates};
