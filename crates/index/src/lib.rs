pub mod code_chunker;
pub mod doc_chunker;
pub mod extractor;
pub mod language;
pub mod manifest;
pub mod pipeline;
pub mod scanner;

pub use code_chunker::CodeChunker;
pub use doc_chunker::{DocChunkParams, chunk_document};
pub use language::{FileKind, Language, LanguageTable};
pub use manifest::Manifest;
pub use pipeline::{IndexPipeline, IndexProgress, IndexReport, PipelineOptions};
pub use scanner::{ScanOptions, ScannedFile, scan_folder};
