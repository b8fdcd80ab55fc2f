//! Indexing pipeline: load -> detect -> chunk -> extract -> embed -> upsert.
//!
//! Files are processed sequentially by the queue's single worker. Each file
//! goes through prune-and-upsert so shrinking files leave no ghost chunks,
//! and a final sweep removes sources that disappeared from disk since the
//! last run. Embedding compatibility is validated before any write.

use std::{path::Path, sync::Arc};

use brain_core::{Chunk, ChunkMetadata, Error, Result, SourceType, StateDir, manifest::content_hash};
use brain_core::{ManifestEntry, config::PROGRESS_EVERY_FILES};
use embedding::EmbeddingProvider;
use llm::SummarizationProvider;
use storage::StorageBackend;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  code_chunker::{CodeChunkDraft, CodeChunker},
  doc_chunker::{DocChunkParams, chunk_document},
  extractor,
  language::FileKind,
  manifest::Manifest,
  scanner::{ScanOptions, ScannedFile, scan_folder},
};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
  pub include_code: bool,
  pub include_patterns: Vec<String>,
  pub exclude_patterns: Vec<String>,
  /// Texts per embedding-provider call
  pub embed_batch_size: usize,
  pub max_chunk_chars: usize,
  pub doc: DocChunkParams,
  /// Progress emission cadence, in files
  pub progress_every: usize,
  /// Authorizes a reset when embedding metadata mismatches
  pub force: bool,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self {
      include_code: true,
      include_patterns: Vec::new(),
      exclude_patterns: Vec::new(),
      embed_batch_size: 32,
      max_chunk_chars: 4000,
      doc: DocChunkParams::default(),
      progress_every: PROGRESS_EVERY_FILES,
      force: false,
    }
  }
}

/// Periodic progress snapshot, surfaced to the job queue checkpoint
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct IndexProgress {
  pub files_processed: usize,
  pub files_total: usize,
  pub chunks_created: usize,
  pub current_file: Option<String>,
  pub percent: f32,
}

impl IndexProgress {
  fn new(files_processed: usize, files_total: usize, chunks_created: usize, current_file: Option<String>) -> Self {
    let percent = if files_total == 0 {
      100.0
    } else {
      (files_processed as f32 / files_total as f32) * 100.0
    };
    Self {
      files_processed,
      files_total,
      chunks_created,
      current_file,
      percent,
    }
  }
}

/// Outcome of one pipeline run
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
  pub files_processed: usize,
  pub files_total: usize,
  pub files_skipped_unchanged: usize,
  pub files_removed: usize,
  pub chunks_created: usize,
  pub chunks_deleted: usize,
  pub cancelled: bool,
}

pub struct IndexPipeline {
  backend: Arc<dyn StorageBackend>,
  embedding: Arc<dyn EmbeddingProvider>,
  summarizer: Option<Arc<dyn SummarizationProvider>>,
  state: StateDir,
  options: PipelineOptions,
}

impl IndexPipeline {
  pub fn new(
    backend: Arc<dyn StorageBackend>,
    embedding: Arc<dyn EmbeddingProvider>,
    summarizer: Option<Arc<dyn SummarizationProvider>>,
    state: StateDir,
    options: PipelineOptions,
  ) -> Self {
    Self {
      backend,
      embedding,
      summarizer,
      state,
      options,
    }
  }

  /// Index a folder. Cancellation is honored at file boundaries; the file in
  /// flight always completes.
  pub async fn run(
    &self,
    folder: &Path,
    progress: Option<mpsc::Sender<IndexProgress>>,
    cancel: &CancellationToken,
  ) -> Result<IndexReport> {
    let did_reset = self.ensure_compatible().await?;
    if did_reset {
      // The backend is empty now; a stale manifest would skip every
      // unchanged file and leave the index hollow.
      match std::fs::remove_file(self.state.manifest()) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
      }
    }

    let scan_options = ScanOptions {
      include: self.options.include_patterns.clone(),
      exclude: self.options.exclude_patterns.clone(),
      include_code: self.options.include_code,
      table: Default::default(),
    };
    let files = scan_folder(folder, &scan_options)?;

    let mut manifest = Manifest::load(&self.state.manifest())?;
    let mut report = IndexReport {
      files_total: files.len(),
      ..Default::default()
    };

    info!(folder = %folder.display(), files = files.len(), "Indexing started");

    let chunker = CodeChunker::new(self.options.max_chunk_chars);

    for file in &files {
      if cancel.is_cancelled() {
        report.cancelled = true;
        break;
      }

      match self.process_file(file, &chunker, &mut manifest, &mut report).await {
        Ok(()) => {}
        Err(e) => {
          // A single unreadable or unembeddable file aborts the job; the
          // worker records the failure without crashing.
          manifest.save()?;
          return Err(e);
        }
      }

      report.files_processed += 1;

      if report.files_processed % self.options.progress_every == 0
        && let Some(tx) = &progress
      {
        let _ = tx
          .send(IndexProgress::new(
            report.files_processed,
            report.files_total,
            report.chunks_created,
            Some(file.relative.clone()),
          ))
          .await;
      }
    }

    if !report.cancelled {
      self.sweep_removed(&files, &mut manifest, &mut report).await?;
    }

    manifest.save()?;

    if let Some(tx) = &progress {
      let _ = tx
        .send(IndexProgress::new(
          report.files_processed,
          report.files_total,
          report.chunks_created,
          None,
        ))
        .await;
    }

    info!(
      files = report.files_processed,
      chunks = report.chunks_created,
      deleted = report.chunks_deleted,
      removed_sources = report.files_removed,
      cancelled = report.cancelled,
      "Indexing finished"
    );

    Ok(report)
  }

  /// Fail fast on provider drift; reset only under an explicit force flag.
  /// Returns whether a reset happened.
  async fn ensure_compatible(&self) -> Result<bool> {
    let current = embedding::metadata_for(self.embedding.as_ref());

    let did_reset = match self.backend.check_embedding_compatibility(&current).await {
      Ok(()) => false,
      Err(Error::ProviderMismatch { stored, current: cur }) if self.options.force => {
        warn!(stored, current = cur, "Embedding metadata mismatch, force reset");
        self.backend.reset().await?;
        true
      }
      Err(e) => return Err(e),
    };

    self.backend.set_embedding_metadata(&current).await?;
    Ok(did_reset)
  }

  async fn process_file(
    &self,
    file: &ScannedFile,
    chunker: &CodeChunker,
    manifest: &mut Manifest,
    report: &mut IndexReport,
  ) -> Result<()> {
    let content = match tokio::fs::read_to_string(&file.path).await {
      Ok(content) => content,
      Err(e) => {
        debug!(path = %file.path.display(), error = %e, "Skipping unreadable file");
        return Ok(());
      }
    };

    let hash = content_hash(&content);
    if manifest.get(&file.relative).is_some_and(|e| e.content_hash == hash) {
      report.files_skipped_unchanged += 1;
      return Ok(());
    }

    let (chunks, drafts) = self.build_chunks(file, &content);
    let new_count = chunks.len();

    // Prune: id-based when the manifest knows the previous count, otherwise
    // a source-predicate delete. Never an empty id list.
    match manifest.get(&file.relative) {
      Some(previous) if previous.chunk_count > new_count => {
        let stale: Vec<String> = (new_count..previous.chunk_count)
          .map(|i| Chunk::stable_id(&file.relative, i))
          .collect();
        report.chunks_deleted += stale.len();
        self.backend.delete_by_ids(&stale).await?;
      }
      Some(_) => {}
      None => {
        self.backend.delete_by_source(&file.relative).await?;
      }
    }

    if !chunks.is_empty() {
      let embeddings = self.embed_chunks(&chunks).await?;
      self.backend.upsert_documents(&chunks, &embeddings).await?;
      report.chunks_created += new_count;
    }

    // Graph triplets only make sense for code, and only on a backend that
    // has the capability.
    if self.backend.supports_graph()
      && matches!(file.kind, FileKind::Code(_))
    {
      let mut triplets = Vec::new();
      for (chunk, draft) in chunks.iter().zip(&drafts) {
        triplets.extend(
          extractor::extract_chunk_triplets(
            self.summarizer.as_deref(),
            &chunk.id,
            &chunk.text,
            &file.relative,
            draft,
          )
          .await,
        );
      }
      self.backend.graph_put_triplets(&triplets).await?;
    }

    if let Some(old_path) = manifest.path_with_hash(&hash)
      && old_path != file.relative
    {
      debug!(from = old_path, to = %file.relative, "Rename candidate detected");
    }

    manifest.upsert(ManifestEntry::new(file.relative.clone(), new_count, hash));
    Ok(())
  }

  /// Turn file content into chunks plus the drafts the extractor needs
  fn build_chunks(&self, file: &ScannedFile, content: &str) -> (Vec<Chunk>, Vec<CodeChunkDraft>) {
    match file.kind {
      FileKind::Doc => {
        let chunks = chunk_document(content, &self.options.doc)
          .into_iter()
          .enumerate()
          .map(|(i, doc)| {
            let mut meta = ChunkMetadata::doc(&file.relative, i);
            meta.heading_path = doc.heading_path;
            Chunk::new(doc.text, meta)
          })
          .collect();
        (chunks, Vec::new())
      }
      FileKind::Code(language) => {
        let drafts = chunker.chunk(content, language);
        let chunks = drafts
          .iter()
          .enumerate()
          .map(|(i, draft)| {
            let mut meta = ChunkMetadata::code(&file.relative, i, language.as_str());
            if file.source_type == SourceType::Test {
              meta.source_type = SourceType::Test;
            }
            meta.symbol_name = draft.symbol_name.clone();
            meta.symbol_kind = draft.symbol_kind;
            meta.start_line = Some(draft.start_line);
            meta.end_line = Some(draft.end_line);
            meta.docstring = draft.docstring.clone();
            meta.parameters = draft.parameters.clone();
            meta.return_type = draft.return_type.clone();
            meta.decorators = draft.decorators.clone();
            meta.imports = draft.imports.clone();
            Chunk::new(draft.text.clone(), meta)
          })
          .collect();
        (chunks, drafts)
      }
    }
  }

  /// Provider-batched embedding; batch-internal order is preserved
  async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(self.options.embed_batch_size.max(1)) {
      let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
      let mut batch_embeddings = self.embedding.embed_batch(&texts).await.map_err(Error::from)?;
      embeddings.append(&mut batch_embeddings);
    }

    if embeddings.len() != chunks.len() {
      return Err(Error::Provider(format!(
        "provider returned {} embeddings for {} chunks",
        embeddings.len(),
        chunks.len()
      )));
    }

    Ok(embeddings)
  }

  /// Delete sources that are in the manifest but gone from the scan
  async fn sweep_removed(&self, files: &[ScannedFile], manifest: &mut Manifest, report: &mut IndexReport) -> Result<()> {
    let live: std::collections::HashSet<&str> = files.iter().map(|f| f.relative.as_str()).collect();

    for path in manifest.paths() {
      if live.contains(path.as_str()) {
        continue;
      }

      debug!(source = %path, "Sweeping removed source");
      self.backend.delete_by_source(&path).await?;
      if let Some(entry) = manifest.remove(&path) {
        report.chunks_deleted += entry.chunk_count;
      }
      report.files_removed += 1;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use embedding::HashProvider;
  use storage::EmbeddedBackend;
  use tempfile::TempDir;

  use super::*;

  const DIMS: usize = 64;

  struct Fixture {
    _temp: TempDir,
    project: std::path::PathBuf,
    backend: Arc<dyn StorageBackend>,
    state: StateDir,
  }

  async fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let project = temp.path().join("project");
    std::fs::create_dir_all(&project).unwrap();

    let state = StateDir::new(temp.path().join("state"));
    let backend = EmbeddedBackend::open(state.clone(), DIMS).await.unwrap();
    backend.initialize().await.unwrap();

    Fixture {
      _temp: temp,
      project,
      backend: Arc::new(backend),
      state,
    }
  }

  fn pipeline(fixture: &Fixture, options: PipelineOptions) -> IndexPipeline {
    IndexPipeline::new(
      fixture.backend.clone(),
      Arc::new(HashProvider::new(DIMS)),
      None,
      fixture.state.clone(),
      options,
    )
  }

  fn write(project: &Path, rel: &str, contents: &str) {
    let path = project.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
  }

  #[tokio::test]
  async fn test_index_and_reindex_deterministic() {
    let fx = fixture().await;
    write(&fx.project, "notes.md", "# Notes\n\nSome text here.\n\nMore text.");
    write(&fx.project, "auth.py", "import jwt\n\ndef authenticate_user(token):\n    return jwt.decode(token)\n");

    let p = pipeline(&fx, PipelineOptions::default());
    let cancel = CancellationToken::new();

    let first = p.run(&fx.project, None, &cancel).await.unwrap();
    assert_eq!(first.files_processed, 2);
    assert!(first.chunks_created >= 2);

    let count_after_first = fx.backend.get_count(None).await.unwrap();

    // Unchanged content: same ids, same counts, nothing re-embedded
    let second = p.run(&fx.project, None, &cancel).await.unwrap();
    assert_eq!(second.files_skipped_unchanged, 2);
    assert_eq!(second.chunks_created, 0);
    assert_eq!(fx.backend.get_count(None).await.unwrap(), count_after_first);
  }

  #[tokio::test]
  async fn test_code_chunk_metadata_lands_in_backend() {
    let fx = fixture().await;
    write(&fx.project, "auth.py", "def authenticate_user(token):\n    return token\n");

    let p = pipeline(&fx, PipelineOptions::default());
    p.run(&fx.project, None, &CancellationToken::new()).await.unwrap();

    let hit = fx.backend.get_by_id("chunk_auth.py_0").await.unwrap().unwrap();
    assert_eq!(hit.metadata.source_type, SourceType::Code);
    assert_eq!(hit.metadata.language.as_deref(), Some("python"));
    assert_eq!(hit.metadata.symbol_name.as_deref(), Some("authenticate_user"));
    assert!(hit.text.contains("def authenticate_user"));
  }

  #[tokio::test]
  async fn test_prune_on_shrink_leaves_no_ghosts() {
    let fx = fixture().await;

    // Five sections produce five chunks under a small target
    let mut options = PipelineOptions::default();
    options.doc = DocChunkParams {
      target_tokens: 16,
      overlap_tokens: 2,
    };

    let long: String = (0..5)
      .map(|i| format!("# Section {}\n\n{}\n\n", i, "words and more words here. ".repeat(4)))
      .collect();
    write(&fx.project, "notes.md", &long);

    let p = pipeline(&fx, options);
    let cancel = CancellationToken::new();
    p.run(&fx.project, None, &cancel).await.unwrap();

    let before = fx
      .backend
      .get_count(Some(&storage::MetadataFilter::source("notes.md")))
      .await
      .unwrap();
    assert!(before >= 5, "setup should produce at least 5 chunks, got {}", before);

    write(&fx.project, "notes.md", "# Only\n\nshort now");
    p.run(&fx.project, None, &cancel).await.unwrap();

    let after = fx
      .backend
      .get_count(Some(&storage::MetadataFilter::source("notes.md")))
      .await
      .unwrap();
    assert!(after < before);

    // No ghost chunk beyond the new count
    let ghost = fx
      .backend
      .get_by_id(&Chunk::stable_id("notes.md", before - 1))
      .await
      .unwrap();
    assert!(ghost.is_none());
  }

  #[tokio::test]
  async fn test_deleted_file_is_swept() {
    let fx = fixture().await;
    write(&fx.project, "a.md", "# A\n\ncontent");
    write(&fx.project, "b.md", "# B\n\ncontent");

    let p = pipeline(&fx, PipelineOptions::default());
    let cancel = CancellationToken::new();
    p.run(&fx.project, None, &cancel).await.unwrap();

    std::fs::remove_file(fx.project.join("b.md")).unwrap();
    let report = p.run(&fx.project, None, &cancel).await.unwrap();

    assert_eq!(report.files_removed, 1);
    let remaining = fx
      .backend
      .get_count(Some(&storage::MetadataFilter::source("b.md")))
      .await
      .unwrap();
    assert_eq!(remaining, 0);
  }

  #[tokio::test]
  async fn test_provider_mismatch_fails_without_force() {
    let fx = fixture().await;
    write(&fx.project, "a.md", "# A\n\ncontent");

    let p = pipeline(&fx, PipelineOptions::default());
    let cancel = CancellationToken::new();
    p.run(&fx.project, None, &cancel).await.unwrap();
    let count = fx.backend.get_count(None).await.unwrap();

    // Same backend, different provider dimensions
    let drifted = IndexPipeline::new(
      fx.backend.clone(),
      Arc::new(HashProvider::new(DIMS * 2)),
      None,
      fx.state.clone(),
      PipelineOptions::default(),
    );

    let err = drifted.run(&fx.project, None, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::ProviderMismatch { .. }));
    // Backend unchanged
    assert_eq!(fx.backend.get_count(None).await.unwrap(), count);
  }

  #[tokio::test]
  async fn test_force_authorizes_reset_and_reindex() {
    let fx = fixture().await;
    write(&fx.project, "a.md", "# A\n\ncontent");

    let p = pipeline(&fx, PipelineOptions::default());
    let cancel = CancellationToken::new();
    p.run(&fx.project, None, &cancel).await.unwrap();

    let forced = IndexPipeline::new(
      fx.backend.clone(),
      Arc::new(HashProvider::new(DIMS * 2)),
      None,
      fx.state.clone(),
      PipelineOptions {
        force: true,
        ..Default::default()
      },
    );

    let report = forced.run(&fx.project, None, &cancel).await.unwrap();
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.files_skipped_unchanged, 0);
    assert!(fx.backend.get_count(None).await.unwrap() > 0);

    let meta = fx.backend.get_embedding_metadata().await.unwrap().unwrap();
    assert_eq!(meta.dimensions, DIMS * 2);
  }

  #[tokio::test]
  async fn test_graph_triplets_written_for_code() {
    let fx = fixture().await;
    write(&fx.project, "auth.py", "import jwt\n\ndef check(token):\n    return jwt.decode(token)\n");

    let p = pipeline(&fx, PipelineOptions::default());
    p.run(&fx.project, None, &CancellationToken::new()).await.unwrap();

    let entities = fx.backend.graph_entities().await.unwrap();
    assert!(entities.iter().any(|e| e == "jwt"), "entities: {:?}", entities);

    let neighbors = fx.backend.graph_neighbors("jwt", 2).await.unwrap();
    assert!(neighbors.iter().any(|n| n.chunk_id.starts_with("chunk_auth.py_")));
  }

  #[tokio::test]
  async fn test_cancellation_at_file_boundary() {
    let fx = fixture().await;
    write(&fx.project, "a.md", "# A\n\ncontent");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let p = pipeline(&fx, PipelineOptions::default());
    let report = p.run(&fx.project, None, &cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.files_processed, 0);
  }
}
