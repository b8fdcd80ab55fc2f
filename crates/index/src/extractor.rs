//! Graph triplet extraction for code chunks.
//!
//! The deterministic pass reads AST facts the chunker already collected:
//! imports, class membership, and symbol definitions. The optional LLM pass
//! runs on top and is deduplicated against it.

use brain_core::{SymbolKind, Triplet, predicates};
use llm::SummarizationProvider;
use tracing::warn;

use crate::code_chunker::CodeChunkDraft;

/// Module name for a relative source path: `src/auth.py` -> `auth`
pub fn module_name(relative_path: &str) -> String {
  relative_path
    .rsplit('/')
    .next()
    .unwrap_or(relative_path)
    .split('.')
    .next()
    .unwrap_or(relative_path)
    .to_string()
}

fn type_str(kind: SymbolKind) -> &'static str {
  match kind {
    SymbolKind::Module => "module",
    SymbolKind::Class => "class",
    SymbolKind::Function => "function",
    SymbolKind::Method => "method",
  }
}

/// Deterministic triplets from chunker metadata
pub fn metadata_triplets(chunk_id: &str, relative_path: &str, draft: &CodeChunkDraft) -> Vec<Triplet> {
  let module = module_name(relative_path);
  let mut triplets = Vec::new();

  for import in &draft.imports {
    triplets.push(Triplet::new(
      module.clone(),
      "module",
      predicates::IMPORTS,
      import.clone(),
      "module",
      chunk_id,
    ));
  }

  if let (Some(name), Some(kind)) = (&draft.symbol_name, draft.symbol_kind) {
    triplets.push(Triplet::new(
      name.clone(),
      type_str(kind),
      predicates::DEFINED_IN,
      module.clone(),
      "module",
      chunk_id,
    ));

    if let Some(parent) = &draft.parent_class {
      triplets.push(Triplet::new(
        parent.clone(),
        "class",
        predicates::CONTAINS,
        name.clone(),
        type_str(kind),
        chunk_id,
      ));
    }
  }

  triplets
}

/// Full extraction for one chunk: metadata pass plus the optional LLM pass.
///
/// An LLM failure downgrades to the metadata-only result; extraction never
/// fails a pipeline run.
pub async fn extract_chunk_triplets(
  summarizer: Option<&dyn SummarizationProvider>,
  chunk_id: &str,
  chunk_text: &str,
  relative_path: &str,
  draft: &CodeChunkDraft,
) -> Vec<Triplet> {
  let mut triplets = metadata_triplets(chunk_id, relative_path, draft);

  if let Some(provider) = summarizer {
    match llm::extract_triplets(provider, chunk_id, chunk_text, &triplets).await {
      Ok(mut extra) => triplets.append(&mut extra),
      Err(e) => warn!(chunk_id, error = %e, "LLM triplet extraction failed, keeping metadata pass"),
    }
  }

  triplets
}
