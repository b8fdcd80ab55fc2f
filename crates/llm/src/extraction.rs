//! Parsing of pipe-delimited triplet responses.

use brain_core::Triplet;
use tracing::{debug, trace};

use crate::{SummarizationProvider, prompts};

/// Upper bound on triplets kept per chunk, whatever the model returns
pub const MAX_TRIPLETS_PER_CHUNK: usize = 10;

const ENTITY_TYPES: &[&str] = &["module", "class", "function", "method", "library"];

/// Parse a pipe-delimited response into triplets anchored to a chunk.
///
/// Malformed lines are skipped, not fatal; the model output is best-effort.
pub fn parse_triplets(response: &str, source_chunk_id: &str, max: usize) -> Vec<Triplet> {
  let mut triplets = Vec::new();

  for line in response.lines() {
    if triplets.len() >= max {
      break;
    }

    let line = line.trim();
    if line.is_empty() {
      continue;
    }

    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() != 5 {
      trace!(line, "Skipping malformed triplet line");
      continue;
    }

    let [subject, subject_type, predicate, object, object_type] = [fields[0], fields[1], fields[2], fields[3], fields[4]];

    if subject.is_empty() || predicate.is_empty() || object.is_empty() {
      continue;
    }
    if !ENTITY_TYPES.contains(&subject_type.to_lowercase().as_str())
      || !ENTITY_TYPES.contains(&object_type.to_lowercase().as_str())
    {
      trace!(line, "Skipping triplet with unknown entity type");
      continue;
    }

    triplets.push(Triplet::new(
      subject,
      subject_type.to_lowercase(),
      predicate.to_lowercase(),
      object,
      object_type.to_lowercase(),
      source_chunk_id,
    ));
  }

  triplets
}

/// Run the LLM extraction pass for one chunk and merge against triplets the
/// deterministic pass already produced.
pub async fn extract_triplets(
  provider: &dyn SummarizationProvider,
  chunk_id: &str,
  chunk_text: &str,
  existing: &[Triplet],
) -> Result<Vec<Triplet>, crate::LlmError> {
  let prompt = prompts::triplet_prompt(chunk_text, MAX_TRIPLETS_PER_CHUNK);
  let response = provider.complete(&prompt).await?;

  let mut triplets = parse_triplets(&response, chunk_id, MAX_TRIPLETS_PER_CHUNK);

  let seen: std::collections::HashSet<String> = existing.iter().map(Triplet::key).collect();
  triplets.retain(|t| !seen.contains(&t.key()));

  debug!(
    chunk_id,
    extracted = triplets.len(),
    "LLM triplet extraction complete"
  );

  Ok(triplets)
}
