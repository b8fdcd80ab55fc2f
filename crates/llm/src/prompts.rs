//! Fixed prompts for LLM extraction.
//!
//! Responses are pipe-delimited rather than JSON: small local models mangle
//! JSON far more often than they mangle a line format, and a bad line can be
//! skipped without losing the rest of the response.

/// Prompt for extracting knowledge-graph triplets from a code chunk.
///
/// The model returns one triplet per line:
/// `subject|subject_type|predicate|object|object_type`
pub const TRIPLET_EXTRACTION_PROMPT: &str = r#"Extract relationships from this source code as triplets.

Output one triplet per line, exactly five pipe-separated fields:
subject|subject_type|predicate|object|object_type

Rules:
- subject and object are entity names that appear in the code (modules, classes, functions, external libraries)
- subject_type and object_type are one of: module, class, function, method, library
- predicate is a short verb phrase (e.g. imports, calls, extends, implements, validates, returns)
- at most {max_triplets} lines
- no commentary, no headers, no blank lines

Code:
{chunk}
"#;

/// Fill the extraction prompt for a chunk
pub fn triplet_prompt(chunk_text: &str, max_triplets: usize) -> String {
  TRIPLET_EXTRACTION_PROMPT
    .replace("{max_triplets}", &max_triplets.to_string())
    .replace("{chunk}", chunk_text)
}
