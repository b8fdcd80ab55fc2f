use serde::{Deserialize, Serialize};

/// Closed predicate vocabulary emitted by the deterministic extraction pass.
/// LLM extraction may add open-vocabulary predicates on top.
pub mod predicates {
  pub const IMPORTS: &str = "imports";
  pub const CONTAINS: &str = "contains";
  pub const DEFINED_IN: &str = "defined_in";
}

/// One edge of the knowledge graph, anchored to the chunk it was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triplet {
  pub subject: String,
  pub subject_type: String,
  pub predicate: String,
  pub object: String,
  pub object_type: String,
  pub source_chunk_id: String,
}

impl Triplet {
  pub fn new(
    subject: impl Into<String>,
    subject_type: impl Into<String>,
    predicate: impl Into<String>,
    object: impl Into<String>,
    object_type: impl Into<String>,
    source_chunk_id: impl Into<String>,
  ) -> Self {
    Self {
      subject: subject.into(),
      subject_type: subject_type.into(),
      predicate: predicate.into(),
      object: object.into(),
      object_type: object_type.into(),
      source_chunk_id: source_chunk_id.into(),
    }
  }

  /// Deduplication key: two triplets with the same key describe the same edge
  pub fn key(&self) -> String {
    format!("{}|{}|{}|{}", self.subject, self.predicate, self.object, self.source_chunk_id)
  }
}
