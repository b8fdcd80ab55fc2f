use serde::{Deserialize, Serialize};

/// Estimated characters per token, used wherever exact tokenization is overkill
pub const CHARS_PER_TOKEN: usize = 4;

/// Classification of the file a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
  Doc,
  Code,
  Test,
}

impl SourceType {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceType::Doc => "doc",
      SourceType::Code => "code",
      SourceType::Test => "test",
    }
  }
}

impl std::str::FromStr for SourceType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "doc" => Ok(SourceType::Doc),
      "code" => Ok(SourceType::Code),
      "test" => Ok(SourceType::Test),
      _ => Err(format!("Unknown source type: {}", s)),
    }
  }
}

/// Kind of the declaration a code chunk is aligned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
  Module,
  Class,
  Function,
  Method,
}

impl SymbolKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SymbolKind::Module => "module",
      SymbolKind::Class => "class",
      SymbolKind::Function => "function",
      SymbolKind::Method => "method",
    }
  }
}

/// Structured, JSON-compatible metadata attached to every chunk.
///
/// Doc chunks carry `heading_path`; code chunks carry the symbol fields.
/// `source` is the path relative to the indexed folder root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
  pub source: String,
  pub chunk_index: usize,
  pub source_type: SourceType,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub language: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub symbol_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub symbol_kind: Option<SymbolKind>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_line: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_line: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub docstring: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub parameters: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub return_type: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub decorators: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub imports: Vec<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub heading_path: Vec<String>,
}

impl ChunkMetadata {
  /// Metadata skeleton for a doc chunk
  pub fn doc(source: impl Into<String>, chunk_index: usize) -> Self {
    Self {
      source: source.into(),
      chunk_index,
      source_type: SourceType::Doc,
      language: None,
      symbol_name: None,
      symbol_kind: None,
      start_line: None,
      end_line: None,
      docstring: None,
      parameters: Vec::new(),
      return_type: None,
      decorators: Vec::new(),
      imports: Vec::new(),
      heading_path: Vec::new(),
    }
  }

  /// Metadata skeleton for a code chunk
  pub fn code(source: impl Into<String>, chunk_index: usize, language: impl Into<String>) -> Self {
    let mut meta = Self::doc(source, chunk_index);
    meta.source_type = SourceType::Code;
    meta.language = Some(language.into());
    meta
  }
}

/// A unit of indexed content with a deterministic identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
  pub id: String,
  pub text: String,
  pub token_count: usize,
  pub metadata: ChunkMetadata,
}

impl Chunk {
  /// Deterministic chunk identifier: stable for a given `(source, index)` pair
  pub fn stable_id(source: &str, index: usize) -> String {
    format!("chunk_{}_{}", source, index)
  }

  pub fn new(text: String, metadata: ChunkMetadata) -> Self {
    let id = Self::stable_id(&metadata.source, metadata.chunk_index);
    let token_count = estimate_tokens(&text);
    Self {
      id,
      text,
      token_count,
      metadata,
    }
  }
}

/// Estimate token count from content length
pub fn estimate_tokens(text: &str) -> usize {
  text.len().div_ceil(CHARS_PER_TOKEN)
}
