use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Languages with a tree-sitter grammar wired in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  Rust,
  Python,
  TypeScript,
  JavaScript,
  Go,
}

impl Language {
  pub fn from_extension(ext: &str) -> Option<Self> {
    match ext.to_lowercase().as_str() {
      "rs" => Some(Language::Rust),
      "py" | "pyi" => Some(Language::Python),
      "ts" | "mts" | "tsx" => Some(Language::TypeScript),
      "js" | "mjs" | "cjs" | "jsx" => Some(Language::JavaScript),
      "go" => Some(Language::Go),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Language::Rust => "rust",
      Language::Python => "python",
      Language::TypeScript => "typescript",
      Language::JavaScript => "javascript",
      Language::Go => "go",
    }
  }

  pub fn grammar(&self) -> tree_sitter::Language {
    match self {
      Language::Rust => tree_sitter_rust::LANGUAGE.into(),
      Language::Python => tree_sitter_python::LANGUAGE.into(),
      Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
      Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
      Language::Go => tree_sitter_go::LANGUAGE.into(),
    }
  }
}

impl std::str::FromStr for Language {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "rust" => Ok(Language::Rust),
      "python" => Ok(Language::Python),
      "typescript" => Ok(Language::TypeScript),
      "javascript" => Ok(Language::JavaScript),
      "go" => Ok(Language::Go),
      _ => Err(format!("Unknown language: {}", s)),
    }
  }
}

/// What the loader should do with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
  Doc,
  Code(Language),
}

const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "text", "rst", "adoc", "org"];

/// Extension -> chunker-category table. Defaults cover the built-in doc and
/// code extensions; user overrides win.
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
  overrides: HashMap<String, FileKind>,
}

impl LanguageTable {
  /// Add or replace a mapping for an extension
  pub fn with_override(mut self, ext: impl Into<String>, kind: FileKind) -> Self {
    self.overrides.insert(ext.into().to_lowercase(), kind);
    self
  }

  /// Classify a file extension; `None` means the file is not indexable
  pub fn classify(&self, ext: &str) -> Option<FileKind> {
    let ext = ext.to_lowercase();
    if let Some(kind) = self.overrides.get(&ext) {
      return Some(*kind);
    }
    if DOC_EXTENSIONS.contains(&ext.as_str()) {
      return Some(FileKind::Doc);
    }
    Language::from_extension(&ext).map(FileKind::Code)
  }
}
