//! AST-aware code chunking via tree-sitter.
//!
//! Chunks align to top-level declarations and never cross a symbol boundary
//! while the symbol fits the character budget. Oversized classes split into
//! per-method chunks; oversized functions split at line boundaries, with the
//! signature line repeated on continuation parts so the symbol name stays in
//! every chunk's text. Files that fail to parse fall back to plain line
//! windows without symbol metadata.

use brain_core::SymbolKind;
use tracing::{debug, trace};
use tree_sitter::Node;

use crate::language::Language;

const DEFAULT_MAX_CHARS: usize = 4000;

/// A chunk before ids and source metadata are attached
#[derive(Debug, Clone, Default)]
pub struct CodeChunkDraft {
  pub text: String,
  pub symbol_name: Option<String>,
  pub symbol_kind: Option<SymbolKind>,
  /// 1-based, inclusive
  pub start_line: u32,
  pub end_line: u32,
  pub docstring: Option<String>,
  pub parameters: Vec<String>,
  pub return_type: Option<String>,
  pub decorators: Vec<String>,
  pub imports: Vec<String>,
  /// Enclosing class for methods; feeds the graph extractor
  pub parent_class: Option<String>,
}

/// Per-language node-kind tables
struct Spec {
  import_kinds: &'static [&'static str],
  function_kinds: &'static [&'static str],
  class_kinds: &'static [&'static str],
  method_kinds: &'static [&'static str],
  module_kinds: &'static [&'static str],
  comment_kinds: &'static [&'static str],
  attribute_kinds: &'static [&'static str],
}

fn spec(language: Language) -> Spec {
  match language {
    Language::Rust => Spec {
      import_kinds: &["use_declaration"],
      function_kinds: &["function_item"],
      class_kinds: &["struct_item", "enum_item", "trait_item", "impl_item"],
      method_kinds: &["function_item", "function_signature_item"],
      module_kinds: &["mod_item"],
      comment_kinds: &["line_comment", "block_comment"],
      attribute_kinds: &["attribute_item"],
    },
    Language::Python => Spec {
      import_kinds: &["import_statement", "import_from_statement"],
      function_kinds: &["function_definition", "decorated_definition"],
      class_kinds: &["class_definition"],
      method_kinds: &["function_definition", "decorated_definition"],
      module_kinds: &[],
      comment_kinds: &["comment"],
      attribute_kinds: &[],
    },
    Language::TypeScript | Language::JavaScript => Spec {
      import_kinds: &["import_statement"],
      function_kinds: &["function_declaration", "generator_function_declaration", "lexical_declaration"],
      class_kinds: &["class_declaration", "interface_declaration", "abstract_class_declaration"],
      method_kinds: &["method_definition"],
      module_kinds: &[],
      comment_kinds: &["comment"],
      attribute_kinds: &[],
    },
    Language::Go => Spec {
      import_kinds: &["import_declaration"],
      function_kinds: &["function_declaration", "method_declaration"],
      class_kinds: &["type_declaration"],
      method_kinds: &[],
      module_kinds: &[],
      comment_kinds: &["comment"],
      attribute_kinds: &[],
    },
  }
}

pub struct CodeChunker {
  max_chars: usize,
}

impl Default for CodeChunker {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_CHARS)
  }
}

impl CodeChunker {
  pub fn new(max_chars: usize) -> Self {
    Self {
      max_chars: max_chars.max(256),
    }
  }

  /// Chunk a source file. Drafts come back in source order.
  pub fn chunk(&self, source: &str, language: Language) -> Vec<CodeChunkDraft> {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
      debug!(language = language.as_str(), "Grammar unavailable, using line fallback");
      return self.fallback(source);
    }

    let Some(tree) = parser.parse(source, None) else {
      return self.fallback(source);
    };

    let root = tree.root_node();
    if root.has_error() {
      trace!(language = language.as_str(), "Parse errors present, chunking best-effort");
    }

    let spec = spec(language);
    let lines: Vec<&str> = source.lines().collect();
    let mut drafts = Vec::new();
    let mut pending_imports: Vec<String> = Vec::new();
    let mut residual: Vec<(usize, usize)> = Vec::new(); // (start_row, end_row)

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
      let kind = child.kind();

      if spec.import_kinds.contains(&kind) {
        pending_imports.extend(extract_imports(language, node_text(child, source)));
        continue;
      }

      if spec.comment_kinds.contains(&kind) || spec.attribute_kinds.contains(&kind) {
        // Attached to the following declaration when the span is computed
        continue;
      }

      // `const x = 5` is not a function; only arrow/function initializers count
      let is_declaration = (spec.function_kinds.contains(&kind)
        && (kind != "lexical_declaration" || {
          let text = node_text(child, source);
          text.contains("=>") || text.contains("function")
        }))
        || spec.class_kinds.contains(&kind)
        || spec.module_kinds.contains(&kind);

      if is_declaration {
        let imports = std::mem::take(&mut pending_imports);
        self.emit_declaration(child, source, &lines, language, &spec, imports, None, &mut drafts);
        continue;
      }

      residual.push((child.start_position().row, child.end_position().row));
    }

    // Anything that was neither an import nor a declaration (top-level
    // statements in scripts, mostly) is kept as plain chunks.
    for (start_row, end_row) in merge_adjacent(residual) {
      let text = lines[start_row..=end_row.min(lines.len().saturating_sub(1))].join("\n");
      if text.trim().is_empty() {
        continue;
      }
      for part in split_lines(&text, self.max_chars) {
        drafts.push(CodeChunkDraft {
          start_line: start_row as u32 + 1 + part.line_offset,
          end_line: start_row as u32 + part.line_offset + part.line_count,
          text: part.text,
          imports: std::mem::take(&mut pending_imports),
          ..Default::default()
        });
      }
    }

    if drafts.is_empty() {
      // No declarations at all (or an import-only file): keep the file as a
      // single plain chunk so it is still searchable.
      return self
        .fallback(source)
        .into_iter()
        .map(|mut d| {
          d.imports = pending_imports.clone();
          d
        })
        .collect();
    }

    drafts
  }

  #[allow(clippy::too_many_arguments)]
  fn emit_declaration(
    &self,
    node: Node,
    source: &str,
    lines: &[&str],
    language: Language,
    spec: &Spec,
    imports: Vec<String>,
    parent_class: Option<&str>,
    drafts: &mut Vec<CodeChunkDraft>,
  ) {
    // Python wraps decorated defs; unwrap but keep the decorators
    let (node, decorators) = unwrap_decorated(node, source);

    let kind = node.kind();
    let symbol_name = declaration_name(node, source, language);
    let symbol_kind = classify_kind(kind, spec, parent_class.is_some());

    // Go methods name their type in the receiver rather than nesting
    let receiver_class = if kind == "method_declaration" {
      node.child_by_field_name("receiver").map(|r| {
        node_text(r, source)
          .trim_matches(|c| c == '(' || c == ')')
          .rsplit(|c: char| c == '*' || c.is_whitespace())
          .next()
          .unwrap_or_default()
          .to_string()
      })
    } else {
      None
    };
    let parent_class = receiver_class.as_deref().or(parent_class);

    let (attach_start, mut attached_decorators, docstring_above) = attached_leading(node, source, spec);
    let mut all_decorators = decorators;
    all_decorators.append(&mut attached_decorators);

    let start_row = attach_start;
    let end_row = node.end_position().row;
    let text = lines[start_row..=end_row.min(lines.len().saturating_sub(1))].join("\n");

    let docstring = match language {
      Language::Python => python_docstring(node, source),
      _ => docstring_above,
    };

    let parameters = parameter_list(node, source);
    let return_type = return_annotation(node, source, language);

    if text.len() <= self.max_chars {
      drafts.push(CodeChunkDraft {
        text,
        symbol_name,
        symbol_kind,
        start_line: start_row as u32 + 1,
        end_line: end_row as u32 + 1,
        docstring,
        parameters,
        return_type,
        decorators: all_decorators,
        imports,
        parent_class: parent_class.map(str::to_string),
      });
      return;
    }

    // Over budget: split classes at their methods, functions at lines
    if let Some(body) = class_body(node, language)
      && symbol_kind == Some(SymbolKind::Class)
    {
      let class_name = symbol_name.clone().unwrap_or_default();

      // Header chunk: everything up to the first member keeps the class
      // signature and docstring searchable under the class name.
      let header_end = body.start_position().row.max(start_row);
      let header_text = lines[start_row..=header_end.min(lines.len() - 1)].join("\n");
      drafts.push(CodeChunkDraft {
        text: header_text,
        symbol_name: symbol_name.clone(),
        symbol_kind,
        start_line: start_row as u32 + 1,
        end_line: header_end as u32 + 1,
        docstring,
        parameters: Vec::new(),
        return_type: None,
        decorators: all_decorators,
        imports,
        parent_class: None,
      });

      let mut cursor = body.walk();
      for member in body.named_children(&mut cursor) {
        if spec.method_kinds.contains(&member.kind()) {
          self.emit_declaration(member, source, lines, language, spec, Vec::new(), Some(&class_name), drafts);
        }
      }
      return;
    }

    // Line-boundary split; every part keeps the symbol metadata and the
    // signature line so the name stays greppable in each part.
    let signature = lines.get(node.start_position().row).copied().unwrap_or_default();
    for (i, part) in split_lines(&text, self.max_chars).into_iter().enumerate() {
      let part_text = if i == 0 {
        part.text
      } else {
        format!("{}\n{}", signature, part.text)
      };
      drafts.push(CodeChunkDraft {
        text: part_text,
        symbol_name: symbol_name.clone(),
        symbol_kind,
        start_line: start_row as u32 + 1 + part.line_offset,
        end_line: start_row as u32 + part.line_offset + part.line_count,
        docstring: if i == 0 { docstring.clone() } else { None },
        parameters: if i == 0 { parameters.clone() } else { Vec::new() },
        return_type: if i == 0 { return_type.clone() } else { None },
        decorators: if i == 0 { all_decorators.clone() } else { Vec::new() },
        imports: if i == 0 { imports.clone() } else { Vec::new() },
        parent_class: parent_class.map(str::to_string),
      });
    }
  }

  /// Plain line-window chunking for unparseable content
  fn fallback(&self, source: &str) -> Vec<CodeChunkDraft> {
    if source.trim().is_empty() {
      return Vec::new();
    }

    split_lines(source, self.max_chars)
      .into_iter()
      .map(|part| CodeChunkDraft {
        start_line: part.line_offset + 1,
        end_line: part.line_offset + part.line_count,
        text: part.text,
        ..Default::default()
      })
      .collect()
  }
}

struct LinePart {
  text: String,
  /// Lines before this part within the split text
  line_offset: u32,
  line_count: u32,
}

fn split_lines(text: &str, max_chars: usize) -> Vec<LinePart> {
  let lines: Vec<&str> = text.lines().collect();
  let mut parts = Vec::new();
  let mut current: Vec<&str> = Vec::new();
  let mut current_len = 0usize;
  let mut offset = 0u32;

  for line in &lines {
    if !current.is_empty() && current_len + line.len() + 1 > max_chars {
      parts.push(LinePart {
        text: current.join("\n"),
        line_offset: offset,
        line_count: current.len() as u32,
      });
      offset += current.len() as u32;
      current.clear();
      current_len = 0;
    }
    current.push(line);
    current_len += line.len() + 1;
  }

  if !current.is_empty() {
    parts.push(LinePart {
      text: current.join("\n"),
      line_offset: offset,
      line_count: current.len() as u32,
    });
  }

  parts
}

fn merge_adjacent(mut spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
  spans.sort();
  let mut merged: Vec<(usize, usize)> = Vec::new();
  for (start, end) in spans {
    match merged.last_mut() {
      Some((_, last_end)) if start <= *last_end + 1 => *last_end = (*last_end).max(end),
      _ => merged.push((start, end)),
    }
  }
  merged
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
  node.utf8_text(source.as_bytes()).unwrap_or_default()
}

/// Unwrap `decorated_definition` into (inner definition, decorator texts)
fn unwrap_decorated<'t>(node: Node<'t>, source: &str) -> (Node<'t>, Vec<String>) {
  if node.kind() != "decorated_definition" {
    return (node, Vec::new());
  }

  let mut decorators = Vec::new();
  let mut cursor = node.walk();
  for child in node.named_children(&mut cursor) {
    if child.kind() == "decorator" {
      decorators.push(node_text(child, source).to_string());
    }
  }

  let inner = node.child_by_field_name("definition").unwrap_or(node);
  (inner, decorators)
}

/// Walk contiguous preceding comment/attribute siblings. Returns the row the
/// chunk should start at, collected attribute texts, and a docstring built
/// from doc comments.
fn attached_leading(node: Node, source: &str, spec: &Spec) -> (usize, Vec<String>, Option<String>) {
  let mut start_row = node.start_position().row;
  let mut decorators = Vec::new();
  let mut doc_lines: Vec<String> = Vec::new();

  let mut prev = node.prev_named_sibling();
  while let Some(sibling) = prev {
    let kind = sibling.kind();
    // Only siblings that touch the declaration (no blank line between)
    if sibling.end_position().row + 1 < start_row {
      break;
    }

    if spec.attribute_kinds.contains(&kind) {
      decorators.insert(0, node_text(sibling, source).to_string());
    } else if spec.comment_kinds.contains(&kind) {
      let text = node_text(sibling, source);
      for line in text.lines().rev() {
        doc_lines.insert(0, clean_comment_line(line));
      }
    } else {
      break;
    }

    start_row = sibling.start_position().row;
    prev = sibling.prev_named_sibling();
  }

  let docstring = if doc_lines.is_empty() {
    None
  } else {
    let joined = doc_lines.join("\n").trim().to_string();
    if joined.is_empty() { None } else { Some(joined) }
  };

  (start_row, decorators, docstring)
}

fn clean_comment_line(line: &str) -> String {
  line
    .trim()
    .trim_start_matches("///")
    .trim_start_matches("//!")
    .trim_start_matches("//")
    .trim_start_matches("/**")
    .trim_start_matches("/*")
    .trim_end_matches("*/")
    .trim_start_matches('*')
    .trim()
    .to_string()
}

fn declaration_name(node: Node, source: &str, language: Language) -> Option<String> {
  if let Some(name) = node.child_by_field_name("name") {
    return Some(node_text(name, source).to_string());
  }

  match node.kind() {
    // impl Foo / impl Trait for Foo
    "impl_item" => node.child_by_field_name("type").map(|n| node_text(n, source).to_string()),
    // const foo = () => {}
    "lexical_declaration" => {
      let mut cursor = node.walk();
      for child in node.named_children(&mut cursor) {
        if child.kind() == "variable_declarator"
          && let Some(name) = child.child_by_field_name("name")
        {
          return Some(node_text(name, source).to_string());
        }
      }
      None
    }
    // type Foo struct { ... }
    "type_declaration" if language == Language::Go => {
      let mut cursor = node.walk();
      for child in node.named_children(&mut cursor) {
        if child.kind() == "type_spec"
          && let Some(name) = child.child_by_field_name("name")
        {
          return Some(node_text(name, source).to_string());
        }
      }
      None
    }
    _ => None,
  }
}

fn classify_kind(kind: &str, spec: &Spec, inside_class: bool) -> Option<SymbolKind> {
  if kind == "method_declaration" || kind == "method_definition" {
    return Some(SymbolKind::Method);
  }
  if spec.module_kinds.contains(&kind) {
    return Some(SymbolKind::Module);
  }
  if spec.class_kinds.contains(&kind) {
    return Some(SymbolKind::Class);
  }
  if spec.function_kinds.contains(&kind) || spec.method_kinds.contains(&kind) {
    return Some(if inside_class { SymbolKind::Method } else { SymbolKind::Function });
  }
  None
}

fn parameter_list(node: Node, source: &str) -> Vec<String> {
  let Some(params) = node.child_by_field_name("parameters") else {
    return Vec::new();
  };

  let text = node_text(params, source);
  let inner = text.trim().trim_start_matches('(').trim_end_matches(')');

  inner
    .split(',')
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .filter(|p| !matches!(*p, "self" | "&self" | "&mut self" | "cls"))
    .map(str::to_string)
    .collect()
}

fn return_annotation(node: Node, source: &str, language: Language) -> Option<String> {
  let field = match language {
    Language::Go => "result",
    _ => "return_type",
  };

  node.child_by_field_name(field).map(|n| {
    node_text(n, source)
      .trim()
      .trim_start_matches("->")
      .trim_start_matches(':')
      .trim()
      .to_string()
  })
}

/// Body node holding a class's members, if this declaration has one
fn class_body<'t>(node: Node<'t>, language: Language) -> Option<Node<'t>> {
  match (language, node.kind()) {
    (Language::Python, "class_definition") => node.child_by_field_name("body"),
    (Language::Rust, "impl_item" | "trait_item") => node.child_by_field_name("body"),
    (Language::TypeScript | Language::JavaScript, "class_declaration" | "abstract_class_declaration") => {
      node.child_by_field_name("body")
    }
    _ => None,
  }
}

/// Python docstring: the first string expression in the body
fn python_docstring(node: Node, source: &str) -> Option<String> {
  let body = node.child_by_field_name("body")?;
  let first = body.named_child(0)?;
  if first.kind() != "expression_statement" {
    return None;
  }
  let string = first.named_child(0)?;
  if string.kind() != "string" {
    return None;
  }

  let raw = node_text(string, source);
  let cleaned = raw
    .trim()
    .trim_start_matches("\"\"\"")
    .trim_end_matches("\"\"\"")
    .trim_start_matches("'''")
    .trim_end_matches("'''")
    .trim_matches('"')
    .trim_matches('\'')
    .trim();

  if cleaned.is_empty() { None } else { Some(cleaned.to_string()) }
}

/// Pull import paths out of an import node's text
fn extract_imports(language: Language, text: &str) -> Vec<String> {
  match language {
    Language::Rust => {
      let inner = text.trim().trim_start_matches("pub ").trim_start_matches("use ").trim_end_matches(';');
      // `a::b::{c, d}` -> `a::b`
      let path = inner.split('{').next().unwrap_or(inner).trim().trim_end_matches("::");
      if path.is_empty() { Vec::new() } else { vec![path.to_string()] }
    }
    Language::Python => {
      let trimmed = text.trim();
      if let Some(rest) = trimmed.strip_prefix("from ") {
        rest.split_whitespace().next().map(str::to_string).into_iter().collect()
      } else if let Some(rest) = trimmed.strip_prefix("import ") {
        rest
          .split(',')
          .filter_map(|p| p.split_whitespace().next())
          .map(str::to_string)
          .collect()
      } else {
        Vec::new()
      }
    }
    Language::TypeScript | Language::JavaScript | Language::Go => text
      .split('"')
      .skip(1)
      .step_by(2)
      .map(str::to_string)
      .filter(|s| !s.is_empty())
      .collect(),
  }
}
