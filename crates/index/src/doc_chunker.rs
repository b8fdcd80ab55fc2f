//! Structure-aware chunking for prose documents.
//!
//! Markdown headings drive a `heading_path`; paragraphs accumulate into
//! chunks near the token target, with a character overlap between adjacent
//! chunks. Chunks never span a heading boundary.

use brain_core::CHARS_PER_TOKEN;

#[derive(Debug, Clone)]
pub struct DocChunkParams {
  /// Target chunk size in (estimated) tokens
  pub target_tokens: usize,
  /// Overlap between adjacent chunks in tokens
  pub overlap_tokens: usize,
}

impl Default for DocChunkParams {
  fn default() -> Self {
    Self {
      target_tokens: 512,
      overlap_tokens: 50,
    }
  }
}

impl DocChunkParams {
  fn target_chars(&self) -> usize {
    self.target_tokens * CHARS_PER_TOKEN
  }

  fn overlap_chars(&self) -> usize {
    self.overlap_tokens * CHARS_PER_TOKEN
  }
}

/// One chunk of a document with the headings above it
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunk {
  pub text: String,
  pub heading_path: Vec<String>,
}

/// A paragraph annotated with the heading path it sits under
struct Block {
  text: String,
  heading_path: Vec<String>,
}

/// Chunk a prose document.
pub fn chunk_document(content: &str, params: &DocChunkParams) -> Vec<DocChunk> {
  let blocks = split_blocks(content);
  if blocks.is_empty() {
    return Vec::new();
  }

  let target = params.target_chars();
  let overlap = params.overlap_chars();

  let mut chunks: Vec<DocChunk> = Vec::new();
  let mut current = String::new();
  let mut current_path: Vec<String> = blocks[0].heading_path.clone();

  let mut flush = |current: &mut String, path: &[String], chunks: &mut Vec<DocChunk>| {
    let text = current.trim().to_string();
    if !text.is_empty() {
      chunks.push(DocChunk {
        text,
        heading_path: path.to_vec(),
      });
    }
    // Carry the tail as overlap into the next chunk
    let keep_from = floor_char_boundary(current, current.len().saturating_sub(overlap));
    *current = current[keep_from..].to_string();
  };

  for block in &blocks {
    // A heading change ends the running chunk: heading_path must stay exact
    if block.heading_path != current_path {
      if !current.trim().is_empty() {
        flush(&mut current, &current_path, &mut chunks);
      }
      current.clear();
      current_path = block.heading_path.clone();
    }

    for piece in split_oversized(&block.text, target) {
      if !current.is_empty() && current.len() + piece.len() + 2 > target {
        flush(&mut current, &current_path, &mut chunks);
      }
      if !current.is_empty() {
        current.push_str("\n\n");
      }
      current.push_str(&piece);
    }
  }

  if !current.trim().is_empty() {
    flush(&mut current, &current_path, &mut chunks);
  }

  chunks
}

/// Split a document into paragraphs tagged with their heading path.
/// Fenced code blocks are kept intact as a single paragraph.
fn split_blocks(content: &str) -> Vec<Block> {
  let mut blocks = Vec::new();
  // (level, title) stack
  let mut headings: Vec<(usize, String)> = Vec::new();
  let mut paragraph = String::new();
  let mut in_fence = false;

  let mut push_paragraph = |paragraph: &mut String, headings: &[(usize, String)], blocks: &mut Vec<Block>| {
    let text = paragraph.trim().to_string();
    if !text.is_empty() {
      blocks.push(Block {
        text,
        heading_path: headings.iter().map(|(_, t)| t.clone()).collect(),
      });
    }
    paragraph.clear();
  };

  for line in content.lines() {
    let trimmed = line.trim();

    if trimmed.starts_with("```") {
      in_fence = !in_fence;
      paragraph.push_str(line);
      paragraph.push('\n');
      continue;
    }

    if in_fence {
      paragraph.push_str(line);
      paragraph.push('\n');
      continue;
    }

    if let Some((level, title)) = parse_heading(trimmed) {
      push_paragraph(&mut paragraph, &headings, &mut blocks);
      while headings.last().is_some_and(|(l, _)| *l >= level) {
        headings.pop();
      }
      headings.push((level, title));
      continue;
    }

    if trimmed.is_empty() {
      push_paragraph(&mut paragraph, &headings, &mut blocks);
    } else {
      paragraph.push_str(line);
      paragraph.push('\n');
    }
  }

  push_paragraph(&mut paragraph, &headings, &mut blocks);
  blocks
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
  let hashes = line.chars().take_while(|&c| c == '#').count();
  if hashes == 0 || hashes > 6 {
    return None;
  }
  let rest = line[hashes..].trim();
  if rest.is_empty() {
    return None;
  }
  Some((hashes, rest.to_string()))
}

/// Split a paragraph that exceeds the budget, first at line boundaries and
/// then at hard character boundaries.
fn split_oversized(text: &str, target: usize) -> Vec<String> {
  if text.len() <= target {
    return vec![text.to_string()];
  }

  let mut pieces = Vec::new();
  let mut current = String::new();

  for line in text.lines() {
    if !current.is_empty() && current.len() + line.len() + 1 > target {
      pieces.push(std::mem::take(&mut current));
    }

    if line.len() > target {
      // A single enormous line: hard split
      let mut start = 0;
      while start < line.len() {
        let end = floor_char_boundary(line, (start + target).min(line.len()));
        pieces.push(line[start..end].to_string());
        start = end;
      }
      continue;
    }

    if !current.is_empty() {
      current.push('\n');
    }
    current.push_str(line);
  }

  if !current.is_empty() {
    pieces.push(current);
  }
  pieces
}

/// Largest char boundary <= index
fn floor_char_boundary(s: &str, index: usize) -> usize {
  if index >= s.len() {
    return s.len();
  }
  let mut i = index;
  while i > 0 && !s.is_char_boundary(i) {
    i -= 1;
  }
  i
}
