//! Folder loader: walks a tree, applies excludes, classifies files.

use std::path::{Path, PathBuf};

use brain_core::{Error, Result, SourceType};
use ignore::{WalkBuilder, overrides::OverrideBuilder};
use tracing::{debug, trace};

use crate::language::{FileKind, LanguageTable};

/// Directories nobody wants indexed, on top of gitignore rules
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
  ".git",
  ".hg",
  ".svn",
  "node_modules",
  "target",
  "dist",
  "build",
  "out",
  "__pycache__",
  ".venv",
  "venv",
  ".tox",
  ".mypy_cache",
  ".pytest_cache",
  "vendor",
  ".next",
  ".cache",
];

/// Generated or minified files that only add noise
const DEFAULT_EXCLUDE_GLOBS: &[&str] = &["*.min.js", "*.min.css", "*.lock", "*.map", "*_pb2.py", "*.generated.*"];

const MAX_FILE_SIZE: u64 = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
  /// User include patterns; empty means everything
  pub include: Vec<String>,
  /// User exclude patterns, applied after includes
  pub exclude: Vec<String>,
  /// Whether code files are wanted at all
  pub include_code: bool,
  pub table: LanguageTable,
}

impl ScanOptions {
  pub fn new() -> Self {
    Self {
      include_code: true,
      ..Default::default()
    }
  }
}

/// One classified file from the walk
#[derive(Debug, Clone)]
pub struct ScannedFile {
  pub path: PathBuf,
  /// Path relative to the scan root, with forward slashes
  pub relative: String,
  pub kind: FileKind,
  pub source_type: SourceType,
}

/// Walk `root` and classify every indexable file.
///
/// Results are sorted by relative path so repeated scans of unchanged trees
/// are deterministic.
pub fn scan_folder(root: &Path, options: &ScanOptions) -> Result<Vec<ScannedFile>> {
  if !root.is_dir() {
    return Err(Error::Validation(format!("not a directory: {}", root.display())));
  }

  let mut overrides = OverrideBuilder::new(root);
  for pattern in &options.include {
    overrides
      .add(pattern)
      .map_err(|e| Error::Validation(format!("bad include pattern {:?}: {}", pattern, e)))?;
  }
  for pattern in &options.exclude {
    // In override syntax a leading `!` excludes
    overrides
      .add(&format!("!{}", pattern))
      .map_err(|e| Error::Validation(format!("bad exclude pattern {:?}: {}", pattern, e)))?;
  }
  for glob in DEFAULT_EXCLUDE_GLOBS {
    let _ = overrides.add(&format!("!{}", glob));
  }
  let overrides = overrides
    .build()
    .map_err(|e| Error::Validation(format!("bad patterns: {}", e)))?;

  let walker = WalkBuilder::new(root)
    .follow_links(false)
    .git_ignore(true)
    .git_global(true)
    .git_exclude(true)
    .overrides(overrides)
    .filter_entry(|entry| {
      let name = entry.file_name().to_string_lossy();
      !(entry.file_type().is_some_and(|ft| ft.is_dir()) && DEFAULT_EXCLUDE_DIRS.contains(&name.as_ref()))
    })
    .build();

  let mut files = Vec::new();

  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        trace!(error = %e, "Skipping unreadable entry");
        continue;
      }
    };

    if !entry.file_type().is_some_and(|ft| ft.is_file()) {
      continue;
    }
    if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE || m.len() == 0).unwrap_or(true) {
      continue;
    }

    let path = entry.path();
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
      continue;
    };
    let Some(kind) = options.table.classify(ext) else {
      continue;
    };

    if matches!(kind, FileKind::Code(_)) && !options.include_code {
      continue;
    }

    let Ok(relative) = path.strip_prefix(root) else {
      continue;
    };
    let relative = relative.to_string_lossy().replace('\\', "/");

    let source_type = match kind {
      FileKind::Doc => SourceType::Doc,
      FileKind::Code(_) if is_test_path(&relative) => SourceType::Test,
      FileKind::Code(_) => SourceType::Code,
    };

    files.push(ScannedFile {
      path: path.to_path_buf(),
      relative,
      kind,
      source_type,
    });
  }

  files.sort_by(|a, b| a.relative.cmp(&b.relative));
  debug!(root = %root.display(), files = files.len(), "Scan complete");
  Ok(files)
}

/// Heuristic test-file detection from the relative path
fn is_test_path(relative: &str) -> bool {
  let lower = relative.to_lowercase();
  let file = lower.rsplit('/').next().unwrap_or(&lower);

  lower.split('/').any(|part| part == "tests" || part == "test" || part == "__tests__")
    || file.starts_with("test_")
    || file.contains("_test.")
    || file.contains(".test.")
    || file.contains(".spec.")
}
