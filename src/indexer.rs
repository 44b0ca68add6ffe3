//! Full project walk and single-file (re)indexing.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Instant, UNIX_EPOCH};

use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::index::Index;
use crate::parser::SymbolParser;
use crate::read_file_lossy;
use crate::types::{FileMeta, SymbolMeta};

/// Files above this size are never indexed.
pub const MAX_INDEX_FILE_SIZE: u64 = 1024 * 1024;

/// Directory names skipped by the walk and by the watcher.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "__pycache__",
    "vendor",
    ".idea",
    ".vscode",
    "dist",
    "build",
    ".next",
    "target",
];

/// Indexed by content tokens when no parser claims them.
pub const CODE_EXTENSIONS: &[&str] = &[
    "go", "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "tsx", "mts", "cts", "rs", "java", "kt", "kts",
    "scala", "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "cs", "fs", "rb", "php", "swift", "m", "mm",
    "lua", "sh", "bash", "zsh", "sql", "proto", "vue", "svelte", "dart", "ex", "exs", "erl", "zig",
    "nim", "hs", "ml", "clj", "r", "jl", "pl", "tf",
];

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReindexResult {
    pub file_count: usize,
    pub symbol_count: usize,
    pub token_count: usize,
    pub elapsed_ms: u64,
}

/// Lowercase extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase)
}

/// Whether a file with this path is indexed: the parser's languages plus the
/// built-in code set.
pub fn is_indexable(path: &Path, parser: Option<&dyn SymbolParser>) -> bool {
    let Some(ext) = extension_of(path) else {
        return false;
    };
    parser.is_some_and(|p| p.supports_extension(&ext)) || CODE_EXTENSIONS.contains(&ext.as_str())
}

/// Whether any component of `rel` (a root-relative path) is a skipped
/// directory or the state directory.
pub fn in_skipped_dir(rel: &Path, state_dir_name: Option<&str>) -> bool {
    let mut components: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
    components.pop();
    components
        .iter()
        .any(|c| SKIP_DIRS.contains(c) || state_dir_name == Some(*c))
}

/// Repo-relative path with `/` separators.
pub fn relative_path(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    if s.is_empty() { None } else { Some(s) }
}

// ─── Single file ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Body {
    Symbols(Vec<SymbolMeta>),
    Content(String),
}

/// A file read from disk and ready to be inserted under some file id.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub meta: FileMeta,
    body: Body,
}

impl LoadedFile {
    /// Read and parse `abs`. `None` when the file is unreadable or too large.
    pub fn load(abs: &Path, rel: &str, parser: Option<&dyn SymbolParser>) -> Option<Self> {
        let md = match std::fs::metadata(abs) {
            Ok(md) => md,
            Err(e) => {
                debug!(path = %abs.display(), error = %e, "Skipping unreadable file");
                return None;
            }
        };
        if md.len() > MAX_INDEX_FILE_SIZE {
            debug!(path = %abs.display(), size = md.len(), "Skipping large file");
            return None;
        }
        let (source, _lossy) = match read_file_lossy(abs) {
            Ok(r) => r,
            Err(e) => {
                debug!(path = %abs.display(), error = %e, "Skipping unreadable file");
                return None;
            }
        };

        let ext = extension_of(abs).unwrap_or_default();
        let last_modified = md
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);
        let meta = FileMeta {
            path: rel.to_string(),
            last_modified,
            language: ext.clone(),
            size: md.len(),
            domain: None,
        };

        let symbols = match parser.filter(|p| p.supports_extension(&ext)) {
            Some(p) => p.parse_file_to_meta(&ext, &source).unwrap_or_else(|e| {
                warn!(path = rel, error = %e, "Parser failed, indexing content only");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let body = if symbols.is_empty() {
            Body::Content(source)
        } else {
            Body::Symbols(symbols)
        };
        Some(Self { meta, body })
    }

    /// Insert under `file_id`, replacing nothing; callers remove stale
    /// entries first. Returns the number of symbols added.
    pub fn insert_into(self, index: &mut Index, file_id: u32) -> usize {
        index.files.insert(file_id, self.meta);
        match self.body {
            Body::Symbols(symbols) => index.add_symbols(file_id, symbols),
            Body::Content(source) => {
                index.add_content_tokens(file_id, &source);
                0
            }
        }
    }
}

// ─── Full walk ──────────────────────────────────────────────────────

/// Walk `root` (gitignore-aware, skipping [`SKIP_DIRS`] and the state
/// directory) and build a fresh index with ids assigned from 1 in path order.
pub fn build_index(root: &Path, state_dir: Option<&Path>, parser: Option<&dyn SymbolParser>) -> (Index, ReindexResult) {
    let start = Instant::now();
    let state_dir_name = state_dir
        .filter(|d| d.starts_with(root))
        .and_then(|d| d.file_name())
        .and_then(|n| n.to_str())
        .map(str::to_string);

    let mut paths = collect_paths(root, state_dir_name.as_deref(), parser);
    paths.sort();

    let loaded = load_parallel(root, &paths, parser);

    let mut index = Index::new();
    let mut symbol_count = 0;
    for (i, file) in loaded.into_iter().flatten().enumerate() {
        symbol_count += file.insert_into(&mut index, i as u32 + 1);
    }

    let result = ReindexResult {
        file_count: index.files.len(),
        symbol_count,
        token_count: index.tokens.len(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        root = %root.display(),
        files = result.file_count,
        symbols = result.symbol_count,
        tokens = result.token_count,
        elapsed_ms = result.elapsed_ms,
        "Index built"
    );
    (index, result)
}

fn collect_paths(root: &Path, state_dir_name: Option<&str>, parser: Option<&dyn SymbolParser>) -> Vec<PathBuf> {
    let skip: Vec<String> = SKIP_DIRS
        .iter()
        .map(|s| s.to_string())
        .chain(state_dir_name.map(str::to_string))
        .collect();

    let mut walker = WalkBuilder::new(root);
    walker
        .hidden(false)
        .git_ignore(true)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir && entry.depth() > 0 && skip.iter().any(|s| entry.file_name() == s.as_str()))
        });

    let found: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
    walker.build_parallel().run(|| {
        Box::new(|entry| {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => return ignore::WalkState::Continue,
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                return ignore::WalkState::Continue;
            }
            if is_indexable(entry.path(), parser) {
                found.lock().unwrap_or_else(|e| e.into_inner()).push(entry.into_path());
            }
            ignore::WalkState::Continue
        })
    });
    found.into_inner().unwrap_or_else(|e| e.into_inner())
}

/// Read and parse `paths` on all cores; output keeps the input order.
fn load_parallel(root: &Path, paths: &[PathBuf], parser: Option<&dyn SymbolParser>) -> Vec<Option<LoadedFile>> {
    if paths.is_empty() {
        return Vec::new();
    }
    let threads = std::thread::available_parallelism().map_or(4, |n| n.get());
    let chunk_size = paths.len().div_ceil(threads).max(1);

    std::thread::scope(|s| {
        let handles: Vec<_> = paths
            .chunks(chunk_size)
            .map(|chunk| {
                s.spawn(move || {
                    chunk
                        .iter()
                        .map(|abs| relative_path(root, abs).and_then(|rel| LoadedFile::load(abs, &rel, parser)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect()
    })
}
