//! In-memory file cache with pre-lowered lines, a content-token inverted
//! index and a trigram inverted index.
//!
//! All maps sit behind one internal `RwLock`; readers (`get_lines`,
//! `trigram_lookup`, ...) take it shared. A warm pass reads files without the
//! lock and swaps the finished state in.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use content_inspector::{ContentType, inspect};
use serde::Serialize;
use tracing::{debug, info};

use crate::read_file_lossy;
use crate::tokenizer::tokenize_content_line;
use crate::types::FileMeta;

/// Files larger than this are never cached.
pub const MAX_CACHE_FILE_SIZE: u64 = 512 * 1024;
/// Default total memory budget.
pub const DEFAULT_CACHE_BYTES: u64 = 250 * 1024 * 1024;
/// Bytes inspected when deciding whether a file is text.
const SNIFF_LEN: usize = 512;

/// Extensions that are always binary, checked before any I/O.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "tiff", "webp", "svg", "woff", "woff2", "ttf",
    "eot", "otf", "pdf", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "exe", "dll", "so",
    "dylib", "o", "a", "mp3", "mp4", "wav", "ogg", "flac", "avi", "mkv", "mov", "webm", "db",
    "sqlite", "class", "pyc",
];

pub type Trigram = [u8; 3];

/// A (file, 1-based line) pair in the content indices.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentPosting {
    pub file_id: u32,
    pub line: u16,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub memory_bytes: u64,
    pub budget_bytes: u64,
    pub at_capacity: bool,
}

struct CacheEntry {
    lines: Arc<Vec<String>>,
    lower_lines: Arc<Vec<String>>,
    size: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<u32, CacheEntry>,
    total_mem: u64,
    at_capacity: bool,
    content_index: HashMap<String, Vec<ContentPosting>>,
    trigram_index: HashMap<Trigram, Vec<ContentPosting>>,
}

pub struct FileCache {
    inner: RwLock<CacheInner>,
    max_bytes: u64,
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FileCache {
    /// `max_bytes == 0` selects [`DEFAULT_CACHE_BYTES`].
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            max_bytes: if max_bytes == 0 { DEFAULT_CACHE_BYTES } else { max_bytes },
        }
    }

    // A panic while holding the cache lock leaves plain data behind; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_lines(&self, file_id: u32) -> Option<Arc<Vec<String>>> {
        self.read().entries.get(&file_id).map(|e| Arc::clone(&e.lines))
    }

    pub fn get_lower_lines(&self, file_id: u32) -> Option<Arc<Vec<String>>> {
        self.read().entries.get(&file_id).map(|e| Arc::clone(&e.lower_lines))
    }

    pub fn contains(&self, file_id: u32) -> bool {
        self.read().entries.contains_key(&file_id)
    }

    pub fn content_lookup(&self, token: &str) -> Vec<ContentPosting> {
        self.read().content_index.get(token).cloned().unwrap_or_default()
    }

    pub fn has_content_index(&self) -> bool {
        !self.read().content_index.is_empty()
    }

    pub fn has_trigram_index(&self) -> bool {
        !self.read().trigram_index.is_empty()
    }

    /// Lines containing every trigram, ascending by (file_id, line).
    /// Empty when `trigrams` is empty or any trigram is unknown.
    pub fn trigram_lookup(&self, trigrams: &[Trigram]) -> Vec<ContentPosting> {
        if trigrams.is_empty() {
            return Vec::new();
        }
        let inner = self.read();
        let mut lists: Vec<&Vec<ContentPosting>> = Vec::with_capacity(trigrams.len());
        for t in trigrams {
            match inner.trigram_index.get(t) {
                Some(list) => lists.push(list),
                None => return Vec::new(),
            }
        }
        lists.sort_by_key(|l| l.len());

        let mut result: Vec<ContentPosting> = lists[0].clone();
        for list in &lists[1..] {
            result = intersect_sorted(&result, list);
            if result.is_empty() {
                break;
            }
        }
        result
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.read();
        CacheStats {
            entries: inner.entries.len(),
            memory_bytes: inner.total_mem,
            budget_bytes: self.max_bytes,
            at_capacity: inner.at_capacity,
        }
    }

    /// Replace the whole cache with the eligible files of `files`, most
    /// recently modified first, until the budget is reached. Per-file failures
    /// skip that file.
    pub fn warm_from_index(&self, files: &HashMap<u32, FileMeta>, root: &Path) {
        let mut order: Vec<(u32, &FileMeta)> = files.iter().map(|(id, fm)| (*id, fm)).collect();
        order.sort_by(|a, b| b.1.last_modified.cmp(&a.1.last_modified).then(a.0.cmp(&b.0)));

        let mut fresh = CacheInner::default();
        for (file_id, fm) in order {
            if !is_cache_eligible(fm) {
                continue;
            }
            if fresh.total_mem + fm.size > self.max_bytes {
                fresh.at_capacity = true;
                break;
            }
            let Some(entry) = read_entry(&root.join(&fm.path)) else {
                continue;
            };
            if fresh.total_mem + entry.size > self.max_bytes {
                fresh.at_capacity = true;
                break;
            }
            fresh.total_mem += entry.size;
            fresh.entries.insert(file_id, entry);
        }
        if !fresh.at_capacity {
            fresh.at_capacity = fresh.total_mem >= self.max_bytes / 10 * 9;
        }

        let mut ids: Vec<u32> = fresh.entries.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(entry) = fresh.entries.get(&id) {
                let lines = Arc::clone(&entry.lines);
                let lower = Arc::clone(&entry.lower_lines);
                index_file_lines(&mut fresh, id, &lines, &lower);
            }
        }

        info!(
            files = fresh.entries.len(),
            memory_bytes = fresh.total_mem,
            at_capacity = fresh.at_capacity,
            tokens = fresh.content_index.len(),
            trigrams = fresh.trigram_index.len(),
            "File cache warmed"
        );
        *self.write() = fresh;
    }

    /// Re-read one file and rebuild its slice of both indices.
    pub fn update_file(&self, file_id: u32, fm: &FileMeta, root: &Path) {
        let entry = if is_cache_eligible(fm) {
            read_entry(&root.join(&fm.path))
        } else {
            None
        };

        let mut inner = self.write();
        remove_entry(&mut inner, file_id);
        let Some(entry) = entry else {
            return;
        };
        if inner.total_mem + entry.size > self.max_bytes {
            inner.at_capacity = true;
            debug!(file = %fm.path, "File cache full, not caching updated file");
            return;
        }
        inner.total_mem += entry.size;
        let lines = Arc::clone(&entry.lines);
        let lower = Arc::clone(&entry.lower_lines);
        inner.entries.insert(file_id, entry);

        let touched = index_file_lines(&mut inner, file_id, &lines, &lower);
        for tok in &touched.tokens {
            if let Some(list) = inner.content_index.get_mut(tok) {
                list.sort_unstable();
            }
        }
        for tri in &touched.trigrams {
            if let Some(list) = inner.trigram_index.get_mut(tri) {
                list.sort_unstable();
            }
        }
    }

    /// Drop a file from the cache and from both indices.
    pub fn invalidate(&self, file_id: u32) {
        let mut inner = self.write();
        remove_entry(&mut inner, file_id);
    }

    pub fn clear(&self) {
        *self.write() = CacheInner::default();
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

struct Touched {
    tokens: BTreeSet<String>,
    trigrams: BTreeSet<Trigram>,
}

/// Append postings for one file. Callers that insert out of file-id order
/// must re-sort the touched lists.
fn index_file_lines(inner: &mut CacheInner, file_id: u32, lines: &[String], lower: &[String]) -> Touched {
    let mut touched = Touched {
        tokens: BTreeSet::new(),
        trigrams: BTreeSet::new(),
    };
    let mut line_tokens: BTreeSet<String> = BTreeSet::new();
    let mut line_trigrams: BTreeSet<Trigram> = BTreeSet::new();

    for (i, (line, lower_line)) in lines.iter().zip(lower.iter()).enumerate() {
        let Ok(line_no) = u16::try_from(i + 1) else {
            break;
        };
        let posting = ContentPosting { file_id, line: line_no };

        line_tokens.clear();
        line_tokens.extend(tokenize_content_line(line));
        for tok in &line_tokens {
            inner.content_index.entry(tok.clone()).or_default().push(posting);
            touched.tokens.insert(tok.clone());
        }

        line_trigrams.clear();
        line_trigrams.extend(trigrams_of(lower_line));
        for tri in &line_trigrams {
            inner.trigram_index.entry(*tri).or_default().push(posting);
            touched.trigrams.insert(*tri);
        }
    }
    touched
}

fn remove_entry(inner: &mut CacheInner, file_id: u32) {
    let Some(old) = inner.entries.remove(&file_id) else {
        return;
    };
    inner.total_mem = inner.total_mem.saturating_sub(old.size);

    for tok in tokens_of_lines(&old.lines) {
        if let Some(list) = inner.content_index.get_mut(&tok) {
            list.retain(|p| p.file_id != file_id);
            if list.is_empty() {
                inner.content_index.remove(&tok);
            }
        }
    }
    let mut tris: BTreeSet<Trigram> = BTreeSet::new();
    for line in old.lower_lines.iter() {
        tris.extend(trigrams_of(line));
    }
    for tri in tris {
        if let Some(list) = inner.trigram_index.get_mut(&tri) {
            list.retain(|p| p.file_id != file_id);
            if list.is_empty() {
                inner.trigram_index.remove(&tri);
            }
        }
    }
}

fn tokens_of_lines(lines: &[String]) -> BTreeSet<String> {
    lines.iter().flat_map(|l| tokenize_content_line(l)).collect()
}

/// Every 3-byte window of `s`.
pub fn trigrams_of(s: &str) -> impl Iterator<Item = Trigram> + '_ {
    s.as_bytes().windows(3).map(|w| [w[0], w[1], w[2]])
}

/// Unique trigrams of `s`, in first-seen order.
pub fn unique_trigrams(s: &str) -> Vec<Trigram> {
    let mut seen = BTreeSet::new();
    trigrams_of(s).filter(|t| seen.insert(*t)).collect()
}

/// Sorted-merge intersection of two ascending posting lists.
fn intersect_sorted(a: &[ContentPosting], b: &[ContentPosting]) -> Vec<ContentPosting> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn is_cache_eligible(fm: &FileMeta) -> bool {
    if fm.size == 0 || fm.size > MAX_CACHE_FILE_SIZE {
        return false;
    }
    !is_binary_extension(&fm.path)
}

pub fn is_binary_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.iter().any(|b| b.eq_ignore_ascii_case(ext)))
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let header = read_header(path)?;
    if !is_text_header(&header) {
        debug!(path = %path.display(), "Skipping non-text file");
        return None;
    }
    let (content, _was_lossy) = match read_file_lossy(path) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping unreadable file");
            return None;
        }
    };
    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    let lower_lines: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();
    let size = lines.iter().map(|l| l.len() as u64 + 1).sum();
    Some(CacheEntry {
        lines: Arc::new(lines),
        lower_lines: Arc::new(lower_lines),
        size,
    })
}

fn read_header(path: &Path) -> Option<Vec<u8>> {
    use std::io::Read;
    let file = std::fs::File::open(path).ok()?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut header).ok()?;
    if header.is_empty() { None } else { Some(header) }
}

/// Text check on a file header: no NUL byte, and `content_inspector` must
/// classify it as UTF-8 (with or without a BOM). UTF-16/32 and binary
/// content are rejected.
pub fn is_text_header(header: &[u8]) -> bool {
    if header.contains(&0) {
        return false;
    }
    matches!(inspect(header), ContentType::UTF_8 | ContentType::UTF_8_BOM)
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
