//! Core data types shared by the index, engine, cache and server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── Index entities ──────────────────────────────────────────────────

/// A location in the symbol index. `line == 0` marks a file-level content token.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenRef {
    pub file_id: u32,
    pub line: u16,
}

impl TokenRef {
    pub fn new(file_id: u32, line: u16) -> Self {
        Self { file_id, line }
    }

    /// Key used for the metadata map in persisted blobs: `"{file_id}:{line}"`.
    pub fn to_key(&self) -> String {
        format!("{}:{}", self.file_id, self.line)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let (fid, line) = key.split_once(':')?;
        Some(Self {
            file_id: fid.parse().ok()?,
            line: line.parse().ok()?,
        })
    }
}

/// A declared symbol as produced by a parser.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolMeta {
    pub name: String,
    pub signature: String,
    /// function, method, class, interface, enum, directive, ...
    pub kind: String,
    pub start_line: u16,
    pub end_line: u16,
    /// Containing type, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Precomputed atlas terms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Per-file metadata. `path` is repo-relative and unique within an index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMeta {
    pub path: String,
    /// Seconds since epoch.
    pub last_modified: i64,
    pub language: String,
    pub size: u64,
    /// File-level domain, `"@name"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

// ─── Search request/response ─────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Literal,
    Regex,
    CaseInsensitive,
}

/// Options accepted by `SearchEngine::search`. Field names follow grep flags.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// `-a`: comma-separated terms must all match
    pub and_mode: bool,
    /// `-w`
    pub word_boundary: bool,
    /// `-v`
    pub invert_match: bool,
    /// `-c`
    pub count_only: bool,
    /// `-q`
    pub quiet: bool,
    /// `-m`; values <= 0 mean the default of 20
    pub max_count: i64,
    pub include_glob: String,
    pub exclude_glob: String,
    pub exclude_dir_glob: String,
    /// Only files modified at or after this unix time (0 = unbounded)
    pub since: i64,
    /// Only files modified before this unix time (0 = unbounded)
    pub before: i64,
    /// `-o`
    pub only_matching: bool,
    /// `-L`
    pub files_without_match: bool,
    /// `-A`
    pub after_context: usize,
    /// `-B`
    pub before_context: usize,
    /// `-C`, overrides `-A`/`-B` when non-zero
    pub context: usize,
}

impl SearchOptions {
    pub const DEFAULT_MAX_COUNT: usize = 20;

    pub fn effective_max_count(&self) -> usize {
        if self.max_count <= 0 {
            Self::DEFAULT_MAX_COUNT
        } else {
            self.max_count as usize
        }
    }

    pub fn case_insensitive(&self) -> bool {
        self.mode == SearchMode::CaseInsensitive
    }

    pub fn is_regex(&self) -> bool {
        self.mode == SearchMode::Regex
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HitKind {
    #[default]
    Symbol,
    Content,
    /// Emitted by files-without-match.
    File,
}

/// A single search result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Hit {
    pub file: String,
    pub line: u32,
    pub symbol: String,
    pub range: [u32; 2],
    pub domain: String,
    pub tags: Vec<String>,
    pub kind: HitKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_lines: BTreeMap<u32, String>,
    #[serde(skip)]
    pub(crate) file_id: u32,
}

impl Hit {
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub(crate) fn sort_key(&self) -> (u32, u32) {
        (self.file_id, self.line)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
    /// Filled for count-only searches.
    pub count: usize,
    /// Filled for quiet searches: 0 when anything matched, else 1.
    pub exit_code: i32,
    /// Characters a `file:line:content` listing of every hit would take before truncation.
    pub total_match_chars: usize,
}

/// Sort hits by (file_id, line), keeping the relative order of equal keys.
pub(crate) fn sort_by_file_line(hits: &mut [Hit]) {
    hits.sort_by_key(Hit::sort_key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_ref_key_roundtrip() {
        let r = TokenRef::new(42, 17);
        assert_eq!(r.to_key(), "42:17");
        assert_eq!(TokenRef::from_key("42:17"), Some(r));
    }

    #[test]
    fn test_token_ref_bad_keys() {
        assert_eq!(TokenRef::from_key("42"), None);
        assert_eq!(TokenRef::from_key("x:1"), None);
        assert_eq!(TokenRef::from_key("1:70000"), None);
    }

    #[test]
    fn test_token_ref_ordering() {
        let mut refs = vec![TokenRef::new(2, 1), TokenRef::new(1, 9), TokenRef::new(1, 3)];
        refs.sort();
        assert_eq!(refs, vec![TokenRef::new(1, 3), TokenRef::new(1, 9), TokenRef::new(2, 1)]);
    }

    #[test]
    fn test_search_options_defaults_from_empty_json() {
        let opts: SearchOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.mode, SearchMode::Literal);
        assert_eq!(opts.effective_max_count(), 20);
    }

    #[test]
    fn test_search_options_mode_wire_names() {
        let opts: SearchOptions =
            serde_json::from_str(r#"{"mode":"case_insensitive","max_count":5}"#).unwrap();
        assert!(opts.case_insensitive());
        assert_eq!(opts.effective_max_count(), 5);
    }

    #[test]
    fn test_hit_serialization_skips_empty_content() {
        let hit = Hit {
            file: "a.go".to_string(),
            line: 3,
            kind: HitKind::Symbol,
            ..Default::default()
        };
        let json = serde_json::to_string(&hit).unwrap();
        assert!(json.contains(r#""kind":"symbol""#));
        assert!(!json.contains("content"));
        assert!(!json.contains("file_id"));
    }
}
