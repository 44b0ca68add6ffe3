//! Grep-style content scanning over file bodies.
//!
//! Plain substring queries of three or more bytes go through the cache's
//! trigram index and verify each candidate line; files outside the cache are
//! still read from disk. Everything else reads every indexed file (cached
//! lines first, disk otherwise) and applies a line matcher.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use super::glob::FileFilter;
use super::{MAX_CONTENT_FILE_SIZE, SearchEngine, compile_regex};
use super::enrich::format_symbol;
use crate::cache::unique_trigrams;
use crate::read_file_lossy;
use crate::tokenizer::tokenize;
use crate::types::{Hit, HitKind, SearchOptions, sort_by_file_line};

/// Line predicate built once per query.
enum LineMatcher {
    Literal { query: String },
    CaseInsensitive { lower_query: String },
    Regex(Regex),
    /// any token as a whole word, case-insensitive
    WordBoundary(Vec<Regex>),
    /// every comma-separated term, case-insensitive
    All(Vec<String>),
}

impl LineMatcher {
    fn build(query: &str, opts: &SearchOptions) -> Option<Self> {
        if opts.is_regex() {
            return match compile_regex(query) {
                Ok(re) => Some(Self::Regex(re)),
                Err(e) => {
                    debug!(error = %e, "Invalid regex, no content hits");
                    None
                }
            };
        }
        if opts.word_boundary {
            let patterns: Vec<Regex> = tokenize(query)
                .iter()
                .filter_map(|t| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(t))).ok())
                .collect();
            return if patterns.is_empty() { None } else { Some(Self::WordBoundary(patterns)) };
        }
        if opts.and_mode {
            let terms: Vec<String> = query
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            return if terms.is_empty() { None } else { Some(Self::All(terms)) };
        }
        if query.is_empty() {
            return None;
        }
        if opts.case_insensitive() {
            Some(Self::CaseInsensitive {
                lower_query: query.to_lowercase(),
            })
        } else {
            Some(Self::Literal {
                query: query.to_string(),
            })
        }
    }

    /// Whether the matcher compares against lowered text.
    fn wants_lower(&self) -> bool {
        matches!(self, Self::CaseInsensitive { .. } | Self::All(_))
    }

    /// `lower` is the lowered form of `line` when the caller has it.
    fn is_match(&self, line: &str, lower: Option<&str>) -> bool {
        let lowered = || lower.map_or_else(|| line.to_lowercase(), str::to_string);
        match self {
            Self::Literal { query } => line.contains(query.as_str()),
            Self::CaseInsensitive { lower_query } => match lower {
                Some(l) => l.contains(lower_query.as_str()),
                None => lowered().contains(lower_query.as_str()),
            },
            Self::Regex(re) => re.is_match(line),
            Self::WordBoundary(res) => res.iter().any(|re| re.is_match(line)),
            Self::All(terms) => {
                let l = lowered();
                terms.iter().all(|t| l.contains(t.as_str()))
            }
        }
    }
}

impl SearchEngine {
    /// Content hits sorted by (file_id, line), skipping lines already
    /// reported as symbol hits.
    pub(super) fn scan_contents(&self, query: &str, opts: &SearchOptions, filter: &FileFilter, symbol_hits: &[Hit]) -> Vec<Hit> {
        let mut seen: HashSet<(u32, u32)> = symbol_hits.iter().map(Hit::sort_key).collect();

        let use_trigrams = query.len() >= 3
            && !opts.is_regex()
            && !opts.word_boundary
            && !opts.and_mode
            && !opts.invert_match
            && self.cache.as_ref().is_some_and(|c| c.has_trigram_index());

        let mut hits = if use_trigrams {
            self.scan_trigram(query, opts, filter, &mut seen)
        } else {
            self.scan_brute_force(query, opts, filter, &mut seen)
        };
        sort_by_file_line(&mut hits);
        hits
    }

    /// Trigram candidates from the cache, verified line by line. Indexed files
    /// the cache does not hold are scanned directly.
    fn scan_trigram(&self, query: &str, opts: &SearchOptions, filter: &FileFilter, seen: &mut HashSet<(u32, u32)>) -> Vec<Hit> {
        let Some(cache) = &self.cache else {
            return Vec::new();
        };
        let lower_query = query.to_lowercase();
        let candidates = cache.trigram_lookup(&unique_trigrams(&lower_query));

        let mut hits = Vec::new();
        let mut current: Option<(u32, Arc<Vec<String>>, Arc<Vec<String>>)> = None;
        for posting in candidates {
            let Some(file) = self.index.files.get(&posting.file_id) else {
                continue;
            };
            if file.size > MAX_CONTENT_FILE_SIZE || !filter.accepts(file) {
                continue;
            }
            if current.as_ref().is_none_or(|(id, _, _)| *id != posting.file_id) {
                current = match (cache.get_lines(posting.file_id), cache.get_lower_lines(posting.file_id)) {
                    (Some(l), Some(ll)) => Some((posting.file_id, l, ll)),
                    _ => None,
                };
            }
            let Some((_, lines, lower)) = &current else {
                continue;
            };
            let idx = posting.line as usize - 1;
            let (Some(line), Some(lower_line)) = (lines.get(idx), lower.get(idx)) else {
                continue;
            };
            let verified = if opts.case_insensitive() {
                lower_line.contains(&lower_query)
            } else {
                line.contains(query)
            };
            if verified && seen.insert((posting.file_id, posting.line as u32)) {
                hits.push(self.content_hit(posting.file_id, &file.path, posting.line as u32, line));
            }
        }

        let Some(matcher) = LineMatcher::build(query, opts) else {
            return hits;
        };
        let mut uncached = 0usize;
        for (file_id, file) in self.index.iterate_files() {
            if cache.contains(file_id) || file.size > MAX_CONTENT_FILE_SIZE || !filter.accepts(file) {
                continue;
            }
            uncached += 1;
            self.scan_file(file_id, &file.path, &matcher, opts, seen, &mut hits);
        }
        if uncached > 0 {
            debug!(files = uncached, "Scanned files outside the cache");
        }
        hits
    }

    fn scan_brute_force(&self, query: &str, opts: &SearchOptions, filter: &FileFilter, seen: &mut HashSet<(u32, u32)>) -> Vec<Hit> {
        let Some(matcher) = LineMatcher::build(query, opts) else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        for (file_id, file) in self.index.iterate_files() {
            if file.size > MAX_CONTENT_FILE_SIZE || !filter.accepts(file) {
                continue;
            }
            self.scan_file(file_id, &file.path, &matcher, opts, seen, &mut hits);
        }
        hits
    }

    /// Match every line of one file, cached lines first, disk otherwise.
    fn scan_file(
        &self,
        file_id: u32,
        path: &str,
        matcher: &LineMatcher,
        opts: &SearchOptions,
        seen: &mut HashSet<(u32, u32)>,
        hits: &mut Vec<Hit>,
    ) {
        let cached = self.cache.as_ref().and_then(|c| c.get_lines(file_id));
        let lines: Arc<Vec<String>> = match cached {
            Some(lines) => lines,
            None => {
                let Some(root) = &self.project_root else {
                    return;
                };
                match read_file_lossy(&root.join(path)) {
                    Ok((content, _)) => Arc::new(content.lines().map(str::to_string).collect()),
                    Err(e) => {
                        debug!(path = %path, error = %e, "Skipping unreadable file");
                        return;
                    }
                }
            }
        };
        let lower = if matcher.wants_lower() {
            self.cache.as_ref().and_then(|c| c.get_lower_lines(file_id))
        } else {
            None
        };

        for (i, line) in lines.iter().enumerate() {
            let lower_line = lower.as_ref().and_then(|l| l.get(i)).map(String::as_str);
            if matcher.is_match(line, lower_line) == opts.invert_match {
                continue;
            }
            let line_no = i as u32 + 1;
            if seen.insert((file_id, line_no)) {
                hits.push(self.content_hit(file_id, path, line_no, line));
            }
        }
    }

    /// A content hit carrying its innermost enclosing symbol. Tags are filled
    /// after truncation.
    fn content_hit(&self, file_id: u32, path: &str, line: u32, text: &str) -> Hit {
        let mut hit = Hit {
            file: path.to_string(),
            line,
            kind: HitKind::Content,
            content: text.trim().to_string(),
            file_id,
            ..Default::default()
        };
        if let Some(span) = self.derived.enclosing_span(file_id, line) {
            if let Some(sym) = self.symbol(span.symbol.file_id, span.symbol.line) {
                hit.symbol = format_symbol(sym);
                hit.range = [span.start as u32, span.end as u32];
            }
        }
        hit
    }
}
