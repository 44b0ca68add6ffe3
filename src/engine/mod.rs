//! Search engine: symbol lookup over the index plus grep-style content
//! scanning, enrichment and result assembly.

mod content;
mod enrich;
pub mod glob;
pub mod observer;
mod symbol;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::FileCache;
use crate::enricher::Enricher;
use crate::error::SearchError;
use crate::index::{DerivedMaps, Index};
use crate::tokenizer::tokenize;
use crate::types::{Hit, HitKind, SearchOptions, SearchResult, SymbolMeta, sort_by_file_line};

pub use enrich::format_symbol;
use glob::FileFilter;
pub use observer::{ObserverWorker, SearchObserver};

/// Files above this size are never scanned for content.
pub const MAX_CONTENT_FILE_SIZE: u64 = 1024 * 1024;

/// In-memory search over one project's index.
pub struct SearchEngine {
    index: Index,
    derived: DerivedMaps,
    enricher: Arc<Enricher>,
    /// Content scanning is enabled only with a project root.
    project_root: Option<PathBuf>,
    cache: Option<Arc<FileCache>>,
    observer: Option<Arc<ObserverWorker>>,
}

impl SearchEngine {
    pub fn new(index: Index, enricher: Arc<Enricher>, project_root: Option<PathBuf>) -> Self {
        let derived = DerivedMaps::build(&index);
        Self {
            index,
            derived,
            enricher,
            project_root,
            cache: None,
            observer: None,
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn derived(&self) -> &DerivedMaps {
        &self.derived
    }

    pub fn enricher(&self) -> &Arc<Enricher> {
        &self.enricher
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Mutate the index, then rebuild the derived maps.
    pub fn update_index<R>(&mut self, f: impl FnOnce(&mut Index) -> R) -> R {
        let out = f(&mut self.index);
        self.rebuild();
        out
    }

    /// Swap in a whole new index. Returns the previous one.
    pub fn replace_index(&mut self, index: Index) -> Index {
        let old = std::mem::replace(&mut self.index, index);
        self.rebuild();
        old
    }

    /// Recompute the derived maps from the current index.
    pub fn rebuild(&mut self) {
        self.derived = DerivedMaps::build(&self.index);
    }

    pub fn set_cache(&mut self, cache: Arc<FileCache>) {
        self.cache = Some(cache);
    }

    pub fn cache(&self) -> Option<&Arc<FileCache>> {
        self.cache.as_ref()
    }

    /// Populate the cache from the current index. Disk heavy.
    pub fn warm_cache(&self) {
        if let (Some(cache), Some(root)) = (&self.cache, &self.project_root) {
            cache.warm_from_index(&self.index.files, root);
        }
    }

    pub fn update_cache_file(&self, file_id: u32) {
        let (Some(cache), Some(root)) = (&self.cache, &self.project_root) else {
            return;
        };
        match self.index.files.get(&file_id) {
            Some(fm) => cache.update_file(file_id, fm, root),
            None => cache.invalidate(file_id),
        }
    }

    pub fn remove_cache_file(&self, file_id: u32) {
        if let Some(cache) = &self.cache {
            cache.invalidate(file_id);
        }
    }

    /// Deliver every future search to `observer` on a dedicated worker.
    pub fn set_observer(&mut self, observer: SearchObserver) {
        self.observer = Some(Arc::new(ObserverWorker::spawn(observer)));
    }

    pub fn observer_handle(&self) -> Option<Arc<ObserverWorker>> {
        self.observer.clone()
    }

    /// Block until all queued observer events are delivered.
    pub fn wait_observers(&self) {
        if let Some(obs) = &self.observer {
            obs.wait();
        }
    }

    /// Run one query. Never fails: invalid patterns produce zero hits.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> SearchResult {
        let start = Instant::now();
        let max_count = opts.effective_max_count();
        let filter = FileFilter::from_options(opts);

        let mut hits: Vec<Hit> = Vec::new();
        if !self.index.metadata.is_empty() {
            if opts.is_regex() {
                hits = self.search_regex(query, opts, &filter);
            } else if opts.and_mode {
                hits = self.search_and(query, &filter);
            } else {
                let mut tokens = tokenize(query);
                if opts.case_insensitive() {
                    for t in tokens.iter_mut() {
                        *t = t.to_lowercase();
                    }
                }
                match tokens.len() {
                    0 => return build_result(Vec::new(), opts, max_count),
                    1 => hits = self.search_literal(&tokens[0], opts, &filter),
                    _ => hits = self.search_or(&tokens, opts, &filter),
                }
            }
        }
        debug!(query, symbol_hits = hits.len(), elapsed_us = start.elapsed().as_micros() as u64, "Symbol phase");

        if opts.invert_match {
            hits = self.invert_symbol_hits(&hits, &filter);
        }

        if self.project_root.is_some() {
            let t0 = Instant::now();
            let content_hits = self.scan_contents(query, opts, &filter, &hits);
            debug!(query, content_hits = content_hits.len(), elapsed_us = t0.elapsed().as_micros() as u64, "Content phase");
            hits.extend(content_hits);
        }

        if opts.files_without_match {
            hits = self.files_without_match(&hits, &filter);
        }

        let mut result = build_result(hits, opts, max_count);
        self.enrich_hits(&mut result.hits);
        self.fill_content_tags(&mut result.hits);
        if opts.only_matching {
            apply_only_matching(&mut result.hits, query, opts);
        }
        self.attach_context_lines(&mut result.hits, opts);

        let elapsed = start.elapsed();
        if let Some(obs) = &self.observer {
            obs.submit(query, opts, &result, elapsed);
        }
        result
    }

    /// One `file` hit per indexed file absent from `matched`.
    fn files_without_match(&self, matched: &[Hit], filter: &FileFilter) -> Vec<Hit> {
        let matched_files: std::collections::HashSet<u32> = matched.iter().map(Hit::file_id).collect();
        let mut hits: Vec<Hit> = self
            .index
            .iterate_files()
            .into_iter()
            .filter(|(id, fm)| !matched_files.contains(id) && filter.accepts(fm))
            .map(|(id, fm)| Hit {
                file: fm.path.clone(),
                kind: HitKind::File,
                file_id: id,
                ..Default::default()
            })
            .collect();
        sort_by_file_line(&mut hits);
        hits
    }

    /// Surrounding lines for content hits, from cached lines only.
    fn attach_context_lines(&self, hits: &mut [Hit], opts: &SearchOptions) {
        let (before, after) = if opts.context > 0 {
            (opts.context, opts.context)
        } else {
            (opts.before_context, opts.after_context)
        };
        if before == 0 && after == 0 {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };

        for hit in hits.iter_mut() {
            if hit.kind != HitKind::Content || hit.file_id == 0 {
                continue;
            }
            let Some(lines) = cache.get_lines(hit.file_id) else {
                continue;
            };
            let line = hit.line as usize;
            let first = line.saturating_sub(before).max(1);
            let last = (line + after).min(lines.len());
            for n in first..=last {
                if n != line {
                    hit.context_lines.insert(n as u32, lines[n - 1].clone());
                }
            }
        }
    }

    fn symbol(&self, file_id: u32, line: u16) -> Option<&SymbolMeta> {
        self.index.metadata.get(&crate::types::TokenRef::new(file_id, line))
    }
}

/// Quiet → exit code, count-only → count, otherwise truncate to `max_count`.
fn build_result(mut hits: Vec<Hit>, opts: &SearchOptions, max_count: usize) -> SearchResult {
    if opts.quiet {
        return SearchResult {
            exit_code: if hits.is_empty() { 1 } else { 0 },
            ..Default::default()
        };
    }
    if opts.count_only {
        return SearchResult {
            count: hits.len(),
            ..Default::default()
        };
    }

    // file:line:content\n, as a grep listing of every hit would print it
    let total_match_chars = hits.iter().map(|h| h.file.len() + h.content.len() + 10).sum();
    hits.truncate(max_count);
    SearchResult {
        hits,
        total_match_chars,
        ..Default::default()
    }
}

/// Compile a user pattern. The error names the pattern.
pub(crate) fn compile_regex(pattern: &str) -> Result<regex::Regex, SearchError> {
    regex::Regex::new(pattern).map_err(|source| SearchError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Replace content (or symbol text) with just the matched substring.
fn apply_only_matching(hits: &mut [Hit], query: &str, opts: &SearchOptions) {
    let regex = if opts.is_regex() {
        compile_regex(query).ok()
    } else {
        None
    };
    for hit in hits.iter_mut() {
        let target = match hit.kind {
            HitKind::Content => &mut hit.content,
            HitKind::Symbol => &mut hit.symbol,
            HitKind::File => continue,
        };
        if target.is_empty() {
            continue;
        }
        if let Some(m) = extract_match(target, query, opts, regex.as_ref()) {
            *target = m;
        }
    }
}

fn extract_match(text: &str, query: &str, opts: &SearchOptions, regex: Option<&regex::Regex>) -> Option<String> {
    if opts.is_regex() {
        return regex?.find(text).map(|m| m.as_str().to_string());
    }
    if opts.case_insensitive() {
        let lower_text = text.to_lowercase();
        let pos = lower_text.find(&query.to_lowercase())?;
        // lowercasing can shift byte offsets outside ASCII
        return text.get(pos..pos + query.len()).map(str::to_string);
    }
    text.find(query).map(|pos| text[pos..pos + query.len()].to_string())
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
