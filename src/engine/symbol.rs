//! Symbol-level matching: literal, OR, AND, regex and invert.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{SearchEngine, compile_regex};
use super::enrich::format_symbol;
use super::glob::FileFilter;
use crate::tokenizer::tokenize;
use crate::types::{Hit, HitKind, SearchOptions, SymbolMeta, TokenRef, sort_by_file_line};

impl SearchEngine {
    /// Single-token lookup, hits in posting order.
    pub(super) fn search_literal(&self, token: &str, opts: &SearchOptions, filter: &FileFilter) -> Vec<Hit> {
        let mut hits = Vec::new();
        self.index.for_each_posting(token, |r| {
            if opts.word_boundary && !self.derived.ref_has_token(r, token) {
                return;
            }
            if let Some(hit) = self.hit_for_ref(r, filter) {
                hits.push(hit);
            }
        });
        hits
    }

    /// Union of every token's postings, densest refs first.
    pub(super) fn search_or(&self, tokens: &[String], opts: &SearchOptions, filter: &FileFilter) -> Vec<Hit> {
        let wanted: HashSet<&str> = tokens.iter().map(String::as_str).collect();

        let mut seen: HashSet<TokenRef> = HashSet::new();
        let mut refs: Vec<TokenRef> = Vec::new();
        for tok in tokens {
            self.index.for_each_posting(tok, |r| {
                if seen.insert(r) {
                    refs.push(r);
                }
            });
        }

        let density: HashMap<TokenRef, usize> = refs
            .iter()
            .map(|r| {
                let n = self
                    .derived
                    .ref_to_tokens
                    .get(r)
                    .map_or(0, |toks| toks.iter().filter(|t| wanted.contains(t.as_str())).count());
                (*r, n)
            })
            .collect();
        refs.sort_by(|a, b| density[b].cmp(&density[a]).then(a.cmp(b)));

        refs.into_iter()
            .filter(|r| !opts.word_boundary || tokens.iter().any(|t| self.derived.ref_has_token(*r, t)))
            .filter_map(|r| self.hit_for_ref(r, filter))
            .collect()
    }

    /// Refs carrying every token of every comma-separated part.
    pub(super) fn search_and(&self, query: &str, filter: &FileFilter) -> Vec<Hit> {
        let tokens: Vec<String> = query.split(',').flat_map(|part| tokenize(part.trim())).collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut sets: Vec<HashSet<TokenRef>> = Vec::with_capacity(tokens.len());
        for tok in &tokens {
            match self.index.tokens.get(tok) {
                Some(refs) => sets.push(refs.iter().copied().collect()),
                None => return Vec::new(),
            }
        }
        sets.sort_by_key(HashSet::len);

        let mut result = sets[0].clone();
        for set in &sets[1..] {
            result.retain(|r| set.contains(r));
            if result.is_empty() {
                return Vec::new();
            }
        }

        let mut hits: Vec<Hit> = result.into_iter().filter_map(|r| self.hit_for_ref(r, filter)).collect();
        sort_by_file_line(&mut hits);
        hits
    }

    /// Regex over every symbol name. An invalid pattern matches nothing.
    pub(super) fn search_regex(&self, pattern: &str, opts: &SearchOptions, filter: &FileFilter) -> Vec<Hit> {
        let pattern = if opts.word_boundary {
            format!(r"\b{}\b", pattern)
        } else {
            pattern.to_string()
        };
        let re = match compile_regex(&pattern) {
            Ok(re) => re,
            Err(e) => {
                debug!(error = %e, "Invalid regex, no symbol hits");
                return Vec::new();
            }
        };

        let mut hits: Vec<Hit> = self
            .index
            .metadata
            .iter()
            .filter(|(_, sym)| re.is_match(&sym.name))
            .filter_map(|(r, _)| self.hit_for_ref(*r, filter))
            .collect();
        sort_by_file_line(&mut hits);
        hits
    }

    /// Every symbol not in `matched`, filtered, in (file_id, line) order.
    pub(super) fn invert_symbol_hits(&self, matched: &[Hit], filter: &FileFilter) -> Vec<Hit> {
        let matched: HashSet<(u32, u32)> = matched.iter().map(Hit::sort_key).collect();
        let mut hits: Vec<Hit> = self
            .index
            .metadata
            .keys()
            .filter(|r| !matched.contains(&(r.file_id, r.line as u32)))
            .filter_map(|r| self.hit_for_ref(*r, filter))
            .collect();
        sort_by_file_line(&mut hits);
        hits
    }

    /// Symbol hit for `r` when it has metadata, a file entry and passes the filter.
    fn hit_for_ref(&self, r: TokenRef, filter: &FileFilter) -> Option<Hit> {
        let sym = self.index.metadata.get(&r)?;
        let file = self.index.files.get(&r.file_id)?;
        if !filter.accepts(file) {
            return None;
        }
        Some(build_symbol_hit(r, sym, &file.path))
    }
}

fn build_symbol_hit(r: TokenRef, sym: &SymbolMeta, path: &str) -> Hit {
    Hit {
        file: path.to_string(),
        line: r.line as u32,
        symbol: format_symbol(sym),
        range: [sym.start_line as u32, sym.end_line as u32],
        kind: HitKind::Symbol,
        file_id: r.file_id,
        ..Default::default()
    }
}
