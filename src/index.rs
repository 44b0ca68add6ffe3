//! Symbol index: token → postings, per-symbol metadata, per-file metadata,
//! and the derived lookup maps rebuilt after every structural change.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::tokenizer::{tokenize, tokenize_content_line};
use crate::types::{FileMeta, SymbolMeta, TokenRef};

// ─── Index ───────────────────────────────────────────────────────────

/// The searchable index of one project.
///
/// Postings are kept in (file_id asc, line asc) order. Every ref with a
/// non-zero line has a metadata entry, and every referenced file_id has a
/// `files` entry.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Index {
    pub tokens: HashMap<String, Vec<TokenRef>>,
    pub metadata: HashMap<TokenRef, SymbolMeta>,
    pub files: HashMap<u32, FileMeta>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.metadata.is_empty() && self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.metadata.clear();
        self.files.clear();
    }

    /// Visit every ref posted under `token`, in posting order.
    pub fn for_each_posting(&self, token: &str, mut f: impl FnMut(TokenRef)) {
        if let Some(refs) = self.tokens.get(token) {
            for r in refs {
                f(*r);
            }
        }
    }

    /// Files ordered by id.
    pub fn iterate_files(&self) -> Vec<(u32, &FileMeta)> {
        let mut files: Vec<(u32, &FileMeta)> = self.files.iter().map(|(id, fm)| (*id, fm)).collect();
        files.sort_by_key(|(id, _)| *id);
        files
    }

    pub fn file_id_for_path(&self, path: &str) -> Option<u32> {
        self.files
            .iter()
            .find(|(_, fm)| fm.path == path)
            .map(|(id, _)| *id)
    }

    /// Next unused file id: one past the largest, never zero.
    pub fn next_file_id(&self) -> u32 {
        self.files.keys().max().map_or(1, |max| max + 1).max(1)
    }

    /// Remove every trace of `file_id`. Returns the number of postings removed.
    pub fn remove_file(&mut self, file_id: u32) -> usize {
        let mut removed = 0;
        self.tokens.retain(|_, refs| {
            let before = refs.len();
            refs.retain(|r| r.file_id != file_id);
            removed += before - refs.len();
            !refs.is_empty()
        });
        self.metadata.retain(|r, _| r.file_id != file_id);
        self.files.remove(&file_id);
        removed
    }

    /// Post each symbol's name tokens and its lowercased full name at
    /// `(file_id, start_line)`. Returns the number of symbols added.
    pub fn add_symbols(&mut self, file_id: u32, mut symbols: Vec<SymbolMeta>) -> usize {
        symbols.sort_by_key(|s| s.start_line);
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let count = symbols.len();

        for sym in symbols {
            let r = TokenRef::new(file_id, sym.start_line);
            let mut names = tokenize(&sym.name);
            let lower = sym.name.to_lowercase();
            if !lower.is_empty() {
                names.push(lower);
            }
            for tok in names {
                self.post(&tok, r);
                touched.insert(tok);
            }
            self.metadata.insert(r, sym);
        }

        self.normalize_postings(&touched);
        count
    }

    /// Tokenization-only fallback: post every content token of `source` at
    /// `(file_id, 0)`.
    pub fn add_content_tokens(&mut self, file_id: u32, source: &str) {
        let r = TokenRef::new(file_id, 0);
        let mut touched: BTreeSet<String> = BTreeSet::new();
        for line in source.lines() {
            for tok in tokenize_content_line(line) {
                if touched.insert(tok.clone()) {
                    self.post(&tok, r);
                }
            }
        }
        self.normalize_postings(&touched);
    }

    fn post(&mut self, token: &str, r: TokenRef) {
        let refs = self.tokens.entry(token.to_string()).or_default();
        if refs.last() != Some(&r) {
            refs.push(r);
        }
    }

    /// A reused file id can land behind higher ids; restore (file_id, line) order.
    fn normalize_postings(&mut self, touched: &BTreeSet<String>) {
        for tok in touched {
            if let Some(refs) = self.tokens.get_mut(tok) {
                if !refs.is_sorted() {
                    refs.sort();
                }
                refs.dedup();
            }
        }
    }
}

// ─── Derived maps ────────────────────────────────────────────────────

/// A symbol's line range inside one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u16,
    pub end: u16,
    pub symbol: TokenRef,
}

impl Span {
    fn size(&self) -> u16 {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, line: u32) -> bool {
        line >= self.start as u32 && line <= self.end as u32
    }
}

/// Lookup maps computed from an [`Index`]. Never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct DerivedMaps {
    /// ref → every token posted at it, alphabetical
    pub ref_to_tokens: HashMap<TokenRef, Vec<String>>,
    /// token → number of refs posted under it
    pub token_doc_freq: HashMap<String, usize>,
    /// file → symbol spans, smallest range first
    pub file_spans: HashMap<u32, Vec<Span>>,
}

impl DerivedMaps {
    pub fn build(index: &Index) -> Self {
        let mut ref_to_tokens: HashMap<TokenRef, Vec<String>> = HashMap::new();
        let mut token_doc_freq = HashMap::with_capacity(index.tokens.len());

        let mut tokens: Vec<&String> = index.tokens.keys().collect();
        tokens.sort();
        for tok in tokens {
            let refs = &index.tokens[tok];
            token_doc_freq.insert(tok.clone(), refs.len());
            for r in refs {
                ref_to_tokens.entry(*r).or_default().push(tok.clone());
            }
        }

        let mut file_spans: HashMap<u32, Vec<Span>> = HashMap::new();
        for (r, sym) in &index.metadata {
            file_spans.entry(r.file_id).or_default().push(Span {
                start: sym.start_line,
                end: sym.end_line.max(sym.start_line),
                symbol: *r,
            });
        }
        for spans in file_spans.values_mut() {
            spans.sort_by_key(|s| (s.size(), s.start, s.symbol.line));
        }

        Self {
            ref_to_tokens,
            token_doc_freq,
            file_spans,
        }
    }

    pub fn ref_has_token(&self, r: TokenRef, token: &str) -> bool {
        self.ref_to_tokens
            .get(&r)
            .is_some_and(|toks| toks.iter().any(|t| t == token))
    }

    /// Innermost symbol span of `file_id` containing `line`.
    pub fn enclosing_span(&self, file_id: u32, line: u32) -> Option<&Span> {
        self.file_spans
            .get(&file_id)?
            .iter()
            .find(|s| s.contains(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, kind: &str, start: u16, end: u16) -> SymbolMeta {
        SymbolMeta {
            name: name.to_string(),
            signature: format!("{}()", name),
            kind: kind.to_string(),
            start_line: start,
            end_line: end,
            ..Default::default()
        }
    }

    fn file(path: &str) -> FileMeta {
        FileMeta {
            path: path.to_string(),
            language: "go".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_symbols_posts_name_tokens_and_lowercase_name() {
        let mut idx = Index::new();
        idx.files.insert(1, file("auth.go"));
        idx.add_symbols(1, vec![sym("getUserToken", "function", 4, 9)]);

        let r = TokenRef::new(1, 4);
        for tok in ["get", "user", "token", "getusertoken"] {
            assert_eq!(idx.tokens.get(tok), Some(&vec![r]), "token {}", tok);
        }
        assert!(idx.metadata.contains_key(&r));
    }

    #[test]
    fn test_single_word_symbol_posted_once() {
        let mut idx = Index::new();
        idx.add_symbols(1, vec![sym("Login", "function", 10, 12)]);
        assert_eq!(idx.tokens["login"], vec![TokenRef::new(1, 10)]);
    }

    #[test]
    fn test_reused_file_id_keeps_posting_order() {
        let mut idx = Index::new();
        idx.add_symbols(1, vec![sym("Login", "function", 10, 12)]);
        idx.add_symbols(2, vec![sym("Login", "function", 3, 5)]);
        idx.remove_file(1);
        idx.add_symbols(1, vec![sym("Login", "function", 7, 8)]);
        assert_eq!(
            idx.tokens["login"],
            vec![TokenRef::new(1, 7), TokenRef::new(2, 3)]
        );
    }

    #[test]
    fn test_remove_file_drops_empty_postings() {
        let mut idx = Index::new();
        idx.files.insert(1, file("a.go"));
        idx.files.insert(2, file("b.go"));
        idx.add_symbols(1, vec![sym("Login", "function", 1, 2), sym("Logout", "function", 5, 6)]);
        idx.add_symbols(2, vec![sym("Login", "function", 1, 2)]);

        let removed = idx.remove_file(1);
        assert_eq!(removed, 2);
        assert!(!idx.tokens.contains_key("logout"));
        assert_eq!(idx.tokens["login"], vec![TokenRef::new(2, 1)]);
        assert!(idx.metadata.keys().all(|r| r.file_id == 2));
        assert!(!idx.files.contains_key(&1));
    }

    #[test]
    fn test_content_tokens_at_line_zero() {
        let mut idx = Index::new();
        idx.add_content_tokens(3, "fn main() {\n    let session_id = 1;\n    main();\n}");
        assert_eq!(idx.tokens["main"], vec![TokenRef::new(3, 0)]);
        assert_eq!(idx.tokens["session"], vec![TokenRef::new(3, 0)]);
        assert!(idx.metadata.is_empty());
    }

    #[test]
    fn test_next_file_id() {
        let mut idx = Index::new();
        assert_eq!(idx.next_file_id(), 1);
        idx.files.insert(7, file("x.go"));
        assert_eq!(idx.next_file_id(), 8);
    }

    #[test]
    fn test_iterate_files_sorted() {
        let mut idx = Index::new();
        idx.files.insert(3, file("c.go"));
        idx.files.insert(1, file("a.go"));
        let ids: Vec<u32> = idx.iterate_files().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(idx.file_id_for_path("c.go"), Some(3));
    }

    #[test]
    fn test_derived_maps() {
        let mut idx = Index::new();
        idx.add_symbols(
            1,
            vec![
                sym("AuthHandler", "class", 1, 40),
                sym("Login", "method", 5, 12),
            ],
        );
        idx.add_symbols(2, vec![sym("Login", "function", 1, 3)]);
        let d = DerivedMaps::build(&idx);

        assert_eq!(d.token_doc_freq["login"], 2);
        assert_eq!(d.token_doc_freq["auth"], 1);
        assert_eq!(
            d.ref_to_tokens[&TokenRef::new(1, 1)],
            vec!["auth", "authhandler", "handler"]
        );
        assert!(d.ref_has_token(TokenRef::new(1, 5), "login"));
        assert!(!d.ref_has_token(TokenRef::new(1, 5), "log"));

        let inner = d.enclosing_span(1, 8).unwrap();
        assert_eq!(inner.symbol, TokenRef::new(1, 5));
        let outer = d.enclosing_span(1, 30).unwrap();
        assert_eq!(outer.symbol, TokenRef::new(1, 1));
        assert!(d.enclosing_span(1, 41).is_none());
    }
}
