//! Domain and tag enrichment, and symbol display formatting.

use std::collections::HashSet;

use super::SearchEngine;
use crate::tokenizer::tokenize_content_line;
use crate::types::{Hit, HitKind, SymbolMeta, TokenRef};

/// Tokens that never become tags.
const EXCLUDED_TAG_TOKENS: &[&str] = &["self", "base", "case"];
const MAX_TAGS: usize = 3;

/// Display text for a symbol:
/// - with a parent: `Parent.signature`
/// - class: signature without the leading `class `
/// - directive: bare name
/// - anything else: signature
pub fn format_symbol(sym: &SymbolMeta) -> String {
    match &sym.parent {
        Some(parent) if !parent.is_empty() => format!("{}.{}", parent, sym.signature),
        _ if sym.kind == "class" => sym.signature.strip_prefix("class ").unwrap_or(&sym.signature).to_string(),
        _ if sym.kind == "directive" => sym.name.clone(),
        _ => sym.signature.clone(),
    }
}

impl SearchEngine {
    /// Fill domain and tags on symbol hits. Runs after truncation.
    pub(super) fn enrich_hits(&self, hits: &mut [Hit]) {
        for hit in hits.iter_mut().filter(|h| h.kind == HitKind::Symbol) {
            let Ok(line) = u16::try_from(hit.line) else {
                continue;
            };
            let r = TokenRef::new(hit.file_id, line);
            hit.domain = self.assign_domain(r);
            hit.tags = self.symbol_tags(r);
        }
    }

    /// Resolve content-hit lines to atlas terms. Content hits never get a domain.
    pub(super) fn fill_content_tags(&self, hits: &mut [Hit]) {
        for hit in hits.iter_mut().filter(|h| h.kind == HitKind::Content && h.tags.is_empty()) {
            let tokens = tokenize_content_line(&hit.content);
            let kept = tokens
                .iter()
                .map(String::as_str)
                .filter(|t| !EXCLUDED_TAG_TOKENS.contains(t));
            hit.tags = self.enricher.resolve_terms(kept, MAX_TAGS);
        }
    }

    /// The file's own domain when set, otherwise the best atlas keyword overlap.
    pub(super) fn assign_domain(&self, r: TokenRef) -> String {
        if let Some(domain) = self
            .index
            .files
            .get(&r.file_id)
            .and_then(|f| f.domain.as_deref())
            .filter(|d| !d.is_empty())
        {
            return domain.to_string();
        }

        let Some(tokens) = self.derived.ref_to_tokens.get(&r) else {
            return String::new();
        };
        let set: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        match self.enricher.best_domain(&set) {
            Some(name) if name.starts_with('@') => name.to_string(),
            Some(name) => format!("@{}", name),
            None => String::new(),
        }
    }

    /// Precomputed tags when present, else the ref's rarest tokens.
    pub(super) fn symbol_tags(&self, r: TokenRef) -> Vec<String> {
        if let Some(sym) = self.index.metadata.get(&r) {
            if !sym.tags.is_empty() {
                return sym.tags.clone();
            }
        }
        let Some(tokens) = self.derived.ref_to_tokens.get(&r) else {
            return Vec::new();
        };
        let mut candidates: Vec<(&str, usize)> = tokens
            .iter()
            .filter(|t| !EXCLUDED_TAG_TOKENS.contains(&t.as_str()))
            .map(|t| (t.as_str(), self.derived.token_doc_freq.get(t).copied().unwrap_or(0)))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));
        candidates.into_iter().take(MAX_TAGS).map(|(t, _)| t.to_string()).collect()
    }
}
