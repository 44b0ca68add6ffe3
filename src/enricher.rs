//! Keyword → (domain, term) resolution over the embedded atlas.
//!
//! The atlas is a set of JSON documents, each a list of
//! `{ "domain": ..., "terms": { term: [keyword, ...] } }`. Documents are
//! loaded in filename order; a keyword may belong to several (domain, term)
//! pairs and callers decide which one matters.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Atlas documents compiled into the binary, sorted by filename.
const EMBEDDED_ATLAS: &[(&str, &str)] = &[
    ("data.json", include_str!("../atlas/v1/data.json")),
    ("infrastructure.json", include_str!("../atlas/v1/infrastructure.json")),
    ("observability.json", include_str!("../atlas/v1/observability.json")),
    ("runtime.json", include_str!("../atlas/v1/runtime.json")),
    ("security.json", include_str!("../atlas/v1/security.json")),
    ("web.json", include_str!("../atlas/v1/web.json")),
];

/// One domain of the atlas.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AtlasDomain {
    pub domain: String,
    /// term → keywords
    pub terms: BTreeMap<String, Vec<String>>,
}

/// A keyword's owning (domain, term).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordMatch {
    pub domain: String,
    pub term: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtlasStats {
    pub domains: usize,
    pub terms: usize,
    pub keyword_entries: usize,
    pub unique_keywords: usize,
}

/// Immutable keyword dictionary. Built once at startup and shared by reference.
#[derive(Debug)]
pub struct Enricher {
    domains: Vec<AtlasDomain>,
    keywords: HashMap<String, Vec<KeywordMatch>>,
    /// keyword → terms, deduplicated and sorted
    keyword_terms: HashMap<String, Vec<String>>,
    /// (domain, every keyword entry lowercased), ordered by domain name
    scoring: Vec<(String, Vec<String>)>,
    stats: AtlasStats,
}

impl Enricher {
    /// Load the atlas compiled into the binary.
    pub fn embedded() -> Result<Self, SearchError> {
        Self::from_documents(EMBEDDED_ATLAS)
    }

    /// Build from `(name, json)` documents. Documents are processed in
    /// name order. Fails on malformed JSON or when no domain is found.
    pub fn from_documents(docs: &[(&str, &str)]) -> Result<Self, SearchError> {
        let mut ordered: Vec<&(&str, &str)> = docs.iter().collect();
        ordered.sort_by_key(|(name, _)| *name);

        let mut domains: Vec<AtlasDomain> = Vec::new();
        for (name, json) in ordered {
            let parsed: Vec<AtlasDomain> = serde_json::from_str(json).map_err(|e| SearchError::Atlas {
                source_name: name.to_string(),
                message: e.to_string(),
            })?;
            domains.extend(parsed);
        }
        if domains.is_empty() {
            return Err(SearchError::Atlas {
                source_name: "atlas".to_string(),
                message: "no domains found".to_string(),
            });
        }

        let mut keywords: HashMap<String, Vec<KeywordMatch>> = HashMap::new();
        let mut stats = AtlasStats {
            domains: domains.len(),
            ..Default::default()
        };
        for d in &domains {
            for (term, kws) in &d.terms {
                stats.terms += 1;
                stats.keyword_entries += kws.len();
                for kw in kws {
                    keywords.entry(kw.clone()).or_default().push(KeywordMatch {
                        domain: d.domain.clone(),
                        term: term.clone(),
                    });
                }
            }
        }
        stats.unique_keywords = keywords.len();

        let keyword_terms = keywords
            .iter()
            .map(|(kw, matches)| {
                let mut terms: Vec<String> = matches.iter().map(|m| m.term.clone()).collect();
                terms.sort();
                terms.dedup();
                (kw.clone(), terms)
            })
            .collect();

        let mut scoring: Vec<(String, Vec<String>)> = domains
            .iter()
            .map(|d| {
                let kws = d.terms.values().flatten().map(|k| k.to_lowercase()).collect();
                (d.domain.clone(), kws)
            })
            .collect();
        scoring.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            domains,
            keywords,
            keyword_terms,
            scoring,
            stats,
        })
    }

    /// Every (domain, term) owning `keyword`. Empty for unknown keywords.
    pub fn lookup(&self, keyword: &str) -> &[KeywordMatch] {
        self.keywords.get(keyword).map_or(&[], Vec::as_slice)
    }

    /// Terms owning `keyword`, sorted and unique.
    pub fn terms_for(&self, keyword: &str) -> &[String] {
        self.keyword_terms.get(keyword).map_or(&[], Vec::as_slice)
    }

    pub fn domain_terms(&self, domain: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.domains.iter().find(|d| d.domain == domain).map(|d| &d.terms)
    }

    pub fn domain_defs(&self) -> &[AtlasDomain] {
        &self.domains
    }

    pub fn stats(&self) -> AtlasStats {
        self.stats
    }

    /// Domain whose keywords overlap `tokens` the most. Domains are visited
    /// alphabetically and only a strictly higher score replaces the leader.
    pub fn best_domain(&self, tokens: &HashSet<&str>) -> Option<&str> {
        if tokens.is_empty() {
            return None;
        }
        let mut best: Option<&str> = None;
        let mut best_score = 0usize;
        for (name, kws) in &self.scoring {
            let score = kws.iter().filter(|k| tokens.contains(k.as_str())).count();
            if score > best_score {
                best_score = score;
                best = Some(name);
            }
        }
        best
    }

    /// Resolve tokens to atlas terms: unique, sorted, at most `limit`.
    pub fn resolve_terms<'a>(&self, tokens: impl IntoIterator<Item = &'a str>, limit: usize) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for tok in tokens {
            for term in self.terms_for(&tok.to_lowercase()) {
                if !terms.contains(term) {
                    terms.push(term.clone());
                }
            }
        }
        terms.sort();
        terms.truncate(limit);
        terms
    }
}
