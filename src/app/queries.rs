//! Read-only queries behind the IPC methods.

use serde::Serialize;

use super::App;
use crate::cache::CacheStats;
use crate::enricher::AtlasStats;
use crate::engine::glob::fnmatch;
use crate::learner::{DomainSource, DomainState, Tier};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HealthResult {
    pub status: &'static str,
    pub version: &'static str,
    pub project_id: String,
    pub file_count: usize,
    pub token_count: usize,
    pub uptime_secs: u64,
    pub reindexing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub atlas: AtlasStats,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub language: String,
    pub size: u64,
    pub last_modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FilesResult {
    pub files: Vec<FileEntry>,
    pub count: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TermEntry {
    pub name: String,
    /// Sum of the learner's hits over the term's keywords.
    pub keyword_hits: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DomainEntry {
    pub name: String,
    pub hits: f64,
    pub total_hits: u32,
    pub tier: Tier,
    pub state: DomainState,
    pub source: DomainSource,
    /// Atlas terms, most hit first.
    pub terms: Vec<TermEntry>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DomainsResult {
    pub domains: Vec<DomainEntry>,
    pub count: usize,
    pub core_count: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BigramsResult {
    pub bigrams: std::collections::BTreeMap<String, u32>,
    pub count: usize,
    pub cohit_kw_term: std::collections::BTreeMap<String, u32>,
    pub cohit_term_domain: std::collections::BTreeMap<String, u32>,
    pub cohit_kw_term_count: usize,
    pub cohit_term_domain_count: usize,
    pub staged: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StatsResult {
    pub prompt_count: u32,
    pub domain_count: usize,
    pub core_count: usize,
    pub context_count: usize,
    pub keyword_count: usize,
    pub term_count: usize,
    pub bigram_count: usize,
    pub file_hit_count: usize,
    pub blocklist_count: usize,
    pub gap_keyword_count: usize,
    pub index_files: usize,
    pub index_tokens: usize,
}

impl App {
    pub fn health(&self) -> HealthResult {
        let st = self.read_state();
        HealthResult {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            project_id: self.project_id.clone(),
            file_count: st.engine.index().files.len(),
            token_count: st.engine.index().tokens.len(),
            uptime_secs: self.uptime().as_secs(),
            reindexing: self.reindexing.load(std::sync::atomic::Ordering::Acquire),
            cache: st.engine.cache().map(|c| c.stats()),
            atlas: st.engine.enricher().stats(),
        }
    }

    /// Indexed files filtered by `glob` (matched against the basename or the
    /// whole path) and `name` (case-insensitive basename substring).
    pub fn files(&self, glob: Option<&str>, name: Option<&str>) -> FilesResult {
        let glob = glob.filter(|g| !g.is_empty());
        let name = name.filter(|n| !n.is_empty()).map(str::to_lowercase);

        let st = self.read_state();
        let mut files: Vec<FileEntry> = st
            .engine
            .index()
            .files
            .values()
            .filter(|fm| {
                let base = fm.path.rsplit('/').next().unwrap_or(&fm.path);
                let glob_ok = glob.is_none_or(|g| fnmatch(g, base) || fnmatch(g, &fm.path));
                let name_ok = name.as_deref().is_none_or(|n| base.to_lowercase().contains(n));
                glob_ok && name_ok
            })
            .map(|fm| FileEntry {
                path: fm.path.clone(),
                language: fm.language.clone(),
                size: fm.size,
                last_modified: fm.last_modified,
                domain: fm.domain.clone(),
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        FilesResult { count: files.len(), files }
    }

    pub fn domains(&self) -> DomainsResult {
        let st = self.read_state();
        let state = st.learner.state();
        let enricher = st.engine.enricher();

        let mut domains: Vec<DomainEntry> = state
            .domain_meta()
            .iter()
            .map(|(name, dm)| {
                let mut terms: Vec<TermEntry> = enricher
                    .domain_terms(name)
                    .map(|terms| {
                        terms
                            .iter()
                            .map(|(term, keywords)| TermEntry {
                                name: term.clone(),
                                keyword_hits: keywords
                                    .iter()
                                    .map(|k| state.keyword_hits().get(k).copied().unwrap_or(0))
                                    .fold(0u32, u32::saturating_add),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                terms.sort_by(|a, b| b.keyword_hits.cmp(&a.keyword_hits).then_with(|| a.name.cmp(&b.name)));
                DomainEntry {
                    name: name.clone(),
                    hits: dm.hits,
                    total_hits: dm.total_hits,
                    tier: dm.tier,
                    state: dm.state,
                    source: dm.source,
                    terms,
                }
            })
            .collect();
        domains.sort_by(|a, b| b.hits.total_cmp(&a.hits).then_with(|| a.name.cmp(&b.name)));

        DomainsResult {
            count: domains.len(),
            core_count: state.core_count(),
            domains,
        }
    }

    pub fn bigrams(&self) -> BigramsResult {
        let st = self.read_state();
        let state = st.learner.state();
        BigramsResult {
            bigrams: state.bigrams().clone(),
            count: state.bigrams().len(),
            cohit_kw_term: state.cohit_kw_term().clone(),
            cohit_term_domain: state.cohit_term_domain().clone(),
            cohit_kw_term_count: state.cohit_kw_term().len(),
            cohit_term_domain_count: state.cohit_term_domain().len(),
            staged: st.learner.staged_bigrams(),
        }
    }

    pub fn stats(&self) -> StatsResult {
        let st = self.read_state();
        let state = st.learner.state();
        let core_count = state.core_count();
        StatsResult {
            prompt_count: state.prompt_count(),
            domain_count: state.domain_meta().len(),
            core_count,
            context_count: state.domain_meta().len().saturating_sub(core_count),
            keyword_count: state.keyword_hits().len(),
            term_count: state.term_hits().len(),
            bigram_count: state.bigrams().len(),
            file_hit_count: state.file_hits().len(),
            blocklist_count: state.keyword_blocklist().len(),
            gap_keyword_count: state.gap_keywords().len(),
            index_files: st.engine.index().files.len(),
            index_tokens: st.engine.index().tokens.len(),
        }
    }
}
