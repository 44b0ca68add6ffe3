//! Domain learning: hit counters fed by observe signals, bigram staging,
//! and the periodic autotune that decays, ranks and curates domains.
//!
//! Counters are integers that decay by truncation; domain `hits` is a real
//! number and decays without truncation. Every map is ordered so that
//! serialized state is byte-identical for identical histories.

mod autotune;
mod bigrams;
mod dedup;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

pub use autotune::AutotuneResult;
pub use bigrams::{BIGRAM_THRESHOLD, extract_bigrams};

// ─── Constants ───────────────────────────────────────────────────────

pub const DECAY_RATE: f64 = 0.90;
/// Autotune runs when the prompt count is a positive multiple of this.
pub const AUTOTUNE_INTERVAL: u32 = 50;
/// Context domains below this many hits are pruned.
pub const PRUNE_FLOOR: f64 = 0.3;
/// Minimum total co-hits before an entity is deduplicated.
pub const DEDUP_MIN_TOTAL: u32 = 100;
pub const CORE_DOMAINS_MAX: usize = 24;
/// Keywords hit more often than this are blocklisted as noise.
pub const NOISE_THRESHOLD: u32 = 1000;
/// Learned domains needed before deprecated seeded domains are dropped.
pub const LEARNED_DISPLACEMENT_MIN: usize = 32;
/// Base timestamp for domains created by observation.
pub const LEARNED_CREATED_AT_BASE: i64 = 1_739_500_000;

// ─── Domain metadata ─────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Core,
    #[default]
    Context,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DomainSource {
    Seeded,
    #[default]
    Learned,
    Skeleton,
    Intent,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    #[default]
    Active,
    Stale,
    Deprecated,
}

/// Per-domain lifecycle and hit tracking.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct DomainMeta {
    /// Decayed hit count, never truncated.
    pub hits: f64,
    /// Lifetime hits, never decayed.
    pub total_hits: u32,
    pub tier: Tier,
    pub source: DomainSource,
    pub state: DomainState,
    /// Consecutive autotune cycles without hits.
    pub stale_cycles: u32,
    /// `hits` as of the previous autotune.
    pub hits_last_cycle: f64,
    /// Prompt number of the latest hit.
    pub last_hit_at: u32,
    pub created_at: i64,
}

impl DomainMeta {
    fn learned(prompt: u32) -> Self {
        Self {
            tier: Tier::Context,
            source: DomainSource::Learned,
            state: DomainState::Active,
            created_at: LEARNED_CREATED_AT_BASE + prompt as i64,
            ..Default::default()
        }
    }
}

// ─── Learner state ───────────────────────────────────────────────────

/// Everything the learner persists. Only [`Learner`] mutates it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct LearnerState {
    pub(crate) keyword_hits: BTreeMap<String, u32>,
    pub(crate) term_hits: BTreeMap<String, u32>,
    pub(crate) domain_meta: BTreeMap<String, DomainMeta>,
    /// `"keyword:term"`
    pub(crate) cohit_kw_term: BTreeMap<String, u32>,
    /// `"term:domain"`
    pub(crate) cohit_term_domain: BTreeMap<String, u32>,
    /// `"word1:word2"`
    pub(crate) bigrams: BTreeMap<String, u32>,
    /// repo-relative path
    pub(crate) file_hits: BTreeMap<String, u32>,
    pub(crate) keyword_blocklist: BTreeSet<String>,
    pub(crate) gap_keywords: BTreeSet<String>,
    pub(crate) prompt_count: u32,
}

impl LearnerState {
    pub fn keyword_hits(&self) -> &BTreeMap<String, u32> {
        &self.keyword_hits
    }

    pub fn term_hits(&self) -> &BTreeMap<String, u32> {
        &self.term_hits
    }

    pub fn domain_meta(&self) -> &BTreeMap<String, DomainMeta> {
        &self.domain_meta
    }

    pub fn cohit_kw_term(&self) -> &BTreeMap<String, u32> {
        &self.cohit_kw_term
    }

    pub fn cohit_term_domain(&self) -> &BTreeMap<String, u32> {
        &self.cohit_term_domain
    }

    pub fn bigrams(&self) -> &BTreeMap<String, u32> {
        &self.bigrams
    }

    pub fn file_hits(&self) -> &BTreeMap<String, u32> {
        &self.file_hits
    }

    pub fn keyword_blocklist(&self) -> &BTreeSet<String> {
        &self.keyword_blocklist
    }

    pub fn gap_keywords(&self) -> &BTreeSet<String> {
        &self.gap_keywords
    }

    pub fn prompt_count(&self) -> u32 {
        self.prompt_count
    }

    pub fn core_count(&self) -> usize {
        self.domain_meta.values().filter(|d| d.tier == Tier::Core).count()
    }

    /// Drop entries that can only appear in hand-edited or older state:
    /// empty keys and zero counters.
    fn normalize(&mut self) {
        for map in [
            &mut self.keyword_hits,
            &mut self.term_hits,
            &mut self.cohit_kw_term,
            &mut self.cohit_term_domain,
            &mut self.bigrams,
            &mut self.file_hits,
        ] {
            map.retain(|k, v| !k.is_empty() && *v > 0);
        }
        self.domain_meta.retain(|k, _| !k.is_empty());
        self.keyword_blocklist.retain(|k| !k.is_empty());
        self.gap_keywords.retain(|k| !k.is_empty());
    }
}

// ─── Observe events ──────────────────────────────────────────────────

/// Signals extracted from one prompt, search or tool call.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ObserveData {
    pub keywords: Vec<String>,
    pub terms: Vec<String>,
    pub domains: Vec<String>,
    /// (keyword, term)
    pub keyword_terms: Vec<(String, String)>,
    /// (term, domain)
    pub term_domains: Vec<(String, String)>,
}

impl ObserveData {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.terms.is_empty()
            && self.domains.is_empty()
            && self.keyword_terms.is_empty()
            && self.term_domains.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRead {
    pub file: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub limit: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ObserveEvent {
    pub prompt_number: u32,
    pub observe: ObserveData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_read: Option<FileRead>,
}

// ─── Learner ─────────────────────────────────────────────────────────

/// Owner of [`LearnerState`] plus the non-persisted bigram staging counts.
/// Not synchronized; callers serialize access.
#[derive(Debug, Clone, Default)]
pub struct Learner {
    state: LearnerState,
    staging: HashMap<String, u32>,
}

impl Learner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(mut state: LearnerState) -> Self {
        state.normalize();
        Self {
            state,
            staging: HashMap::new(),
        }
    }

    pub fn state(&self) -> &LearnerState {
        &self.state
    }

    pub fn prompt_count(&self) -> u32 {
        self.state.prompt_count
    }

    /// Current prompt plus one, for callers that count a new prompt.
    pub fn next_prompt(&self) -> u32 {
        self.state.prompt_count.saturating_add(1)
    }

    /// Forget everything, including staged bigrams.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Apply one event, in order: keywords, terms, domains, keyword/term
    /// co-hits (which count the keyword and term again), term/domain
    /// co-hits, file read, prompt count. Empty strings are ignored.
    pub fn observe(&mut self, event: &ObserveEvent) {
        let obs = &event.observe;
        let prompt = event.prompt_number;
        let s = &mut self.state;

        for kw in obs.keywords.iter().filter(|k| !k.is_empty()) {
            bump(&mut s.keyword_hits, kw);
        }
        for term in obs.terms.iter().filter(|t| !t.is_empty()) {
            bump(&mut s.term_hits, term);
        }
        for domain in obs.domains.iter().filter(|d| !d.is_empty()) {
            let dm = s
                .domain_meta
                .entry(domain.clone())
                .or_insert_with(|| DomainMeta::learned(prompt));
            dm.hits += 1.0;
            dm.total_hits = dm.total_hits.saturating_add(1);
            dm.last_hit_at = prompt;
        }
        for (kw, term) in &obs.keyword_terms {
            if kw.is_empty() || term.is_empty() {
                continue;
            }
            bump(&mut s.cohit_kw_term, &format!("{}:{}", kw, term));
            bump(&mut s.keyword_hits, kw);
            bump(&mut s.term_hits, term);
        }
        for (term, domain) in &obs.term_domains {
            if term.is_empty() || domain.is_empty() {
                continue;
            }
            bump(&mut s.cohit_term_domain, &format!("{}:{}", term, domain));
        }
        if let Some(read) = event.file_read.as_ref().filter(|r| !r.file.is_empty()) {
            bump(&mut s.file_hits, &read.file);
        }
        s.prompt_count = prompt;
    }

    /// Observe, then autotune whenever the prompt count lands on the
    /// interval, including repeated events at the same prompt. Returns the autotune summary when it ran; callers persist state then.
    pub fn observe_and_maybe_tune(&mut self, event: &ObserveEvent) -> Option<AutotuneResult> {
        self.observe(event);
        let prompt = self.state.prompt_count;
        if prompt > 0 && prompt % AUTOTUNE_INTERVAL == 0 {
            Some(self.run_autotune())
        } else {
            None
        }
    }

    /// Record a prompt without other signals.
    pub fn set_prompt_count(&mut self, prompt: u32) {
        self.state.prompt_count = prompt;
    }

    /// Mark a keyword that had no atlas resolution.
    pub fn add_gap_keyword(&mut self, keyword: &str) {
        if !keyword.is_empty() {
            self.state.gap_keywords.insert(keyword.to_string());
        }
    }

    pub fn is_blocklisted(&self, keyword: &str) -> bool {
        self.state.keyword_blocklist.contains(keyword)
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut LearnerState {
        &mut self.state
    }
}

fn bump(map: &mut BTreeMap<String, u32>, key: &str) {
    let v = map.entry(key.to_string()).or_insert(0);
    *v = v.saturating_add(1);
}

/// `trunc(count * 0.90)`; entries reaching zero are removed.
pub(crate) fn decay_counters(map: &mut BTreeMap<String, u32>) {
    map.retain(|_, count| {
        *count = (*count as f64 * DECAY_RATE).trunc() as u32;
        *count > 0
    });
}

#[cfg(test)]
#[path = "learner_tests.rs"]
mod tests;
