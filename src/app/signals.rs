//! Learning signals: what searches and assistant-session events teach the
//! learner.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, info, warn};

use super::{App, EngineState, unix_now};
use crate::engine::SearchObserver;
use crate::enricher::Enricher;
use crate::error::SearchError;
use crate::learner::{AutotuneResult, FileRead, Learner, ObserveData, ObserveEvent};
use crate::session::{SessionEvent, SessionEventKind, SessionSummary, is_guided_read};
use crate::storage::Store;
use crate::tokenizer::tokenize;
use crate::types::{HitKind, SearchOptions, SearchResult};

/// Hits of a result that feed domain and term signals.
const TOP_HITS: usize = 10;

// ─── Signal collector ────────────────────────────────────────────────

/// Accumulates unique keywords, terms and domains plus their co-hit pairs.
#[derive(Debug, Default)]
pub struct SignalCollector {
    data: ObserveData,
    seen_keywords: HashSet<String>,
    seen_terms: HashSet<String>,
    seen_domains: HashSet<String>,
    /// Keywords the atlas does not know.
    gaps: Vec<String>,
}

impl SignalCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a keyword and every (term, domain) the atlas resolves it to.
    pub fn add_keyword(&mut self, keyword: &str, enricher: &Enricher) {
        if keyword.is_empty() || !self.seen_keywords.insert(keyword.to_string()) {
            return;
        }
        self.data.keywords.push(keyword.to_string());

        let matches = enricher.lookup(keyword);
        if matches.is_empty() {
            self.gaps.push(keyword.to_string());
        }
        for m in matches {
            self.data.keyword_terms.push((keyword.to_string(), m.term.clone()));
            self.add_term_domain(&m.term, &m.domain);
        }
    }

    /// Add a domain as carried by a hit, `"@name"` or bare.
    pub fn add_domain(&mut self, domain: &str) {
        let domain = domain.strip_prefix('@').unwrap_or(domain);
        if !domain.is_empty() && self.seen_domains.insert(domain.to_string()) {
            self.data.domains.push(domain.to_string());
        }
    }

    pub fn add_term(&mut self, term: &str) {
        if !term.is_empty() && self.seen_terms.insert(term.to_string()) {
            self.data.terms.push(term.to_string());
        }
    }

    /// Record a (term, domain) pair and track both.
    pub fn add_term_domain(&mut self, term: &str, domain: &str) {
        let domain = domain.strip_prefix('@').unwrap_or(domain);
        self.data.term_domains.push((term.to_string(), domain.to_string()));
        self.add_term(term);
        self.add_domain(domain);
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ObserveData {
        &self.data
    }

    pub fn gaps(&self) -> &[String] {
        &self.gaps
    }

    /// Feed `tokens` as keywords, skipping blocklisted ones.
    pub fn add_keywords<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>, enricher: &Enricher, learner: &Learner) {
        for tok in tokens {
            if !learner.is_blocklisted(tok) {
                self.add_keyword(tok, enricher);
            }
        }
    }

    /// Apply to the learner at `prompt`, tuning when the interval is reached.
    pub fn apply(self, learner: &mut Learner, prompt: u32) -> Option<AutotuneResult> {
        for gap in &self.gaps {
            learner.add_gap_keyword(gap);
        }
        learner.observe_and_maybe_tune(&ObserveEvent {
            prompt_number: prompt,
            observe: self.data,
            file_read: None,
        })
    }
}

// ─── Search observer ─────────────────────────────────────────────────

/// Observer installed on the engine. Holds the state weakly so a dropped app
/// is never kept alive by its own worker thread.
pub(super) fn search_observer(state: Weak<RwLock<EngineState>>, store: Arc<dyn Store>, project_id: String) -> SearchObserver {
    Arc::new(move |query: &str, _opts: &SearchOptions, result: &SearchResult, elapsed| {
        let Some(state) = state.upgrade() else {
            return;
        };
        debug!(query, hits = result.hits.len(), elapsed_us = elapsed.as_micros() as u64, "Observing search");
        let mut st = state.write().unwrap_or_else(|e| e.into_inner());
        let st = &mut *st;
        if observe_search(&mut st.learner, st.engine.enricher(), query, result).is_some() {
            save_learner(store.as_ref(), &project_id, &st.learner);
        }
    })
}

/// One search is one prompt. Query tokens become keywords; the top hits
/// contribute their domains, tags and content lines.
pub(super) fn observe_search(learner: &mut Learner, enricher: &Enricher, query: &str, result: &SearchResult) -> Option<AutotuneResult> {
    let prompt = learner.next_prompt();
    let tokens = tokenize(query);
    if tokens.is_empty() {
        learner.set_prompt_count(prompt);
        return None;
    }

    let mut sc = SignalCollector::new();
    sc.add_keywords(tokens.iter().map(String::as_str), enricher, learner);

    for hit in result.hits.iter().take(TOP_HITS) {
        sc.add_domain(&hit.domain);
        let domain = hit.domain.strip_prefix('@').unwrap_or(&hit.domain);
        for tag in &hit.tags {
            sc.add_term(tag);
            if !domain.is_empty() {
                sc.add_term_domain(tag, domain);
            }
        }
        if hit.kind == HitKind::Content && !hit.content.is_empty() {
            learner.process_bigrams(&hit.content);
        }
    }

    let tuned = sc.apply(learner, prompt);
    if let Some(r) = &tuned {
        log_autotune(prompt, r);
    }
    tuned
}

fn log_autotune(prompt: u32, r: &AutotuneResult) {
    info!(
        prompt,
        promoted = r.promoted,
        demoted = r.demoted,
        decayed = r.decayed,
        pruned = r.pruned,
        "Autotune complete"
    );
}

fn save_learner(store: &dyn Store, project_id: &str, learner: &Learner) {
    if let Err(e) = store.save_learner_state(project_id, learner.state()) {
        warn!(error = %e, "Failed to save learner state");
    }
}

// ─── Session events ──────────────────────────────────────────────────

impl App {
    /// Apply one assistant-session event.
    pub fn on_session_event(&self, event: &SessionEvent) {
        let mut st = self.write_state();
        let st = &mut *st;

        if st.session.is_boundary(&event.session_id) {
            if let Some(prev) = st.session.summary(unix_now()) {
                if let Err(e) = self.store.save_session_summary(&self.project_id, &prev) {
                    warn!(session = %prev.session_id, error = %e, "Failed to save session summary");
                }
            }
            let restored = match self.store.load_session_summary(&self.project_id, &event.session_id) {
                Ok(s) => s,
                Err(e) => {
                    warn!(session = %event.session_id, error = %e, "Session summary unreadable");
                    None
                }
            };
            info!(session = %event.session_id, restored = restored.is_some(), "Session started");
            st.session.begin(&event.session_id, event.timestamp, restored);
        }

        match &event.kind {
            SessionEventKind::UserInput { text } => {
                let prompt = st.learner.next_prompt();
                st.learner.set_prompt_count(prompt);
                st.session.record_prompt();
                st.learner.process_bigrams(text);
            }
            SessionEventKind::AiThinking { text } => st.learner.process_bigrams(text),
            SessionEventKind::AiResponse { text, usage } => {
                st.learner.process_bigrams(text);
                if let Some(usage) = usage {
                    st.session.record_usage(usage);
                }
            }
            SessionEventKind::ToolInvocation { tool, file } => {
                if let Some(file) = file.as_ref().filter(|f| f.is_focused_read()) {
                    let rel = self.session_path(&file.path);
                    let prompt = st.learner.prompt_count();
                    st.learner.observe(&ObserveEvent {
                        prompt_number: prompt,
                        observe: ObserveData::default(),
                        file_read: Some(FileRead {
                            file: rel.clone(),
                            offset: file.offset,
                            limit: file.limit,
                        }),
                    });
                    let size = st
                        .engine
                        .index()
                        .file_id_for_path(&rel)
                        .and_then(|id| st.engine.index().files.get(&id))
                        .map_or(0, |fm| fm.size);
                    st.session.record_read(is_guided_read(size, file.limit));
                }
                if tool.name == "Grep" && !tool.pattern.is_empty() {
                    let tokens = tokenize(&tool.pattern);
                    if !tokens.is_empty() {
                        let mut sc = SignalCollector::new();
                        sc.add_keywords(tokens.iter().map(String::as_str), st.engine.enricher(), &st.learner);
                        let prompt = st.learner.prompt_count();
                        if let Some(r) = sc.apply(&mut st.learner, prompt) {
                            log_autotune(prompt, &r);
                            save_learner(self.store.as_ref(), &self.project_id, &st.learner);
                        }
                    }
                    st.learner.process_bigrams(&tool.pattern);
                }
            }
            SessionEventKind::ToolResult { .. } | SessionEventKind::SystemMeta { .. } => {}
        }
    }

    /// Session tools report absolute paths; the learner keys files by their
    /// project-relative path.
    fn session_path(&self, path: &str) -> String {
        let p = Path::new(path);
        if p.is_absolute() {
            if let Ok(rel) = p.strip_prefix(&self.config.root) {
                return rel.to_string_lossy().replace('\\', "/");
            }
        }
        path.to_string()
    }

    /// Persisted session summaries plus the live one, by start time.
    pub fn sessions(&self) -> Result<Vec<SessionSummary>, SearchError> {
        let mut all = self.store.list_session_summaries(&self.project_id)?;
        if let Some(live) = self.read_state().session.summary(unix_now()) {
            all.retain(|s| s.session_id != live.session_id);
            all.push(live);
            all.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.session_id.cmp(&b.session_id)));
        }
        Ok(all)
    }
}
