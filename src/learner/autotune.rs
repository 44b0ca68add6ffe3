//! The 21-step autotune. Runs on a copy of the state and swaps it in at the
//! end, so a tune either fully applies or not at all.
//!
//! Steps 1, 5 and 12-14 need information the learner does not own and are
//! no-ops.

use serde::Serialize;
use tracing::info;

use super::dedup::run_dedup;
use super::{
    CORE_DOMAINS_MAX, DECAY_RATE, DomainSource, DomainState, LEARNED_DISPLACEMENT_MIN, Learner,
    NOISE_THRESHOLD, PRUNE_FLOOR, Tier, decay_counters,
};

/// What one autotune changed.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutotuneResult {
    /// context → core
    pub promoted: usize,
    /// core → context
    pub demoted: usize,
    /// domains whose hits decayed
    pub decayed: usize,
    /// domains removed
    pub pruned: usize,
}

impl Learner {
    pub fn run_autotune(&mut self) -> AutotuneResult {
        let mut result = AutotuneResult::default();
        let mut s = self.state.clone();

        // ─── Domain lifecycle ───

        // 2: no hits last cycle → stale
        for dm in s.domain_meta.values_mut() {
            if dm.hits_last_cycle == 0.0 && matches!(dm.state, DomainState::Active | DomainState::Stale) {
                dm.state = DomainState::Stale;
                dm.stale_cycles = dm.stale_cycles.saturating_add(1);
            }
        }
        // 3: stale twice → deprecated
        for dm in s.domain_meta.values_mut() {
            if dm.state == DomainState::Stale && dm.stale_cycles >= 2 {
                dm.state = DomainState::Deprecated;
            }
        }
        // 4: hit again → active
        for dm in s.domain_meta.values_mut() {
            if dm.hits_last_cycle > 0.0 && dm.state != DomainState::Active {
                dm.state = DomainState::Active;
                dm.stale_cycles = 0;
            }
        }
        // 6: enough learned domains displace deprecated seeded ones
        let learned = s.domain_meta.values().filter(|d| d.source == DomainSource::Learned).count();
        if learned >= LEARNED_DISPLACEMENT_MIN {
            s.domain_meta
                .retain(|_, d| !(d.state == DomainState::Deprecated && d.source == DomainSource::Seeded));
        }
        // 7: snapshot
        for dm in s.domain_meta.values_mut() {
            dm.hits_last_cycle = dm.hits;
        }

        // ─── Two-tier curation ───

        // 8: real-valued decay
        for dm in s.domain_meta.values_mut() {
            dm.hits *= DECAY_RATE;
            result.decayed += 1;
        }
        // 9
        run_dedup(&mut s.cohit_kw_term);
        run_dedup(&mut s.cohit_term_domain);

        // 10: rank
        let mut ranked: Vec<(String, f64)> = s
            .domain_meta
            .iter()
            .filter(|(_, d)| d.state != DomainState::Deprecated)
            .map(|(name, d)| (name.clone(), d.hits))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        // 11: top ranks are core; the rest are context or pruned
        for (rank, (name, hits)) in ranked.into_iter().enumerate() {
            if rank >= CORE_DOMAINS_MAX && hits < PRUNE_FLOOR {
                s.domain_meta.remove(&name);
                result.pruned += 1;
                continue;
            }
            let Some(dm) = s.domain_meta.get_mut(&name) else {
                continue;
            };
            if rank < CORE_DOMAINS_MAX {
                if dm.tier == Tier::Context {
                    dm.tier = Tier::Core;
                    result.promoted += 1;
                }
            } else if dm.tier == Tier::Core {
                dm.tier = Tier::Context;
                result.demoted += 1;
            }
        }

        // ─── Hit count maintenance (15-18) ───
        decay_counters(&mut s.bigrams);
        decay_counters(&mut s.file_hits);
        decay_counters(&mut s.cohit_kw_term);
        decay_counters(&mut s.cohit_term_domain);

        // ─── Keyword and term freshness ───

        // 19: noise → blocklist
        let noisy: Vec<String> = s
            .keyword_hits
            .iter()
            .filter(|(_, c)| **c > NOISE_THRESHOLD)
            .map(|(k, _)| k.clone())
            .collect();
        for kw in noisy {
            s.keyword_hits.remove(&kw);
            s.keyword_blocklist.insert(kw);
        }
        // 20, 21
        decay_counters(&mut s.keyword_hits);
        decay_counters(&mut s.term_hits);

        self.state = s;
        info!(
            prompt = self.state.prompt_count,
            promoted = result.promoted,
            demoted = result.demoted,
            decayed = result.decayed,
            pruned = result.pruned,
            "Autotune complete"
        );
        result
    }
}
