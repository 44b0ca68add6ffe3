use super::*;

fn ev(prompt: u32, data: ObserveData) -> ObserveEvent {
    ObserveEvent {
        prompt_number: prompt,
        observe: data,
        file_read: None,
    }
}

fn pair(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn domain(hits: f64, tier: Tier, source: DomainSource, state: DomainState) -> DomainMeta {
    DomainMeta {
        hits,
        tier,
        source,
        state,
        hits_last_cycle: hits,
        ..Default::default()
    }
}

// ─── observe ─────────────────────────────────────────────────────────

#[test]
fn test_observe_counts_keyword_twice_through_cohit() {
    let mut l = Learner::new();
    l.observe(&ev(
        1,
        ObserveData {
            keywords: strings(&["a"]),
            keyword_terms: vec![pair("a", "T")],
            ..Default::default()
        },
    ));
    let s = l.state();
    assert_eq!(s.keyword_hits()["a"], 2);
    assert_eq!(s.term_hits()["T"], 1);
    assert_eq!(s.cohit_kw_term()["a:T"], 1);
}

#[test]
fn test_observe_all_signal_types() {
    let mut l = Learner::new();
    l.state_mut()
        .domain_meta
        .insert("auth".to_string(), domain(0.0, Tier::Core, DomainSource::Seeded, DomainState::Active));

    l.observe(&ObserveEvent {
        prompt_number: 7,
        observe: ObserveData {
            keywords: strings(&["login"]),
            terms: strings(&["session"]),
            domains: strings(&["auth"]),
            keyword_terms: vec![pair("login", "session")],
            term_domains: vec![pair("session", "auth")],
        },
        file_read: Some(FileRead {
            file: "handler.py".to_string(),
            offset: 1,
            limit: 30,
        }),
    });

    let s = l.state();
    assert_eq!(s.keyword_hits()["login"], 2);
    assert_eq!(s.term_hits()["session"], 2);
    assert_eq!(s.cohit_term_domain()["session:auth"], 1);
    assert_eq!(s.file_hits()["handler.py"], 1);
    assert_eq!(s.prompt_count(), 7);

    let auth = &s.domain_meta()["auth"];
    assert_eq!(auth.hits, 1.0);
    assert_eq!(auth.total_hits, 1);
    assert_eq!(auth.last_hit_at, 7);
    assert_eq!(auth.source, DomainSource::Seeded, "existing domain keeps its source");
}

#[test]
fn test_observe_creates_learned_domain() {
    let mut l = Learner::new();
    l.observe(&ev(
        12,
        ObserveData {
            domains: strings(&["caching"]),
            ..Default::default()
        },
    ));
    let dm = &l.state().domain_meta()["caching"];
    assert_eq!(dm.tier, Tier::Context);
    assert_eq!(dm.source, DomainSource::Learned);
    assert_eq!(dm.state, DomainState::Active);
    assert_eq!(dm.created_at, LEARNED_CREATED_AT_BASE + 12);
}

#[test]
fn test_observe_ignores_empty_strings() {
    let mut l = Learner::new();
    l.observe(&ObserveEvent {
        prompt_number: 1,
        observe: ObserveData {
            keywords: strings(&["", "ok"]),
            terms: strings(&[""]),
            domains: strings(&[""]),
            keyword_terms: vec![pair("", "t"), pair("k", "")],
            term_domains: vec![pair("", "")],
        },
        file_read: Some(FileRead::default()),
    });
    let s = l.state();
    assert_eq!(s.keyword_hits().len(), 1);
    assert!(s.term_hits().is_empty());
    assert!(s.domain_meta().is_empty());
    assert!(s.cohit_kw_term().is_empty());
    assert!(s.cohit_term_domain().is_empty());
    assert!(s.file_hits().is_empty());
}

#[test]
fn test_observe_and_maybe_tune_on_interval() {
    let mut l = Learner::new();
    for p in 1..AUTOTUNE_INTERVAL {
        assert!(l.observe_and_maybe_tune(&ev(p, ObserveData::default())).is_none());
    }
    assert!(l.observe_and_maybe_tune(&ev(AUTOTUNE_INTERVAL, ObserveData::default())).is_some());
    assert!(l.observe_and_maybe_tune(&ev(0, ObserveData::default())).is_none());
}

#[test]
fn test_tune_runs_on_every_event_at_interval_prompt() {
    let mut l = Learner::new();
    assert!(l.observe_and_maybe_tune(&ev(50, ObserveData::default())).is_some());
    assert!(l.observe_and_maybe_tune(&ev(50, ObserveData::default())).is_some());
    assert!(l.observe_and_maybe_tune(&ev(51, ObserveData::default())).is_none());
    assert!(l.observe_and_maybe_tune(&ev(100, ObserveData::default())).is_some());

    // same outcome after a restart from persisted state
    let mut restored = Learner::from_state(l.state().clone());
    assert!(restored.observe_and_maybe_tune(&ev(100, ObserveData::default())).is_some());
}

// ─── autotune ────────────────────────────────────────────────────────

#[test]
fn test_autotune_stale_to_deprecated_and_decay() {
    let mut l = Learner::new();
    {
        let s = l.state_mut();
        s.domain_meta.insert("A".to_string(), domain(10.0, Tier::Core, DomainSource::Seeded, DomainState::Active));
        s.domain_meta.insert(
            "B".to_string(),
            DomainMeta {
                hits: 0.0,
                hits_last_cycle: 0.0,
                stale_cycles: 1,
                state: DomainState::Stale,
                tier: Tier::Context,
                source: DomainSource::Seeded,
                ..Default::default()
            },
        );
    }
    l.run_autotune();

    let s = l.state();
    let b = &s.domain_meta()["B"];
    assert_eq!(b.stale_cycles, 2);
    assert_eq!(b.state, DomainState::Deprecated);
    let a = &s.domain_meta()["A"];
    assert!((a.hits - 9.0).abs() < 1e-9);
    assert_eq!(a.hits_last_cycle, 10.0);
}

#[test]
fn test_autotune_reactivates_hit_domain() {
    let mut l = Learner::new();
    l.state_mut().domain_meta.insert(
        "x".to_string(),
        DomainMeta {
            hits: 3.0,
            hits_last_cycle: 2.0,
            stale_cycles: 1,
            state: DomainState::Stale,
            ..Default::default()
        },
    );
    l.run_autotune();
    let x = &l.state().domain_meta()["x"];
    assert_eq!(x.state, DomainState::Active);
    assert_eq!(x.stale_cycles, 0);
}

#[test]
fn test_decay_is_real_for_domains_and_truncating_for_counters() {
    let mut l = Learner::new();
    {
        let s = l.state_mut();
        s.domain_meta.insert("d".to_string(), domain(1.0, Tier::Core, DomainSource::Seeded, DomainState::Active));
        s.keyword_hits.insert("seven".to_string(), 7);
        s.keyword_hits.insert("one".to_string(), 1);
        s.bigrams.insert("a:b".to_string(), 1);
        s.file_hits.insert("f.go".to_string(), 10);
    }
    l.run_autotune();
    let s = l.state();
    assert!((s.domain_meta()["d"].hits - 0.9).abs() < 1e-9);
    assert_eq!(s.keyword_hits().get("seven"), Some(&6));
    assert!(!s.keyword_hits().contains_key("one"));
    assert!(s.bigrams().is_empty());
    assert_eq!(s.file_hits()["f.go"], 9);
}

#[test]
fn test_autotune_promotes_top_24_of_30() {
    let mut l = Learner::new();
    for i in 1..=30 {
        l.state_mut().domain_meta.insert(
            format!("d{:02}", i),
            domain(i as f64, Tier::Context, DomainSource::Learned, DomainState::Active),
        );
    }
    let r = l.run_autotune();
    assert_eq!(r.promoted, 24);
    assert_eq!(r.decayed, 30);

    let s = l.state();
    for i in 7..=30 {
        assert_eq!(s.domain_meta()[&format!("d{:02}", i)].tier, Tier::Core, "d{:02}", i);
    }
    for i in 1..=6 {
        let name = format!("d{:02}", i);
        match s.domain_meta().get(&name) {
            Some(dm) => {
                assert_eq!(dm.tier, Tier::Context);
                assert!(dm.hits >= PRUNE_FLOOR);
            }
            None => panic!("{} should survive with hits {}", name, i as f64 * DECAY_RATE),
        }
    }
}

#[test]
fn test_autotune_demotes_and_prunes_low_ranks() {
    let mut l = Learner::new();
    for i in 0..26 {
        let hits = if i < 25 { 10.0 + i as f64 } else { 0.2 };
        l.state_mut().domain_meta.insert(
            format!("d{:02}", i),
            domain(hits, Tier::Core, DomainSource::Learned, DomainState::Active),
        );
    }
    let r = l.run_autotune();
    // d00 ranks 24 with 9.0 hits: demoted; d25 ranks 25 with 0.18: pruned
    assert_eq!(r.demoted, 1);
    assert_eq!(r.pruned, 1);
    assert_eq!(l.state().domain_meta()["d00"].tier, Tier::Context);
    assert!(!l.state().domain_meta().contains_key("d25"));
}

#[test]
fn test_deprecated_seeded_displaced_by_learned() {
    let mut l = Learner::new();
    {
        let s = l.state_mut();
        for i in 0..LEARNED_DISPLACEMENT_MIN {
            s.domain_meta.insert(
                format!("learned{:02}", i),
                domain(5.0, Tier::Context, DomainSource::Learned, DomainState::Active),
            );
        }
        s.domain_meta.insert(
            "old".to_string(),
            DomainMeta {
                source: DomainSource::Seeded,
                state: DomainState::Deprecated,
                hits: 0.0,
                ..Default::default()
            },
        );
    }
    l.run_autotune();
    assert!(!l.state().domain_meta().contains_key("old"));
}

#[test]
fn test_noisy_keywords_blocklisted() {
    let mut l = Learner::new();
    l.state_mut().keyword_hits.insert("the".to_string(), NOISE_THRESHOLD + 1);
    l.state_mut().keyword_hits.insert("auth".to_string(), NOISE_THRESHOLD);
    l.run_autotune();
    let s = l.state();
    assert!(s.keyword_blocklist().contains("the"));
    assert!(!s.keyword_hits().contains_key("the"));
    assert_eq!(s.keyword_hits()["auth"], 900);
    assert!(l.is_blocklisted("the"));
}

#[test]
fn test_autotune_dedups_cohits_before_decay() {
    let mut l = Learner::new();
    l.state_mut().cohit_kw_term.insert("login:auth".to_string(), 90);
    l.state_mut().cohit_kw_term.insert("login:session".to_string(), 20);
    l.run_autotune();
    let m = l.state().cohit_kw_term();
    assert_eq!(m.get("login:auth"), Some(&81));
    assert!(!m.contains_key("login:session"));
}

#[test]
fn test_autotune_is_deterministic() {
    let build = || {
        let mut l = Learner::new();
        for p in 1..=120u32 {
            let kw = format!("kw{}", p % 7);
            let term = format!("term{}", p % 5);
            let dom = format!("dom{}", p % 31);
            l.observe(&ev(
                p,
                ObserveData {
                    keywords: vec![kw.clone()],
                    terms: vec![term.clone()],
                    domains: vec![dom.clone()],
                    keyword_terms: vec![(kw, term.clone())],
                    term_domains: vec![(term, dom)],
                },
            ));
            l.process_bigrams("token refresh handler token refresh");
            if p % 40 == 0 {
                l.run_autotune();
            }
        }
        serde_json::to_vec(l.state()).unwrap()
    };
    assert_eq!(build(), build());
}

// ─── state ───────────────────────────────────────────────────────────

#[test]
fn test_state_json_roundtrip_and_normalize() {
    let mut l = Learner::new();
    l.observe(&ev(
        3,
        ObserveData {
            keywords: strings(&["login"]),
            domains: strings(&["auth"]),
            ..Default::default()
        },
    ));
    let json = serde_json::to_string(l.state()).unwrap();
    assert!(json.contains(r#""tier":"context""#));
    assert!(json.contains(r#""source":"learned""#));

    let mut restored: LearnerState = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, l.state());

    restored.keyword_hits.insert(String::new(), 4);
    restored.keyword_hits.insert("zero".to_string(), 0);
    let l2 = Learner::from_state(restored);
    assert_eq!(l2.state().keyword_hits().len(), 1);
}

#[test]
fn test_missing_fields_default() {
    let s: LearnerState = serde_json::from_str(r#"{"prompt_count": 9}"#).unwrap();
    assert_eq!(s.prompt_count(), 9);
    assert!(s.domain_meta().is_empty());
}
