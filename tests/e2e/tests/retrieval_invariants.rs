//! Universal invariants across the retrieval pipeline, plus the reranker
//! circuit-breaker scenario.

use engram_e2e_tests::{at_similarity, input, seed, store_with_map};
use engram_core::{
    apply_scoring, levenshtein, retrievability, CrossEncoderReranker, GateOptions,
    RerankCandidate, RerankOptions, ScoreOptions, ScoringCandidate, UnifiedSearchOptions,
    COMPOSITE_WEIGHTS, MAX_STABILITY, MIN_STABILITY,
};

#[test]
fn fsrs_state_stays_in_bounds_under_any_operation_sequence() {
    // Clamps hold across writes, accesses, and corrections.
    let (store, _dir, _path) = store_with_map(true, &[]);
    let a = seed(&store, "a", "bounds check memory going through many operations");
    let b = seed(&store, "b", "bounds check replacement for the correction steps");

    for _ in 0..50 {
        store.strengthen_on_access(a.id).unwrap();
    }
    let strengthened = store.get_memory(a.id).unwrap().unwrap();
    assert!(strengthened.stability <= MAX_STABILITY);
    assert!(strengthened.review_count == 50);

    let record_id = store
        .supersede(a.id, b.id, "halve it")
        .unwrap()
        .record()
        .unwrap()
        .id;
    store.undo_correction(record_id).unwrap();

    // Repeated deprecations drive stability to the floor, never below it.
    for _ in 0..12 {
        store.deprecate(a.id, "again").unwrap();
    }
    let m = store.get_memory(a.id).unwrap().unwrap();
    assert_eq!(m.stability, MIN_STABILITY);
    assert!((1.0..=10.0).contains(&m.difficulty));
}

#[test]
fn retrievability_properties() {
    for s in [0.1, 1.0, 10.0, 365.0] {
        assert_eq!(retrievability(s, 0.0), 1.0);
        let mut prev = 1.0;
        for t in 1..=100 {
            let r = retrievability(s, t as f64);
            assert!(r <= prev);
            assert!(r > 0.0);
            prev = r;
        }
    }
    for t in [1.0, 10.0, 100.0] {
        assert!(retrievability(50.0, t) > retrievability(2.0, t));
    }
}

#[test]
fn composite_scores_stay_in_unit_interval() {
    assert!((COMPOSITE_WEIGHTS.iter().sum::<f64>() - 1.0).abs() < 1e-12);

    let (store, _dir, _path) = store_with_map(false, &[]);
    let mut candidates = Vec::new();
    for i in 0..10 {
        let mut m = seed(
            &store,
            &format!("a{i}"),
            &format!("scored memory number {i} with retrieval content"),
        );
        if i % 2 == 0 {
            m = store.strengthen_on_access(m.id).unwrap();
        }
        candidates.push(ScoringCandidate {
            memory: m,
            similarity_pct: (i as f64) * 11.0,
        });
    }

    let scored = apply_scoring(candidates, &ScoreOptions::new("retrieval content"));
    for s in &scored {
        assert!((0.0..=1.0).contains(&s.composite_score));
        for f in [
            s.breakdown.temporal,
            s.breakdown.usage,
            s.breakdown.importance,
            s.breakdown.pattern,
            s.breakdown.citation,
        ] {
            assert!((0.0..=1.0).contains(&f));
        }
    }
}

#[test]
fn levenshtein_properties() {
    let words = ["", "a", "engram", "engine", "memory"];
    for a in words {
        for b in words {
            assert_eq!(levenshtein(a, b, None), levenshtein(b, a, None));
        }
        assert_eq!(levenshtein(a, a, None), 0);
        assert_eq!(levenshtein("", a, None), a.len());
    }
}

#[test]
fn reinforce_strictly_strengthens_and_counts_once() {
    let existing = "Cache invalidation happens on every write to the index.";
    let duplicate = "Cache invalidation happens on every write to the index!";
    let (store, _dir, _path) = store_with_map(
        false,
        &[
            (existing, at_similarity(1.0)),
            (duplicate, at_similarity(0.96)),
        ],
    );

    let a = seed(&store, "a", existing);
    let before = store.get_memory(a.id).unwrap().unwrap();

    store
        .gated_write(&input("b", duplicate), &GateOptions::default())
        .unwrap();

    let after = store.get_memory(a.id).unwrap().unwrap();
    assert!(after.stability > before.stability);
    assert_eq!(after.review_count, before.review_count + 1);
}

#[test]
fn fts_search_tolerates_any_string() {
    let (store, _dir, _path) = store_with_map(false, &[]);
    seed(&store, "a", "ordinary searchable content for hostile query checks");

    for hostile in [
        "test*:query() AND OR NOT",
        "\"\"\"",
        "((((",
        "NOT NOT NOT",
        "*:*:*",
        "'; DROP TABLE memories; --",
    ] {
        // Must not error, whatever comes back.
        store.fts_search(hostile, 10, None).unwrap();
        store
            .unified_search(hostile, &UnifiedSearchOptions::default())
            .unwrap();
    }
}

#[test]
fn unified_search_is_deterministic() {
    let (store, _dir, _path) = store_with_map(false, &[]);
    for i in 0..8 {
        seed(
            &store,
            &format!("a{i}"),
            &format!("deterministic retrieval content item number {i}"),
        );
    }

    let first = store
        .unified_search("deterministic retrieval", &UnifiedSearchOptions::default())
        .unwrap();
    let second = store
        .unified_search("deterministic retrieval", &UnifiedSearchOptions::default())
        .unwrap();
    let ids = |hits: &[engram_core::RetrievalHit]| {
        hits.iter().map(|h| h.memory.id).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn slow_provider_trips_session_circuit_breaker() {
    // 600ms per call pushes the session P95 over the 500ms threshold.
    let reranker = CrossEncoderReranker::simulated(600.0);
    let candidates: Vec<RerankCandidate> = (0..5)
        .map(|id| RerankCandidate {
            id,
            content: format!("candidate document {id} with plenty of content to rank"),
        })
        .collect();

    for i in 0..30 {
        reranker
            .rerank(&format!("query {i}"), &candidates, &RerankOptions::default())
            .await;
    }

    let outcome = reranker
        .rerank("query after trip", &candidates, &RerankOptions::default())
        .await;
    assert!(!outcome.metadata.reranking_applied);
    assert!(outcome.metadata.session_disabled);
    let reason = outcome.metadata.disable_reason.unwrap();
    assert!(reason.contains("P95"));

    // The fused order comes back untouched.
    let ids: Vec<i64> = outcome.results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    reranker.reset_session();
    assert!(reranker.p95_latency_ms().is_none());
}
