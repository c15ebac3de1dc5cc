//! Write-gate scenarios: near-duplicate reinforce, contradictory supersede,
//! and novel create, each checked down to the conflict log.

use engram_e2e_tests::{at_similarity, input, seed, store_with_map};
use engram_core::{GateDecision, GateOptions};

const EXISTING: &str = "You should always validate user input.";

#[test]
fn near_duplicate_reinforces_instead_of_duplicating() {
    // A neighbor at similarity 0.97 reinforces the original.
    let incoming = "You should always validate user input at every boundary.";
    let (store, _dir, _path) = store_with_map(
        false,
        &[
            (EXISTING, at_similarity(1.0)),
            (incoming, at_similarity(0.97)),
        ],
    );

    let a = seed(&store, "a", EXISTING);
    assert_eq!(a.stability, 1.0);
    assert_eq!(a.difficulty, 5.0);
    assert_eq!(a.review_count, 0);

    let result = store
        .gated_write(&input("b", incoming), &GateOptions::default())
        .unwrap();

    match &result.decision {
        GateDecision::Reinforce { candidate_id, similarity, .. } => {
            assert_eq!(*candidate_id, a.id);
            assert!((similarity - 0.97).abs() < 1e-3);
        }
        other => panic!("expected reinforce, got {other:?}"),
    }

    // The original strengthened; no second row was created.
    let after = store.get_memory(a.id).unwrap().unwrap();
    assert!(after.stability > 1.0);
    assert_eq!(after.review_count, 1);
    assert!(store
        .get_memory_by_key("specs/demo", "memory/demo.md", "b")
        .unwrap()
        .is_none());

    let conflicts = store.conflicts(10).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].action, "REINFORCE");
    assert_eq!(conflicts[0].existing_memory_id, Some(a.id));
}

#[test]
fn contradictory_high_match_supersedes() {
    // Similarity 0.92 plus an always/never contradiction.
    let incoming = "You should never validate user input.";
    let (store, _dir, _path) = store_with_map(
        true,
        &[
            (EXISTING, at_similarity(1.0)),
            (incoming, at_similarity(0.92)),
        ],
    );

    let a = seed(&store, "a", EXISTING);
    let result = store
        .gated_write(&input("b", incoming), &GateOptions::default())
        .unwrap();

    match &result.decision {
        GateDecision::Supersede { candidate_id, similarity, contradiction, .. } => {
            assert_eq!(*candidate_id, a.id);
            assert!((similarity - 0.92).abs() < 1e-3);
            assert_eq!(contradiction.existing_term, "always");
            assert_eq!(contradiction.incoming_term, "never");
        }
        other => panic!("expected supersede, got {other:?}"),
    }

    // Correction of type superseded with the exact stability coupling.
    let correction_id = result.correction_id.expect("correction recorded");
    let correction = store.get_correction(correction_id).unwrap().unwrap();
    assert_eq!(correction.correction_type.as_str(), "superseded");
    assert_eq!(
        correction.original_stability_after,
        correction.original_stability_before * 0.5
    );

    let original = store.get_memory(a.id).unwrap().unwrap();
    assert_eq!(original.stability, 0.5);

    let replacement = store.get_memory(result.memory.as_ref().unwrap().id).unwrap().unwrap();
    assert!((replacement.stability - 1.2).abs() < 1e-9);

    let conflicts = store.conflicts(10).unwrap();
    assert_eq!(conflicts[0].action, "SUPERSEDE");
}

#[test]
fn novel_content_creates_without_correction() {
    // Best similarity 0.50 falls below every band.
    let incoming = "Database migrations must be forward-only and numbered.";
    let (store, _dir, _path) = store_with_map(
        false,
        &[
            (EXISTING, at_similarity(1.0)),
            (incoming, at_similarity(0.5)),
        ],
    );

    seed(&store, "a", EXISTING);
    let result = store
        .gated_write(&input("b", incoming), &GateOptions::default())
        .unwrap();

    match &result.decision {
        GateDecision::Create { best_similarity, .. } => {
            assert!((best_similarity - 0.5).abs() < 1e-3);
        }
        other => panic!("expected create, got {other:?}"),
    }
    assert!(result.correction_id.is_none());
    assert!(result.memory.is_some());

    // With a nonzero best similarity the decision is still worth a log row.
    let conflicts = store.conflicts(10).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].action, "CREATE");
}

#[test]
fn medium_similarity_creates_linked() {
    let incoming = "Validation rules live next to the handlers that use them.";
    let (store, _dir, _path) = store_with_map(
        true,
        &[
            (EXISTING, at_similarity(1.0)),
            (incoming, at_similarity(0.75)),
        ],
    );

    let a = seed(&store, "a", EXISTING);
    let result = store
        .gated_write(&input("b", incoming), &GateOptions::default())
        .unwrap();

    match &result.decision {
        GateDecision::CreateLinked { related_ids, .. } => {
            assert_eq!(related_ids, &vec![a.id]);
        }
        other => panic!("expected create_linked, got {other:?}"),
    }

    // Relations enabled: the link landed in the edge table.
    let new_id = result.memory.unwrap().id;
    let hits = store
        .unified_search(
            "validation rules handlers",
            &engram_core::UnifiedSearchOptions::default(),
        )
        .unwrap();
    assert!(hits.iter().any(|h| h.memory.id == new_id));
}

#[test]
fn first_write_into_empty_store_creates_silently() {
    let (store, _dir, _path) = store_with_map(false, &[]);
    let result = store
        .gated_write(
            &input("a", "the very first memory in an empty store"),
            &GateOptions::default(),
        )
        .unwrap();

    assert!(matches!(result.decision, GateDecision::Create { .. }));
    // best similarity 0: nothing interesting to log.
    assert!(store.conflicts(10).unwrap().is_empty());
}

#[test]
fn empty_content_is_rejected_without_side_effects() {
    let (store, _dir, _path) = store_with_map(false, &[]);
    assert!(store
        .gated_write(&input("a", "   "), &GateOptions::default())
        .is_err());
    assert_eq!(store.stats().unwrap().total_memories, 0);
}
