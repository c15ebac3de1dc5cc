//! Corrections ledger scenarios: stability coupling and exact undo.

use engram_e2e_tests::{seed, store_with_map};
use engram_core::{CorrectionType, EngineError};

#[test]
fn record_then_undo_restores_exact_stabilities() {
    let (store, _dir, _path) = store_with_map(true, &[]);
    let a = seed(&store, "a", "original guidance about retry behavior in the client");
    let b = seed(&store, "b", "replacement guidance about retry behavior in the client");

    // Drift both stabilities away from the default first.
    store.strengthen_on_access(a.id).unwrap();
    store.strengthen_on_access(b.id).unwrap();
    let a_before = store.get_memory(a.id).unwrap().unwrap().stability;
    let b_before = store.get_memory(b.id).unwrap().unwrap().stability;

    let record = store
        .record_correction(a.id, Some(b.id), CorrectionType::Superseded, "supersede", "test")
        .unwrap()
        .record()
        .unwrap()
        .clone();

    // Exact multiplier coupling on both sides.
    assert!((record.original_stability_after - 0.5 * a_before).abs() < 1e-9);
    assert!((record.correction_stability_after.unwrap() - 1.2 * b_before).abs() < 1e-9);
    assert_eq!(
        store.get_memory(a.id).unwrap().unwrap().stability,
        record.original_stability_after
    );

    let undone = store.undo_correction(record.id).unwrap();
    let undone = undone.record().unwrap();
    assert!(undone.is_undone);
    assert!(undone.undone_at.is_some());

    let a_after = store.get_memory(a.id).unwrap().unwrap().stability;
    let b_after = store.get_memory(b.id).unwrap().unwrap().stability;
    assert!((a_after - a_before).abs() < 1e-3);
    assert!((b_after - b_before).abs() < 1e-3);

    // Undo is irreversible: a second attempt is refused.
    assert!(matches!(
        store.undo_correction(record.id),
        Err(EngineError::InvalidInput(_))
    ));
}

#[test]
fn stats_track_active_and_undone() {
    let (store, _dir, _path) = store_with_map(true, &[]);
    let a = seed(&store, "a", "first memory for the corrections statistics test");
    let b = seed(&store, "b", "second memory for the corrections statistics test");
    let c = seed(&store, "c", "third memory for the corrections statistics test");

    let first = store.supersede(a.id, b.id, "one").unwrap().record().unwrap().id;
    store.merge(b.id, c.id, "two").unwrap();
    store.deprecate(c.id, "three").unwrap();
    store.undo_correction(first).unwrap();

    let stats = store.corrections_stats().unwrap();
    assert_eq!(stats.active, 2);
    assert_eq!(stats.undone, 1);
    assert_eq!(stats.by_type.get("superseded"), Some(&1));
    assert_eq!(stats.by_type.get("merged"), Some(&1));
    assert_eq!(stats.by_type.get("deprecated"), Some(&1));
}

#[test]
fn chain_walks_outgoing_corrections() {
    let (store, _dir, _path) = store_with_map(true, &[]);
    let a = seed(&store, "a", "chained memory for the correction chain walk");
    let b = seed(&store, "b", "chained replacement for the correction chain walk");

    store.supersede(a.id, b.id, "supersede a").unwrap();
    store.deprecate(a.id, "also deprecate a").unwrap();

    let chain = store.correction_chain(a.id).unwrap();
    assert_eq!(chain.total, 2);
    assert!(chain
        .corrections
        .iter()
        .all(|c| c.original_memory_id == a.id));

    let empty = store.correction_chain(b.id).unwrap();
    assert_eq!(empty.total, 0);
}

#[test]
fn disabled_relations_skip_every_operation() {
    let (store, _dir, _path) = store_with_map(false, &[]);
    let a = seed(&store, "a", "memory in a store with relations disabled");
    let b = seed(&store, "b", "another memory in a store with relations disabled");

    assert!(store.supersede(a.id, b.id, "skip").unwrap().is_skipped());
    assert!(store.deprecate(a.id, "skip").unwrap().is_skipped());
    assert!(store.undo_correction(1).unwrap().is_skipped());
    assert_eq!(store.get_memory(a.id).unwrap().unwrap().stability, 1.0);
}
