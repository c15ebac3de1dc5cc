//! Crash recovery: interrupted-session sweep, recover, and checkpoint files.

use std::sync::Arc;

use engram_e2e_tests::{seed, store_with_map};
use engram_core::{
    ContextMode, ContextOptions, ContextOrchestrator, EmbeddingService, EngineConfig, SessionSave,
    SessionStatus, Store,
};

fn save(task: &str) -> SessionSave {
    SessionSave {
        current_task: Some(task.to_string()),
        context_summary: Some("mid-task summary".to_string()),
        pending_work: Some("the rest of the task".to_string()),
        data: serde_json::json!({"cursor": task}),
        ..Default::default()
    }
}

#[test]
fn restart_marks_active_sessions_interrupted() {
    // s1 active, s2 completed, s3 active; restart; sweep.
    let (store, dir, path) = store_with_map(false, &[]);
    store.save_session("s1", &save("task one")).unwrap();
    store.save_session("s2", &save("task two")).unwrap();
    store.save_session("s3", &save("task three")).unwrap();
    store.complete_session("s2").unwrap();
    drop(store);

    // Engine restart.
    let store = Store::open(
        Some(path),
        EngineConfig::default(),
        EmbeddingService::disabled(),
    )
    .unwrap();
    assert_eq!(store.reset_interrupted().unwrap(), 2);

    assert_eq!(
        store.get_session("s1").unwrap().unwrap().status,
        SessionStatus::Interrupted
    );
    assert_eq!(
        store.get_session("s2").unwrap().unwrap().status,
        SessionStatus::Completed
    );
    assert_eq!(
        store.get_session("s3").unwrap().unwrap().status,
        SessionStatus::Interrupted
    );

    // Recovery returns the full stored state and reactivates the session.
    let recovered = store.recover_session("s1").unwrap().unwrap();
    assert!(recovered.recovered);
    assert_eq!(recovered.current_task.as_deref(), Some("task one"));
    assert_eq!(recovered.data["cursor"], "task one");
    assert_eq!(
        store.get_session("s1").unwrap().unwrap().status,
        SessionStatus::Active
    );

    drop(dir);
}

#[test]
fn list_interrupted_orders_by_recency() {
    let (store, _dir, _path) = store_with_map(false, &[]);
    store.save_session("s1", &save("one")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    store.save_session("s2", &save("two")).unwrap();
    store.reset_interrupted().unwrap();

    let interrupted = store.list_interrupted().unwrap();
    assert_eq!(interrupted.len(), 2);
    // reset stamps both with the same sweep time; ids are both present.
    let ids: Vec<&str> = interrupted.iter().map(|s| s.session_id.as_str()).collect();
    assert!(ids.contains(&"s1") && ids.contains(&"s2"));
}

#[test]
fn checkpoint_emits_continue_session_file() {
    let (store, dir, _path) = store_with_map(false, &[]);
    let spec_folder = dir.path().join("specs/demo");

    let path = store
        .checkpoint("s1", &save("write the session docs"), &spec_folder)
        .unwrap();
    assert!(path.ends_with("CONTINUE_SESSION.md"));

    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.starts_with("# CONTINUE SESSION"));
    for section in [
        "## Session State",
        "## Context Summary",
        "## Pending Work",
        "## Quick Resume",
        "## Additional State Data",
    ] {
        assert!(body.contains(section));
    }
    assert!(body.contains("write the session docs"));
    assert!(body.contains("s1"));
}

#[tokio::test]
async fn resume_mode_round_trips_through_orchestrator() {
    let (store, _dir, _path) = store_with_map(false, &[]);
    seed(
        &store,
        "a1",
        "the orchestrator resume path loads anchors from the spec folder",
    );
    store.save_session("s1", &save("resume integration")).unwrap();
    store.reset_interrupted().unwrap();

    let orchestrator = ContextOrchestrator::new(Arc::clone(&store));
    let envelope = orchestrator
        .get_context(
            "resume",
            ContextMode::Resume,
            &ContextOptions {
                session_id: Some("s1".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert!(!envelope.is_error());
    assert_eq!(envelope.data["_recovered"], true);
    assert_eq!(envelope.data["session"]["currentTask"], "resume integration");
    assert_eq!(envelope.meta.tool, "get_context");
    assert!(envelope.meta.token_count > 0);
}

#[test]
fn dedup_is_isolated_per_session() {
    // mark_sent in one session suppresses nothing anywhere else.
    let (store, _dir, _path) = store_with_map(false, &[]);
    let memory = seed(&store, "a1", "dedup isolation memory shared across sessions");

    store.mark_sent("session-a", &memory).unwrap();
    assert!(!store.should_send("session-a", &memory).unwrap());
    assert!(store.should_send("session-b", &memory).unwrap());

    let outcome = store
        .filter_unsent("session-b", vec![memory.clone()])
        .unwrap();
    assert_eq!(outcome.filtered.len(), 1);
    assert_eq!(outcome.stats.token_savings, 0);

    let repeat = store.filter_unsent("session-b", vec![memory]).unwrap();
    assert!(repeat.filtered.is_empty());
    assert_eq!(repeat.stats.token_savings, 200);
}
