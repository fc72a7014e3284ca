//! Integration tests for optimistic locking on execution snapshots.

use std::sync::Arc;

use chrono::Utc;
use planwright_core::error::ErrorCode;
use planwright_core::projections::TaskStatus;
use planwright_core::state::{ExecutionState, StateStore, TaskResult};

// ============================================================================
// Test Utilities
// ============================================================================

fn open(dir: &tempfile::TempDir) -> StateStore {
    StateStore::open(dir.path().join("state")).unwrap()
}

// ============================================================================
// Conflict Tests
// ============================================================================

#[test]
fn test_conflict_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    let mut initial = ExecutionState::new("apollo");
    store.save(&mut initial).unwrap();
    assert_eq!(initial.version, 1);

    let mut copy_a = store.load("apollo").unwrap().unwrap();
    let mut copy_b = store.load("apollo").unwrap().unwrap();

    copy_a.record_status("t1", TaskStatus::InProgress, Utc::now());
    store.save(&mut copy_a).unwrap();
    assert_eq!(copy_a.version, 2);

    copy_b.record_status("t2", TaskStatus::Done, Utc::now());
    let err = store.save(&mut copy_b).unwrap_err();
    assert_eq!(err.code(), ErrorCode::VersionConflict);
    assert!(err.is_retryable());

    let conflict = err.conflict_versions().copied().unwrap();
    assert_eq!(conflict.expected, 1);
    assert_eq!(conflict.actual, 2);

    // Reload, reapply, save.
    let mut fresh = store.load("apollo").unwrap().unwrap();
    fresh.record_status("t2", TaskStatus::Done, Utc::now());
    store.save(&mut fresh).unwrap();

    let stored = store.load("apollo").unwrap().unwrap();
    assert_eq!(stored.version, 3);
    assert_eq!(stored.task("t1").unwrap().status, TaskStatus::InProgress);
    assert_eq!(stored.task("t2").unwrap().status, TaskStatus::Done);
}

#[test]
fn test_conflict_leaves_file_bytes_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    let mut state = ExecutionState::new("p");
    store.save(&mut state).unwrap();
    let mut stale = state.clone();
    store.save(&mut state).unwrap();

    let path = store.dir().join("p.json");
    let before = std::fs::read(&path).unwrap();

    stale.set_task("x", TaskResult::new(TaskStatus::Blocked));
    assert!(store.save(&mut stale).is_err());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_first_save_never_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    // A copy claiming a later version still saves when nothing is on disk.
    let mut state = ExecutionState::new("new-project");
    state.version = 7;
    store.save(&mut state).unwrap();
    assert_eq!(state.version, 8);
    assert!(store.load("missing").unwrap().is_none());
}

#[test]
fn test_update_retries_under_contention() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(&dir));

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                for j in 0..5 {
                    store
                        .update("shared", 100, |s| {
                            s.set_task(format!("w{}-{}", i, j), TaskResult::new(TaskStatus::Done))
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let state = store.load("shared").unwrap().unwrap();
    assert_eq!(state.version, 30);
    assert_eq!(state.task_states.len(), 30);
}
