//! On-disk execution snapshots with optimistic version checks.
//!
//! Snapshots live at `<dir>/<project_id>.json`. The version check and the
//! write happen inside one exclusive section: an in-process mutex plus an
//! advisory lock on `<dir>/<project_id>.json.lock`. The write goes through a
//! temp file in the same directory that is fsynced and renamed over the
//! target, so readers only ever see a complete snapshot.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use metrics::counter;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::instrument;

use crate::error::{ErrorCode, PlanError, Result};

use super::execution::ExecutionState;

/// Attempts `StateStore::update` makes before surfacing a conflict.
pub const DEFAULT_UPDATE_RETRIES: usize = 3;

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: u64,
}

/// Directory of per-project execution snapshots.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    guard: Mutex<()>,
}

impl StateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, project_id: &str) -> Result<PathBuf> {
        let invalid = project_id.is_empty()
            || project_id == "."
            || project_id == ".."
            || project_id.contains(['/', '\\', '\0']);
        if invalid {
            return Err(PlanError::new(
                ErrorCode::InvalidProjectId,
                format!("Invalid project id: {:?}", project_id),
            ));
        }
        Ok(self.dir.join(format!("{}.json", project_id)))
    }

    /// The stored snapshot, if one exists.
    pub fn load(&self, project_id: &str) -> Result<Option<ExecutionState>> {
        let path = self.path_for(project_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The stored snapshot, or a fresh version-0 state.
    pub fn load_or_new(&self, project_id: &str) -> Result<ExecutionState> {
        Ok(self
            .load(project_id)?
            .unwrap_or_else(|| ExecutionState::new(project_id)))
    }

    /// Persist `state` if nobody saved since it was loaded.
    ///
    /// On success `state.version` is bumped to the persisted version. On a
    /// conflict nothing is written and `state` is left as it was.
    #[instrument(skip(self, state), fields(project_id = %state.project_id, version = state.version))]
    pub fn save(&self, state: &mut ExecutionState) -> Result<()> {
        let path = self.path_for(&state.project_id)?;
        let _local = self.guard.lock();

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.dir.join(format!("{}.json.lock", state.project_id)))?;
        lock.lock_exclusive()
            .map_err(|e| PlanError::from(e).with_internal_message("Failed to lock execution state"))?;

        let outcome = self.save_locked(&path, state);

        if let Err(e) = FileExt::unlock(&lock) {
            tracing::warn!(error = %e, "Failed to release execution state lock");
        }
        outcome
    }

    fn save_locked(&self, path: &Path, state: &mut ExecutionState) -> Result<()> {
        if let Some(actual) = read_version(path)? {
            if actual != state.version {
                counter!("planwright_state_conflicts_total").increment(1);
                tracing::warn!(expected = state.version, actual, "Execution state version conflict");
                return Err(PlanError::conflict(&state.project_id, state.version, actual));
            }
        }

        let previous = (state.version, state.updated_at);
        state.version += 1;
        state.updated_at = Some(Utc::now());

        if let Err(e) = write_atomic(&self.dir, path, state) {
            (state.version, state.updated_at) = previous;
            return Err(e);
        }

        tracing::debug!(version = state.version, "Execution state saved");
        Ok(())
    }

    /// Load, mutate and save, reloading and retrying up to `max_attempts` on conflict.
    pub fn update<F>(&self, project_id: &str, max_attempts: usize, mut mutate: F) -> Result<ExecutionState>
    where
        F: FnMut(&mut ExecutionState),
    {
        let mut attempt = 1;
        loop {
            let mut state = self.load_or_new(project_id)?;
            mutate(&mut state);
            match self.save(&mut state) {
                Ok(()) => return Ok(state),
                Err(e) if e.code() == ErrorCode::VersionConflict && attempt < max_attempts => {
                    tracing::debug!(attempt, "Retrying execution state update after conflict");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn read_version(path: &Path) -> Result<Option<u64>> {
    match fs::read(path) {
        Ok(bytes) => {
            let probe: VersionProbe = serde_json::from_slice(&bytes)?;
            Ok(Some(probe.version))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(dir: &Path, path: &Path, state: &ExecutionState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.as_file_mut().write_all(&bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| PlanError::from(e.error))?;
    if let Ok(dir) = File::open(dir) {
        // Best effort: make the rename itself durable.
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::TaskStatus;
    use crate::state::TaskResult;

    #[test]
    fn test_save_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut state = store.load_or_new("proj").unwrap();
        assert_eq!(state.version, 0);
        store.save(&mut state).unwrap();
        assert_eq!(state.version, 1);
        store.save(&mut state).unwrap();
        assert_eq!(state.version, 2);

        let loaded = store.load("proj").unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn test_stale_save_conflicts_and_leaves_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let mut seed = ExecutionState::new("proj");
        store.save(&mut seed).unwrap();

        let mut a = store.load("proj").unwrap().unwrap();
        let mut b = store.load("proj").unwrap().unwrap();
        a.set_task("t1", TaskResult::new(TaskStatus::Done));
        store.save(&mut a).unwrap();

        b.set_task("t2", TaskResult::new(TaskStatus::Blocked));
        let err = store.save(&mut b).unwrap_err();
        assert_eq!(err.code(), ErrorCode::VersionConflict);
        let conflict = err.conflict_versions().unwrap();
        assert_eq!((conflict.expected, conflict.actual), (1, 2));
        assert_eq!(b.version, 1);

        let on_disk = store.load("proj").unwrap().unwrap();
        assert_eq!(on_disk.version, 2);
        assert!(on_disk.task("t1").is_some());
        assert!(on_disk.task("t2").is_none());
    }

    #[test]
    fn test_update_applies_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        for _ in 0..3 {
            store
                .update("proj", DEFAULT_UPDATE_RETRIES, |s| {
                    s.record_status("t1", TaskStatus::InProgress, Utc::now())
                })
                .unwrap();
        }
        let state = store.load("proj").unwrap().unwrap();
        assert_eq!(state.version, 3);
        assert_eq!(state.task("t1").unwrap().attempts, 3);
    }

    #[test]
    fn test_invalid_project_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        for id in ["", "..", "a/b", "a\\b"] {
            let err = store.load(id).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidProjectId);
        }
    }

    #[test]
    fn test_concurrent_updates_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(StateStore::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update("proj", 50, |s| {
                            s.set_task(format!("t{}", i), TaskResult::new(TaskStatus::Done))
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = store.load("proj").unwrap().unwrap();
        assert_eq!(state.version, 4);
        assert_eq!(state.task_states.len(), 4);
    }
}
