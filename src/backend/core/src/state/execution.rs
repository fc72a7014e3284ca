use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::projections::TaskStatus;

/// Execution record of one task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Per-project execution snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub project_id: String,
    #[serde(default)]
    pub task_states: BTreeMap<String, TaskResult>,
    /// Persisted version this copy was loaded at; 0 for a never-saved state
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            task_states: BTreeMap::new(),
            version: 0,
            updated_at: None,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskResult> {
        self.task_states.get(task_id)
    }

    pub fn set_task(&mut self, task_id: impl Into<String>, result: TaskResult) {
        self.task_states.insert(task_id.into(), result);
    }

    /// Move a task to `status`, stamping start/finish times and counting starts.
    pub fn record_status(&mut self, task_id: &str, status: TaskStatus, at: DateTime<Utc>) {
        let result = self.task_states.entry(task_id.to_string()).or_default();
        match status {
            TaskStatus::InProgress => {
                result.attempts += 1;
                result.started_at = Some(at);
                result.finished_at = None;
            }
            TaskStatus::Done | TaskStatus::Verified => {
                result.finished_at = Some(at);
            }
            _ => {}
        }
        result.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_status_tracks_attempts() {
        let mut state = ExecutionState::new("proj");
        let now = Utc::now();
        state.record_status("t1", TaskStatus::InProgress, now);
        state.record_status("t1", TaskStatus::Blocked, now);
        state.record_status("t1", TaskStatus::InProgress, now);
        state.record_status("t1", TaskStatus::Done, now);

        let result = state.task("t1").unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(result.status, TaskStatus::Done);
        assert_eq!(result.finished_at, Some(now));
    }

    #[test]
    fn test_minimal_json_decodes() {
        let state: ExecutionState =
            serde_json::from_str(r#"{"project_id":"p","task_states":{"a":{"status":"done"}}}"#).unwrap();
        assert_eq!(state.version, 0);
        assert_eq!(state.task("a").unwrap().status, TaskStatus::Done);
    }
}
