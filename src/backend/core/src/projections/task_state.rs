//! Per-task lifecycle state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::{Event, Payload};

use super::Projection;

/// Lifecycle status of a task.
///
/// `task.transitioned` may set any string; unknown ones are kept as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Verified,
    Blocked,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Verified => "verified",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Other(s) => s,
        }
    }

    /// Done or verified.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Verified)
    }
}

impl From<&str> for TaskStatus {
    fn from(value: &str) -> Self {
        match value {
            "pending" => TaskStatus::Pending,
            "in_progress" => TaskStatus::InProgress,
            "done" => TaskStatus::Done,
            "verified" => TaskStatus::Verified,
            "blocked" => TaskStatus::Blocked,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        TaskStatus::from(value.as_str())
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        match value {
            TaskStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A link from a task to an external tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub external_id: String,
    pub url: String,
    pub linked_at: DateTime<Utc>,
}

/// Derived state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,
    pub owner: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
    /// Keyed by provider name
    pub external_refs: BTreeMap<String, ExternalRef>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl TaskState {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            ..Self::default()
        }
    }
}

/// Task state machine driven by `task.*` and `external_ref.linked` events.
#[derive(Debug, Default)]
pub struct TaskStateProjection {
    tasks: RwLock<HashMap<String, TaskState>>,
}

impl TaskStateProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_state(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Every task, sorted by id.
    pub fn all_states(&self) -> Vec<TaskState> {
        let mut states: Vec<TaskState> = self.tasks.read().values().cloned().collect();
        states.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        states
    }

    pub fn tasks_by_status(&self, status: &TaskStatus) -> Vec<TaskState> {
        let mut states: Vec<TaskState> = self
            .tasks
            .read()
            .values()
            .filter(|s| &s.status == status)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        states
    }

    pub fn status_counts(&self) -> BTreeMap<TaskStatus, usize> {
        let mut counts = BTreeMap::new();
        for state in self.tasks.read().values() {
            *counts.entry(state.status.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    fn fold(tasks: &mut HashMap<String, TaskState>, event: &Event) {
        let ts = event.timestamp;
        let task_id = match event.payload() {
            Payload::TaskStarted { task_id }
            | Payload::TaskCompleted { task_id }
            | Payload::TaskVerified { task_id }
            | Payload::TaskBlocked { task_id, .. }
            | Payload::TaskUnblocked { task_id }
            | Payload::TaskTransitioned { task_id, .. }
            | Payload::ExternalRefLinked { task_id, .. } => task_id,
            Payload::DriftDetected(_)
            | Payload::DriftAccepted { .. }
            | Payload::DriftResolved { .. }
            | Payload::Lifecycle
            | Payload::Other => return,
        };
        if task_id.is_empty() {
            return;
        }

        let state = tasks
            .entry(task_id.to_string())
            .or_insert_with(|| TaskState::new(task_id));

        match event.payload() {
            Payload::TaskStarted { .. } => {
                state.status = TaskStatus::InProgress;
                state.owner = event.actor.clone();
                state.started_at = Some(ts);
            }
            Payload::TaskCompleted { .. } => {
                state.status = TaskStatus::Done;
                state.completed_at = Some(ts);
            }
            Payload::TaskVerified { .. } => {
                state.status = TaskStatus::Verified;
                state.verified_at = Some(ts);
            }
            Payload::TaskBlocked { reason, .. } => {
                state.status = TaskStatus::Blocked;
                state.blocked_at = Some(ts);
                state.blocked_reason = Some(reason.to_string()).filter(|r| !r.is_empty());
            }
            Payload::TaskUnblocked { .. } => {
                state.status = TaskStatus::Pending;
                state.blocked_at = None;
                state.blocked_reason = None;
            }
            Payload::TaskTransitioned { to_status, .. } => {
                if !to_status.is_empty() {
                    state.status = TaskStatus::from(to_status);
                }
            }
            Payload::ExternalRefLinked {
                provider,
                external_id,
                url,
                ..
            } => {
                state.external_refs.insert(
                    provider.to_string(),
                    ExternalRef {
                        external_id: external_id.to_string(),
                        url: url.to_string(),
                        linked_at: ts,
                    },
                );
            }
            _ => {}
        }
        state.last_event_at = Some(ts);
    }
}

impl Projection for TaskStateProjection {
    fn name(&self) -> &'static str {
        "task_state"
    }

    fn apply(&self, event: &Event) {
        Self::fold(&mut self.tasks.write(), event);
    }

    fn reset(&self) {
        self.tasks.write().clear();
    }

    fn rebuild(&self, events: &[Event]) {
        let mut tasks = self.tasks.write();
        tasks.clear();
        for event in events {
            Self::fold(&mut tasks, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, NewEvent};
    use chrono::Duration;

    fn at(kind: EventType, task: &str, minutes: i64) -> NewEvent {
        let base = DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        NewEvent::task(kind, task).at(base + Duration::minutes(minutes))
    }

    #[test]
    fn test_started_then_completed() {
        let p = TaskStateProjection::new();
        p.apply(&at(EventType::TaskStarted, "task-1", 0).actor("alice").seal(""));
        p.apply(&at(EventType::TaskCompleted, "task-1", 30).seal(""));

        let state = p.get_state("task-1").unwrap();
        assert_eq!(state.status, TaskStatus::Done);
        assert_eq!(state.owner, "alice");
        assert!(state.started_at.is_some());
        assert!(state.completed_at.is_some());
        assert!(state.verified_at.is_none());
    }

    #[test]
    fn test_block_and_unblock() {
        let p = TaskStateProjection::new();
        p.apply(&at(EventType::TaskBlocked, "t", 0).meta("reason", "waiting on api").seal(""));
        let blocked = p.get_state("t").unwrap();
        assert_eq!(blocked.status, TaskStatus::Blocked);
        assert_eq!(blocked.blocked_reason.as_deref(), Some("waiting on api"));

        p.apply(&at(EventType::TaskUnblocked, "t", 5).seal(""));
        let state = p.get_state("t").unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
        assert!(state.blocked_at.is_none());
    }

    #[test]
    fn test_transition_is_last_write_wins() {
        let p = TaskStateProjection::new();
        p.apply(&at(EventType::TaskCompleted, "t", 0).seal(""));
        p.apply(&at(EventType::TaskTransitioned, "t", 1).meta("to_status", "cancelled").seal(""));
        assert_eq!(p.get_state("t").unwrap().status, TaskStatus::Other("cancelled".into()));

        p.apply(&at(EventType::TaskTransitioned, "t", 2).meta("to_status", "in_progress").seal(""));
        assert_eq!(p.get_state("t").unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn test_external_ref_upsert() {
        let p = TaskStateProjection::new();
        let link = |minutes, id: &str| {
            at(EventType::ExternalRefLinked, "t", minutes)
                .meta("provider", "github")
                .meta("external_id", id)
                .meta("url", format!("https://example.test/{}", id))
                .seal("")
        };
        p.apply(&link(0, "1"));
        p.apply(&link(1, "2"));

        let state = p.get_state("t").unwrap();
        assert_eq!(state.external_refs.len(), 1);
        assert_eq!(state.external_refs["github"].external_id, "2");
    }

    #[test]
    fn test_malformed_events_are_ignored() {
        let p = TaskStateProjection::new();
        p.apply(&NewEvent::new(EventType::TaskStarted, "task", "t").seal(""));
        p.apply(&NewEvent::new(EventType::TaskStarted, "task", "t").meta("task_id", 7).seal(""));
        p.apply(&NewEvent::new("custom.thing", "task", "t").meta("task_id", "t").seal(""));
        assert!(p.is_empty());
    }

    #[test]
    fn test_queries() {
        let p = TaskStateProjection::new();
        p.apply(&at(EventType::TaskStarted, "b", 0).seal(""));
        p.apply(&at(EventType::TaskStarted, "a", 1).seal(""));
        p.apply(&at(EventType::TaskCompleted, "c", 2).seal(""));

        let ids: Vec<String> = p.all_states().into_iter().map(|s| s.task_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(p.tasks_by_status(&TaskStatus::InProgress).len(), 2);
        assert_eq!(p.status_counts()[&TaskStatus::Done], 1);
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        let events = vec![
            at(EventType::TaskStarted, "a", 0).seal(""),
            at(EventType::TaskBlocked, "a", 1).seal(""),
            at(EventType::TaskUnblocked, "a", 2).seal(""),
            at(EventType::TaskCompleted, "a", 3).seal(""),
            at(EventType::TaskVerified, "a", 4).seal(""),
        ];
        let incremental = TaskStateProjection::new();
        for e in &events {
            incremental.apply(e);
        }
        let rebuilt = TaskStateProjection::new();
        rebuilt.apply(&at(EventType::TaskStarted, "stale", 0).seal(""));
        rebuilt.rebuild(&events);

        assert_eq!(rebuilt.all_states(), incremental.all_states());
    }
}
