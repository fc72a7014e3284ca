//! Built-in live handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::projections::{TaskStateProjection, TaskStatus};

use super::dispatcher::{DispatchContext, EventHandler};
use super::event::{Event, Payload};

// =============================================================================
// Drift Alerts
// =============================================================================

/// A drift detection at or above the alert threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftAlert {
    pub event_id: String,
    pub component_id: String,
    pub drift_type: String,
    pub issue_count: i64,
    pub severity: String,
    pub detected_at: DateTime<Utc>,
}

/// Raises an alert for large `drift.detected` events.
#[derive(Debug)]
pub struct DriftAlertHandler {
    threshold: i64,
    alerts: Mutex<Vec<DriftAlert>>,
}

impl DriftAlertHandler {
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold,
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn alerts(&self) -> Vec<DriftAlert> {
        self.alerts.lock().clone()
    }

    /// Drain the alerts raised so far.
    pub fn take_alerts(&self) -> Vec<DriftAlert> {
        std::mem::take(&mut *self.alerts.lock())
    }
}

impl EventHandler for DriftAlertHandler {
    fn name(&self) -> &str {
        "drift_alert"
    }

    fn handle(&self, ctx: &DispatchContext, event: &Event) -> Result<()> {
        ctx.check_cancelled(self.name())?;

        let Payload::DriftDetected(signal) = event.payload() else {
            return Ok(());
        };
        if signal.issue_count < self.threshold {
            return Ok(());
        }

        tracing::warn!(
            component_id = signal.component_id,
            drift_type = signal.drift_type,
            issue_count = signal.issue_count,
            threshold = self.threshold,
            "Drift above alert threshold"
        );
        self.alerts.lock().push(DriftAlert {
            event_id: event.id.clone(),
            component_id: signal.component_id.to_string(),
            drift_type: signal.drift_type.to_string(),
            issue_count: signal.issue_count,
            severity: signal.severity.to_string(),
            detected_at: event.timestamp,
        });
        Ok(())
    }
}

// =============================================================================
// Unblock Detection
// =============================================================================

/// A task whose dependencies have all finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnblockCandidate {
    pub task_id: String,
    /// The completion that finished the last dependency
    pub unblocked_by: String,
    pub detected_at: DateTime<Utc>,
}

/// Reports dependents that became runnable when a task completes or verifies.
///
/// Reads the task-state projection, so it must run after the event has been
/// applied to it.
pub struct UnblockDetector {
    /// task id -> the task ids it depends on
    dependencies: BTreeMap<String, Vec<String>>,
    tasks: Arc<TaskStateProjection>,
    candidates: Mutex<Vec<UnblockCandidate>>,
}

impl UnblockDetector {
    pub fn new(dependencies: BTreeMap<String, Vec<String>>, tasks: Arc<TaskStateProjection>) -> Self {
        Self {
            dependencies,
            tasks,
            candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn candidates(&self) -> Vec<UnblockCandidate> {
        self.candidates.lock().clone()
    }

    /// Drain the candidates reported so far.
    pub fn take_candidates(&self) -> Vec<UnblockCandidate> {
        std::mem::take(&mut *self.candidates.lock())
    }

    fn is_finished(&self, task_id: &str) -> bool {
        self.tasks
            .get_state(task_id)
            .map(|s| s.status.is_finished())
            .unwrap_or(false)
    }

    fn is_waiting(&self, task_id: &str) -> bool {
        match self.tasks.get_state(task_id) {
            Some(state) => matches!(state.status, TaskStatus::Blocked | TaskStatus::Pending),
            None => true,
        }
    }
}

impl EventHandler for UnblockDetector {
    fn name(&self) -> &str {
        "unblock_detector"
    }

    fn handle(&self, ctx: &DispatchContext, event: &Event) -> Result<()> {
        let finished = match event.payload() {
            Payload::TaskCompleted { task_id } | Payload::TaskVerified { task_id } => task_id,
            _ => return Ok(()),
        };
        if finished.is_empty() {
            return Ok(());
        }

        for (task_id, deps) in &self.dependencies {
            ctx.check_cancelled(self.name())?;

            if !deps.iter().any(|d| d == finished) {
                continue;
            }
            if !deps.iter().all(|d| self.is_finished(d)) || !self.is_waiting(task_id) {
                continue;
            }

            tracing::info!(task_id = %task_id, unblocked_by = finished, "Task ready to start");
            self.candidates.lock().push(UnblockCandidate {
                task_id: task_id.clone(),
                unblocked_by: finished.to_string(),
                detected_at: event.timestamp,
            });
        }
        Ok(())
    }
}
