//! Drift history and technical-debt tracking.
//!
//! Each `component_id` + `drift_type` pair is one debt item. Items are
//! created on first detection, re-categorized on every update, moved to the
//! resolved set on `drift.resolved`, and come back as regressions when the
//! same pair is detected again after resolution.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::DriftConfig;
use crate::events::{DriftSignal, Event, Payload};

use super::{system_clock, Clock, Projection};

const DEFAULT_TREND_DAYS: i64 = 14;
const TREND_THRESHOLD: f64 = 0.1;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DebtKey {
    pub component_id: String,
    pub drift_type: String,
}

impl DebtKey {
    pub fn new(component_id: impl Into<String>, drift_type: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            drift_type: drift_type.into(),
        }
    }
}

impl fmt::Display for DebtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component_id, self.drift_type)
    }
}

/// Why a piece of drift is still around.
///
/// A fresh item starts as [`Neglect`](Self::Neglect) with `days_pending == 0`
/// and keeps that label until a later detection matches another rule. Read
/// `days_pending` alongside the category to tell new drift from old.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtCategory {
    /// Pending for too long; also the starting category
    Neglect,
    /// Detected over and over in a short span
    Churn,
    /// Came back after being resolved
    Regression,
    /// Explicitly accepted
    Intentional,
}

impl fmt::Display for DebtCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DebtCategory::Neglect => "neglect",
            DebtCategory::Churn => "churn",
            DebtCategory::Regression => "regression",
            DebtCategory::Intentional => "intentional",
        })
    }
}

/// One recorded `drift.detected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub timestamp: DateTime<Utc>,
    pub component_id: String,
    pub drift_type: String,
    pub issue_count: i64,
    pub severity: String,
    pub description: String,
}

impl DriftSnapshot {
    fn from_signal(signal: &DriftSignal<'_>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            component_id: signal.component_id.to_string(),
            drift_type: signal.drift_type.to_string(),
            issue_count: signal.issue_count,
            severity: signal.severity.to_string(),
            description: signal.description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtItem {
    pub component_id: String,
    pub drift_type: String,
    pub category: DebtCategory,
    pub detection_count: u64,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    /// Whole days between first detection and the latest update
    pub days_pending: i64,
    /// Set by `drift.accepted`; keeps the item intentional
    pub is_sticky: bool,
    pub is_regression: bool,
    /// Issue count of the latest detection
    pub issue_count: i64,
    pub accepted_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DebtItem {
    pub fn key(&self) -> DebtKey {
        DebtKey::new(&self.component_id, &self.drift_type)
    }
}

/// Thresholds driving categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftThresholds {
    pub neglect_days: i64,
    pub churn_detections: u64,
    pub churn_max_days: i64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self::from(&DriftConfig::default())
    }
}

impl From<&DriftConfig> for DriftThresholds {
    fn from(config: &DriftConfig) -> Self {
        Self {
            neglect_days: config.neglect_days,
            churn_detections: config.churn_detections,
            churn_max_days: config.churn_max_days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftTrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl fmt::Display for DriftTrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriftTrendDirection::Increasing => "increasing",
            DriftTrendDirection::Decreasing => "decreasing",
            DriftTrendDirection::Stable => "stable",
        })
    }
}

/// Issue totals in the two halves of a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftTrend {
    pub window_days: i64,
    pub first_half_issues: i64,
    pub second_half_issues: i64,
    /// Fractional change, `0.25` meaning +25%
    pub percent_change: f64,
    pub direction: DriftTrendDirection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DebtSummary {
    pub active: usize,
    pub resolved: usize,
    pub by_category: BTreeMap<DebtCategory, usize>,
    pub mean_days_pending: f64,
}

// =============================================================================
// Projection
// =============================================================================

#[derive(Debug, Default)]
struct DriftState {
    history: Vec<DriftSnapshot>,
    items: HashMap<DebtKey, DebtItem>,
    resolved: HashMap<DebtKey, DebtItem>,
}

/// Debt items and drift history.
pub struct DriftHistoryProjection {
    thresholds: DriftThresholds,
    clock: Clock,
    state: RwLock<DriftState>,
}

impl Default for DriftHistoryProjection {
    fn default() -> Self {
        Self::new(DriftThresholds::default())
    }
}

impl DriftHistoryProjection {
    pub fn new(thresholds: DriftThresholds) -> Self {
        Self {
            thresholds,
            clock: system_clock(),
            state: RwLock::new(DriftState::default()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn thresholds(&self) -> DriftThresholds {
        self.thresholds
    }

    /// Live items, sorted by key.
    pub fn get_active_debt_items(&self) -> Vec<DebtItem> {
        sorted(self.state.read().items.values())
    }

    pub fn get_resolved_items(&self) -> Vec<DebtItem> {
        sorted(self.state.read().resolved.values())
    }

    pub fn get_item(&self, key: &DebtKey) -> Option<DebtItem> {
        self.state.read().items.get(key).cloned()
    }

    pub fn history(&self) -> Vec<DriftSnapshot> {
        self.state.read().history.clone()
    }

    pub fn debt_summary(&self) -> DebtSummary {
        let state = self.state.read();
        let mut by_category = BTreeMap::new();
        let mut pending = 0i64;
        for item in state.items.values() {
            *by_category.entry(item.category).or_insert(0) += 1;
            pending += item.days_pending;
        }
        let mean_days_pending = if state.items.is_empty() {
            0.0
        } else {
            pending as f64 / state.items.len() as f64
        };

        DebtSummary {
            active: state.items.len(),
            resolved: state.resolved.len(),
            by_category,
            mean_days_pending,
        }
    }

    /// Compare issue totals of the two halves of `[now - window_days, now]`.
    ///
    /// `window_days <= 0` uses 14 days.
    pub fn get_drift_trend(&self, window_days: i64) -> DriftTrend {
        let window_days = if window_days > 0 { window_days } else { DEFAULT_TREND_DAYS };
        let now = (self.clock)();
        let start = now - Duration::days(window_days);
        let mid = start + Duration::days(window_days) / 2;

        let (mut first, mut second) = (0i64, 0i64);
        for snapshot in &self.state.read().history {
            let ts = snapshot.timestamp;
            if ts >= start && ts < mid {
                first += snapshot.issue_count;
            } else if ts >= mid && ts <= now {
                second += snapshot.issue_count;
            }
        }

        let percent_change = if first != 0 {
            (second - first) as f64 / first as f64
        } else if second > 0 {
            1.0
        } else {
            0.0
        };

        let direction = if percent_change > TREND_THRESHOLD {
            DriftTrendDirection::Increasing
        } else if percent_change < -TREND_THRESHOLD {
            DriftTrendDirection::Decreasing
        } else {
            DriftTrendDirection::Stable
        };

        DriftTrend {
            window_days,
            first_half_issues: first,
            second_half_issues: second,
            percent_change,
            direction,
        }
    }

    fn categorize(&self, item: &DebtItem) -> DebtCategory {
        let t = &self.thresholds;
        if item.is_sticky {
            DebtCategory::Intentional
        } else if item.is_regression {
            DebtCategory::Regression
        } else if item.days_pending > t.neglect_days {
            DebtCategory::Neglect
        } else if item.detection_count > t.churn_detections && item.days_pending < t.churn_max_days {
            DebtCategory::Churn
        } else {
            item.category
        }
    }

    fn fold(&self, state: &mut DriftState, event: &Event) {
        let ts = event.timestamp;
        match event.payload() {
            Payload::DriftDetected(signal) => {
                state.history.push(DriftSnapshot::from_signal(&signal, ts));
                if signal.component_id.is_empty() && signal.drift_type.is_empty() {
                    return;
                }

                let key = DebtKey::new(signal.component_id, signal.drift_type);
                if let Some(item) = state.items.get_mut(&key) {
                    item.detection_count += 1;
                    item.last_detected = ts;
                    item.days_pending = (ts - item.first_detected).num_days();
                    item.issue_count = signal.issue_count;
                    item.category = self.categorize(item);
                    return;
                }

                let is_regression = state.resolved.contains_key(&key);
                let mut item = DebtItem {
                    component_id: key.component_id.clone(),
                    drift_type: key.drift_type.clone(),
                    category: if is_regression {
                        DebtCategory::Regression
                    } else {
                        DebtCategory::Neglect
                    },
                    detection_count: 1,
                    first_detected: ts,
                    last_detected: ts,
                    days_pending: 0,
                    is_sticky: false,
                    is_regression,
                    issue_count: signal.issue_count,
                    accepted_by: None,
                    resolved_at: None,
                };
                item.category = self.categorize(&item);
                state.items.insert(key, item);
            }
            Payload::DriftAccepted {
                component_id,
                drift_type,
            } => {
                if let Some(item) = state.items.get_mut(&DebtKey::new(component_id, drift_type)) {
                    item.is_sticky = true;
                    item.category = DebtCategory::Intentional;
                    item.accepted_by = Some(event.actor.clone());
                    item.days_pending = (ts - item.first_detected).num_days();
                }
            }
            Payload::DriftResolved {
                component_id,
                drift_type,
            } => {
                let key = DebtKey::new(component_id, drift_type);
                if let Some(mut item) = state.items.remove(&key) {
                    item.resolved_at = Some(ts);
                    item.days_pending = (ts - item.first_detected).num_days();
                    state.resolved.insert(key, item);
                }
            }
            _ => {}
        }
    }
}

fn sorted<'a>(items: impl Iterator<Item = &'a DebtItem>) -> Vec<DebtItem> {
    let mut items: Vec<DebtItem> = items.cloned().collect();
    items.sort_by_key(|item| item.key());
    items
}

impl Projection for DriftHistoryProjection {
    fn name(&self) -> &'static str {
        "drift_history"
    }

    fn apply(&self, event: &Event) {
        let mut state = self.state.write();
        self.fold(&mut state, event);
    }

    fn reset(&self) {
        *self.state.write() = DriftState::default();
    }

    fn rebuild(&self, events: &[Event]) {
        let mut state = self.state.write();
        *state = DriftState::default();
        for event in events {
            self.fold(&mut state, event);
        }
    }
}
