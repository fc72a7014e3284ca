//! Replay-derived read models.
//!
//! Every projection folds events into its own state behind its own lock.
//! `rebuild(events)` must leave exactly the state that `reset()` followed by
//! `apply` over the same events would: projections never consult the wall
//! clock while applying, only the event timestamps. Queries that need "now"
//! read an injectable [`Clock`].

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::events::Event;

pub mod audit;
pub mod drift;
pub mod task_state;
pub mod velocity;

pub use audit::{AuditEntry, AuditTimelineProjection};
pub use drift::{
    DebtCategory, DebtItem, DebtKey, DebtSummary, DriftHistoryProjection, DriftSnapshot,
    DriftThresholds, DriftTrend, DriftTrendDirection,
};
pub use task_state::{ExternalRef, TaskState, TaskStateProjection, TaskStatus};
pub use velocity::{
    BurndownPoint, ExtendedVelocityProjection, TrendDirection, VelocityProjection, VelocityStats,
    VelocityTrend, VelocityWindow,
};

// =============================================================================
// Projection Trait
// =============================================================================

/// A read model rebuilt from the event history.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fold one event into the current state.
    fn apply(&self, event: &Event);

    /// Return to the empty state.
    fn reset(&self);

    /// Replace the state with the fold of `events`.
    ///
    /// Implementations hold their write lock for the whole replay.
    fn rebuild(&self, events: &[Event]) {
        self.reset();
        for event in events {
            self.apply(event);
        }
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Source of "now" for time-window queries.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A clock frozen at `now`.
pub fn fixed_clock(now: DateTime<Utc>) -> Clock {
    Arc::new(move || now)
}

// =============================================================================
// Projection Set
// =============================================================================

/// Ordered collection of projections driven together.
#[derive(Default, Clone)]
pub struct ProjectionSet {
    projections: Vec<Arc<dyn Projection>>,
}

impl ProjectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn with(mut self, projection: Arc<dyn Projection>) -> Self {
        self.add(projection);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.projections.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.projections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    pub fn apply(&self, event: &Event) {
        for projection in &self.projections {
            projection.apply(event);
        }
    }

    pub fn reset(&self) {
        for projection in &self.projections {
            projection.reset();
        }
    }

    pub fn rebuild(&self, events: &[Event]) {
        for projection in &self.projections {
            projection.rebuild(events);
            tracing::debug!(projection = projection.name(), events = events.len(), "Projection rebuilt");
        }
    }
}

impl std::fmt::Debug for ProjectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
