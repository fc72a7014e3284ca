//! Ordered audit trail of every event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::{Event, EventType};

use super::Projection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: String,
    pub event_type: EventType,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

impl From<&Event> for AuditEntry {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            aggregate_id: event.aggregate_id.clone(),
            aggregate_type: event.aggregate_type.clone(),
            actor: event.actor.clone(),
            timestamp: event.timestamp,
            hash: event.hash.clone(),
        }
    }
}

/// Append-ordered timeline; queries return entries in log order unless noted.
#[derive(Debug, Default)]
pub struct AuditTimelineProjection {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditTimelineProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn for_aggregate(&self, aggregate_id: &str) -> Vec<AuditEntry> {
        self.filtered(|e| e.aggregate_id == aggregate_id)
    }

    pub fn by_actor(&self, actor: &str) -> Vec<AuditEntry> {
        self.filtered(|e| e.actor == actor)
    }

    /// Entries with `from <= timestamp <= to`.
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<AuditEntry> {
        self.filtered(|e| e.timestamp >= from && e.timestamp <= to)
    }

    /// The last `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        self.entries.read().iter().rev().take(n).cloned().collect()
    }

    /// Event count per actor.
    pub fn actor_activity(&self) -> BTreeMap<String, usize> {
        let mut activity = BTreeMap::new();
        for entry in self.entries.read().iter() {
            *activity.entry(entry.actor.clone()).or_insert(0) += 1;
        }
        activity
    }

    fn filtered<F>(&self, keep: F) -> Vec<AuditEntry>
    where
        F: Fn(&AuditEntry) -> bool,
    {
        self.entries.read().iter().filter(|e| keep(e)).cloned().collect()
    }
}

impl Projection for AuditTimelineProjection {
    fn name(&self) -> &'static str {
        "audit_timeline"
    }

    fn apply(&self, event: &Event) {
        self.entries.write().push(AuditEntry::from(event));
    }

    fn reset(&self) {
        self.entries.write().clear();
    }

    fn rebuild(&self, events: &[Event]) {
        let mut entries = self.entries.write();
        entries.clear();
        entries.extend(events.iter().map(AuditEntry::from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NewEvent;
    use chrono::Duration;

    fn seeded() -> (AuditTimelineProjection, DateTime<Utc>) {
        let base = Utc::now() - Duration::hours(10);
        let p = AuditTimelineProjection::new();
        let rows = [
            (EventType::TaskStarted, "t1", "alice"),
            (EventType::TaskStarted, "t2", "bob"),
            (EventType::TaskCompleted, "t1", "alice"),
            (EventType::PlanUpdated, "plan", "carol"),
        ];
        for (i, (kind, aggregate, actor)) in rows.into_iter().enumerate() {
            p.apply(
                &NewEvent::new(kind, "task", aggregate)
                    .actor(actor)
                    .at(base + Duration::hours(i as i64))
                    .seal(""),
            );
        }
        (p, base)
    }

    #[test]
    fn test_filters_keep_log_order() {
        let (p, base) = seeded();
        assert_eq!(p.len(), 4);

        let t1 = p.for_aggregate("t1");
        assert_eq!(t1.len(), 2);
        assert_eq!(t1[0].event_type, EventType::TaskStarted);
        assert_eq!(t1[1].event_type, EventType::TaskCompleted);

        assert_eq!(p.by_actor("bob").len(), 1);
        assert_eq!(p.between(base + Duration::hours(1), base + Duration::hours(2)).len(), 2);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let (p, _) = seeded();
        let recent = p.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].actor, "carol");
        assert_eq!(recent[1].aggregate_id, "t1");
        assert_eq!(p.recent(10).len(), 4);
    }

    #[test]
    fn test_actor_activity() {
        let (p, _) = seeded();
        let activity = p.actor_activity();
        assert_eq!(activity["alice"], 2);
        assert_eq!(activity["bob"], 1);
        assert_eq!(activity["carol"], 1);
    }
}
