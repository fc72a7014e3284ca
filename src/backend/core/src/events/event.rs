//! Event records and the domain payloads they carry.
//!
//! This module provides:
//! - `EventType`, the closed set of known event kinds (plus a forward-compatible escape)
//! - `Metadata`, the untyped payload map with graceful typed accessors
//! - `Event`, the persisted, hash-chained record
//! - `NewEvent`, the draft an `EventStore` seals into an `Event`
//! - `Payload`, the typed view projections match on

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::canonical::calculate_hash;

/// Schema version written into every new record.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Actor recorded when a draft does not name one.
pub const SYSTEM_ACTOR: &str = "system";

// =============================================================================
// Event Types
// =============================================================================

/// Kind of fact an event records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    SpecCreated,
    SpecUpdated,
    PlanCreated,
    PlanUpdated,
    TaskCreated,
    TaskStarted,
    TaskCompleted,
    TaskVerified,
    TaskBlocked,
    TaskUnblocked,
    TaskTransitioned,
    ExternalRefLinked,
    DriftDetected,
    DriftAccepted,
    DriftResolved,
    /// Any type this build does not know about; round-trips unchanged.
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::SpecCreated => "spec.created",
            EventType::SpecUpdated => "spec.updated",
            EventType::PlanCreated => "plan.created",
            EventType::PlanUpdated => "plan.updated",
            EventType::TaskCreated => "task.created",
            EventType::TaskStarted => "task.started",
            EventType::TaskCompleted => "task.completed",
            EventType::TaskVerified => "task.verified",
            EventType::TaskBlocked => "task.blocked",
            EventType::TaskUnblocked => "task.unblocked",
            EventType::TaskTransitioned => "task.transitioned",
            EventType::ExternalRefLinked => "external_ref.linked",
            EventType::DriftDetected => "drift.detected",
            EventType::DriftAccepted => "drift.accepted",
            EventType::DriftResolved => "drift.resolved",
            EventType::Custom(name) => name,
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "spec.created" => EventType::SpecCreated,
            "spec.updated" => EventType::SpecUpdated,
            "plan.created" => EventType::PlanCreated,
            "plan.updated" => EventType::PlanUpdated,
            "task.created" => EventType::TaskCreated,
            "task.started" => EventType::TaskStarted,
            "task.completed" => EventType::TaskCompleted,
            "task.verified" => EventType::TaskVerified,
            "task.blocked" => EventType::TaskBlocked,
            "task.unblocked" => EventType::TaskUnblocked,
            "task.transitioned" => EventType::TaskTransitioned,
            "external_ref.linked" => EventType::ExternalRefLinked,
            "drift.detected" => EventType::DriftDetected,
            "drift.accepted" => EventType::DriftAccepted,
            "drift.resolved" => EventType::DriftResolved,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match EventType::from(value.as_str()) {
            EventType::Custom(_) => EventType::Custom(value),
            known => known,
        }
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Free-form event payload.
///
/// Accessors never fail: a missing key or a value of the wrong JSON type
/// yields the zero value for the requested type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// String value, or `""`.
    pub fn get_str(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// Owned string value, or an empty string.
    pub fn get_string(&self, key: &str) -> String {
        self.get_str(key).to_string()
    }

    /// Integer value, or `0`. Whole floats (`3.0`) count as integers.
    pub fn get_i64(&self, key: &str) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Non-negative integer value, or `0`.
    pub fn get_u64(&self, key: &str) -> u64 {
        u64::try_from(self.get_i64(key)).unwrap_or(0)
    }

    /// Numeric value, or `0.0`.
    pub fn get_f64(&self, key: &str) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Boolean value, or `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// RFC3339 timestamp value, or `None`.
    pub fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.get_str(key))
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

impl From<BTreeMap<String, Value>> for Metadata {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// =============================================================================
// Event
// =============================================================================

/// An immutable, hash-chained fact.
///
/// `hash` covers `prev_hash`, `id`, the nanosecond RFC3339 `timestamp`, `type`,
/// `aggregate_id`, `actor` and the canonical form of `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EventRecord", from = "EventRecord")]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub metadata: Metadata,
    pub prev_hash: String,
    pub hash: String,
    pub version: u32,
}

impl Event {
    /// Recompute the hash from the current field values.
    pub fn compute_hash(&self) -> String {
        calculate_hash(self)
    }

    /// Whether the stored hash matches the field values.
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Typed view of this event.
    pub fn payload(&self) -> Payload<'_> {
        Payload::from_event(self)
    }
}

/// Format a timestamp the way it is hashed and persisted.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// On-disk shape of one log line.
#[derive(Serialize, Deserialize)]
struct EventRecord {
    id: String,
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(default, skip_deserializing)]
    action: String,
    aggregate_id: String,
    aggregate_type: String,
    #[serde(with = "rfc3339_nanos")]
    timestamp: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    version: u32,
    actor: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    #[serde(default)]
    prev_hash: String,
    #[serde(default)]
    hash: String,
}

fn default_schema_version() -> u32 {
    EVENT_SCHEMA_VERSION
}

impl From<Event> for EventRecord {
    fn from(e: Event) -> Self {
        Self {
            action: e.event_type.as_str().to_string(),
            id: e.id,
            event_type: e.event_type,
            aggregate_id: e.aggregate_id,
            aggregate_type: e.aggregate_type,
            timestamp: e.timestamp,
            version: e.version,
            actor: e.actor,
            metadata: e.metadata,
            prev_hash: e.prev_hash,
            hash: e.hash,
        }
    }
}

impl From<EventRecord> for Event {
    fn from(r: EventRecord) -> Self {
        Self {
            id: r.id,
            event_type: r.event_type,
            aggregate_id: r.aggregate_id,
            aggregate_type: r.aggregate_type,
            timestamp: r.timestamp,
            actor: r.actor,
            metadata: r.metadata,
            prev_hash: r.prev_hash,
            hash: r.hash,
            version: r.version,
        }
    }
}

mod rfc3339_nanos {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// New Event (draft)
// =============================================================================

/// An event that has not been appended yet.
///
/// The store fills in `id` and `timestamp` when they are absent, links the
/// draft to the chain head and computes the hash.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: Option<String>,
    pub event_type: EventType,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub actor: String,
    pub metadata: Metadata,
}

impl NewEvent {
    pub fn new(
        event_type: impl Into<EventType>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            timestamp: None,
            actor: SYSTEM_ACTOR.to_string(),
            metadata: Metadata::new(),
        }
    }

    /// A task lifecycle event; `task_id` is set both as aggregate and metadata.
    pub fn task(event_type: EventType, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::new(event_type, "task", task_id.clone()).meta("task_id", task_id)
    }

    /// A drift event for one component and drift type.
    pub fn drift(
        event_type: EventType,
        component_id: impl Into<String>,
        drift_type: impl Into<String>,
    ) -> Self {
        let component_id = component_id.into();
        Self::new(event_type, "component", component_id.clone())
            .meta("component_id", component_id)
            .meta("drift_type", drift_type.into())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Turn the draft into a chained event following `prev_hash`.
    pub fn seal(self, prev_hash: &str) -> Event {
        let mut event = Event {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            actor: self.actor,
            metadata: self.metadata,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
            version: EVENT_SCHEMA_VERSION,
        };
        event.hash = calculate_hash(&event);
        event
    }
}

// =============================================================================
// Typed Payloads
// =============================================================================

/// Drift observation carried by `drift.detected`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSignal<'a> {
    pub component_id: &'a str,
    pub drift_type: &'a str,
    pub issue_count: i64,
    pub severity: &'a str,
    pub description: &'a str,
}

/// Closed, typed view of an event, resolved from its type and metadata.
///
/// Missing metadata keys resolve to empty strings and zeros, never errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    TaskStarted { task_id: &'a str },
    TaskCompleted { task_id: &'a str },
    TaskVerified { task_id: &'a str },
    TaskBlocked { task_id: &'a str, reason: &'a str },
    TaskUnblocked { task_id: &'a str },
    TaskTransitioned { task_id: &'a str, to_status: &'a str },
    ExternalRefLinked {
        task_id: &'a str,
        provider: &'a str,
        external_id: &'a str,
        url: &'a str,
    },
    DriftDetected(DriftSignal<'a>),
    DriftAccepted { component_id: &'a str, drift_type: &'a str },
    DriftResolved { component_id: &'a str, drift_type: &'a str },
    /// Spec, plan and task-creation facts; recorded for audit only.
    Lifecycle,
    /// An unknown event type.
    Other,
}

impl<'a> Payload<'a> {
    pub fn from_event(event: &'a Event) -> Self {
        let m = &event.metadata;
        let task_id = m.get_str("task_id");
        match &event.event_type {
            EventType::TaskStarted => Payload::TaskStarted { task_id },
            EventType::TaskCompleted => Payload::TaskCompleted { task_id },
            EventType::TaskVerified => Payload::TaskVerified { task_id },
            EventType::TaskBlocked => Payload::TaskBlocked {
                task_id,
                reason: m.get_str("reason"),
            },
            EventType::TaskUnblocked => Payload::TaskUnblocked { task_id },
            EventType::TaskTransitioned => Payload::TaskTransitioned {
                task_id,
                to_status: m.get_str("to_status"),
            },
            EventType::ExternalRefLinked => Payload::ExternalRefLinked {
                task_id,
                provider: m.get_str("provider"),
                external_id: m.get_str("external_id"),
                url: m.get_str("url"),
            },
            EventType::DriftDetected => Payload::DriftDetected(DriftSignal {
                component_id: m.get_str("component_id"),
                drift_type: m.get_str("drift_type"),
                issue_count: m.get_i64("issue_count"),
                severity: m.get_str("severity"),
                description: m.get_str("description"),
            }),
            EventType::DriftAccepted => Payload::DriftAccepted {
                component_id: m.get_str("component_id"),
                drift_type: m.get_str("drift_type"),
            },
            EventType::DriftResolved => Payload::DriftResolved {
                component_id: m.get_str("component_id"),
                drift_type: m.get_str("drift_type"),
            },
            EventType::SpecCreated
            | EventType::SpecUpdated
            | EventType::PlanCreated
            | EventType::PlanUpdated
            | EventType::TaskCreated => Payload::Lifecycle,
            EventType::Custom(_) => Payload::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trips_strings() {
        for name in ["task.started", "external_ref.linked", "drift.resolved", "billing.recorded"] {
            let parsed = EventType::from(name);
            assert_eq!(parsed.as_str(), name);
            assert_eq!(String::from(parsed), name);
        }
        assert_eq!(EventType::from("task.completed"), EventType::TaskCompleted);
        assert!(matches!(EventType::from("billing.recorded"), EventType::Custom(_)));
    }

    #[test]
    fn test_metadata_accessors_degrade_to_zero() {
        let m = Metadata::new()
            .with("name", "alpha")
            .with("count", 3)
            .with("ratio", 0.5)
            .with("whole", 4.0)
            .with("flag", true)
            .with("negative", -2);

        assert_eq!(m.get_str("name"), "alpha");
        assert_eq!(m.get_str("count"), "");
        assert_eq!(m.get_str("missing"), "");
        assert_eq!(m.get_i64("count"), 3);
        assert_eq!(m.get_i64("whole"), 4);
        assert_eq!(m.get_i64("ratio"), 0);
        assert_eq!(m.get_i64("name"), 0);
        assert_eq!(m.get_u64("negative"), 0);
        assert_eq!(m.get_f64("ratio"), 0.5);
        assert_eq!(m.get_f64("name"), 0.0);
        assert!(m.get_bool("flag"));
        assert!(!m.get_bool("count"));
        assert!(m.get_time("name").is_none());
    }

    #[test]
    fn test_seal_fills_defaults_and_hash() {
        let event = NewEvent::task(EventType::TaskStarted, "task-1")
            .actor("alice")
            .seal("");

        assert!(!event.id.is_empty());
        assert_eq!(event.prev_hash, "");
        assert_eq!(event.version, EVENT_SCHEMA_VERSION);
        assert_eq!(event.aggregate_type, "task");
        assert_eq!(event.metadata.get_str("task_id"), "task-1");
        assert!(event.has_valid_hash());
    }

    #[test]
    fn test_seal_keeps_supplied_id_and_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.000000006Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = NewEvent::new(EventType::PlanCreated, "plan", "plan-9")
            .with_id("evt-1")
            .at(ts)
            .seal("abc");

        assert_eq!(event.id, "evt-1");
        assert_eq!(event.timestamp, ts);
        assert_eq!(event.prev_hash, "abc");
    }

    #[test]
    fn test_wire_format_fields() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.1Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = NewEvent::task(EventType::TaskCompleted, "task-1").at(ts).seal("");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], json!("task.completed"));
        assert_eq!(value["action"], json!("task.completed"));
        assert_eq!(value["timestamp"], json!("2026-01-02T03:04:05.100000000Z"));
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["metadata"]["task_id"], json!("task-1"));

        let restored: Event = serde_json::from_value(value).unwrap();
        assert_eq!(restored, event);
        assert!(restored.has_valid_hash());
    }

    #[test]
    fn test_empty_metadata_omitted() {
        let event = NewEvent::new(EventType::SpecCreated, "spec", "spec-1").seal("");
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_payload_resolution() {
        let event = NewEvent::drift(EventType::DriftDetected, "api", "schema")
            .meta("issue_count", 4)
            .seal("");
        match event.payload() {
            Payload::DriftDetected(signal) => {
                assert_eq!(signal.component_id, "api");
                assert_eq!(signal.drift_type, "schema");
                assert_eq!(signal.issue_count, 4);
                assert_eq!(signal.severity, "");
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let malformed = NewEvent::new(EventType::TaskTransitioned, "task", "t")
            .meta("task_id", 12)
            .seal("");
        assert_eq!(
            malformed.payload(),
            Payload::TaskTransitioned { task_id: "", to_status: "" }
        );

        let custom = NewEvent::new("billing.recorded", "invoice", "inv-1").seal("");
        assert_eq!(custom.payload(), Payload::Other);
    }
}
