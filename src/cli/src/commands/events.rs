//! Event log commands.
//!
//! Provides list and record operations on the hash-chained log.

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use planwright_core::events::{DispatchContext, Event, EventType, Metadata, NewEvent};
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum EventCommands {
    /// List events in log order
    List {
        /// Only events for this aggregate
        #[arg(short, long)]
        aggregate: Option<String>,

        /// Only events of this type (e.g. task.completed)
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,

        /// Only events at or after this RFC3339 timestamp
        #[arg(short, long)]
        since: Option<DateTime<Utc>>,
    },

    /// Append an event and fold it into every projection
    Record {
        /// Event type (e.g. task.started)
        #[arg(short = 't', long = "type")]
        event_type: String,

        /// Aggregate id
        #[arg(short, long)]
        aggregate: String,

        /// Aggregate type
        #[arg(long, default_value = "task")]
        aggregate_type: String,

        /// Acting user or system
        #[arg(long)]
        actor: Option<String>,

        /// Metadata entry as key=value; values parse as JSON when they can
        #[arg(short, long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, Value)>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct EventRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "Aggregate")]
    aggregate: String,
    #[tabled(rename = "Actor")]
    actor: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

impl EventRow {
    fn new(index: usize, event: &Event) -> Self {
        Self {
            index,
            event_type: event.event_type.to_string(),
            aggregate: format!("{}/{}", event.aggregate_type, event.aggregate_id),
            actor: event.actor.clone(),
            timestamp: output::when(Some(event.timestamp)),
            hash: output::short(&event.hash),
        }
    }
}

/// Parse one `key=value` metadata argument.
fn parse_meta(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{}'", raw);
    };
    if key.is_empty() {
        bail!("metadata key must not be empty");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Build the draft for `events record`.
///
/// Task and drift projections key on `task_id` and `component_id`, so the
/// aggregate id fills whichever one the command line left out.
fn draft_event(
    event_type: &str,
    aggregate_type: String,
    aggregate: String,
    meta: Vec<(String, Value)>,
) -> NewEvent {
    let event_type = EventType::from(event_type.to_string());
    let mut metadata: Metadata = meta.into_iter().collect();

    let subject_key = if event_type.as_str().starts_with("drift.") {
        Some("component_id")
    } else if aggregate_type == "task" {
        Some("task_id")
    } else {
        None
    };
    if let Some(key) = subject_key {
        if !metadata.contains_key(key) {
            metadata.insert(key, aggregate.clone());
        }
    }

    NewEvent::new(event_type, aggregate_type, aggregate).with_metadata(metadata)
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: EventCommands, ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;

    match cmd {
        EventCommands::List {
            aggregate,
            event_type,
            since,
        } => {
            let store = engine.store();
            let mut events = match (&aggregate, since) {
                (Some(id), _) => store.load_by_aggregate(id)?,
                (None, Some(since)) => store.load_since(since)?,
                (None, None) => store.load_all()?,
            };
            if let Some(since) = since {
                events.retain(|e| e.timestamp >= since);
            }
            if let Some(kind) = event_type {
                let kind = EventType::from(kind);
                events.retain(|e| e.event_type == kind);
            }

            let rows: Vec<EventRow> = events
                .iter()
                .enumerate()
                .map(|(i, e)| EventRow::new(i, e))
                .collect();
            output::print_rows(&rows, &events, format)?;
        }

        EventCommands::Record {
            event_type,
            aggregate,
            aggregate_type,
            actor,
            meta,
        } => {
            let mut draft = draft_event(&event_type, aggregate_type, aggregate, meta);
            if let Some(actor) = actor {
                draft = draft.actor(actor);
            }

            let (event, dispatched) = engine.record_async(DispatchContext::new(), draft)?;
            let dispatch = dispatched.await.context("Dispatch task ended without a result")?;

            match format {
                OutputFormat::Table => {
                    output::print_success("Event recorded");
                    output::print_detail("ID", &event.id);
                    output::print_detail("Type", event.event_type.as_str());
                    output::print_detail("Hash", &event.hash);
                    output::print_detail("Prev", &event.prev_hash);
                }
                _ => output::print_item(&event, format)?,
            }
            if let Err(e) = dispatch {
                output::print_warning(&format!("handler failed: {}", e));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta_json_and_string() {
        assert_eq!(parse_meta("count=3").unwrap(), ("count".to_string(), Value::from(3)));
        assert_eq!(
            parse_meta("reason=waiting on api").unwrap(),
            ("reason".to_string(), Value::from("waiting on api"))
        );
        assert_eq!(parse_meta("url=a=b").unwrap().1, Value::from("a=b"));
    }

    #[test]
    fn test_parse_meta_rejects_missing_separator() {
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=1").is_err());
    }

    #[test]
    fn test_task_record_fills_task_id() {
        let draft = draft_event("task.started", "task".into(), "t1".into(), vec![]);
        assert_eq!(draft.metadata.get_str("task_id"), "t1");

        let explicit = draft_event(
            "task.started",
            "task".into(),
            "t1".into(),
            vec![("task_id".into(), Value::from("t9"))],
        );
        assert_eq!(explicit.metadata.get_str("task_id"), "t9");
    }

    #[test]
    fn test_drift_record_fills_component_id() {
        let draft = draft_event(
            "drift.detected",
            "component".into(),
            "api".into(),
            vec![("drift_type".into(), Value::from("schema"))],
        );
        assert_eq!(draft.metadata.get_str("component_id"), "api");
        assert!(!draft.metadata.contains_key("task_id"));

        let plan = draft_event("plan.created", "plan".into(), "p1".into(), vec![]);
        assert!(plan.metadata.is_empty());
    }
}
