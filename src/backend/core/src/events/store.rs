//! Append-only, hash-chained event log persisted as JSON lines.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::instrument;

use crate::error::{ErrorCode, PlanError, Result};

use super::canonical::calculate_hash;
use super::event::{Event, EventType, NewEvent};

// =============================================================================
// Integrity Report
// =============================================================================

/// What kind of break `verify_integrity` found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// `prev_hash` does not match the hash of the preceding record.
    ChainMismatch { expected: String, found: String },
    /// The stored hash does not match the recomputed one.
    HashMismatch { stored: String, computed: String },
}

/// A single integrity violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    /// Zero-based position of the record in the log
    pub index: usize,
    pub event_id: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ViolationKind::ChainMismatch { expected, found } => write!(
                f,
                "event #{} ({}): prev_hash {} does not match preceding hash {}",
                self.index, self.event_id, found, expected
            ),
            ViolationKind::HashMismatch { stored, computed } => write!(
                f,
                "event #{} ({}): stored hash {} does not match computed {}",
                self.index, self.event_id, stored, computed
            ),
        }
    }
}

// =============================================================================
// Event Store
// =============================================================================

struct WriterState {
    file: File,
    last_hash: String,
    last_event: Option<Event>,
    count: usize,
    len: u64,
}

/// Persistent event log.
///
/// `append` is the only mutator and takes the exclusive lock; every load takes
/// the shared lock and re-reads the file, so readers never see a half-written
/// record from this process.
pub struct EventStore {
    path: PathBuf,
    writer: RwLock<WriterState>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").field("path", &self.path).finish()
    }
}

impl EventStore {
    /// Open (or create) the log at `path` and recover the chain head.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();

        let events = read_events(&path)?;
        let count = events.len();
        let last_event = events.into_iter().last();
        let last_hash = last_event
            .as_ref()
            .map(|e| e.hash.clone())
            .unwrap_or_default();

        tracing::debug!(events = count, "Event log opened");

        Ok(Self {
            path,
            writer: RwLock::new(WriterState {
                file,
                last_hash,
                last_event,
                count,
                len,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chain, persist and fsync one event.
    #[instrument(skip(self, new_event), fields(event_type = %new_event.event_type))]
    pub fn append(&self, new_event: NewEvent) -> Result<Event> {
        let mut writer = self.writer.write();

        let event = new_event.seal(&writer.last_hash);
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        if let Err(e) = writer.file.write_all(&line).and_then(|_| writer.file.sync_data()) {
            // Drop any partial line so the next append starts on a clean boundary.
            let len = writer.len;
            if let Err(truncate) = writer.file.set_len(len) {
                tracing::error!(error = %truncate, "Failed to roll back partial event write");
            }
            return Err(PlanError::with_internal(
                ErrorCode::EventAppendFailed,
                "Failed to persist event",
                e.to_string(),
            )
            .with_context("event_id", &event.id)
            .with_source(e));
        }

        writer.len += line.len() as u64;
        writer.count += 1;
        writer.last_hash = event.hash.clone();
        writer.last_event = Some(event.clone());

        counter!("planwright_events_appended_total", "type" => event.event_type.to_string())
            .increment(1);
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Event appended");

        Ok(event)
    }

    /// Every event, in append order.
    pub fn load_all(&self) -> Result<Vec<Event>> {
        self.scan(|_| true)
    }

    pub fn load_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<Event>> {
        self.scan(|e| e.aggregate_id == aggregate_id)
    }

    pub fn load_by_type(&self, event_type: &EventType) -> Result<Vec<Event>> {
        self.scan(|e| &e.event_type == event_type)
    }

    /// Events with `timestamp >= since`.
    pub fn load_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>> {
        self.scan(|e| e.timestamp >= since)
    }

    /// Events with `from <= timestamp <= to`.
    pub fn load_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Event>> {
        self.scan(|e| e.timestamp >= from && e.timestamp <= to)
    }

    /// The most recently appended event, if any.
    pub fn get_last_event(&self) -> Option<Event> {
        self.writer.read().last_event.clone()
    }

    /// Hash the next append will chain onto (`""` for an empty log).
    pub fn last_hash(&self) -> String {
        self.writer.read().last_hash.clone()
    }

    pub fn count(&self) -> usize {
        self.writer.read().count
    }

    /// Replay the whole log, recomputing every link and hash.
    ///
    /// Returns every violation found, not just the first.
    #[instrument(skip(self))]
    pub fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>> {
        let events = self.load_all()?;
        let mut violations = Vec::new();
        let mut expected_prev = String::new();

        for (index, event) in events.iter().enumerate() {
            if event.prev_hash != expected_prev {
                violations.push(IntegrityViolation {
                    index,
                    event_id: event.id.clone(),
                    kind: ViolationKind::ChainMismatch {
                        expected: expected_prev.clone(),
                        found: event.prev_hash.clone(),
                    },
                });
            }

            let computed = calculate_hash(event);
            if computed != event.hash {
                violations.push(IntegrityViolation {
                    index,
                    event_id: event.id.clone(),
                    kind: ViolationKind::HashMismatch {
                        stored: event.hash.clone(),
                        computed,
                    },
                });
            }

            expected_prev = event.hash.clone();
        }

        if violations.is_empty() {
            tracing::info!(events = events.len(), "Event log integrity verified");
        } else {
            tracing::warn!(
                events = events.len(),
                violations = violations.len(),
                "Event log integrity violations found"
            );
        }

        Ok(violations)
    }

    fn scan<F>(&self, mut keep: F) -> Result<Vec<Event>>
    where
        F: FnMut(&Event) -> bool,
    {
        let _shared = self.writer.read();
        let mut events = read_events(&self.path)?;
        events.retain(|e| keep(e));
        Ok(events)
    }
}

/// Decode every line of the log, aborting on the first bad record.
fn read_events(path: &Path) -> Result<Vec<Event>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut events = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event =
            serde_json::from_str(&line).map_err(|e| PlanError::event_decode(i + 1, e))?;
        events.push(event);
    }
    Ok(events)
}
