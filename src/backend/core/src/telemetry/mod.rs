//! Telemetry: structured logging for the audit engine and its CLI.
//!
//! Metrics are emitted through the `metrics` facade at the call sites
//! (`planwright_events_appended_total`, `planwright_state_conflicts_total`, ...);
//! installing an exporter is left to the embedding application.

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
