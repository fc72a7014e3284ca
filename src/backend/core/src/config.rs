//! Configuration management.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;
use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Identity reported by tool handlers and logs
    #[serde(default)]
    pub service: ServiceIdentity,

    /// On-disk locations
    #[serde(default)]
    pub store: StoreConfig,

    /// Live event dispatch
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Lossy broadcast to live subscribers
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Velocity projection windows
    #[serde(default)]
    pub velocity: VelocityConfig,

    /// Drift categorization thresholds
    #[serde(default)]
    pub drift: DriftConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Immutable server identity, injected at construction instead of read from globals.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceIdentity {
    #[serde(default = "default_service_name")]
    pub name: String,

    #[serde(default = "default_service_version")]
    pub version: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Append-only JSONL event log
    #[serde(default = "default_events_path")]
    pub events_path: PathBuf,

    /// Directory holding one execution snapshot per project
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            events_path: default_events_path(),
            state_dir: default_state_dir(),
        }
    }
}

impl StoreConfig {
    /// Place both the log and the state directory under `root`.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            events_path: root.join("events.jsonl"),
            state_dir: root.join("state"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatcherConfig {
    /// Run every handler and aggregate failures instead of stopping at the first
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Events buffered per subscriber before the oldest are dropped
    #[serde(default = "default_publisher_capacity")]
    pub capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            capacity: default_publisher_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VelocityConfig {
    /// Rolling window of the basic velocity projection
    #[serde(default = "default_basic_window_days")]
    pub basic_window_days: i64,

    /// Window set of the extended velocity projection
    #[serde(default = "default_velocity_windows")]
    pub windows: Vec<i64>,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            basic_window_days: default_basic_window_days(),
            windows: default_velocity_windows(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriftConfig {
    /// Pending longer than this many days counts as neglect
    #[serde(default = "default_neglect_days")]
    pub neglect_days: i64,

    /// More detections than this (within `churn_max_days`) counts as churn
    #[serde(default = "default_churn_detections")]
    pub churn_detections: u64,

    #[serde(default = "default_churn_max_days")]
    pub churn_max_days: i64,

    /// `issue_count` at or above which the drift alert handler fires
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: i64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            neglect_days: default_neglect_days(),
            churn_detections: default_churn_detections(),
            churn_max_days: default_churn_max_days(),
            alert_threshold: default_alert_threshold(),
        }
    }
}

// Default value functions
fn default_service_name() -> String { "planwright".to_string() }
fn default_service_version() -> String { env!("CARGO_PKG_VERSION").to_string() }
fn default_events_path() -> PathBuf { PathBuf::from(".planwright/events.jsonl") }
fn default_state_dir() -> PathBuf { PathBuf::from(".planwright/state") }
fn default_publisher_capacity() -> usize { 256 }
fn default_basic_window_days() -> i64 { 7 }
fn default_velocity_windows() -> Vec<i64> { vec![7, 14, 30] }
fn default_neglect_days() -> i64 { 14 }
fn default_churn_detections() -> u64 { 3 }
fn default_churn_max_days() -> i64 { 7 }
fn default_alert_threshold() -> i64 { 10 }

impl Config {
    /// Load configuration from the environment (`PLANWRIGHT__STORE__EVENTS_PATH`, ...).
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PLANWRIGHT").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PLANWRIGHT").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
