#![allow(clippy::result_large_err)]
//! # Planwright Core
//!
//! Event-sourced audit and derived-state engine for project planning.
//!
//! ## Architecture
//!
//! - **Events**: Hash-chained JSONL event log with on-demand integrity verification
//! - **Dispatcher**: Ordered sync/async fan-out to live handlers
//! - **Publisher**: Lossy broadcast to live subscribers
//! - **Projections**: Replayable task state, velocity, drift/debt and audit views
//! - **State**: Execution snapshots guarded by optimistic version checks
//! - **Engine**: Composition root wiring everything together
//! - **Telemetry**: Structured logging via `tracing`

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod projections;
pub mod state;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, PlanError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ServiceIdentity};
    pub use crate::engine::{AuditEngine, EngineStatus, Recorded};
    pub use crate::error::{
        ConflictError, DispatchError, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity,
        PlanError, Result,
    };
    pub use crate::events::{
        DispatchContext, Event, EventDispatcher, EventHandler, EventPublisher, EventStore,
        EventType, IntegrityViolation, Metadata, NewEvent, Payload,
    };
    pub use crate::projections::{
        DebtCategory, DebtItem, DriftHistoryProjection, ExtendedVelocityProjection, Projection,
        ProjectionSet, TaskState, TaskStateProjection, TaskStatus, VelocityProjection,
    };
    pub use crate::state::{ExecutionState, StateStore, TaskResult};
}
