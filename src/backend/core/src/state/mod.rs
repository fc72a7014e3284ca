//! Mutable execution snapshots guarded by optimistic locking.
//!
//! Unlike the event log, an [`ExecutionState`] is overwritten in place. Every
//! successful save bumps its `version` by one; a save from a stale copy fails
//! with a version conflict and leaves the file untouched.

pub mod execution;
pub mod store;

pub use execution::{ExecutionState, TaskResult};
pub use store::{StateStore, DEFAULT_UPDATE_RETRIES};
