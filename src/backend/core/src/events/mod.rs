//! Event sourcing layer
//!
//! - **`event`**: the hash-chained `Event` record, its `Metadata`, drafts and typed payloads.
//! - **`canonical`**: deterministic metadata serialization and the event hash.
//! - **`store`**: the append-only JSONL `EventStore` with integrity verification.
//! - **`dispatcher`**: synchronous/async fan-out to registered handlers.
//! - **`publisher`**: lossy broadcast to live subscribers.
//! - **`handlers`**: built-in live handlers (drift alerts, unblock detection).

pub mod canonical;
pub mod dispatcher;
pub mod event;
pub mod handlers;
pub mod publisher;
pub mod store;

pub use canonical::{calculate_hash, canonical_json};
pub use dispatcher::{
    handler_fn, DispatchContext, EventDispatcher, EventHandler, FnHandler, HandlerScope, WILDCARD,
};
pub use event::{
    format_timestamp, DriftSignal, Event, EventType, Metadata, NewEvent, Payload,
    EVENT_SCHEMA_VERSION, SYSTEM_ACTOR,
};
pub use handlers::{DriftAlert, DriftAlertHandler, UnblockCandidate, UnblockDetector};
pub use publisher::{EventPublisher, EventSubscriber, Subscription};
pub use store::{EventStore, IntegrityViolation, ViolationKind};
