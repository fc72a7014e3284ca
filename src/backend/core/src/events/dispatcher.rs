//! Synchronous fan-out of live events to registered handlers.
//!
//! Handlers register against one event type or against the wildcard `"*"`.
//! `dispatch` runs the matching handlers on the caller's thread in
//! registration order; `dispatch_async` moves one whole dispatch onto the
//! blocking pool and reports back through a oneshot channel.

use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, HandlerFailure, PlanError, Result};

use super::event::{Event, EventType};

/// Scope string that matches every event type.
pub const WILDCARD: &str = "*";

// =============================================================================
// Handler Trait
// =============================================================================

/// A live reaction to an appended event.
pub trait EventHandler: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    fn handle(&self, ctx: &DispatchContext, event: &Event) -> Result<()>;
}

/// Adapter turning a closure into a named handler.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap a closure as an [`EventHandler`].
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(&DispatchContext, &Event) -> Result<()> + Send + Sync,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&DispatchContext, &Event) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, ctx: &DispatchContext, event: &Event) -> Result<()> {
        (self.f)(ctx, event)
    }
}

// =============================================================================
// Dispatch Context
// =============================================================================

/// Per-dispatch context handed to every handler.
///
/// Cancellation is advisory: the dispatcher never checks the token itself.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    cancel: CancellationToken,
    correlation_id: Option<String>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Convenience for handlers: `Err(DispatchCancelled)` once cancelled.
    pub fn check_cancelled(&self, handler: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(PlanError::cancelled(handler))
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Which events a handler receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerScope {
    Type(EventType),
    Wildcard,
}

impl HandlerScope {
    fn matches(&self, event_type: &EventType) -> bool {
        match self {
            HandlerScope::Wildcard => true,
            HandlerScope::Type(t) => t == event_type,
        }
    }
}

impl From<EventType> for HandlerScope {
    fn from(event_type: EventType) -> Self {
        HandlerScope::Type(event_type)
    }
}

impl From<&str> for HandlerScope {
    fn from(value: &str) -> Self {
        if value == WILDCARD {
            HandlerScope::Wildcard
        } else {
            HandlerScope::Type(EventType::from(value))
        }
    }
}

struct Registration {
    scope: HandlerScope,
    handler: Arc<dyn EventHandler>,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Ordered handler registry.
pub struct EventDispatcher {
    registrations: RwLock<Vec<Registration>>,
    continue_on_error: bool,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(false)
    }
}

impl EventDispatcher {
    pub fn new(continue_on_error: bool) -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            continue_on_error,
        }
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn register<H>(&self, scope: impl Into<HandlerScope>, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.register_arc(scope, Arc::new(handler));
    }

    /// Register a handler that is shared with other owners.
    pub fn register_arc(&self, scope: impl Into<HandlerScope>, handler: Arc<dyn EventHandler>) {
        let scope = scope.into();
        tracing::debug!(handler = handler.name(), scope = ?scope, "Handler registered");
        self.registrations.write().push(Registration { scope, handler });
    }

    /// Number of handlers a `event_type` dispatch would invoke, wildcards included.
    pub fn handler_count(&self, event_type: &EventType) -> usize {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.scope.matches(event_type))
            .count()
    }

    pub fn clear(&self) {
        self.registrations.write().clear();
    }

    fn handlers_for(&self, event_type: &EventType) -> Vec<Arc<dyn EventHandler>> {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.scope.matches(event_type))
            .map(|r| Arc::clone(&r.handler))
            .collect()
    }

    /// Run every matching handler in registration order on this thread.
    ///
    /// The registry lock is released before handlers run, so a handler may
    /// register further handlers; those apply from the next dispatch on.
    pub fn dispatch(&self, ctx: &DispatchContext, event: &Event) -> Result<()> {
        let handlers = self.handlers_for(&event.event_type);
        if handlers.is_empty() {
            tracing::trace!(event_type = %event.event_type, "No handlers registered");
            return Ok(());
        }

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(error) = handler.handle(ctx, event) {
                counter!("planwright_dispatch_failures_total", "handler" => handler.name().to_string())
                    .increment(1);
                tracing::warn!(
                    handler = handler.name(),
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %error,
                    "Event handler failed"
                );

                if !self.continue_on_error {
                    return Err(error);
                }
                failures.push(HandlerFailure {
                    handler: handler.name().to_string(),
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PlanError::dispatch_failed(
                event.event_type.as_str(),
                DispatchError::new(failures),
            ))
        }
    }

    /// Run one `dispatch` on the blocking pool.
    ///
    /// Must be called from within a Tokio runtime. The receiver resolves once
    /// every handler has returned.
    pub fn dispatch_async(
        self: &Arc<Self>,
        ctx: DispatchContext,
        event: Event,
    ) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let dispatcher = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let outcome = dispatcher.dispatch(&ctx, &event);
            if tx.send(outcome).is_err() {
                tracing::debug!(event_id = %event.id, "Dispatch result receiver dropped");
            }
        });
        rx
    }
}
