//! Audit Engine - the composition root.
//!
//! Wires the event store, dispatcher, publisher, projections and execution
//! state store together. A recorded event is appended, folded into every
//! projection, dispatched to live handlers and finally broadcast.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::instrument;

use crate::config::{Config, ServiceIdentity};
use crate::error::{PlanError, Result};
use crate::events::{
    DispatchContext, DriftAlertHandler, Event, EventDispatcher, EventHandler, EventPublisher,
    EventStore, EventType, HandlerScope, IntegrityViolation, NewEvent, Subscription,
    UnblockDetector,
};
use crate::projections::{
    system_clock, AuditTimelineProjection, Clock, DriftHistoryProjection, DriftThresholds,
    ExtendedVelocityProjection, ProjectionSet, TaskStateProjection, VelocityProjection,
};
use crate::state::StateStore;

/// Result of recording one event.
#[derive(Debug)]
pub struct Recorded {
    /// The persisted event
    pub event: Event,
    /// Handler failure, if any; the event stays persisted regardless
    pub dispatch_error: Option<PlanError>,
    /// Live subscriptions that received the event
    pub subscribers: usize,
}

/// Snapshot of engine health for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub service: String,
    pub version: String,
    pub events: usize,
    pub last_hash: String,
    pub projections: Vec<&'static str>,
    pub subscribers: usize,
}

/// The event-sourced audit and derived-state engine.
pub struct AuditEngine {
    identity: ServiceIdentity,
    store: Arc<EventStore>,
    dispatcher: Arc<EventDispatcher>,
    publisher: Arc<EventPublisher>,
    projections: ProjectionSet,
    task_state: Arc<TaskStateProjection>,
    velocity: Arc<VelocityProjection>,
    extended_velocity: Arc<ExtendedVelocityProjection>,
    drift: Arc<DriftHistoryProjection>,
    timeline: Arc<AuditTimelineProjection>,
    drift_alerts: Arc<DriftAlertHandler>,
    state: StateStore,
    /// Held across append and apply so projections fold in log order
    commit_lock: Mutex<()>,
}

impl AuditEngine {
    /// Open the engine and rebuild every projection from the log.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with_clock(config, system_clock())
    }

    /// Like [`open`](Self::open) with an explicit clock for time-window queries.
    #[instrument(skip_all, fields(service = %config.service.name))]
    pub fn open_with_clock(config: &Config, clock: Clock) -> Result<Self> {
        let store = Arc::new(EventStore::open(&config.store.events_path)?);
        let state = StateStore::open(&config.store.state_dir)?;

        let task_state = Arc::new(TaskStateProjection::new());
        let velocity = Arc::new(
            VelocityProjection::new(config.velocity.basic_window_days).with_clock(clock.clone()),
        );
        let extended_velocity = Arc::new(
            ExtendedVelocityProjection::new(config.velocity.windows.iter().copied())
                .with_clock(clock.clone()),
        );
        let drift = Arc::new(
            DriftHistoryProjection::new(DriftThresholds::from(&config.drift)).with_clock(clock),
        );
        let timeline = Arc::new(AuditTimelineProjection::new());

        let projections = ProjectionSet::new()
            .with(task_state.clone())
            .with(velocity.clone())
            .with(extended_velocity.clone())
            .with(drift.clone())
            .with(timeline.clone());

        let dispatcher = Arc::new(EventDispatcher::new(config.dispatcher.continue_on_error));
        let drift_alerts = Arc::new(DriftAlertHandler::new(config.drift.alert_threshold));
        dispatcher.register_arc(EventType::DriftDetected, drift_alerts.clone());

        let engine = Self {
            identity: config.service.clone(),
            store,
            dispatcher,
            publisher: Arc::new(EventPublisher::new(config.publisher.capacity)),
            projections,
            task_state,
            velocity,
            extended_velocity,
            drift,
            timeline,
            drift_alerts,
            state,
            commit_lock: Mutex::new(()),
        };

        let replayed = engine.rebuild_projections()?;
        tracing::info!(
            events = replayed,
            version = %engine.identity.version,
            "Audit engine ready"
        );
        Ok(engine)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    pub fn record(&self, new_event: NewEvent) -> Result<Recorded> {
        self.record_with(&DispatchContext::new(), new_event)
    }

    /// Append, project, dispatch synchronously, then publish.
    ///
    /// Only a failed append is an error; handler failures are reported in
    /// [`Recorded::dispatch_error`].
    #[instrument(skip(self, ctx, new_event), fields(event_type = %new_event.event_type))]
    pub fn record_with(&self, ctx: &DispatchContext, new_event: NewEvent) -> Result<Recorded> {
        let event = self.commit(new_event)?;

        let dispatch_error = self.dispatcher.dispatch(ctx, &event).err();
        if let Some(err) = &dispatch_error {
            err.log();
        }

        let subscribers = self.publisher.publish(&event);
        Ok(Recorded {
            event,
            dispatch_error,
            subscribers,
        })
    }

    /// Append and project now; run the handlers on the blocking pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn record_async(
        &self,
        ctx: DispatchContext,
        new_event: NewEvent,
    ) -> Result<(Event, oneshot::Receiver<Result<()>>)> {
        let event = self.commit(new_event)?;
        self.publisher.publish(&event);
        let done = self.dispatcher.dispatch_async(ctx, event.clone());
        Ok((event, done))
    }

    fn commit(&self, new_event: NewEvent) -> Result<Event> {
        let _guard = self.commit_lock.lock();
        let event = self.store.append(new_event)?;
        self.projections.apply(&event);
        Ok(event)
    }

    /// Replace every projection's state with a replay of the full log.
    #[instrument(skip(self))]
    pub fn rebuild_projections(&self) -> Result<usize> {
        let _guard = self.commit_lock.lock();
        let events = self.store.load_all()?;
        self.projections.rebuild(&events);
        Ok(events.len())
    }

    pub fn verify(&self) -> Result<Vec<IntegrityViolation>> {
        self.store.verify_integrity()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handlers & subscribers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_handler(&self, scope: impl Into<HandlerScope>, handler: Arc<dyn EventHandler>) {
        self.dispatcher.register_arc(scope, handler);
    }

    /// Watch completions for dependents that became runnable.
    pub fn register_unblock_detector(
        &self,
        dependencies: BTreeMap<String, Vec<String>>,
    ) -> Arc<UnblockDetector> {
        let detector = Arc::new(UnblockDetector::new(dependencies, self.task_state.clone()));
        self.dispatcher.register_arc(EventType::TaskCompleted, detector.clone());
        self.dispatcher.register_arc(EventType::TaskVerified, detector.clone());
        detector
    }

    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn projections(&self) -> &ProjectionSet {
        &self.projections
    }

    pub fn task_state(&self) -> &TaskStateProjection {
        &self.task_state
    }

    pub fn velocity(&self) -> &VelocityProjection {
        &self.velocity
    }

    pub fn extended_velocity(&self) -> &ExtendedVelocityProjection {
        &self.extended_velocity
    }

    pub fn drift(&self) -> &DriftHistoryProjection {
        &self.drift
    }

    pub fn timeline(&self) -> &AuditTimelineProjection {
        &self.timeline
    }

    pub fn drift_alerts(&self) -> &DriftAlertHandler {
        &self.drift_alerts
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            service: self.identity.name.clone(),
            version: self.identity.version.clone(),
            events: self.store.count(),
            last_hash: self.store.last_hash(),
            projections: self.projections.names(),
            subscribers: self.publisher.subscriber_count(),
        }
    }
}

impl std::fmt::Debug for AuditEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEngine")
            .field("identity", &self.identity)
            .field("store", &self.store)
            .field("projections", &self.projections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::ErrorCode;
    use crate::events::handler_fn;
    use crate::projections::{Projection, TaskStatus};

    fn config_in(dir: &tempfile::TempDir) -> Config {
        Config {
            store: StoreConfig::rooted_at(dir.path()),
            ..Config::default()
        }
    }

    #[test]
    fn test_record_updates_projections_and_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = AuditEngine::open(&config_in(&dir)).unwrap();
        let mut sub = engine.subscribe();

        let recorded = engine
            .record(NewEvent::task(EventType::TaskStarted, "t1").actor("alice"))
            .unwrap();

        assert!(recorded.dispatch_error.is_none());
        assert_eq!(recorded.subscribers, 1);
        assert_eq!(sub.try_recv().unwrap().id, recorded.event.id);
        assert_eq!(
            engine.task_state().get_state("t1").unwrap().status,
            TaskStatus::InProgress
        );
        assert_eq!(engine.timeline().len(), 1);
        assert_eq!(engine.status().events, 1);
    }

    #[test]
    fn test_handler_failure_keeps_event() {
        let dir = tempfile::tempdir().unwrap();
        let engine = AuditEngine::open(&config_in(&dir)).unwrap();
        engine.register_handler(
            "*",
            Arc::new(handler_fn("rejecting", |_, _| {
                Err(PlanError::new(ErrorCode::HandlerFailed, "nope"))
            })),
        );

        let recorded = engine.record(NewEvent::task(EventType::TaskStarted, "t1")).unwrap();
        assert_eq!(
            recorded.dispatch_error.unwrap().code(),
            ErrorCode::HandlerFailed
        );
        assert_eq!(engine.store().count(), 1);
    }

    #[test]
    fn test_reopen_rebuilds_projections() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = AuditEngine::open(&config_in(&dir)).unwrap();
            engine.record(NewEvent::task(EventType::TaskStarted, "t1")).unwrap();
            engine.record(NewEvent::task(EventType::TaskCompleted, "t1")).unwrap();
        }

        let engine = AuditEngine::open(&config_in(&dir)).unwrap();
        assert_eq!(engine.task_state().get_state("t1").unwrap().status, TaskStatus::Done);
        assert_eq!(engine.velocity().total_completions(), 1);
        assert!(engine.verify().unwrap().is_empty());
    }

    #[test]
    fn test_drift_alert_wired() {
        let dir = tempfile::tempdir().unwrap();
        let engine = AuditEngine::open(&config_in(&dir)).unwrap();
        engine
            .record(NewEvent::drift(EventType::DriftDetected, "api", "schema").meta("issue_count", 12))
            .unwrap();
        assert_eq!(engine.drift_alerts().alerts().len(), 1);
        assert_eq!(engine.drift().get_active_debt_items().len(), 1);
    }

    #[tokio::test]
    async fn test_record_async_runs_unblock_detector() {
        let dir = tempfile::tempdir().unwrap();
        let engine = AuditEngine::open(&config_in(&dir)).unwrap();
        let detector = engine.register_unblock_detector(BTreeMap::from([(
            "t2".to_string(),
            vec!["t1".to_string()],
        )]));

        let (event, done) = engine
            .record_async(DispatchContext::new(), NewEvent::task(EventType::TaskCompleted, "t1"))
            .unwrap();
        done.await.unwrap().unwrap();

        let candidates = detector.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].task_id, "t2");
        assert_eq!(candidates[0].unblocked_by, event.metadata.get_str("task_id"));
    }

    #[test]
    fn test_concurrent_records_apply_in_log_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(AuditEngine::open(&config_in(&dir)).unwrap());
        let statuses = ["in_progress", "blocked", "pending", "done"];

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let status = statuses[(worker + i) % statuses.len()];
                        engine
                            .record(
                                NewEvent::task(EventType::TaskTransitioned, "t1")
                                    .actor(format!("worker-{}", worker))
                                    .meta("to_status", status),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = engine.store().load_all().unwrap();
        assert_eq!(events.len(), 200);

        let live_ids: Vec<String> = engine
            .timeline()
            .timeline()
            .into_iter()
            .map(|e| e.event_id)
            .collect();
        let logged_ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        assert_eq!(live_ids, logged_ids);

        let replayed = TaskStateProjection::new();
        replayed.rebuild(&events);
        assert_eq!(
            engine.task_state().get_state("t1").unwrap().status,
            replayed.get_state("t1").unwrap().status
        );
    }
}
