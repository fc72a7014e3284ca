//! Lossy broadcast of appended events to live subscribers.
//!
//! Delivery is at-most-once. Each subscription has a bounded ring of
//! `capacity` events; a subscriber that falls further behind loses the
//! oldest ones. The loss is counted and logged, and never blocks `publish`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

use super::event::Event;

/// Fan-out point for live events.
pub struct EventPublisher {
    sender: broadcast::Sender<Event>,
    capacity: usize,
    published: AtomicU64,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            published: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish to every live subscription, returning how many received it.
    pub fn publish(&self, event: &Event) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(event.clone()) {
            Ok(receivers) => receivers,
            // No subscribers right now.
            Err(_) => 0,
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Drive `subscriber` on a task until the publisher is dropped.
    pub fn spawn_subscriber(&self, subscriber: Arc<dyn EventSubscriber>) -> JoinHandle<()> {
        let mut subscription = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                subscriber.on_event(event).await;
            }
            tracing::debug!(
                subscriber = subscriber.name(),
                dropped = subscription.dropped(),
                "Subscriber stopped"
            );
        })
    }
}

/// One receiver of the publisher's stream.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    dropped: u64,
}

impl Subscription {
    /// Next event, skipping over any lag gap. `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => self.record_lag(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => self.record_lag(missed),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events this subscription lost to lag so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, missed: u64) {
        self.dropped += missed;
        counter!("planwright_publisher_dropped_total").increment(missed);
        tracing::warn!(missed, total_dropped = self.dropped, "Slow subscriber dropped events");
    }
}

/// Async consumer driven by [`EventPublisher::spawn_subscriber`].
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: Event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, NewEvent};
    use parking_lot::Mutex;

    fn event(task: &str) -> Event {
        NewEvent::task(EventType::TaskStarted, task).seal("")
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::new(4);
        assert_eq!(publisher.publish(&event("a")), 0);
        assert_eq!(publisher.published_count(), 1);
    }

    #[test]
    fn test_each_subscription_sees_each_event_once() {
        let publisher = EventPublisher::new(8);
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();

        assert_eq!(publisher.publish(&event("a")), 2);
        assert_eq!(publisher.publish(&event("b")), 2);

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.try_recv().unwrap().aggregate_id, "a");
            assert_eq!(sub.try_recv().unwrap().aggregate_id, "b");
            assert!(sub.try_recv().is_none());
        }
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let publisher = EventPublisher::new(8);
        publisher.publish(&event("early"));
        let mut sub = publisher.subscribe();
        publisher.publish(&event("late"));

        assert_eq!(sub.try_recv().unwrap().aggregate_id, "late");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_slow_subscriber_loses_oldest() {
        let publisher = EventPublisher::new(2);
        let mut sub = publisher.subscribe();
        for task in ["a", "b", "c", "d"] {
            publisher.publish(&event(task));
        }

        assert_eq!(sub.try_recv().unwrap().aggregate_id, "c");
        assert_eq!(sub.try_recv().unwrap().aggregate_id, "d");
        assert_eq!(sub.dropped(), 2);
    }

    struct Collector {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSubscriber for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        async fn on_event(&self, event: Event) {
            self.seen.lock().push(event.aggregate_id);
        }
    }

    #[tokio::test]
    async fn test_spawned_subscriber_runs_until_close() {
        let publisher = EventPublisher::new(8);
        let collector = Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
        });
        let handle = publisher.spawn_subscriber(collector.clone());

        publisher.publish(&event("a"));
        publisher.publish(&event("b"));
        drop(publisher);

        handle.await.unwrap();
        assert_eq!(*collector.seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }
}
