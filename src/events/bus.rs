//! Topic-based publish/subscribe with per-handler fault isolation

use super::{BusEvent, TrackerEvent};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handler invoked synchronously for each event on a topic
pub type EventHandler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Outcome of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// In-process event bus.
///
/// Within a topic, handlers run in subscription order. No ordering holds
/// across topics. A handler that errors or panics is reported and skipped;
/// the remaining handlers and the publisher are unaffected.
pub struct EventBus {
    topics: DashMap<String, Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Register a handler for a topic
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                id,
                handler: Arc::new(handler),
            });

        debug!("Subscribed {:?} to topic {}", id, topic);
        id
    }

    /// Forward a topic into an unbounded channel for async consumers
    pub fn subscribe_channel(
        &self,
        topic: &str,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(topic, move |event| {
            if tx.send(event.clone()).is_err() {
                // Receiver gone; the subscription is inert until removed
                debug!("Channel subscriber for {} dropped", event.topic);
            }
            Ok(())
        });
        (id, rx)
    }

    /// Remove a subscription. Returns false if it was not registered on the topic.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let Some(mut subs) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Number of handlers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver an event to every handler of a topic
    pub fn publish(&self, topic: &str, event: TrackerEvent) -> PublishReport {
        // Snapshot so handlers may (un)subscribe without deadlocking
        let subs: Vec<Subscription> = self
            .topics
            .get(topic)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        crate::metrics::record_event_published(topic);
        debug!(
            "Publishing {} on {} to {} handlers",
            event.name(),
            topic,
            subs.len()
        );

        let bus_event = BusEvent {
            topic: topic.to_string(),
            published_at: Utc::now(),
            event,
        };

        let mut report = PublishReport::default();
        for sub in subs {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (sub.handler)(&bus_event)));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("Handler {:?} failed on topic {}: {}", sub.id, topic, e);
                    crate::metrics::record_handler_failure(topic);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!("Handler {:?} panicked on topic {}", sub.id, topic);
                    crate::metrics::record_handler_failure(topic);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn refund(hash: &str) -> TrackerEvent {
        TrackerEvent::RefundNeeded {
            order_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            bus.subscribe("refund_needed", move |_| {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }

        let report = bus.publish("refund_needed", refund("0x01"));
        assert_eq!(report, PublishReport { delivered: 3, failed: 0 });
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("refund_needed", |_| anyhow::bail!("handler exploded"));
        bus.subscribe("refund_needed", |_| panic!("handler panicked"));
        {
            let seen = seen.clone();
            bus.subscribe("refund_needed", move |event| {
                if let TrackerEvent::RefundNeeded { order_hash } = &event.event {
                    seen.lock().unwrap().push(order_hash.clone());
                }
                Ok(())
            });
        }

        let report = bus.publish("refund_needed", refund("0x02"));
        assert_eq!(report, PublishReport { delivered: 1, failed: 2 });
        assert_eq!(*seen.lock().unwrap(), vec!["0x02".to_string()]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));

        let id = {
            let count = count.clone();
            bus.subscribe("refund_needed", move |_| {
                *count.lock().unwrap() += 1;
                Ok(())
            })
        };

        bus.publish("refund_needed", refund("0x03"));
        assert!(bus.unsubscribe("refund_needed", id));
        assert!(!bus.unsubscribe("refund_needed", id));
        bus.publish("refund_needed", refund("0x03"));

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count("refund_needed"), 0);
    }

    #[test]
    fn test_topics_are_independent() {
        let bus = EventBus::new();
        let (_, mut rx) = bus.subscribe_channel("auction_update");

        let report = bus.publish("refund_needed", refund("0x04"));
        assert_eq!(report.delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        {
            let inner = bus.clone();
            bus.subscribe("refund_needed", move |_| {
                inner.subscribe("refund_needed", |_| Ok(()));
                Ok(())
            });
        }

        let report = bus.publish("refund_needed", refund("0x05"));
        assert_eq!(report.delivered, 1);
        assert_eq!(bus.subscriber_count("refund_needed"), 2);
    }

    #[tokio::test]
    async fn test_channel_subscription_receives_events() {
        let bus = EventBus::new();
        let (_, mut rx) = bus.subscribe_channel("refund_needed");

        bus.publish("refund_needed", refund("0x06"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "refund_needed");
        assert!(matches!(
            event.event,
            TrackerEvent::RefundNeeded { ref order_hash } if order_hash == "0x06"
        ));
    }
}
