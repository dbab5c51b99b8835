//! Subscription registry mapping event types to subscriber queues.

use crate::envelope::QueueName;
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Keyed store of event subscriptions.
///
/// A plain lookup used by the bus core to fan events out to subscriber
/// queues; implementations need no retry or concurrency machinery beyond
/// being safe to share.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Record that the queue subscribes to the event type. Idempotent.
    async fn store(&self, event_type: &str, subscriber: &QueueName)
        -> Result<(), TransportError>;

    /// Remove the queue's subscription to the event type, if present
    async fn remove(
        &self,
        event_type: &str,
        subscriber: &QueueName,
    ) -> Result<(), TransportError>;

    /// All queues subscribed to the event type
    async fn subscribers(&self, event_type: &str) -> Result<Vec<QueueName>, TransportError>;
}

/// In-memory subscription store for testing and development
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<HashMap<String, Vec<QueueName>>>,
}

impl InMemorySubscriptionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn store(
        &self,
        event_type: &str,
        subscriber: &QueueName,
    ) -> Result<(), TransportError> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("subscription store lock poisoned");
        let subscribers = subscriptions.entry(event_type.to_string()).or_default();

        if !subscribers.contains(subscriber) {
            subscribers.push(subscriber.clone());
        }

        Ok(())
    }

    async fn remove(
        &self,
        event_type: &str,
        subscriber: &QueueName,
    ) -> Result<(), TransportError> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("subscription store lock poisoned");

        if let Some(subscribers) = subscriptions.get_mut(event_type) {
            subscribers.retain(|queue| queue != subscriber);
        }

        Ok(())
    }

    async fn subscribers(&self, event_type: &str) -> Result<Vec<QueueName>, TransportError> {
        let subscriptions = self
            .subscriptions
            .read()
            .expect("subscription store lock poisoned");

        Ok(subscriptions.get(event_type).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "subscriptions_tests.rs"]
mod tests;
