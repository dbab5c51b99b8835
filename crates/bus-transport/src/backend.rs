//! Backend traits implemented by concrete queueing providers.
//!
//! The transport is written against these seams only. A backend supplies
//! per-queue clients, push delivery with at most one in-flight message per
//! queue, and peek-lock message handles. Wire serialization of envelope
//! bodies is the backend's concern.

use crate::envelope::{Envelope, NativeMessage, QueueName};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Provisioning options applied when a queue is created
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How long a delivered message stays locked before redelivery
    pub lock_duration: Duration,
    /// Deliveries after which the backend gives up on a message
    pub max_delivery_count: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(5 * 60),
            max_delivery_count: 1000,
        }
    }
}

/// Future the backend awaits before delivering the next message to a queue
pub type CompletionFuture = BoxFuture<'static, ()>;

/// Receives pushed deliveries from a backend client.
///
/// The backend must not deliver another message for the same queue until the
/// returned completion future resolves. A `None` return refuses the delivery;
/// the backend must then abandon the message so it is redelivered later.
pub trait DeliveryHandler: Send + Sync {
    /// Offer a delivered message to the handler
    fn deliver(&self, message: Arc<dyn BackendMessage>) -> Option<CompletionFuture>;
}

/// Entry point to a queueing backend
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create the queue if it does not exist. Idempotent; safe to re-call.
    async fn ensure_queue(
        &self,
        queue: &QueueName,
        options: &QueueOptions,
    ) -> Result<(), TransportError>;

    /// Delete the queue and everything in it
    async fn delete_queue(&self, queue: &QueueName) -> Result<(), TransportError>;

    /// Create a client for one queue
    async fn create_client(
        &self,
        queue: &QueueName,
    ) -> Result<Arc<dyn BackendClient>, TransportError>;
}

/// Per-queue client handle
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Send a single message
    async fn send(&self, message: NativeMessage) -> Result<(), TransportError>;

    /// Send several messages as one atomic batch operation
    async fn send_batch(&self, messages: Vec<NativeMessage>) -> Result<(), TransportError>;

    /// Check whether the underlying handle has been closed
    fn is_closed(&self) -> bool;

    /// Close the underlying handle
    async fn close(&self) -> Result<(), TransportError>;

    /// Register the push-delivery handler for this queue.
    ///
    /// At most one message is in flight per queue: the backend awaits each
    /// delivery's completion future before offering the next message.
    fn start_receiving(&self, handler: Arc<dyn DeliveryHandler>) -> Result<(), TransportError>;
}

/// A message held under a peek lock
#[async_trait]
pub trait BackendMessage: Send + Sync {
    /// Backend-assigned message id
    fn message_id(&self) -> &str;

    /// Decode the envelope carried by this message
    fn envelope(&self) -> Result<Envelope, TransportError>;

    /// Acknowledge the message as successfully processed
    async fn complete(&self) -> Result<(), TransportError>;

    /// Release the message for redelivery
    async fn abandon(&self) -> Result<(), TransportError>;

    /// Renew the peek lock so a long-running handler keeps its hold
    async fn renew_lock(&self) -> Result<(), TransportError>;
}
