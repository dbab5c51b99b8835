//! In-memory queue backend for testing and development.
//!
//! Implements the full backend contract against process-local state:
//! peek-lock delivery with lock tokens, abandon-driven redelivery with
//! delivery counting, atomic batch sends, and a per-client delivery pump
//! that pushes at most one message at a time and waits for the handler's
//! completion future, the way a managed backend's callback dispatcher does.

use crate::backend::{
    BackendClient, BackendMessage, DeliveryHandler, QueueBackend, QueueOptions,
};
use crate::envelope::{Envelope, NativeMessage, QueueName};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// How long a refused delivery waits before it is offered again
const REDELIVERY_PAUSE: Duration = Duration::from_millis(10);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in a queue
#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    envelope: Envelope,
    delivery_count: u32,
}

/// Mutable state of a single queue
struct QueueInner {
    options: QueueOptions,
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, StoredMessage>,
}

/// A single queue: its messages plus the wakeup for waiting pumps
struct QueueState {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl QueueState {
    fn new(options: QueueOptions) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                options,
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }
}

/// Shared storage for all queues of one backend instance
struct BackendState {
    queues: RwLock<HashMap<QueueName, Arc<QueueState>>>,
}

impl BackendState {
    /// Get the queue, creating it with default options on first access
    fn queue(&self, queue: &QueueName) -> Arc<QueueState> {
        {
            let queues = self.queues.read().expect("queue map lock poisoned");
            if let Some(state) = queues.get(queue) {
                return Arc::clone(state);
            }
        }

        let mut queues = self.queues.write().expect("queue map lock poisoned");
        Arc::clone(
            queues
                .entry(queue.clone())
                .or_insert_with(|| Arc::new(QueueState::new(QueueOptions::default()))),
        )
    }
}

// ============================================================================
// InMemoryBackend
// ============================================================================

/// In-memory queue backend
pub struct InMemoryBackend {
    state: Arc<BackendState>,
}

impl InMemoryBackend {
    /// Create a backend with no queues
    pub fn new() -> Self {
        Self {
            state: Arc::new(BackendState {
                queues: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Number of messages waiting in the queue (testing aid)
    pub fn ready_count(&self, queue: &QueueName) -> usize {
        let state = self.state.queue(queue);
        let inner = state.inner.lock().expect("queue lock poisoned");
        inner.ready.len()
    }

    /// Number of messages currently locked in the queue (testing aid)
    pub fn in_flight_count(&self, queue: &QueueName) -> usize {
        let state = self.state.queue(queue);
        let inner = state.inner.lock().expect("queue lock poisoned");
        inner.in_flight.len()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn ensure_queue(
        &self,
        queue: &QueueName,
        options: &QueueOptions,
    ) -> Result<(), TransportError> {
        let mut queues = self.state.queues.write().expect("queue map lock poisoned");
        queues
            .entry(queue.clone())
            .or_insert_with(|| Arc::new(QueueState::new(options.clone())));
        Ok(())
    }

    async fn delete_queue(&self, queue: &QueueName) -> Result<(), TransportError> {
        let mut queues = self.state.queues.write().expect("queue map lock poisoned");
        match queues.remove(queue) {
            Some(state) => {
                // Wake any pump blocked on the deleted queue.
                state.notify.notify_waiters();
                Ok(())
            }
            None => Err(TransportError::QueueNotFound {
                queue_name: queue.to_string(),
            }),
        }
    }

    async fn create_client(
        &self,
        queue: &QueueName,
    ) -> Result<Arc<dyn BackendClient>, TransportError> {
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(InMemoryClient {
            queue: queue.clone(),
            state: Arc::clone(&self.state),
            closed: Arc::new(AtomicBool::new(false)),
            pump_started: AtomicBool::new(false),
            shutdown,
        }))
    }
}

// ============================================================================
// InMemoryClient
// ============================================================================

/// Per-queue client over the shared backend state
struct InMemoryClient {
    queue: QueueName,
    state: Arc<BackendState>,
    closed: Arc<AtomicBool>,
    pump_started: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl InMemoryClient {
    fn ensure_usable(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Communication {
                message: format!("client for queue '{}' is closed", self.queue),
            });
        }
        Ok(())
    }

    fn stored_from(native: NativeMessage) -> StoredMessage {
        StoredMessage {
            message_id: native.message_id().to_string(),
            envelope: native.envelope().clone(),
            delivery_count: 0,
        }
    }
}

#[async_trait]
impl BackendClient for InMemoryClient {
    async fn send(&self, message: NativeMessage) -> Result<(), TransportError> {
        self.ensure_usable()?;

        let queue_state = self.state.queue(&self.queue);
        {
            let mut inner = queue_state.inner.lock().expect("queue lock poisoned");
            inner.ready.push_back(Self::stored_from(message));
        }
        queue_state.notify.notify_one();
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<NativeMessage>) -> Result<(), TransportError> {
        self.ensure_usable()?;

        let queue_state = self.state.queue(&self.queue);
        {
            // One lock hold for the whole batch keeps it atomic.
            let mut inner = queue_state.inner.lock().expect("queue lock poisoned");
            for message in messages {
                inner.ready.push_back(Self::stored_from(message));
            }
        }
        queue_state.notify.notify_one();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
        Ok(())
    }

    fn start_receiving(&self, handler: Arc<dyn DeliveryHandler>) -> Result<(), TransportError> {
        self.ensure_usable()?;

        if self
            .pump_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::Configuration {
                message: format!(
                    "push delivery already configured for queue '{}'",
                    self.queue
                ),
            });
        }

        let queue = self.queue.clone();
        let state = Arc::clone(&self.state);
        let closed = Arc::clone(&self.closed);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                if closed.load(Ordering::Acquire) {
                    break;
                }

                let queue_state = state.queue(&queue);

                let taken = {
                    let mut inner = queue_state.inner.lock().expect("queue lock poisoned");
                    let max_delivery_count = inner.options.max_delivery_count;
                    inner.ready.pop_front().map(|stored| (stored, max_delivery_count))
                };

                let (mut stored, max_delivery_count) = match taken {
                    Some(taken) => taken,
                    None => {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = queue_state.notify.notified() => continue,
                        }
                    }
                };

                stored.delivery_count += 1;
                if stored.delivery_count > max_delivery_count {
                    warn!(
                        queue = %queue,
                        message_id = %stored.message_id,
                        delivery_count = stored.delivery_count,
                        "message exceeded max delivery count, dropping"
                    );
                    continue;
                }

                let lock_token = Uuid::new_v4().to_string();
                {
                    let mut inner = queue_state.inner.lock().expect("queue lock poisoned");
                    inner.in_flight.insert(lock_token.clone(), stored.clone());
                }

                let message = Arc::new(InMemoryMessage {
                    queue: queue.clone(),
                    state: Arc::clone(&state),
                    lock_token,
                    message_id: stored.message_id.clone(),
                    envelope: stored.envelope.clone(),
                });

                match handler.deliver(Arc::clone(&message) as Arc<dyn BackendMessage>) {
                    Some(completion) => completion.await,
                    None => {
                        // Refused: release the message for redelivery, and
                        // give the refusing side a moment before offering
                        // the next one.
                        debug!(queue = %queue, message_id = %message.message_id, "delivery refused, abandoning");
                        if let Err(error) = message.abandon().await {
                            warn!(queue = %queue, %error, "could not abandon refused message");
                        }
                        tokio::time::sleep(REDELIVERY_PAUSE).await;
                    }
                }
            }
        });

        Ok(())
    }
}

// ============================================================================
// InMemoryMessage
// ============================================================================

/// A message held under a peek lock, addressed by its lock token
struct InMemoryMessage {
    queue: QueueName,
    state: Arc<BackendState>,
    lock_token: String,
    message_id: String,
    envelope: Envelope,
}

impl InMemoryMessage {
    /// Take the message out of the in-flight set, failing when the lock is
    /// no longer held.
    fn take_locked(&self) -> Result<StoredMessage, TransportError> {
        let queue_state = self.state.queue(&self.queue);
        let mut inner = queue_state.inner.lock().expect("queue lock poisoned");
        inner
            .in_flight
            .remove(&self.lock_token)
            .ok_or_else(|| TransportError::LockLost {
                message_id: self.message_id.clone(),
            })
    }
}

#[async_trait]
impl BackendMessage for InMemoryMessage {
    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn envelope(&self) -> Result<Envelope, TransportError> {
        Ok(self.envelope.clone())
    }

    async fn complete(&self) -> Result<(), TransportError> {
        self.take_locked().map(|_| ())
    }

    async fn abandon(&self) -> Result<(), TransportError> {
        let stored = self.take_locked()?;

        let queue_state = self.state.queue(&self.queue);
        {
            let mut inner = queue_state.inner.lock().expect("queue lock poisoned");
            inner.ready.push_front(stored);
        }
        queue_state.notify.notify_one();
        Ok(())
    }

    async fn renew_lock(&self) -> Result<(), TransportError> {
        let queue_state = self.state.queue(&self.queue);
        let inner = queue_state.inner.lock().expect("queue lock poisoned");
        if inner.in_flight.contains_key(&self.lock_token) {
            Ok(())
        } else {
            Err(TransportError::LockLost {
                message_id: self.message_id.clone(),
            })
        }
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
