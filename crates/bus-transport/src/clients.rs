//! Per-destination backend client caching.

use crate::backend::{BackendClient, DeliveryHandler, QueueBackend};
use crate::envelope::QueueName;
use crate::error::TransportError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A cached client handle for one destination.
///
/// Replaced wholesale, never repaired in place, when the underlying handle
/// reports closed.
pub struct ClientContext {
    client: Arc<dyn BackendClient>,
    queue: QueueName,
    receiving: AtomicBool,
}

impl ClientContext {
    fn new(client: Arc<dyn BackendClient>, queue: QueueName) -> Self {
        Self {
            client,
            queue,
            receiving: AtomicBool::new(false),
        }
    }

    /// The backend client handle
    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    /// The destination this context serves
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Register the push-delivery handler once for this context.
    ///
    /// Concurrent callers race on an atomic flag; exactly one performs the
    /// registration and the rest are no-ops.
    pub(crate) fn ensure_receiving(
        &self,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError> {
        if self
            .receiving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        match self.client.start_receiving(handler) {
            Ok(()) => {
                debug!(queue = %self.queue, "client configured for push delivery");
                Ok(())
            }
            Err(error) => {
                self.receiving.store(false, Ordering::Release);
                Err(error)
            }
        }
    }
}

/// Cache of per-destination client contexts.
///
/// Contexts are created lazily on first send or receive for a destination
/// and live until transport shutdown. A context whose client reports closed
/// is transparently replaced on the next lookup.
pub struct ClientCache {
    backend: Arc<dyn QueueBackend>,
    contexts: RwLock<HashMap<QueueName, Arc<ClientContext>>>,
}

impl ClientCache {
    /// Create an empty cache over the backend
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Get the destination's context, creating or replacing it as needed.
    ///
    /// Construction happens outside the map lock, so concurrent callers for
    /// the same destination may race to create; the first insert wins and a
    /// redundant construction is discarded.
    pub async fn get_or_create(
        &self,
        queue: &QueueName,
    ) -> Result<Arc<ClientContext>, TransportError> {
        {
            let contexts = self.contexts.read().await;
            if let Some(context) = contexts.get(queue) {
                if !context.client.is_closed() {
                    return Ok(Arc::clone(context));
                }
            }
        }

        let client = self.backend.create_client(queue).await?;
        let fresh = Arc::new(ClientContext::new(client, queue.clone()));

        let mut contexts = self.contexts.write().await;
        match contexts.get(queue) {
            Some(existing) if !existing.client.is_closed() => Ok(Arc::clone(existing)),
            _ => {
                contexts.insert(queue.clone(), Arc::clone(&fresh));
                Ok(fresh)
            }
        }
    }

    /// Close every cached client.
    ///
    /// Failures closing one client are logged and do not prevent closing
    /// the rest.
    pub async fn shutdown(&self) {
        let contexts: Vec<Arc<ClientContext>> = {
            let mut map = self.contexts.write().await;
            map.drain().map(|(_, context)| context).collect()
        };

        for context in contexts {
            info!(queue = %context.queue, "closing queue client");
            if let Err(error) = context.client.close().await {
                warn!(queue = %context.queue, %error, "an error occurred while closing queue client");
            }
        }
    }
}

#[cfg(test)]
#[path = "clients_tests.rs"]
mod tests;
