//! Grouping and flushing of pending outbound envelopes at commit.

use crate::clients::ClientCache;
use crate::envelope::{Envelope, NativeMessage, QueueName};
use crate::error::TransportError;
use crate::retry::{transient_faults, Retrier};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outbound-message count at and above which sends to one destination are
/// grouped into fixed-size batch operations instead of individual sends.
pub const BATCH_THRESHOLD: usize = 100;

/// Flushes a transaction's pending outbound batch.
///
/// Entries are grouped by destination, preserving per-destination order.
/// Small groups are sent one message at a time; groups at or above
/// [`BATCH_THRESHOLD`] are sent as fixed-size chunks, each chunk one atomic
/// batch operation. A destination whose sends exhaust their retries aborts
/// the remainder of the flush; messages already flushed to earlier
/// destinations are not retracted.
pub struct BatchSender {
    clients: Arc<ClientCache>,
    retrier: Retrier,
}

impl BatchSender {
    /// Create a batch sender flushing through the given client cache
    pub fn new(clients: Arc<ClientCache>, retrier: Retrier) -> Self {
        Self { clients, retrier }
    }

    /// Flush all pending entries, destination by destination
    pub async fn flush(
        &self,
        pending: Vec<(QueueName, Envelope)>,
    ) -> Result<(), TransportError> {
        if pending.is_empty() {
            return Ok(());
        }

        let total = pending.len();

        for (destination, envelopes) in group_by_destination(pending) {
            if envelopes.len() < BATCH_THRESHOLD {
                debug!(
                    destination = %destination,
                    count = envelopes.len(),
                    threshold = BATCH_THRESHOLD,
                    "below batch threshold, performing one send operation per message"
                );

                for envelope in envelopes {
                    let native = NativeMessage::from_envelope(envelope);
                    let message_id = native.message_id().to_string();
                    self.send_one(&destination, native, total)
                        .await
                        .map_err(|fault| TransportError::Delivery {
                            destination: destination.to_string(),
                            message_id: Some(message_id),
                            source: Box::new(fault),
                        })?;
                }
            } else {
                let chunks = partition(envelopes, BATCH_THRESHOLD);

                debug!(
                    destination = %destination,
                    batches = chunks.len(),
                    threshold = BATCH_THRESHOLD,
                    "at or above batch threshold, sending messages in batches"
                );

                for chunk in chunks {
                    let natives: Vec<NativeMessage> =
                        chunk.into_iter().map(NativeMessage::from_envelope).collect();
                    self.send_chunk(&destination, natives, total)
                        .await
                        .map_err(|fault| TransportError::Delivery {
                            destination: destination.to_string(),
                            message_id: None,
                            source: Box::new(fault),
                        })?;
                }
            }
        }

        Ok(())
    }

    async fn send_one(
        &self,
        destination: &QueueName,
        native: NativeMessage,
        total: usize,
    ) -> Result<(), TransportError> {
        let clients = Arc::clone(&self.clients);
        let target = destination.clone();

        self.retrier
            .run_observed(
                transient_faults,
                |attempt, delay, fault| {
                    warn!(
                        attempt,
                        destination = %destination,
                        batch_total = total,
                        ?delay,
                        %fault,
                        "an error occurred sending message from batch, will wait and try again"
                    );
                },
                move || {
                    let clients = Arc::clone(&clients);
                    let target = target.clone();
                    let native = native.clone();
                    async move {
                        let context = clients.get_or_create(&target).await?;
                        context.client().send(native).await
                    }
                },
            )
            .await
    }

    async fn send_chunk(
        &self,
        destination: &QueueName,
        natives: Vec<NativeMessage>,
        total: usize,
    ) -> Result<(), TransportError> {
        let clients = Arc::clone(&self.clients);
        let target = destination.clone();
        let chunk_size = natives.len();

        self.retrier
            .run_observed(
                transient_faults,
                |attempt, delay, fault| {
                    warn!(
                        attempt,
                        destination = %destination,
                        chunk_size,
                        batch_total = total,
                        ?delay,
                        %fault,
                        "an error occurred sending batch, will wait and try again"
                    );
                },
                move || {
                    let clients = Arc::clone(&clients);
                    let target = target.clone();
                    let natives = natives.clone();
                    async move {
                        let context = clients.get_or_create(&target).await?;
                        context.client().send_batch(natives).await
                    }
                },
            )
            .await
    }
}

/// Group pending entries by destination, preserving the relative order of
/// entries per destination and the first-seen order of destinations.
fn group_by_destination(
    pending: Vec<(QueueName, Envelope)>,
) -> Vec<(QueueName, Vec<Envelope>)> {
    let mut groups: Vec<(QueueName, Vec<Envelope>)> = Vec::new();

    for (destination, envelope) in pending {
        match groups.iter_mut().find(|(queue, _)| *queue == destination) {
            Some((_, envelopes)) => envelopes.push(envelope),
            None => groups.push((destination, vec![envelope])),
        }
    }

    groups
}

/// Split a destination's envelopes into chunks of at most `size`
fn partition(envelopes: Vec<Envelope>, size: usize) -> Vec<Vec<Envelope>> {
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(size);

    for envelope in envelopes {
        current.push(envelope);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
