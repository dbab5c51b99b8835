//! The transport: envelopes in and out of a managed queueing backend.
//!
//! Exposes the synchronous-feeling send/receive/commit/rollback contract the
//! bus core consumes, bridging it onto a backend that pushes deliveries by
//! callback. A transactional receive arms the passed-in
//! [`TransactionContext`]; sends inside that transaction accumulate in its
//! pending batch, which a commit flushes before acknowledging the inbound
//! message. Delivery is at-least-once: a commit whose flush fails abandons
//! the inbound message for redelivery but does not retract outbound
//! messages that were already sent.

use crate::backend::{BackendMessage, CompletionFuture, DeliveryHandler, QueueBackend};
use crate::batch::BatchSender;
use crate::clients::ClientCache;
use crate::config::TransportConfig;
use crate::envelope::{Envelope, NativeMessage, QueueName, ReceivedMessage};
use crate::error::TransportError;
use crate::renewal::{LeaseRenewer, RenewalTimer};
use crate::retry::{transient_faults, Retrier};
use crate::slot::WorkingSlots;
use crate::transaction::{TransactionContext, TxState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Feeds pushed deliveries into the working slot for one queue.
///
/// A delivery that finds the slot occupied is refused; the backend then
/// abandons the message, which keeps at most one message in flight per
/// queue.
struct BridgeHandler {
    slots: Arc<WorkingSlots>,
    queue: QueueName,
}

impl DeliveryHandler for BridgeHandler {
    fn deliver(&self, message: Arc<dyn BackendMessage>) -> Option<CompletionFuture> {
        let message_id = message.message_id().to_string();
        let signal = self.slots.offer(&self.queue, message)?;

        debug!(queue = %self.queue, message_id = %message_id, "received message");

        Some(Box::pin(async move {
            let _ = signal.await;
        }))
    }
}

/// Transport over a managed queueing backend
pub struct BusTransport {
    backend: Arc<dyn QueueBackend>,
    clients: Arc<ClientCache>,
    slots: Arc<WorkingSlots>,
    batch: BatchSender,
    immediate_retrier: Retrier,
    renewal_retrier: Retrier,
    input_queue: Option<QueueName>,
    config: TransportConfig,
}

impl BusTransport {
    /// Construct a duplex transport receiving from `input_queue`.
    ///
    /// The input queue is provisioned (idempotently) before the transport
    /// is handed out.
    pub async fn new(
        backend: Arc<dyn QueueBackend>,
        input_queue: QueueName,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        info!(queue = %input_queue, "initializing transport with input queue");

        let transport = Self::build(backend, Some(input_queue), config)?;
        if let Some(queue) = &transport.input_queue {
            transport
                .backend
                .ensure_queue(queue, &transport.config.queue_options())
                .await?;
        }

        Ok(transport)
    }

    /// Construct a send-only transport with no input queue
    pub fn sender(
        backend: Arc<dyn QueueBackend>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        info!("initializing send-only transport");
        Self::build(backend, None, config)
    }

    fn build(
        backend: Arc<dyn QueueBackend>,
        input_queue: Option<QueueName>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let clients = Arc::new(ClientCache::new(Arc::clone(&backend)));
        let batch = BatchSender::new(
            Arc::clone(&clients),
            Retrier::new(config.flush_backoff.clone())?,
        );
        let immediate_retrier = Retrier::new(config.immediate_send_backoff.clone())?;
        let renewal_retrier = Retrier::new(config.renewal_backoff.clone())?;

        Ok(Self {
            backend,
            clients,
            slots: Arc::new(WorkingSlots::new()),
            batch,
            immediate_retrier,
            renewal_retrier,
            input_queue,
            config,
        })
    }

    /// The queue this transport receives from, when not send-only
    pub fn input_queue(&self) -> Option<&QueueName> {
        self.input_queue.as_ref()
    }

    /// Address other endpoints use to reach this transport's input queue
    pub fn input_queue_address(&self) -> Option<&str> {
        self.input_queue.as_ref().map(QueueName::as_str)
    }

    /// Send an envelope to a destination queue.
    ///
    /// Inside a transaction the envelope joins the context's pending batch
    /// and no I/O happens until commit. Outside a transaction the envelope
    /// is sent immediately, retrying transient faults on the immediate-send
    /// backoff schedule.
    pub async fn send(
        &self,
        destination: &QueueName,
        envelope: Envelope,
        ctx: &mut TransactionContext,
    ) -> Result<(), TransportError> {
        if !ctx.is_transactional() {
            return self.send_immediately(destination, envelope).await;
        }

        ctx.ensure_open("send in")?;
        ctx.push_pending(destination.clone(), envelope);
        Ok(())
    }

    async fn send_immediately(
        &self,
        destination: &QueueName,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let native = NativeMessage::from_envelope(envelope);
        let message_id = native.message_id().to_string();
        let clients = Arc::clone(&self.clients);
        let target = destination.clone();

        self.immediate_retrier
            .run_observed(
                transient_faults,
                |attempt, delay, fault| {
                    warn!(
                        attempt,
                        destination = %destination,
                        ?delay,
                        %fault,
                        "an error occurred sending message, will wait and try again"
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
            .map_err(|fault| TransportError::Delivery {
                destination: destination.to_string(),
                message_id: Some(message_id),
                source: Box::new(fault),
            })
    }

    /// Receive the next message from the input queue.
    ///
    /// Returns `Ok(None)` when nothing is available, including on transient
    /// backend unavailability, so polling loops are not forced to treat
    /// "nothing to do" as an error.
    ///
    /// A non-transactional receive acknowledges the message before
    /// returning it. A transactional receive arms the context instead: the
    /// message stays locked, lease renewal starts, and acknowledgement is
    /// deferred to [`commit`](Self::commit). A transaction that has already
    /// sent messages cannot receive; that is a state conflict, surfaced
    /// before any backend interaction.
    pub async fn receive(
        &self,
        ctx: &mut TransactionContext,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        let input_queue = match &self.input_queue {
            Some(queue) => queue,
            None => {
                return Err(TransportError::StateConflict {
                    message: "this transport is send-only and has no input queue to receive from"
                        .to_string(),
                })
            }
        };

        if ctx.is_transactional() {
            ctx.ensure_open("receive in")?;
            if ctx.batch_armed() {
                return Err(TransportError::StateConflict {
                    message: "attempted to receive a message within a transaction where one or \
                              more messages were already sent"
                        .to_string(),
                });
            }
        }

        // Clear the previous slot first, letting the backend push the next
        // message while this poll is still in flight.
        self.slots.complete_if_processed(input_queue);

        let client_context = match self.clients.get_or_create(input_queue).await {
            Ok(context) => context,
            Err(error) if error.is_transient() => {
                warn!(queue = %input_queue, %error, "transient fault while preparing to receive");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let handler = Arc::new(BridgeHandler {
            slots: Arc::clone(&self.slots),
            queue: input_queue.clone(),
        });
        if let Err(error) = client_context.ensure_receiving(handler) {
            if error.is_transient() {
                warn!(queue = %input_queue, %error, "transient fault configuring push delivery");
                return Ok(None);
            }
            return Err(error);
        }

        let slot = match self.slots.peek(input_queue) {
            Some(slot) => slot,
            None => return Ok(None),
        };

        let message = slot.message;
        let message_id = message.message_id().to_string();
        debug!(queue = %input_queue, message_id = %message_id, "handling message");
        self.slots.mark_processed(input_queue);

        if ctx.is_transactional() {
            ctx.set_received(Arc::clone(&message));
            ctx.arm_batch();

            let renewer = Arc::new(LeaseRenewer::new(
                Arc::clone(&message),
                self.renewal_retrier.clone(),
            ));
            ctx.set_renewer(Arc::clone(&renewer));

            if self.config.renewal_enabled() {
                ctx.set_timer(RenewalTimer::start(renewer, self.config.renewal_interval));
            }
        }

        match message.envelope() {
            Ok(envelope) => {
                if !ctx.is_transactional() {
                    if let Err(error) = message.complete().await {
                        return Err(self
                            .fail_receive(input_queue, &message, message_id, ctx, error)
                            .await);
                    }
                }
                Ok(Some(ReceivedMessage::from_envelope(message_id, envelope)))
            }
            Err(error) => Err(self
                .fail_receive(input_queue, &message, message_id, ctx, error)
                .await),
        }
    }

    /// A failure after the message left the slot: abandon it so the backend
    /// redelivers, unwind whatever the context had armed, and wrap the fault
    /// with receive context.
    async fn fail_receive(
        &self,
        queue: &QueueName,
        message: &Arc<dyn BackendMessage>,
        message_id: String,
        ctx: &mut TransactionContext,
        error: TransportError,
    ) -> TransportError {
        info!(message_id = %message_id, "will attempt to abandon message");
        if let Err(abandon_error) = message.abandon().await {
            warn!(message_id = %message_id, %abandon_error, "could not abandon message");
        }

        if ctx.is_transactional() && ctx.received().is_some() {
            ctx.mark(TxState::RolledBack);
            self.cleanup(ctx).await;
        }

        TransportError::Receive {
            queue: queue.to_string(),
            message_id,
            source: Box::new(error),
        }
    }

    /// Commit the unit of work.
    ///
    /// Flushes the pending outbound batch, then acknowledges the received
    /// message, then runs the caller's commit hooks. When the flush fails
    /// the received message is abandoned for redelivery, rollback hooks run
    /// instead, and the flush fault propagates; outbound messages that were
    /// already sent are not retracted. Cleanup runs exactly once either way.
    pub async fn commit(&self, ctx: &mut TransactionContext) -> Result<(), TransportError> {
        ctx.ensure_open("commit")?;

        let pending = ctx.take_pending();
        let received = ctx.received();

        let result = match self.batch.flush(pending).await {
            Ok(()) => match self.complete_received(&received).await {
                Ok(()) => {
                    for hook in ctx.take_commit_hooks() {
                        hook().await;
                    }
                    ctx.mark(TxState::Committed);
                    Ok(())
                }
                Err(error) => {
                    self.abandon_received(&received).await;
                    for hook in ctx.take_rollback_hooks() {
                        hook().await;
                    }
                    ctx.mark(TxState::RolledBack);
                    Err(error)
                }
            },
            Err(flush_error) => {
                self.abandon_received(&received).await;
                for hook in ctx.take_rollback_hooks() {
                    hook().await;
                }
                ctx.mark(TxState::RolledBack);
                Err(flush_error)
            }
        };

        self.cleanup(ctx).await;
        result
    }

    /// Roll back the unit of work: the received message is abandoned so the
    /// backend redelivers it, the caller's rollback hooks run, and cleanup
    /// runs exactly once. Failures abandoning are logged and swallowed;
    /// rollback itself does not fail.
    pub async fn rollback(&self, ctx: &mut TransactionContext) -> Result<(), TransportError> {
        ctx.ensure_open("roll back")?;

        self.abandon_received(&ctx.received()).await;

        for hook in ctx.take_rollback_hooks() {
            hook().await;
        }
        ctx.mark(TxState::RolledBack);

        self.cleanup(ctx).await;
        Ok(())
    }

    async fn complete_received(
        &self,
        received: &Option<Arc<dyn BackendMessage>>,
    ) -> Result<(), TransportError> {
        let message = match received {
            Some(message) => message,
            None => return Ok(()),
        };

        message
            .complete()
            .await
            .map_err(|fault| TransportError::Delivery {
                destination: self
                    .input_queue
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                message_id: Some(message.message_id().to_string()),
                source: Box::new(fault),
            })
    }

    async fn abandon_received(&self, received: &Option<Arc<dyn BackendMessage>>) {
        if let Some(message) = received {
            if let Err(error) = message.abandon().await {
                warn!(
                    message_id = %message.message_id(),
                    %error,
                    "an error occurred while attempting to roll back"
                );
            }
        }
    }

    /// Release everything the transaction holds. Runs exactly once per
    /// context; failures here are logged and never surface.
    async fn cleanup(&self, ctx: &mut TransactionContext) {
        if ctx.state() == TxState::Cleaned {
            return;
        }

        if let Some(timer) = ctx.take_timer() {
            timer.stop().await;
        }
        ctx.take_renewer();
        ctx.take_received();

        for hook in ctx.take_cleanup_hooks() {
            hook().await;
        }

        ctx.mark(TxState::Cleaned);
    }

    /// Drop everything in the input queue by deleting and recreating it
    pub async fn purge(&self) -> Result<(), TransportError> {
        let queue = self.require_input_queue()?;

        warn!(queue = %queue, "purging queue");
        self.backend.delete_queue(queue).await?;
        self.backend
            .ensure_queue(queue, &self.config.queue_options())
            .await
    }

    /// Delete the input queue
    pub async fn delete_input_queue(&self) -> Result<(), TransportError> {
        let queue = self.require_input_queue()?;

        warn!(queue = %queue, "deleting queue");
        self.backend.delete_queue(queue).await
    }

    fn require_input_queue(&self) -> Result<&QueueName, TransportError> {
        self.input_queue
            .as_ref()
            .ok_or_else(|| TransportError::StateConflict {
                message: "this transport is send-only and has no input queue".to_string(),
            })
    }

    /// Close every cached backend client
    pub async fn shutdown(&self) {
        self.clients.shutdown().await;
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
