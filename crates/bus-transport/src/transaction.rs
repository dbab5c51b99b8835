//! Transaction-scoped state for a single unit of work.
//!
//! A [`TransactionContext`] is exclusively owned by the operation that
//! begins it and passed explicitly through the transport's receive, send,
//! commit, and rollback calls. It carries the pending outbound batch, the
//! received message handle, the lease renewer, and the caller-registered
//! hooks; there is no ambient shared state between operations.

use crate::backend::BackendMessage;
use crate::envelope::{Envelope, QueueName};
use crate::error::TransportError;
use crate::renewal::{LeaseRenewer, RenewalTimer};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Caller-registered zero-argument async action run at a protocol step
pub type TxHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Lifecycle of a transaction context.
///
/// `Open` moves to `Committed` or `RolledBack`, after which `Cleaned` is
/// reached exactly once regardless of which path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
    Cleaned,
}

/// Per-unit-of-work transport state
pub struct TransactionContext {
    transactional: bool,
    state: TxState,
    /// `None` until the batch is armed by a transactional receive or the
    /// first transactional send; distinguishes "no transaction work yet"
    /// from an empty batch.
    pending: Option<Vec<(QueueName, Envelope)>>,
    received: Option<Arc<dyn BackendMessage>>,
    renewer: Option<Arc<LeaseRenewer>>,
    timer: Option<RenewalTimer>,
    commit_hooks: Vec<TxHook>,
    rollback_hooks: Vec<TxHook>,
    cleanup_hooks: Vec<TxHook>,
}

impl TransactionContext {
    /// Begin a transactional unit of work
    pub fn transactional() -> Self {
        Self::new(true)
    }

    /// Begin a non-transactional unit of work
    pub fn non_transactional() -> Self {
        Self::new(false)
    }

    fn new(transactional: bool) -> Self {
        Self {
            transactional,
            state: TxState::Open,
            pending: None,
            received: None,
            renewer: None,
            timer: None,
            commit_hooks: Vec::new(),
            rollback_hooks: Vec::new(),
            cleanup_hooks: Vec::new(),
        }
    }

    /// Whether this unit of work is transactional
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Register an action to run after a successful commit
    pub fn on_commit(&mut self, hook: TxHook) {
        self.commit_hooks.push(hook);
    }

    /// Register an action to run after a rollback
    pub fn on_rollback(&mut self, hook: TxHook) {
        self.rollback_hooks.push(hook);
    }

    /// Register an action to run during cleanup
    pub fn on_cleanup(&mut self, hook: TxHook) {
        self.cleanup_hooks.push(hook);
    }

    /// Manual lease renewal handle, available while a message is held.
    ///
    /// Long-running handlers call [`LeaseRenewer::renew_now`] on it to keep
    /// the peek lock alive between timer ticks.
    pub fn lease_renewer(&self) -> Option<Arc<LeaseRenewer>> {
        self.renewer.as_ref().map(Arc::clone)
    }

    /// Number of outbound envelopes waiting for commit
    pub fn pending_outbound(&self) -> usize {
        self.pending.as_ref().map_or(0, Vec::len)
    }

    pub(crate) fn ensure_open(&self, operation: &str) -> Result<(), TransportError> {
        if self.state == TxState::Open {
            return Ok(());
        }

        Err(TransportError::StateConflict {
            message: format!(
                "cannot {} a transaction in state {:?}",
                operation, self.state
            ),
        })
    }

    pub(crate) fn batch_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn arm_batch(&mut self) {
        if self.pending.is_none() {
            self.pending = Some(Vec::new());
        }
    }

    pub(crate) fn push_pending(&mut self, destination: QueueName, envelope: Envelope) {
        self.arm_batch();
        if let Some(pending) = self.pending.as_mut() {
            pending.push((destination, envelope));
        }
    }

    pub(crate) fn take_pending(&mut self) -> Vec<(QueueName, Envelope)> {
        self.pending.take().unwrap_or_default()
    }

    pub(crate) fn set_received(&mut self, message: Arc<dyn BackendMessage>) {
        self.received = Some(message);
    }

    pub(crate) fn received(&self) -> Option<Arc<dyn BackendMessage>> {
        self.received.as_ref().map(Arc::clone)
    }

    pub(crate) fn take_received(&mut self) -> Option<Arc<dyn BackendMessage>> {
        self.received.take()
    }

    pub(crate) fn set_renewer(&mut self, renewer: Arc<LeaseRenewer>) {
        self.renewer = Some(renewer);
    }

    pub(crate) fn take_renewer(&mut self) -> Option<Arc<LeaseRenewer>> {
        self.renewer.take()
    }

    pub(crate) fn set_timer(&mut self, timer: RenewalTimer) {
        self.timer = Some(timer);
    }

    pub(crate) fn take_timer(&mut self) -> Option<RenewalTimer> {
        self.timer.take()
    }

    pub(crate) fn mark(&mut self, state: TxState) {
        self.state = state;
    }

    pub(crate) fn take_commit_hooks(&mut self) -> Vec<TxHook> {
        std::mem::take(&mut self.commit_hooks)
    }

    pub(crate) fn take_rollback_hooks(&mut self) -> Vec<TxHook> {
        std::mem::take(&mut self.rollback_hooks)
    }

    pub(crate) fn take_cleanup_hooks(&mut self) -> Vec<TxHook> {
        std::mem::take(&mut self.cleanup_hooks)
    }
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
