//! Per-queue working slots bridging push delivery to the synchronous
//! receive call.
//!
//! The backend delivers messages by callback with at most one message in
//! flight per queue; the bus core polls. A working slot is the single-item
//! staging area between the two: the delivery path offers a message into the
//! slot and waits on its completion signal, the poll path takes the message
//! out and signals completion once the previous message is fully processed.

use crate::backend::BackendMessage;
use crate::envelope::QueueName;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

struct SlotState {
    correlation_id: Uuid,
    message: Arc<dyn BackendMessage>,
    processed: bool,
    completion: Option<oneshot::Sender<()>>,
}

/// Snapshot of an occupied slot returned by [`WorkingSlots::peek`]
pub struct SlotView {
    pub correlation_id: Uuid,
    pub message: Arc<dyn BackendMessage>,
}

/// Map of working slots keyed by queue name.
///
/// Invariant: at most one slot exists per queue name at any time. The map
/// lock is write-held only to insert or remove a slot; lookups share a read
/// lock so unrelated queues do not serialize. No lock is held across an
/// await.
pub struct WorkingSlots {
    slots: RwLock<HashMap<QueueName, Arc<Mutex<SlotState>>>>,
}

impl WorkingSlots {
    /// Create an empty slot map
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Offer a delivered message into the queue's slot.
    ///
    /// Returns the completion signal the delivery path must await before the
    /// backend may deliver the next message, or `None` when a slot already
    /// exists for the queue; the caller must then release the message back
    /// to the backend unprocessed.
    pub fn offer(
        &self,
        queue: &QueueName,
        message: Arc<dyn BackendMessage>,
    ) -> Option<oneshot::Receiver<()>> {
        let mut slots = self.slots.write().expect("slot map lock poisoned");

        if slots.contains_key(queue) {
            return None;
        }

        let correlation_id = Uuid::new_v4();
        let (completion, signal) = oneshot::channel();
        slots.insert(
            queue.clone(),
            Arc::new(Mutex::new(SlotState {
                correlation_id,
                message,
                processed: false,
                completion: Some(completion),
            })),
        );

        debug!(queue = %queue, %correlation_id, "set current message context");

        Some(signal)
    }

    /// Look at the queue's current slot without removing it
    pub fn peek(&self, queue: &QueueName) -> Option<SlotView> {
        let slots = self.slots.read().expect("slot map lock poisoned");
        let slot = slots.get(queue)?;
        let state = slot.lock().expect("slot lock poisoned");

        debug!(queue = %queue, correlation_id = %state.correlation_id, "retrieved context from working slot");

        Some(SlotView {
            correlation_id: state.correlation_id,
            message: Arc::clone(&state.message),
        })
    }

    /// Record that the poll path has taken ownership of the slot's message.
    ///
    /// Returns whether a slot was present to mark.
    pub fn mark_processed(&self, queue: &QueueName) -> bool {
        let slots = self.slots.read().expect("slot map lock poisoned");
        match slots.get(queue) {
            Some(slot) => {
                slot.lock().expect("slot lock poisoned").processed = true;
                true
            }
            None => false,
        }
    }

    /// Clear the queue's slot and fire its completion signal, but only once
    /// the slot has been marked processed.
    ///
    /// Returns whether a slot was cleared. A slot that is not yet processed
    /// is left untouched.
    pub fn complete_if_processed(&self, queue: &QueueName) -> bool {
        let mut slots = self.slots.write().expect("slot map lock poisoned");

        let processed = match slots.get(queue) {
            Some(slot) => slot.lock().expect("slot lock poisoned").processed,
            None => return false,
        };

        if !processed {
            return false;
        }

        if let Some(slot) = slots.remove(queue) {
            let mut state = slot.lock().expect("slot lock poisoned");
            debug!(queue = %queue, correlation_id = %state.correlation_id, "marking context complete");
            if let Some(completion) = state.completion.take() {
                let _ = completion.send(());
            }
        }

        true
    }
}

impl Default for WorkingSlots {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
