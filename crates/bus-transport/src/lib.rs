//! # Bus Transport
//!
//! Transport layer moving envelopes between the message bus core and a
//! managed queueing backend.
//!
//! The backend pushes deliveries by callback with at most one message in
//! flight per queue; the bus core wants a pollable, transactional
//! receive/commit/rollback call. This library bridges the two and builds
//! the transactional protocol on top:
//! - Per-queue working slots handing pushed deliveries to the poll path
//! - Transactional receive with deferred acknowledgement
//! - Peek-lock lease renewal for long-running handlers
//! - Retrying outbound delivery with transient-fault classification
//! - Batched flushing of outbound sends grouped by destination
//!
//! Delivery is at-least-once. A commit flushes outbound messages before
//! acknowledging the inbound one; a flush failure abandons the inbound
//! message for redelivery without retracting what was already sent.
//!
//! ## Module Organization
//!
//! - [`error`] - Error taxonomy and fault classification
//! - [`envelope`] - Envelope, received message, and native message types
//! - [`backend`] - Traits implemented by queueing backends
//! - [`retry`] - Bounded retry with backoff schedules
//! - [`slot`] - Push-to-pull working slots
//! - [`transaction`] - Transaction-scoped state and hooks
//! - [`renewal`] - Peek-lock lease renewal
//! - [`clients`] - Per-destination client caching
//! - [`batch`] - Outbound batch flushing
//! - [`transport`] - The transport itself
//! - [`subscriptions`] - Event subscription registry
//! - [`providers`] - Backend implementations

// Module declarations
pub mod backend;
pub mod batch;
pub mod clients;
pub mod config;
pub mod envelope;
pub mod error;
pub mod providers;
pub mod renewal;
pub mod retry;
pub mod slot;
pub mod subscriptions;
pub mod transaction;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use backend::{
    BackendClient, BackendMessage, CompletionFuture, DeliveryHandler, QueueBackend, QueueOptions,
};
pub use batch::{BatchSender, BATCH_THRESHOLD};
pub use config::TransportConfig;
pub use envelope::{headers, Envelope, NativeMessage, QueueName, ReceivedMessage};
pub use error::{FaultKind, TransportError};
pub use providers::InMemoryBackend;
pub use renewal::LeaseRenewer;
pub use retry::{FaultDisposition, Retrier};
pub use subscriptions::{InMemorySubscriptionStore, SubscriptionStore};
pub use transaction::{TransactionContext, TxState};
pub use transport::BusTransport;
