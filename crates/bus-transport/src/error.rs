//! Error types for transport operations.

use thiserror::Error;

/// Comprehensive error type for all transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Backend throttled the request: {message}")]
    Throttled { message: String },

    #[error("Communication with the backend failed: {message}")]
    Communication { message: String },

    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    #[error("Peek lock lost on message {message_id}")]
    LockLost { message_id: String },

    #[error("Invalid transaction state: {message}")]
    StateConflict { message: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Delivery to '{destination}' failed")]
    Delivery {
        destination: String,
        message_id: Option<String>,
        #[source]
        source: Box<TransportError>,
    },

    #[error("Receiving from '{queue}' failed while handling message {message_id}")]
    Receive {
        queue: String,
        message_id: String,
        #[source]
        source: Box<TransportError>,
    },

    #[error("Backend error ({code}): {message}")]
    Backend { code: String, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },
}

/// Classification of a fault as seen by the retry and renewal machinery.
///
/// Classification is an explicit tagged outcome rather than a check against
/// concrete error types, so callers can configure retry policies without
/// depending on the full error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Expected to resolve itself on retry (throttling, timeouts, transient
    /// connectivity).
    Retryable,
    /// Will not succeed however often it is retried.
    Fatal,
    /// The peek lock on a received message is gone; the message will be
    /// redelivered elsewhere. Never retried.
    LockLost,
}

impl TransportError {
    /// Classify this fault, unwrapping any wrapping layer first.
    ///
    /// Wrapper variants (`Delivery`, `Receive`) carry the fault that actually
    /// occurred as their source; classification always applies to the
    /// underlying cause.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Self::Delivery { source, .. } | Self::Receive { source, .. } => source.fault_kind(),
            Self::Throttled { .. } => FaultKind::Retryable,
            Self::Communication { .. } => FaultKind::Retryable,
            Self::Timeout { .. } => FaultKind::Retryable,
            Self::LockLost { .. } => FaultKind::LockLost,
            Self::StateConflict { .. } => FaultKind::Fatal,
            Self::QueueNotFound { .. } => FaultKind::Fatal,
            Self::Backend { .. } => FaultKind::Retryable, // Backend faults are usually transient
            Self::Serialization(_) => FaultKind::Fatal,
            Self::Configuration { .. } => FaultKind::Fatal,
            Self::Validation { .. } => FaultKind::Fatal,
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self.fault_kind(), FaultKind::Retryable)
    }

    /// Walk the wrapping layers down to the fault that actually occurred.
    pub fn root_cause(&self) -> &TransportError {
        match self {
            Self::Delivery { source, .. } | Self::Receive { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
