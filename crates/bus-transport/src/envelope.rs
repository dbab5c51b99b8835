//! Envelope and message types exchanged between the bus core and the transport.

use crate::error::TransportError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Well-known header keys promoted to first-class backend message fields.
pub mod headers {
    /// Logical message id assigned by the bus core.
    pub const MESSAGE_ID: &str = "bus-msg-id";
    /// Correlation id used for request/response and tracing patterns.
    pub const CORRELATION_ID: &str = "bus-correlation-id";
    /// Queue to which replies to this message should be sent.
    pub const RETURN_ADDRESS: &str = "bus-return-address";
}

// ============================================================================
// Queue Names
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, TransportError> {
        if name.is_empty() || name.len() > 260 {
            return Err(TransportError::Validation {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric, hyphens, underscores, dots)
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(TransportError::Validation {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores, and dots allowed"
                    .to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(TransportError::Validation {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

// ============================================================================
// Envelope Types
// ============================================================================

/// Transport-agnostic message wrapper exchanged between the bus core and the
/// transport. Immutable once constructed for sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub headers: HashMap<String, String>,
    pub label: String,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Envelope {
    /// Create new envelope with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            headers: HashMap::new(),
            label: String::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set the label shown by backend tooling
    pub fn with_label(mut self, label: String) -> Self {
        self.label = label;
        self
    }

    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// A message received from the input queue, produced from an [`Envelope`]
/// plus the backend-assigned message id.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub label: String,
}

impl ReceivedMessage {
    /// Build a received message from an envelope and the backend message id
    pub fn from_envelope(id: String, envelope: Envelope) -> Self {
        Self {
            id,
            headers: envelope.headers,
            body: envelope.body,
            label: envelope.label,
        }
    }
}

// ============================================================================
// Native Messages
// ============================================================================

/// The outbound backend representation of an [`Envelope`].
///
/// Selected well-known headers are promoted to first-class backend fields;
/// all headers remain present on the envelope itself as opaque metadata.
#[derive(Debug, Clone)]
pub struct NativeMessage {
    envelope: Envelope,
    message_id: String,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    label: String,
}

impl NativeMessage {
    /// Build a native message from an envelope, promoting well-known headers.
    ///
    /// A message id is generated when the envelope does not carry one.
    pub fn from_envelope(envelope: Envelope) -> Self {
        let message_id = envelope
            .header(headers::MESSAGE_ID)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let correlation_id = envelope.header(headers::CORRELATION_ID).map(str::to_string);
        let reply_to = envelope.header(headers::RETURN_ADDRESS).map(str::to_string);
        let label = envelope.label.clone();

        Self {
            envelope,
            message_id,
            correlation_id,
            reply_to,
            label,
        }
    }

    /// Get the envelope carried by this message
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Get the promoted message id
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Get the promoted correlation id, if present
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Get the promoted reply-to queue, if present
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Get the message label
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
