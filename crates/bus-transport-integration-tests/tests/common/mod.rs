//! Common test utilities for bus-transport integration tests
//!
//! This module provides:
//! - A shared in-memory backend wired into transports
//! - Helper functions for building envelopes and polling receives

use bus_transport::{
    BusTransport, Envelope, InMemoryBackend, QueueBackend, QueueName, ReceivedMessage,
    TransactionContext, TransportConfig,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Initialize test logging once per binary
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bus_transport=debug")
        .with_test_writer()
        .try_init();
}

/// Transport configuration with test-friendly backoff schedules
pub fn test_config() -> TransportConfig {
    TransportConfig {
        immediate_send_backoff: vec![Duration::from_millis(1); 3],
        flush_backoff: vec![Duration::from_millis(1); 3],
        renewal_backoff: vec![Duration::from_millis(1); 3],
        ..TransportConfig::default()
    }
}

pub fn queue(name: &str) -> QueueName {
    name.parse().unwrap()
}

pub fn envelope(body: &str) -> Envelope {
    Envelope::new(Bytes::from(body.to_string())).with_label(body.to_string())
}

/// Build a duplex transport receiving from `input` over the shared backend
#[allow(dead_code)]
pub async fn duplex(backend: &Arc<InMemoryBackend>, input: &str) -> BusTransport {
    BusTransport::new(
        Arc::clone(backend) as Arc<dyn QueueBackend>,
        queue(input),
        test_config(),
    )
    .await
    .unwrap()
}

/// Poll until a message arrives; deliveries are pushed asynchronously, so
/// the first polls may come back empty.
#[allow(dead_code)]
pub async fn receive_some(
    transport: &BusTransport,
    ctx: &mut TransactionContext,
) -> ReceivedMessage {
    for _ in 0..200 {
        if let Some(message) = transport.receive(ctx).await.unwrap() {
            return message;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no message received within the polling budget");
}

/// Poll until the queue holds `expected` ready messages
#[allow(dead_code)]
pub async fn wait_for_ready(backend: &Arc<InMemoryBackend>, queue_name: &QueueName, expected: usize) {
    for _ in 0..200 {
        if backend.ready_count(queue_name) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "queue '{}' never reached {} ready messages (has {})",
        queue_name,
        expected,
        backend.ready_count(queue_name)
    );
}
