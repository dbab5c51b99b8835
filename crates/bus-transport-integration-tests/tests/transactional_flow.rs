//! Integration tests for the transactional receive/commit/rollback flow
//! over the in-memory backend.
//!
//! These tests verify:
//! - Commit flushes outbound sends and acknowledges the inbound message
//! - Rollback leaves outbound unsent and redelivers the inbound message
//! - Large pending batches arrive complete at their destination
//! - A transaction that has sent cannot then receive

mod common;

use bus_transport::{InMemoryBackend, TransactionContext, TransportError, TxState};
use common::{duplex, envelope, init_tracing, queue, receive_some, wait_for_ready};
use std::sync::Arc;

#[tokio::test]
async fn test_commit_delivers_outbound_and_settles_inbound() {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let transport = duplex(&backend, "work").await;
    let billing = queue("billing");
    let audit = queue("audit");

    // Seed the input queue.
    let mut seed = TransactionContext::non_transactional();
    transport
        .send(&queue("work"), envelope("job-1"), &mut seed)
        .await
        .unwrap();

    // Handle it transactionally: receive, send follow-ups, commit.
    let mut ctx = TransactionContext::transactional();
    let received = receive_some(&transport, &mut ctx).await;
    assert_eq!(received.body, bytes::Bytes::from("job-1"));

    transport
        .send(&billing, envelope("bill-1"), &mut ctx)
        .await
        .unwrap();
    transport
        .send(&audit, envelope("audit-1"), &mut ctx)
        .await
        .unwrap();

    transport.commit(&mut ctx).await.unwrap();
    assert_eq!(ctx.state(), TxState::Cleaned);

    // Outbound messages reached their destinations.
    wait_for_ready(&backend, &billing, 1).await;
    wait_for_ready(&backend, &audit, 1).await;

    // The inbound message is settled: nothing ready, nothing locked.
    assert_eq!(backend.ready_count(&queue("work")), 0);
    assert_eq!(backend.in_flight_count(&queue("work")), 0);

    transport.shutdown().await;
}

#[tokio::test]
async fn test_rollback_redelivers_inbound_and_sends_nothing() {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let transport = duplex(&backend, "work").await;
    let billing = queue("billing");

    let mut seed = TransactionContext::non_transactional();
    transport
        .send(&queue("work"), envelope("job-1"), &mut seed)
        .await
        .unwrap();

    let mut ctx = TransactionContext::transactional();
    let first = receive_some(&transport, &mut ctx).await;
    transport
        .send(&billing, envelope("bill-1"), &mut ctx)
        .await
        .unwrap();

    transport.rollback(&mut ctx).await.unwrap();

    // Nothing was flushed to billing.
    assert_eq!(backend.ready_count(&billing), 0);

    // The same message comes around again.
    let mut retry = TransactionContext::transactional();
    let second = receive_some(&transport, &mut retry).await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.body, first.body);
    transport.commit(&mut retry).await.unwrap();

    transport.shutdown().await;
}

#[tokio::test]
async fn test_large_batch_arrives_complete() {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let transport = duplex(&backend, "work").await;
    let billing = queue("billing");

    let mut seed = TransactionContext::non_transactional();
    transport
        .send(&queue("work"), envelope("job-1"), &mut seed)
        .await
        .unwrap();

    let mut ctx = TransactionContext::transactional();
    receive_some(&transport, &mut ctx).await;

    // Enough to push the flush into batch mode (chunks of 100).
    for i in 0..250 {
        transport
            .send(&billing, envelope(&format!("bill-{i}")), &mut ctx)
            .await
            .unwrap();
    }
    assert_eq!(ctx.pending_outbound(), 250);

    transport.commit(&mut ctx).await.unwrap();

    wait_for_ready(&backend, &billing, 250).await;
    transport.shutdown().await;
}

#[tokio::test]
async fn test_receive_after_send_in_one_transaction_is_rejected() {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let transport = duplex(&backend, "work").await;

    let mut ctx = TransactionContext::transactional();
    transport
        .send(&queue("billing"), envelope("bill-1"), &mut ctx)
        .await
        .unwrap();

    let result = transport.receive(&mut ctx).await;
    assert!(matches!(result, Err(TransportError::StateConflict { .. })));

    // The buffered send is still intact and can be committed.
    transport.commit(&mut ctx).await.unwrap();
    wait_for_ready(&backend, &queue("billing"), 1).await;

    transport.shutdown().await;
}

#[tokio::test]
async fn test_manual_lease_renewal_while_handling() {
    init_tracing();
    let backend = Arc::new(InMemoryBackend::new());
    let transport = duplex(&backend, "work").await;

    let mut seed = TransactionContext::non_transactional();
    transport
        .send(&queue("work"), envelope("job-1"), &mut seed)
        .await
        .unwrap();

    let mut ctx = TransactionContext::transactional();
    receive_some(&transport, &mut ctx).await;

    // A long-running handler keeps its hold on the message.
    let renewer = ctx.lease_renewer().expect("lease renewer available");
    renewer.renew_now().await;
    assert!(!renewer.is_stopped());

    transport.commit(&mut ctx).await.unwrap();
    assert_eq!(backend.in_flight_count(&queue("work")), 0);

    transport.shutdown().await;
}
