//! Tests for transaction context state.

use super::*;
use bytes::Bytes;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

#[test]
fn test_new_context_is_open_and_unarmed() {
    let ctx = TransactionContext::transactional();

    assert!(ctx.is_transactional());
    assert_eq!(ctx.state(), TxState::Open);
    assert!(!ctx.batch_armed());
    assert_eq!(ctx.pending_outbound(), 0);
    assert!(ctx.lease_renewer().is_none());
}

#[test]
fn test_non_transactional_context() {
    let ctx = TransactionContext::non_transactional();
    assert!(!ctx.is_transactional());
}

#[test]
fn test_arming_distinguishes_empty_batch_from_no_batch() {
    let mut ctx = TransactionContext::transactional();
    assert!(!ctx.batch_armed());

    ctx.arm_batch();
    assert!(ctx.batch_armed());
    assert_eq!(ctx.pending_outbound(), 0);
}

#[test]
fn test_push_pending_arms_and_preserves_order() {
    let mut ctx = TransactionContext::transactional();

    ctx.push_pending(queue("first"), Envelope::new(Bytes::from("a")));
    ctx.push_pending(queue("second"), Envelope::new(Bytes::from("b")));
    ctx.push_pending(queue("first"), Envelope::new(Bytes::from("c")));

    assert!(ctx.batch_armed());
    assert_eq!(ctx.pending_outbound(), 3);

    let pending = ctx.take_pending();
    let bodies: Vec<&[u8]> = pending.iter().map(|(_, e)| e.body.as_ref()).collect();
    assert_eq!(bodies, vec![b"a".as_ref(), b"b".as_ref(), b"c".as_ref()]);

    // Taking the batch disarms the context.
    assert!(!ctx.batch_armed());
}

#[test]
fn test_ensure_open_rejects_terminal_states() {
    let mut ctx = TransactionContext::transactional();
    assert!(ctx.ensure_open("commit").is_ok());

    ctx.mark(TxState::Committed);
    let err = ctx.ensure_open("commit").unwrap_err();
    assert!(matches!(err, TransportError::StateConflict { .. }));

    ctx.mark(TxState::Cleaned);
    assert!(ctx.ensure_open("rollback").is_err());
}

#[tokio::test]
async fn test_hooks_are_taken_in_registration_order() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let mut ctx = TransactionContext::transactional();
    let order = Arc::new(AtomicUsize::new(0));

    for expected in 0..3 {
        let order = Arc::clone(&order);
        ctx.on_commit(Box::new(move || {
            Box::pin(async move {
                let position = order.fetch_add(1, Ordering::SeqCst);
                assert_eq!(position, expected);
            })
        }));
    }

    for hook in ctx.take_commit_hooks() {
        hook().await;
    }

    assert_eq!(order.load(Ordering::SeqCst), 3);
    assert!(ctx.take_commit_hooks().is_empty());
}
