//! Tests for lease renewal.

use super::*;
use crate::envelope::Envelope;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;

/// Backend message stub that counts renewals and plays back scripted
/// outcomes, defaulting to success once the script runs out.
struct CountingMessage {
    renewals: AtomicUsize,
    outcomes: Mutex<VecDeque<TransportError>>,
    delay: Duration,
}

impl CountingMessage {
    fn new() -> Arc<Self> {
        Self::with_script(Vec::new())
    }

    fn with_script(outcomes: Vec<TransportError>) -> Arc<Self> {
        Arc::new(Self {
            renewals: AtomicUsize::new(0),
            outcomes: Mutex::new(outcomes.into()),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            renewals: AtomicUsize::new(0),
            outcomes: Mutex::new(VecDeque::new()),
            delay,
        })
    }

    fn renewal_count(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendMessage for CountingMessage {
    fn message_id(&self) -> &str {
        "msg-under-lease"
    }

    fn envelope(&self) -> Result<Envelope, TransportError> {
        Ok(Envelope::new(Bytes::new()))
    }

    async fn complete(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn abandon(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn renew_lock(&self) -> Result<(), TransportError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.outcomes.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn fast_retrier() -> Retrier {
    Retrier::new(vec![
        Duration::from_millis(1),
        Duration::from_millis(1),
        Duration::from_millis(1),
    ])
    .unwrap()
}

fn transient() -> TransportError {
    TransportError::Communication {
        message: "connection reset".to_string(),
    }
}

fn lock_lost() -> TransportError {
    TransportError::LockLost {
        message_id: "msg-under-lease".to_string(),
    }
}

#[tokio::test]
async fn test_successful_renewal_updates_last_renewed() {
    let message = CountingMessage::new();
    let renewer = LeaseRenewer::new(message.clone(), fast_retrier());

    let before = renewer.last_renewed_at();
    tokio::time::sleep(Duration::from_millis(5)).await;
    renewer.renew_now().await;

    assert_eq!(message.renewal_count(), 1);
    assert!(renewer.last_renewed_at() > before);
    assert!(!renewer.is_stopped());
}

#[tokio::test]
async fn test_transient_faults_are_retried() {
    let message = CountingMessage::with_script(vec![transient(), transient()]);
    let renewer = LeaseRenewer::new(message.clone(), fast_retrier());

    renewer.renew_now().await;

    assert_eq!(message.renewal_count(), 3);
    assert!(!renewer.is_stopped());
}

#[tokio::test]
async fn test_lock_lost_stops_renewal_permanently() {
    let message = CountingMessage::with_script(vec![lock_lost()]);
    let renewer = LeaseRenewer::new(message.clone(), fast_retrier());

    renewer.renew_now().await;

    // No retry on a lost lock, and the renewer refuses further work.
    assert_eq!(message.renewal_count(), 1);
    assert!(renewer.is_stopped());

    renewer.renew_now().await;
    assert_eq!(message.renewal_count(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_leave_renewer_usable() {
    let message = CountingMessage::with_script(vec![
        transient(),
        transient(),
        transient(),
        transient(),
    ]);
    let renewer = LeaseRenewer::new(message.clone(), fast_retrier());

    renewer.renew_now().await;
    assert_eq!(message.renewal_count(), 4);
    assert!(!renewer.is_stopped());

    // The next attempt succeeds (script exhausted).
    renewer.renew_now().await;
    assert_eq!(message.renewal_count(), 5);
}

/// A manual call and a concurrent second caller collapse into exactly one
/// underlying renewal invocation.
#[tokio::test]
async fn test_concurrent_renewals_collapse_into_one() {
    let message = CountingMessage::slow(Duration::from_millis(50));
    let renewer = Arc::new(LeaseRenewer::new(message.clone(), fast_retrier()));

    let first = {
        let renewer = Arc::clone(&renewer);
        tokio::spawn(async move { renewer.renew_now().await })
    };
    // Give the first call time to take the single-flight guard.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let renewer = Arc::clone(&renewer);
        tokio::spawn(async move { renewer.renew_now().await })
    };

    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(message.renewal_count(), 1);
}

#[tokio::test]
async fn test_timer_renews_on_interval() {
    let message = CountingMessage::new();
    let renewer = Arc::new(LeaseRenewer::new(message.clone(), fast_retrier()));

    let timer = RenewalTimer::start(Arc::clone(&renewer), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(110)).await;
    timer.stop().await;

    let after_stop = message.renewal_count();
    assert!(after_stop >= 2, "expected at least 2 renewals, got {after_stop}");

    // No further renewals after stop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(message.renewal_count(), after_stop);
}

#[tokio::test]
async fn test_timer_stop_is_idempotent() {
    let message = CountingMessage::new();
    let renewer = Arc::new(LeaseRenewer::new(message.clone(), fast_retrier()));

    let timer = RenewalTimer::start(renewer, Duration::from_secs(3600));
    timer.stop().await;
    timer.stop().await;

    assert_eq!(message.renewal_count(), 0);
}
