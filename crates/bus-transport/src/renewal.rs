//! Lease renewal for messages held under a peek lock.
//!
//! A handler that runs longer than the backend's lock duration loses its
//! exclusive hold unless the lock is renewed. Renewal is driven two ways:
//! a background timer scoped to the transaction's lifetime, and a manual
//! [`LeaseRenewer::renew_now`] call for handlers that want to renew at
//! points of their own choosing. Both paths collapse into one in-flight
//! attempt through a single-flight guard.

use crate::backend::BackendMessage;
use crate::error::{FaultKind, TransportError};
use crate::retry::{all_but_lock_lost, Retrier};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Renews the peek lock on one received message.
///
/// State machine: `Idle -> Renewing -> Idle` on success or exhausted
/// retries, `-> Stopped` permanently when the lock is reported lost.
pub struct LeaseRenewer {
    message: Arc<dyn BackendMessage>,
    message_id: String,
    retrier: Retrier,
    in_flight: AtomicBool,
    stopped: AtomicBool,
    last_renewed: Mutex<DateTime<Utc>>,
}

/// Resets the single-flight guard when the renewal attempt finishes or is
/// cancelled mid-await.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LeaseRenewer {
    pub(crate) fn new(message: Arc<dyn BackendMessage>, retrier: Retrier) -> Self {
        let message_id = message.message_id().to_string();
        Self {
            message,
            message_id,
            retrier,
            in_flight: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            last_renewed: Mutex::new(Utc::now()),
        }
    }

    /// Renew the peek lock now.
    ///
    /// A call that finds another renewal already in flight is a no-op, so a
    /// concurrently firing timer tick and a manual call collapse into one
    /// attempt. Faults never propagate: transient faults are retried on the
    /// renewal backoff schedule, exhausted retries are logged, and a lost
    /// lock stops renewal for this message permanently.
    pub async fn renew_now(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let _guard = FlightGuard(&self.in_flight);

        let message = Arc::clone(&self.message);
        let message_id = self.message_id.clone();

        let result = self
            .retrier
            .run_observed(
                all_but_lock_lost,
                |attempt, delay, fault| {
                    warn!(
                        attempt,
                        message_id = %message_id,
                        ?delay,
                        %fault,
                        "attempt to renew the peek lock failed, will wait and try again"
                    );
                },
                || {
                    let message = Arc::clone(&message);
                    async move { message.renew_lock().await }
                },
            )
            .await;

        match result {
            Ok(()) => {
                let lease_age = {
                    let mut last = self.last_renewed.lock().expect("renewal clock poisoned");
                    let age = Utc::now() - *last;
                    *last = Utc::now();
                    age
                };
                info!(
                    message_id = %self.message_id,
                    lease_age_seconds = lease_age.num_seconds(),
                    "peek lock renewed"
                );
            }
            Err(fault) if fault.fault_kind() == FaultKind::LockLost => {
                // The message will be, or already was, redelivered elsewhere;
                // the holder discovers the loss when it next acts on it.
                self.stopped.store(true, Ordering::Release);
                warn!(
                    message_id = %self.message_id,
                    "peek lock lost, renewal stopped for this message"
                );
            }
            Err(fault) => {
                warn!(
                    message_id = %self.message_id,
                    %fault,
                    "could not renew peek lock"
                );
            }
        }
    }

    /// When the lock was last successfully renewed (or first taken)
    pub fn last_renewed_at(&self) -> DateTime<Utc> {
        *self.last_renewed.lock().expect("renewal clock poisoned")
    }

    /// Whether renewal has stopped permanently for this message
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Background timer driving [`LeaseRenewer::renew_now`] at a fixed interval.
///
/// Scoped to one transaction: started at transactional receive, stopped and
/// joined during cleanup. Stopping is idempotent and waits at most for the
/// in-flight renewal attempt's own retry budget.
pub struct RenewalTimer {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalTimer {
    /// Start renewing on the given interval
    pub(crate) fn start(renewer: Arc<LeaseRenewer>, interval: Duration) -> Self {
        let (shutdown, mut signal) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; the lock
            // was just taken, so skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = signal.changed() => break,
                    _ = ticker.tick() => renewer.renew_now().await,
                }
            }
        });

        Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the timer to stop and wait for it to finish
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let handle = self
            .handle
            .lock()
            .expect("renewal timer handle poisoned")
            .take();

        if let Some(handle) = handle {
            if let Err(join_error) = handle.await {
                warn!(%join_error, "lease renewal timer did not stop cleanly");
            }
        }
    }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
