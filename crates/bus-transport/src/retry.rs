//! Bounded retry with a fixed backoff schedule and explicit fault
//! classification.

use crate::error::{FaultKind, TransportError};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Outcome of classifying a fault inside a retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Wait out the next backoff delay and try again
    Retryable,
    /// Propagate immediately without retrying
    Fatal,
}

/// Classifier used for outbound sends: retry transient faults only.
pub fn transient_faults(error: &TransportError) -> FaultDisposition {
    match error.fault_kind() {
        FaultKind::Retryable => FaultDisposition::Retryable,
        FaultKind::Fatal | FaultKind::LockLost => FaultDisposition::Fatal,
    }
}

/// Classifier used for lock renewal: retry everything except a lost lock,
/// which no amount of retrying brings back.
pub fn all_but_lock_lost(error: &TransportError) -> FaultDisposition {
    match error.fault_kind() {
        FaultKind::LockLost => FaultDisposition::Fatal,
        FaultKind::Retryable | FaultKind::Fatal => FaultDisposition::Retryable,
    }
}

/// Executes a fallible async operation under a fixed, non-empty backoff
/// schedule.
///
/// The operation runs once, and on each fault classified retryable the
/// retrier waits the delay at position `min(attempt, len - 1)` and tries
/// again. One retry is made per schedule entry; when the schedule is
/// exhausted the final fault propagates.
#[derive(Debug, Clone)]
pub struct Retrier {
    backoffs: Vec<Duration>,
}

impl Retrier {
    /// Create a retrier from a backoff schedule
    pub fn new(backoffs: Vec<Duration>) -> Result<Self, TransportError> {
        if backoffs.is_empty() {
            return Err(TransportError::Configuration {
                message: "retry backoff schedule must not be empty".to_string(),
            });
        }

        Ok(Self { backoffs })
    }

    /// Number of retries this schedule allows
    pub fn max_retries(&self) -> usize {
        self.backoffs.len()
    }

    /// Run the operation without a retry observer
    pub async fn run<T, Op, Fut, C>(&self, classify: C, op: Op) -> Result<T, TransportError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
        C: Fn(&TransportError) -> FaultDisposition,
    {
        self.run_observed(classify, |_, _, _| {}, op).await
    }

    /// Run the operation, reporting each retry to the observer.
    ///
    /// The observer receives the 1-based attempt number of the failed
    /// attempt, the delay about to be waited, and the fault itself.
    pub async fn run_observed<T, Op, Fut, C, Obs>(
        &self,
        classify: C,
        mut observer: Obs,
        mut op: Op,
    ) -> Result<T, TransportError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
        C: Fn(&TransportError) -> FaultDisposition,
        Obs: FnMut(usize, Duration, &TransportError),
    {
        let mut failures = 0usize;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(fault) => {
                    if classify(&fault) == FaultDisposition::Fatal {
                        return Err(fault);
                    }

                    if failures >= self.backoffs.len() {
                        debug!(
                            retries = self.backoffs.len(),
                            "retry schedule exhausted, propagating fault"
                        );
                        return Err(fault);
                    }

                    let delay = self.backoffs[failures.min(self.backoffs.len() - 1)];
                    failures += 1;
                    observer(failures, delay, &fault);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
