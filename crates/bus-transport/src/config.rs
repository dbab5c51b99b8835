//! Transport configuration.

use crate::backend::QueueOptions;
use std::time::Duration;

/// Configuration for a transport instance
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Peek-lock duration requested when provisioning the input queue
    pub lock_duration: Duration,
    /// Deliveries after which the backend gives up on a message
    pub max_delivery_count: u32,
    /// Interval of the automatic peek-lock renewal timer. Renewal is only
    /// started when this is below `lock_duration`.
    pub renewal_interval: Duration,
    /// Backoff schedule for immediate (non-transactional) sends
    pub immediate_send_backoff: Vec<Duration>,
    /// Backoff schedule for each send or batch during a commit flush
    pub flush_backoff: Vec<Duration>,
    /// Backoff schedule for a single lease renewal attempt
    pub renewal_backoff: Vec<Duration>,
}

fn seconds(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(5 * 60),
            max_delivery_count: 1000,
            // 4.5 minutes, comfortably inside the default lock duration
            renewal_interval: Duration::from_secs(270),
            immediate_send_backoff: seconds(&[1, 2, 5, 10, 10, 10, 10, 10, 20, 20, 20, 30, 30, 30, 30]),
            flush_backoff: seconds(&[1, 2, 5, 10, 10, 10]),
            renewal_backoff: seconds(&[1, 2, 5, 10, 10, 10]),
        }
    }
}

impl TransportConfig {
    /// Create configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the automatic peek-lock renewal interval
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    /// Override the lock duration requested at provisioning
    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Whether the automatic renewal timer should run at all
    pub fn renewal_enabled(&self) -> bool {
        self.renewal_interval < self.lock_duration
    }

    /// Provisioning options derived from this configuration
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            lock_duration: self.lock_duration,
            max_delivery_count: self.max_delivery_count,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
