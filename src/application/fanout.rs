//! Bounded concurrency for outbound calls.
//!
//! A [`FanOut`] owns one counting semaphore. Every call acquires a permit,
//! runs under a timeout and releases the permit when it finishes, so a stuck
//! call holds at most one permit for at most `call_timeout`. Futures run on
//! the caller's task: dropping the caller cancels them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct FanOut {
    permits: Arc<Semaphore>,
    call_timeout: Duration,
}

impl FanOut {
    pub fn new(max_in_flight: usize, call_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            call_timeout,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `call` once a permit is free. Failures and timeouts are logged
    /// under `label` and yield `None`.
    pub async fn call<T, E, F>(&self, label: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let Ok(_permit) = self.permits.acquire().await else {
            warn!(call = label, "Fan-out limiter closed");
            return None;
        };
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                warn!(call = label, error = %err, "Fan-out call failed");
                None
            }
            Err(_) => {
                warn!(
                    call = label,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "Fan-out call timed out"
                );
                None
            }
        }
    }
}
