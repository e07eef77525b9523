//! Rate limiter for authentication attempts.
//!
//! Limits brute-force attempts per user. The in-memory fixed-window
//! implementation covers a single process; a distributed deployment would
//! implement the trait over Redis.

use crate::error::{Result, SessionError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rate limiter for authentication attempts.
pub trait RateLimiter: Send + Sync {
    /// Record an attempt and fail if the key exceeded its budget.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::TooManyAttempts` when the limit is hit.
    fn check_and_record(
        &self,
        key: &str,
        max_attempts: u32,
        window: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Clear a key's window, e.g. after a successful check.
    fn reset(&self, key: &str) -> impl Future<Output = ()> + Send;
}

/// In-memory fixed-window rate limiter.
#[derive(Debug, Default)]
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl FixedWindowRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    async fn check_and_record(
        &self,
        key: &str,
        max_attempts: u32,
        window: Duration,
    ) -> Result<()> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| SessionError::Internal("rate limiter poisoned".into()))?;

        let now = Instant::now();
        let entry = windows.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) > window {
            *entry = (now, 0);
        }
        entry.1 += 1;

        if entry.1 > max_attempts {
            let retry_after = window.saturating_sub(now.duration_since(entry.0));
            return Err(SessionError::TooManyAttempts { retry_after });
        }
        Ok(())
    }

    async fn reset(&self, key: &str) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.remove(key);
        }
    }
}
