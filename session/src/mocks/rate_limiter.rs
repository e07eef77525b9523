//! Mock rate limiter.

use crate::error::{Result, SessionError};
use crate::providers::RateLimiter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Rate limiter double: allows everything until told to deny.
#[derive(Debug, Default)]
pub struct MockRateLimiter {
    deny: AtomicBool,
}

impl MockRateLimiter {
    /// Create a permissive limiter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            deny: AtomicBool::new(false),
        }
    }

    /// Make subsequent checks fail with `TooManyAttempts`.
    pub fn deny_all(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }
}

impl RateLimiter for MockRateLimiter {
    async fn check_and_record(
        &self,
        _key: &str,
        _max_attempts: u32,
        window: Duration,
    ) -> Result<()> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SessionError::TooManyAttempts {
                retry_after: window,
            });
        }
        Ok(())
    }

    async fn reset(&self, _key: &str) {}
}
