//! Session engine configuration.
//!
//! One immutable record constructed at startup and shared by reference;
//! nothing mutates it after [`Commands::start`](crate::commands::Commands::start).

use chrono::Duration;

/// Configuration for the session command engine.
///
/// # Example
///
/// ```
/// use portcullis_session::config::SessionConfig;
///
/// let config = SessionConfig::new("login.example.com")
///     .with_challenge_ttl(chrono::Duration::minutes(10))
///     .with_conflict_retries(5);
/// assert_eq!(config.external_domain, "login.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Default relying-party domain for WebAuthn challenges when a request
    /// does not carry one. Must be non-empty at startup.
    pub external_domain: String,

    /// How stale a pending WebAuthn challenge may be when checked.
    ///
    /// Default: 5 minutes
    pub challenge_ttl: Duration,

    /// Maximum age of an IdP intent at check time.
    ///
    /// Default: 10 minutes
    pub intent_max_age: Duration,

    /// Password attempts allowed per user within the window.
    ///
    /// Default: 5
    pub password_max_attempts: u32,

    /// Rate-limit window for password attempts.
    ///
    /// Default: 15 minutes
    pub password_attempt_window: std::time::Duration,

    /// How often a conflicted push is retried before surfacing.
    ///
    /// Default: 3
    pub conflict_retries: u32,

    /// Base backoff between conflict retries; doubles per attempt.
    ///
    /// Default: 50 ms
    pub conflict_backoff: std::time::Duration,
}

impl SessionConfig {
    /// Create a configuration with conservative defaults.
    #[must_use]
    pub fn new(external_domain: impl Into<String>) -> Self {
        Self {
            external_domain: external_domain.into(),
            challenge_ttl: Duration::minutes(5),
            intent_max_age: Duration::minutes(10),
            password_max_attempts: 5,
            password_attempt_window: std::time::Duration::from_secs(15 * 60),
            conflict_retries: 3,
            conflict_backoff: std::time::Duration::from_millis(50),
        }
    }

    /// Set the challenge TTL.
    #[must_use]
    pub const fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Set the maximum intent age.
    #[must_use]
    pub const fn with_intent_max_age(mut self, max_age: Duration) -> Self {
        self.intent_max_age = max_age;
        self
    }

    /// Set the password rate limit.
    #[must_use]
    pub const fn with_password_rate_limit(
        mut self,
        max_attempts: u32,
        window: std::time::Duration,
    ) -> Self {
        self.password_max_attempts = max_attempts;
        self.password_attempt_window = window;
        self
    }

    /// Set the number of conflict retries.
    #[must_use]
    pub const fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Set the base conflict backoff.
    #[must_use]
    pub const fn with_conflict_backoff(mut self, backoff: std::time::Duration) -> Self {
        self.conflict_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = SessionConfig::new("example.com");
        assert_eq!(config.challenge_ttl, Duration::minutes(5));
        assert_eq!(config.password_max_attempts, 5);
        assert_eq!(config.conflict_retries, 3);
    }

    #[test]
    fn builders_override_defaults() {
        let config = SessionConfig::new("example.com")
            .with_conflict_retries(7)
            .with_password_rate_limit(3, std::time::Duration::from_secs(60));
        assert_eq!(config.conflict_retries, 7);
        assert_eq!(config.password_max_attempts, 3);
    }
}
