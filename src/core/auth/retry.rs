// Retry policy and error classification for token-endpoint calls.
//
// Two kinds of failure matter here and they must never be conflated:
// transient ones (network, timeout, rate limit) are worth retrying with
// backoff; permanent-auth ones (revoked consent, invalid grant) are not, and
// must surface as the distinct reauth condition.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying: the next attempt may succeed.
    Transient,
    /// Retrying cannot help; only interactive re-consent can.
    PermanentAuth,
}

/// Errors raised by a `TokenProvider` implementation. Infra maps transport
/// and HTTP outcomes onto these two variants; the manager never inspects
/// anything finer-grained.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("authorization permanently rejected: {0}")]
    PermanentAuth(String),
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Transient(_) => ErrorClass::Transient,
            ProviderError::PermanentAuth(_) => ErrorClass::PermanentAuth,
        }
    }
}

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after failed attempt number `attempt` (1-based):
    /// base * 2^(attempt-1), capped, plus up to 25% random jitter so a herd
    /// of scripts sharing one machine doesn't hammer the endpoint in
    /// lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);

        let jitter_cap = scaled.as_millis() as u64 / 4;
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        scaled + Duration::from_millis(jitter)
    }
}
