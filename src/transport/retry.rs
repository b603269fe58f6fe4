use std::time::Duration;

use reqwest::StatusCode;

/// Classification of a failed request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 5xx, 408, 429, connection failures and timeouts.
    Transient,
    /// Other 4xx and responses that cannot be used.
    Permanent,
    /// 401 or 403.
    Unauthorized,
}

impl Fault {
    pub fn is_transient(self) -> bool {
        self == Fault::Transient
    }
}

/// Classifies an HTTP status. `None` means the request succeeded.
pub fn classify_status(status: StatusCode) -> Option<Fault> {
    if status.is_success() {
        None
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(Fault::Unauthorized)
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Some(Fault::Transient)
    } else {
        Some(Fault::Permanent)
    }
}

/// Classifies a request that failed before a usable response arrived.
pub fn classify_error(error: &reqwest::Error) -> Fault {
    if error.is_builder() || error.is_redirect() || error.is_decode() {
        Fault::Permanent
    } else {
        // Connect errors, resets, timeouts and truncated bodies.
        Fault::Transient
    }
}

/// Backoff schedule and retry predicate applied to every outbound request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Random extra fraction of the nominal delay, in `[0, multiplier - 1]`.
    pub jitter: f64,
    pub retryable: fn(Fault) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
            retryable: Fault::is_transient,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Deterministic delay after failed attempt number `attempt` (1-based):
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let nominal = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(nominal.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with jitter applied. Jitter is bounded by `multiplier - 1`, so the
    /// sequence stays non-decreasing, and the result never exceeds `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let nominal = self.delay_for_attempt(attempt).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, (self.multiplier - 1.0).max(0.0));
        let jittered = nominal * (1.0 + jitter * rand::random::<f64>());
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }

    /// Nominal delays between consecutive attempts.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|attempt| self.delay_for_attempt(attempt))
    }
}
