//! Fixed-cadence request pacing.
//!
//! Every outbound request in a run passes through one [`RateLimiter`].
//! The limiter is a size-one gate around the instant of the last grant:
//! waiters are admitted one at a time, and each is held until the
//! configured interval has elapsed since the previous grant.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use hauler_core::rate_limiter::{RateLimiter, RateLimiterConfig};
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new(Duration::from_secs(1)).with_jitter(Duration::from_millis(250)),
//! );
//! limiter.until_ready().await; // immediate
//! limiter.until_ready().await; // >= 1s later
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Minimum spacing between two consecutive grants.
    pub interval: Duration,

    /// Maximum random jitter added on top of `interval` (uniform [0, jitter]).
    ///
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl RateLimiterConfig {
    /// Create a new config with the given interval and no jitter.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
        }
    }

    /// Add random jitter (uniform [0, jitter]) on top of the interval.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Compute the effective spacing for a single wait (interval + random jitter).
    fn effective_interval(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.interval + Duration::from_millis(jitter_ms)
    }
}

impl Default for RateLimiterConfig {
    /// One request per second, no jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Grants request slots no closer than the configured interval apart.
///
/// Cloning shares the underlying gate, so every clone paces against the
/// same clock. Ticks never accumulate: a caller that arrives late is
/// admitted immediately but does not earn a burst.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    last_grant: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            last_grant: Arc::new(Mutex::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Suspend until the next slot is available, then claim it.
    pub async fn until_ready(&self) {
        // Held across the sleep: concurrent waiters queue behind the gate.
        let mut last = self.last_grant.lock().await;

        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            let required = self.config.effective_interval();
            if elapsed < required {
                let wait = required - elapsed;
                tracing::debug!(wait_ms = %wait.as_millis(), "Waiting for rate limiter slot");
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Jitter from a time-seeded xorshift; not crypto.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
