//! Delay calculator for retried calls
//!
//! Fixed or exponential delays, optionally jittered so that many callers
//! failing together do not retry in lockstep.

use std::time::Duration;

use rand::Rng;

/// Largest relative spread applied by jitter.
const JITTER_SPREAD: f64 = 0.25;

/// Backoff strategy between resilient attempts.
///
/// # Example
///
/// ```
/// use sprocket_connection::BackoffStrategy;
/// use std::time::Duration;
///
/// let fixed = BackoffStrategy::fixed(100);
/// assert_eq!(fixed.calculate_delay(0), Duration::from_millis(100));
/// assert_eq!(fixed.calculate_delay(5), Duration::from_millis(100));
///
/// let growing = BackoffStrategy::new(100, 30_000).with_multiplier(2.0);
/// assert_eq!(growing.calculate_delay(1), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffStrategy {
    first: Duration,
    ceiling: Duration,
    /// 1.0 keeps the delay fixed
    multiplier: f64,
    jitter: bool,
}

impl BackoffStrategy {
    /// Exponential backoff from `initial_ms`, doubling up to `max_ms`.
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            first: Duration::from_millis(initial_ms),
            ceiling: Duration::from_millis(max_ms.max(initial_ms)),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// The same delay before every retry.
    pub fn fixed(delay_ms: u64) -> Self {
        Self::new(delay_ms, delay_ms).with_multiplier(1.0)
    }

    /// Retry immediately.
    pub fn none() -> Self {
        Self::fixed(0)
    }

    /// Growth factor per retry; values below 1.0 are raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Spread each delay randomly by up to a quarter either way.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0 = the first retry).
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let first_ms = self.first.as_millis() as f64;
        let ceiling_ms = self.ceiling.as_millis() as f64;
        let grown = (first_ms * self.multiplier.powi(retry.min(i32::MAX as u32) as i32)).min(ceiling_ms);

        if !self.jitter || grown == 0.0 {
            return Duration::from_millis(grown as u64);
        }
        let spread = rand::thread_rng().gen_range(-JITTER_SPREAD..=JITTER_SPREAD);
        Duration::from_millis((grown * (1.0 + spread)).round() as u64)
    }

    pub fn initial_delay(&self) -> Duration {
        self.first
    }

    pub fn max_delay(&self) -> Duration {
        self.ceiling
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn has_jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for BackoffStrategy {
    /// Fixed 100ms between attempts
    fn default() -> Self {
        Self::fixed(100)
    }
}
