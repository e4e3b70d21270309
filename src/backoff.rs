//! Reconnect backoff policy
//!
//! Exponential delay growth with bounded random jitter so a fleet of
//! clients does not reconnect in lockstep after a venue outage.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Exponential backoff with uniform jitter.
#[derive(Debug)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    multiplier: f64,
    jitter_frac: f64,
    current: Duration,
    attempt_count: u32,
    rng: StdRng,
}

impl BackoffPolicy {
    /// `jitter_frac` is clamped to [0, 1]; `multiplier` to >= 1.
    pub fn new(base: Duration, cap: Duration, multiplier: f64, jitter_frac: f64) -> Self {
        Self {
            base,
            cap: cap.max(base),
            multiplier: multiplier.max(1.0),
            jitter_frac: jitter_frac.clamp(0.0, 1.0),
            current: base,
            attempt_count: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Next delay: `min(current, cap) * U(1 - jitter, 1 + jitter)`.
    ///
    /// The internal delay keeps growing uncapped (saturating); the cap is
    /// applied on read, so `reset` always restores the exact initial
    /// distribution.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count += 1;

        let capped = self.current.min(self.cap);
        let jitter = if self.jitter_frac > 0.0 {
            self.rng
                .gen_range(1.0 - self.jitter_frac..=1.0 + self.jitter_frac)
        } else {
            1.0
        };
        let delay = Duration::from_secs_f64(capped.as_secs_f64() * jitter);

        let grown = self.current.as_secs_f64() * self.multiplier;
        // saturate well below Duration's limit; the cap is what callers see
        self.current = Duration::from_secs_f64(grown.min(86_400.0));

        delay
    }

    /// Restore the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempt_count = 0;
    }

    /// Current delay before jitter, as it would be used next.
    pub fn current_delay(&self) -> Duration {
        self.current.min(self.cap)
    }

    /// Attempts since the last reset.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }
}
