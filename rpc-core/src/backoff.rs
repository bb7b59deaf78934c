//! Transport-level retry cadence.
//!
//! This is distinct from [`crate::command::RetryStrategy`], which decides
//! whether a *failed command* gets handed to the durable backlog. `Backoff`
//! instead governs how eagerly the push/pull loops re-attempt a single HTTP
//! call that failed at the transport layer.

use std::{fmt, ops::RangeInclusive, time::Duration};

pub trait BackoffError {
    fn should_retry(&self) -> bool;
}

pub trait BackoffPolicy<E>: Sync {
    fn retry(&self, completed_attempts: usize, last_error: &E) -> Option<Duration>;
}

#[derive(Clone, Debug)]
pub struct Backoff {
    delay: RangeInclusive<Duration>,
    max_attempts: Option<usize>,
    factor: f64,
}

impl Backoff {
    pub const fn never() -> Backoff {
        Backoff {
            delay: Duration::ZERO..=Duration::ZERO,
            max_attempts: Some(1),
            factor: 1.0,
        }
    }

    pub const fn delay(dur: Duration) -> Backoff {
        Backoff {
            delay: dur..=dur,
            max_attempts: None,
            factor: 1.0,
        }
    }

    pub const fn delay_millis(n: u64) -> Backoff {
        Self::delay(Duration::from_millis(n))
    }

    pub const fn delay_jitter_millis(n: RangeInclusive<u64>) -> Backoff {
        Backoff {
            delay: Duration::from_millis(*n.start())..=Duration::from_millis(*n.end()),
            max_attempts: None,
            factor: 1.0,
        }
    }

    pub const fn with_max_attempts(self, n: usize) -> Backoff {
        Backoff {
            delay: self.delay,
            max_attempts: Some(n),
            factor: self.factor,
        }
    }

    pub const fn with_backoff_factor(self, factor: f64) -> Backoff {
        Backoff {
            delay: self.delay,
            max_attempts: self.max_attempts,
            factor,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::never()
    }
}

impl<E: BackoffError> BackoffPolicy<E> for Backoff {
    fn retry(&self, completed_attempts: usize, last_error: &E) -> Option<Duration> {
        let attempts_remaining = self
            .max_attempts
            .map(|x| completed_attempts < x)
            .unwrap_or(true);
        if !last_error.should_retry() || !attempts_remaining {
            return None;
        }

        let f = self
            .factor
            .powi(completed_attempts as i32 - 1)
            .clamp(1.0, 50.0);
        Some(rand::random_range(self.delay.clone()).mul_f64(f))
    }
}

/// The push/pull loops' default cadence: retry indefinitely, once per
/// second, with no backoff growth — these loops run forever until `stop()`.
pub const TRANSPORT_BACKOFF: Backoff = Backoff::delay_millis(1_000);
