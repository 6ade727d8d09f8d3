//! Suspension primitives shared by every resilience component.
//!
//! All waits in the crate (remediation steps, tactic attempts, identity
//! rotation, simulated human delays, retry backoff) go through [`pause`] so
//! they stay non-blocking and can be interrupted through a [`CancelSignal`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::sleep;

/// Delays (ms) between simulated human interactions.
pub const HUMAN_DELAYS_MS: &[u64] = &[100, 200, 300, 500, 800, 1200];

/// Coarser delays (ms) used to pace consecutive page interactions.
pub const PACING_DELAYS_MS: &[u64] = &[1000, 2000, 3000, 5000, 8000];

/// Raised when a pause was interrupted by its cancellation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag threaded through long-running chains.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelState>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
pub async fn pause(duration: Duration, cancel: &CancelSignal) -> Result<(), Cancelled> {
    cancel.check()?;
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Cancelled),
    }
}

/// Picks one delay from a discrete set, falling back to `fallback_ms` when empty.
pub fn sample_delay(choices: &[u64], fallback_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_millis(choices.choose(&mut rng).copied().unwrap_or(fallback_ms))
}

/// Bounded exponential backoff with symmetric jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub variance_pct: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(2000)
    }
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            min_delay_ms: base_delay_ms / 2,
            max_delay_ms: base_delay_ms.saturating_mul(8),
            multiplier: 2.0,
            variance_pct: 0.25,
        }
    }

    /// Constant delay without jitter.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis().min(u64::MAX as u128) as u64;
        Self {
            base_delay_ms: ms,
            min_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            variance_pct: 0.0,
        }
    }

    pub fn with_bounds(mut self, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.min_delay_ms = min_delay_ms;
        self.max_delay_ms = max_delay_ms.max(min_delay_ms);
        self
    }

    pub fn with_variance(mut self, variance_pct: f64) -> Self {
        self.variance_pct = variance_pct.clamp(0.0, 1.0);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Delay to apply before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let mut delay = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);

        if self.variance_pct > 0.0 {
            let variance = delay * self.variance_pct;
            let jitter = rand::random::<f64>() * variance - (variance / 2.0);
            delay += jitter;
        }

        let upper = self.max_delay_ms.max(self.min_delay_ms) as f64;
        delay = delay.clamp(self.min_delay_ms as f64, upper);
        Duration::from_millis(delay.max(0.0) as u64)
    }
}
