//! Bounded polling with backoff
//!
//! Waiting for an assembly to become ready or disappear polls the backend up
//! to [`MAX_ATTEMPTS`] times, sleeping `2^n` seconds plus up to one second of
//! jitter after attempt `n`. CRD deletion uses the same loop with a fixed one
//! second delay.

use std::future::Future;
use std::time::Duration;

use indicatif::ProgressBar;

/// Default number of checks before giving up
pub const MAX_ATTEMPTS: u32 = 10;

/// Delay between checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `2^attempt` seconds plus uniform jitter in `[0, 1)`
    Exponential,
    Fixed(Duration),
}

/// How long to keep probing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff: Backoff::Exponential,
        }
    }
}

impl PollPolicy {
    /// Ten checks one second apart
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Sleep after the zero-indexed `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential => {
                let base = 2f64.powi(attempt.min(30) as i32);
                Duration::from_secs_f64(base + rand::random::<f64>())
            }
            Backoff::Fixed(delay) => delay,
        }
    }

    /// Check until it reports success or attempts run out
    ///
    /// Returns `false` when every attempt failed. The progress bar advances
    /// once per check and is cleared on return.
    pub async fn until<F, Fut>(&self, mut check: F, progress: &ProgressBar) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 0..self.max_attempts {
            if check().await {
                progress.finish_and_clear();
                return true;
            }
            progress.inc(1);

            let delay = self.delay(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before next check");
            tokio::time::sleep(delay).await;
        }

        progress.finish_and_clear();
        tracing::debug!(attempts = self.max_attempts, "polling exhausted");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delay_bounds() {
        let policy = PollPolicy::default();
        for attempt in 0..MAX_ATTEMPTS {
            let delay = policy.delay(attempt).as_secs_f64();
            let base = 2f64.powi(attempt as i32);
            assert!(delay >= base && delay < base + 1.0, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn test_fixed_delay() {
        let policy = PollPolicy::fixed(Duration::from_secs(1));
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(9), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_succeeds_on_third_check() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let started = tokio::time::Instant::now();

        let ok = PollPolicy::default()
            .until(
                || async move { calls.fetch_add(1, Ordering::SeqCst) == 2 },
                &ProgressBar::hidden(),
            )
            .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // slept after attempts 0 and 1: at least 1s + 2s
        let elapsed = started.elapsed().as_secs_f64();
        assert!((3.0..5.0).contains(&elapsed), "{elapsed}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let ok = PollPolicy::default()
            .until(
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    false
                },
                &ProgressBar::hidden(),
            )
            .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
