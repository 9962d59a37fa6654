use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Exponential backoff with up to 25% additive jitter, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Image downloads: 500ms base, 10s cap.
    pub const DOWNLOAD: Backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));

    /// GitHub metadata calls: 1s base, 30s cap.
    pub const GITHUB: Backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt + 1` (`attempt` is zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_cap = (exponential / 4).as_nanos().min(u64::MAX as u128) as u64;
        let jitter = if jitter_cap == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rand::random_range(0..=jitter_cap))
        };
        exponential.saturating_add(jitter).min(self.max)
    }

    /// Sleeps for [`Backoff::delay`]; returns `false` if cancelled first.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay(attempt);
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_within_jitter_bounds() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        for attempt in 0..5 {
            let floor = Duration::from_millis(100 * 2u64.pow(attempt));
            let ceiling = floor + floor / 4;
            let delay = backoff.delay(attempt);
            assert!(delay >= floor && delay <= ceiling, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn delay_is_capped() {
        assert_eq!(Backoff::DOWNLOAD.delay(10), Duration::from_secs(10));
        assert_eq!(Backoff::GITHUB.delay(10), Duration::from_secs(30));
        assert_eq!(Backoff::GITHUB.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn zero_base_never_sleeps() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn wait_returns_early_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        assert!(!Backoff::GITHUB.wait(4, &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
