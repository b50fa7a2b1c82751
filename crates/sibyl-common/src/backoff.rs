//! Bounded exponential backoff with jitter, shared by every adapter that
//! retries a transient backing-store failure (§4.1, §4.5, §5).

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            max_attempts: 5,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before attempt `n` (0-indexed), with +/-20% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max.as_secs_f64());
        let jitter_factor = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_secs_f64(capped * jitter_factor)
    }
}

/// Retry `op` up to `config.max_attempts` times, sleeping with jittered
/// exponential backoff between attempts. `is_retryable` decides whether a
/// given error should be retried at all; non-retryable errors return
/// immediately.
pub async fn retry_with_backoff<T, E, Fut, F, R>(
    config: BackoffConfig,
    mut op: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < config.max_attempts && is_retryable(&err) => {
                tokio::time::sleep(config.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_with_attempt_and_stays_capped() {
        let config = BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            max_attempts: 10,
            multiplier: 2.0,
        };
        let d0 = config.delay_for(0);
        let d5 = config.delay_for(5);
        assert!(d0 <= Duration::from_millis(200));
        assert!(d5 <= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn retry_with_backoff_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_attempts: 3,
            multiplier: 1.0,
        };
        let result: Result<(), &str> = retry_with_backoff(
            config,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("transient") }
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_returns_first_success() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig::default();
        let result = retry_with_backoff(
            config,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok::<_, &str>(42) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let config = BackoffConfig::default();
        let result: Result<(), &str> = retry_with_backoff(
            config,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
