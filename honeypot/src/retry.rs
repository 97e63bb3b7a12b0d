use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::PipelineError;
use crate::config::Config;

/// Exponential backoff with a hard elapsed-time budget.
///
/// - `initial_interval`: delay after the first failure
/// - `multiplier`: factor the delay grows by on each further failure
/// - `max_interval`: cap for a single delay
/// - `max_elapsed`: total budget; once a delay would cross it, give up
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(config.retry_initial_interval_ms),
            multiplier: 2.0,
            max_interval: Duration::from_secs(config.retry_max_interval_secs),
            max_elapsed: Duration::from_secs(config.retry_max_elapsed_secs),
        }
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        // Grow in float seconds and cap before converting back: the scaled
        // value exceeds what Duration can hold long before the budget does.
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(attempt as i32);
        if scaled.is_finite() && scaled < self.max_interval.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_interval
        }
    }

    /// Delay before the next attempt. A rate-limited failure floors the
    /// delay at the provider's resume time, so a cooling-down provider is
    /// never hammered on the generic schedule.
    pub fn delay_for(&self, error: &PipelineError, attempt: u32) -> Duration {
        let backoff = self.next_delay(attempt);
        match error.resume_at() {
            Some(resume_at) => {
                let until = resume_at - OffsetDateTime::now_utc();
                backoff.max(until.try_into().unwrap_or(Duration::ZERO))
            }
            None => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_interval: Duration::from_millis(500),
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// Run `op` until it succeeds, the elapsed budget is spent (returns the last
/// error), or `cancel` fires between attempts. An in-flight attempt always
/// completes; cancellation only skips further waiting.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let started = tokio::time::Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let delay = policy.delay_for(&err, attempt);
        if started.elapsed() + delay >= policy.max_elapsed {
            return Err(err);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("retry loop cancelled after: {err}");
                return Err(PipelineError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::api::{EnrichError, WriteError};

    use super::*;

    fn policy(max_elapsed: Duration) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
            max_elapsed,
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let p = policy(Duration::from_secs(60));

        let expected = [1, 2, 4, 8, 10, 10];
        for (attempt, secs) in expected.into_iter().enumerate() {
            assert_eq!(
                p.next_delay(attempt as u32),
                Duration::from_secs(secs),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn late_attempts_stay_capped_instead_of_overflowing() {
        let p = RetryPolicy::default();
        assert_eq!(p.next_delay(66), p.max_interval);
        assert_eq!(p.next_delay(u32::MAX), p.max_interval);

        let tiny = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        assert_eq!(tiny.next_delay(200), tiny.max_interval);
    }

    #[test]
    fn rate_limited_floors_the_delay_at_the_resume_time() {
        let p = policy(Duration::from_secs(300));
        let resume_at = OffsetDateTime::now_utc() + time::Duration::seconds(120);
        let err = PipelineError::Enrich(EnrichError::RateLimited(resume_at));

        let delay = p.delay_for(&err, 0);
        assert!(delay >= Duration::from_secs(119), "got {delay:?}");
        assert!(delay <= Duration::from_secs(121), "got {delay:?}");
    }

    #[test]
    fn transient_errors_use_the_generic_schedule() {
        let p = policy(Duration::from_secs(300));
        let err = PipelineError::Enrich(EnrichError::Transient("boom".into()));
        assert_eq!(p.delay_for(&err, 2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_as_soon_as_the_op_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let result = retry_with_backoff(
            policy(Duration::from_secs(60)),
            &CancellationToken::new(),
            move || {
                let calls = counted.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PipelineError::Write(WriteError::Transport("down".into())))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_returns_the_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let result: Result<(), _> = retry_with_backoff(
            policy(Duration::from_secs(5)),
            &CancellationToken::new(),
            move || {
                let calls = counted.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::Write(WriteError::Transport("down".into())))
                }
            },
        )
        .await;

        assert_eq!(
            result.unwrap_err(),
            PipelineError::Write(WriteError::Transport("down".into()))
        );
        // Delays 1s + 2s fit the 5s budget, the next 4s does not.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retrying_but_not_the_first_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry_with_backoff(
            policy(Duration::from_secs(60)),
            &cancel,
            move || {
                let calls = counted.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::Write(WriteError::Transport("down".into())))
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), PipelineError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
