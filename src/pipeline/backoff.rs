use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// How the wait between two attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay after every failed attempt.
    Fixed,
    /// `delay * attempt`.
    Linear,
    /// `delay * 2^(attempt - 1)`, capped at `max_delay`, optionally with
    /// equal jitter (a random value in `[d/2, d]`).
    Exponential { max_delay: Duration, jitter: bool },
}

/// Bounded retry budget applied to each registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn linear(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            strategy: BackoffStrategy::Linear,
        }
    }

    pub fn exponential(
        max_attempts: usize,
        delay: Duration,
        max_delay: Duration,
        jitter: bool,
    ) -> Self {
        Self {
            max_attempts,
            delay,
            strategy: BackoffStrategy::Exponential { max_delay, jitter },
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1);
        match self.strategy {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Linear => self
                .delay
                .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX)),
            BackoffStrategy::Exponential { max_delay, jitter } => {
                let exponent = attempt.saturating_sub(1).min(31) as u32;
                let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
                let capped = self.delay.saturating_mul(multiplier).min(max_delay);
                if jitter {
                    apply_jitter(capped)
                } else {
                    capped
                }
            }
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let nanos = delay.as_nanos().min(u128::from(u64::MAX)) as u64;
    if nanos < 2 {
        return delay;
    }
    Duration::from_nanos(fastrand::u64(nanos / 2..=nanos))
}

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub policy: RetryPolicy,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Outcome of a retried operation, carrying how many attempts were spent.
pub(crate) struct RetryOutcome<T> {
    pub attempts: usize,
    pub result: Result<T>,
}

/// Runs `operation` until it succeeds or `max_attempts` is spent.
///
/// `on_failure` sees every failed attempt, including the last one, with the
/// delay before the next attempt and whether one will follow.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_failure: L,
) -> RetryOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
{
    let max_attempts = config.policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if let Some(token) = config.cancellation {
            if token.is_cancelled() {
                return RetryOutcome {
                    attempts: attempt - 1,
                    result: Err(anyhow!("retry cancelled")),
                };
            }
        }

        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    attempts: attempt,
                    result: Ok(value),
                }
            }
            Err(err) => {
                let exhausted = attempt >= max_attempts;
                let backoff = config.policy.delay_for(attempt);

                on_failure(attempt, backoff, &err, !exhausted);

                if exhausted {
                    return RetryOutcome {
                        attempts: attempt,
                        result: Err(err),
                    };
                }

                if let Err(cancelled) = sleep_with_cancellation(backoff, config.cancellation).await
                {
                    return RetryOutcome {
                        attempts: attempt,
                        result: Err(cancelled),
                    };
                }
            }
        }
    }
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("retry cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}
