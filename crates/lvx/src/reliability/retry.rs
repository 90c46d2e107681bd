// ai
//! 🔁 The retry runner — bounded exponential backoff with optional jitter.
//!
//! Attempt k (0-indexed) waits `min(initial × multiplier^k, max)` before
//! going around again, perturbed ±20 % when jitter is on — because a
//! thousand workers retrying on the same metronome beat is how you DDoS
//! your own sink, and nobody wants to write THAT postmortem.
//!
//! The runner is generic over the operation and over what "retryable" means:
//! the caller supplies a classifier, the runner supplies the patience.
//! Cancellation aborts immediately, mid-backoff included — a shutdown does
//! not wait politely through four more doublings. 🦆

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// 🔧 Retry policy — the `[retry]` section of the config tree.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// 💀 How a retried operation ultimately failed.
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// 🔁 Every attempt was retryable, and we ran out of attempts.
    /// Carries the last error and the attempt count.
    Exhausted { attempts: u32, last: E },
    /// 🧱 The classifier said "do not retry this one". First strike, out.
    Halted(E),
    /// 🛑 The token fired — before an attempt or mid-backoff, either way
    /// we left immediately and took nothing personally.
    Cancelled,
}

impl RetryPolicy {
    /// 📐 The backoff for attempt `k` (0-indexed): exponential, capped,
    /// optionally jittered ±20 %.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let final_secs = if self.jitter {
            capped * rand::thread_rng().gen_range(0.8..=1.2)
        } else {
            capped
        };
        Duration::from_secs_f64(final_secs.max(0.0))
    }

    /// 🔁 Run `op` until it succeeds, the classifier halts it, the attempts
    /// run out, or the token fires.
    ///
    /// `classify(&err) == true` means retryable. The classifier is the
    /// caller's — the runner has no opinions about error semantics, only
    /// about scheduling.
    pub async fn run<T, E, Op, Fut, Cls>(
        &self,
        cancel: &CancellationToken,
        classify: Cls,
        mut op: Op,
    ) -> Result<T, RetryFailure<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Cls: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(RetryFailure::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !classify(&err) => return Err(RetryFailure::Halted(err)),
                Err(err) => {
                    if attempt + 1 >= attempts {
                        return Err(RetryFailure::Exhausted {
                            attempts,
                            last: err,
                        });
                    }
                    let backoff = self.backoff_for(attempt);
                    debug!(
                        "🔁 attempt {} failed ({err}), backing off {:?}",
                        attempt + 1,
                        backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
                    }
                }
            }
        }
        unreachable!("the loop always returns before falling out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
            jitter,
        }
    }

    /// 🧪 The backoff curve without jitter is pure arithmetic:
    /// initial × mult^k, capped at max.
    #[test]
    fn the_one_where_the_backoff_doubles_until_the_ceiling() {
        let p = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(p.backoff_for(0), Duration::from_millis(100));
        assert_eq!(p.backoff_for(1), Duration::from_millis(200));
        assert_eq!(p.backoff_for(2), Duration::from_millis(300), "capped");
        assert_eq!(p.backoff_for(7), Duration::from_millis(300), "still capped");
    }

    /// 🧪 Property 11, jitter edition: every sample stays within ±20 %.
    #[test]
    fn the_one_where_the_jitter_stays_inside_its_lane() {
        let p = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        };
        for _ in 0..200 {
            let b = p.backoff_for(1).as_secs_f64();
            assert!((0.16..=0.24).contains(&b), "200ms ±20% violated: {b}");
        }
    }

    /// 🧪 An always-retryable failure is attempted exactly max_attempts
    /// times, and the exhaustion report carries the last error.
    #[tokio::test]
    async fn the_one_where_three_strikes_means_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(3, false)
            .run(&CancellationToken::new(), |_: &String| true, |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err("still broken".to_string()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        match result.unwrap_err() {
            RetryFailure::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "still broken");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    /// 🧪 A non-retryable failure halts on the first strike. No backoff owed.
    #[tokio::test]
    async fn the_one_where_terminal_means_terminal() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5, false)
            .run(&CancellationToken::new(), |_: &String| false, |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err("hopeless".to_string()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(matches!(result.unwrap_err(), RetryFailure::Halted(_)));
    }

    /// 🧪 Success on a later attempt is still success.
    #[tokio::test]
    async fn the_one_where_the_second_try_sticks_the_landing() {
        let calls = AtomicU32::new(0);
        let result = policy(3, false)
            .run(&CancellationToken::new(), |_: &String| true, |attempt| {
                calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if attempt == 0 {
                        Err("first pancake".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    /// 🧪 A pre-cancelled token never even makes the first call.
    #[tokio::test]
    async fn the_one_where_the_shutdown_outranks_the_retry() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(3, false)
            .run(&cancel, |_: &String| true, |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err("unreachable anyway".to_string()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert!(matches!(result.unwrap_err(), RetryFailure::Cancelled));
    }

    /// 🧪 Cancellation mid-backoff aborts the wait instead of sleeping it out.
    #[tokio::test]
    async fn the_one_where_the_token_interrupts_the_nap() {
        let p = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: false,
        };
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };
        let started = std::time::Instant::now();
        let result: Result<(), _> = p
            .run(&cancel, |_: &String| true, |_| async {
                Err("transient".to_string())
            })
            .await;
        canceller.await.unwrap();
        assert!(matches!(result.unwrap_err(), RetryFailure::Cancelled));
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "did not sleep through the 60s backoff"
        );
    }
}
