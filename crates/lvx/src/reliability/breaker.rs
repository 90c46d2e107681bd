// ai
//! 🚧 The circuit breaker — fail fast when the sink is already on fire.
//!
//! 🎬 COLD OPEN — INT. INCIDENT CHANNEL — THE SINK HAS BEEN DOWN FOR A MINUTE
//!
//! Without a breaker, every worker keeps throwing events at the dead sink,
//! each one eating a full retry ladder before giving up. With a breaker,
//! failure number five flips the switch and everyone fails fast until the
//! timeout lapses — then ONE probe goes through to ask "you alive?" before
//! the floodgates reopen. The breaker is the colleague who says "stop
//! redeploying, it's the database."
//!
//! ## The state table 📜
//!
//! | State    | Admits?                    | Leaves when                        |
//! |----------|----------------------------|------------------------------------|
//! | Closed   | yes                        | consecutive failures ≥ threshold → Open |
//! | Open     | no (fail fast)             | `timeout` elapses → HalfOpen       |
//! | HalfOpen | ≤ `max_requests` in flight | that many consecutive successes → Closed; any failure → Open |
//!
//! Counts live per *generation*: a u64 that bumps on every state change and
//! on the scheduled interval reset in Closed. A completion that started in
//! an older generation reports in, gets recognized as stale, and is ignored
//! — late news about a previous era doesn't get to move today's needle.
//!
//! Lock discipline: one mutex per breaker, and the guarded sections are
//! pure arithmetic. The sink call itself happens with no lock held. 🦆

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::info;

use crate::errors::BreakerError;

fn default_max_requests() -> u32 {
    1
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_failure_threshold() -> u32 {
    5
}

/// 🔧 Breaker configuration — the `[breaker]` section, shared by every sink's
/// breaker (they differ in state, not in settings).
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// 🟡 Concurrent probes admitted in HalfOpen, and the consecutive-success
    /// count that closes the breaker again.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// 🔄 Scheduled count reset cadence while Closed.
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
    /// ⏳ How long Open lasts before the first probe is allowed.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// 💥 Consecutive failures that trip Closed → Open.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> BreakerConfig {
        BreakerConfig {
            max_requests: default_max_requests(),
            interval: default_interval(),
            timeout: default_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// 🚦 The three moods of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// 🔢 Per-generation counters. Reset on every generation bump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub in_flight: u32,
    pub total_success: u64,
    pub total_failure: u64,
    pub consecutive_success: u32,
    pub consecutive_failure: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.total_success += 1;
        self.consecutive_success += 1;
        self.consecutive_failure = 0;
    }

    fn on_failure(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.total_failure += 1;
        self.consecutive_failure += 1;
        self.consecutive_success = 0;
    }
}

/// 📊 Observability snapshot for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub generation: u64,
    pub counts: Counts,
}

/// Everything behind the breaker's mutex.
struct BreakerInner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    /// Closed: next scheduled count reset. Open: when HalfOpen begins.
    expiry: Option<Instant>,
}

/// 🚧 One circuit breaker, guarding one sink.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.metrics();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &m.state)
            .field("generation", &m.generation)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> CircuitBreaker {
        let expiry = (!config.interval.is_zero()).then(|| Instant::now() + config.interval);
        CircuitBreaker {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 🚦 The state as of now (lazily applying any due transition).
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.advance(&mut inner, Instant::now());
        inner.state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let mut inner = self.lock();
        self.advance(&mut inner, Instant::now());
        BreakerMetrics {
            state: inner.state,
            generation: inner.generation,
            counts: inner.counts,
        }
    }

    /// 📞 Run `op` through the breaker.
    ///
    /// `Err(BreakerError)` = refused, `op` never ran, nothing was counted.
    /// `Ok(result)` = admitted; the result's Ok/Err updated the counters
    /// through the single completion path.
    pub async fn call<T, E, F>(&self, op: F) -> Result<Result<T, E>, BreakerError>
    where
        F: Future<Output = Result<T, E>>,
    {
        let generation = self.before_request()?;
        let result = op.await;
        self.after_request(generation, result.is_ok());
        Ok(result)
    }

    /// 🎟️ Admission control. Returns the generation ticket the completion
    /// must present later.
    fn before_request(&self) -> Result<u64, BreakerError> {
        let mut inner = self.lock();
        let now = Instant::now();
        self.advance(&mut inner, now);

        match inner.state {
            BreakerState::Open => Err(BreakerError::Open),
            BreakerState::HalfOpen if inner.counts.in_flight >= self.config.max_requests => {
                Err(BreakerError::TooManyRequests)
            }
            _ => {
                inner.counts.in_flight += 1;
                Ok(inner.generation)
            }
        }
    }

    /// 🧾 The single counter-update path for every completion.
    /// Stale generations (the state flipped mid-flight) are ignored.
    fn after_request(&self, generation: u64, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        self.advance(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        if success {
            inner.counts.on_success();
            if inner.state == BreakerState::HalfOpen
                && inner.counts.consecutive_success >= self.config.max_requests
            {
                self.transition(&mut inner, BreakerState::Closed, now);
            }
        } else {
            inner.counts.on_failure();
            match inner.state {
                BreakerState::Closed
                    if inner.counts.consecutive_failure >= self.config.failure_threshold =>
                {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
                // one failed probe and the breaker slams shut again
                BreakerState::HalfOpen => {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
                _ => {}
            }
        }
    }

    /// ⏳ Apply any transition that is due purely from the passage of time:
    /// Open → HalfOpen after `timeout`, and the scheduled count reset
    /// (generation bump, no state change) while Closed.
    fn advance(&self, inner: &mut BreakerInner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|expiry| now >= expiry) {
                    self.new_generation(inner, now);
                }
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|expiry| now >= expiry) {
                    self.transition(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState, now: Instant) {
        if inner.state == to {
            return;
        }
        info!("🚧 breaker '{}': {} → {}", self.name, inner.state, to);
        inner.state = to;
        self.new_generation(inner, now);
    }

    /// 🔄 A new era: counts reset, expiry recomputed for the new state.
    fn new_generation(&self, inner: &mut BreakerInner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => {
                (!self.config.interval.is_zero()).then(|| now + self.config.interval)
            }
            BreakerState::Open => Some(now + self.config.timeout),
            BreakerState::HalfOpen => None,
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // a poisoned breaker mutex means a panic mid-arithmetic; the counts
        // are still sound, so we take the guard and carry on
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 🗂️ The keyed registry: sink-name → breaker, lazily created, never
/// destroyed. Breakers are process-lifetime citizens; their state is
/// exactly the thing you do NOT want to reset by accident.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("states", &self.states())
            .finish()
    }
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> BreakerRegistry {
        BreakerRegistry {
            config,
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    /// 🗂️ Fetch the breaker for `name`, creating it on first sight.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    /// 🚦 Current state per sink, for the dashboard humans.
    pub fn states(&self) -> BTreeMap<String, BreakerState> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    /// 📊 Full metrics per sink, for the dashboard robots.
    pub fn all_metrics(&self) -> BTreeMap<String, BreakerMetrics> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.metrics()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, timeout: Duration, max_requests: u32) -> BreakerConfig {
        BreakerConfig {
            max_requests,
            interval: Duration::from_secs(60),
            timeout,
            failure_threshold: threshold,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<Result<(), &'static str>, BreakerError> {
        breaker.call(async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<Result<(), &'static str>, BreakerError> {
        breaker.call(async { Ok::<_, &'static str>(()) }).await
    }

    /// 🧪 Property 10: exactly k consecutive failures trip the breaker, and
    /// the very next call is refused with Open.
    #[tokio::test]
    async fn the_one_where_strike_k_flips_the_switch() {
        let breaker = CircuitBreaker::new("sink", config(3, Duration::from_secs(60), 1));
        for _ in 0..2 {
            fail(&breaker).await.unwrap().unwrap_err();
            assert_eq!(breaker.state(), BreakerState::Closed, "not yet");
        }
        fail(&breaker).await.unwrap().unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(fail(&breaker).await.unwrap_err(), BreakerError::Open);
    }

    /// 🧪 S5 from the acceptance sheet: trip, wait out the timeout, probe
    /// successfully twice → Closed; then one HalfOpen failure → Open again.
    #[tokio::test]
    async fn the_one_where_the_probe_earns_back_the_traffic() {
        let breaker = CircuitBreaker::new("sink", config(3, Duration::from_millis(100), 2));
        for _ in 0..3 {
            fail(&breaker).await.unwrap().unwrap_err();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(succeed(&breaker).await.unwrap_err(), BreakerError::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // two consecutive successes (max_requests = 2) close it
        succeed(&breaker).await.unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen, "one down, one to go");
        succeed(&breaker).await.unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);

        // trip again, wait, then fail the probe → straight back to Open
        for _ in 0..3 {
            fail(&breaker).await.unwrap().unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        fail(&breaker).await.unwrap().unwrap_err();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    /// 🧪 HalfOpen admits at most max_requests concurrently; the overflow
    /// caller is refused with TooManyRequests, not Open.
    #[tokio::test]
    async fn the_one_where_the_probe_lane_has_a_capacity_of_one() {
        let breaker = Arc::new(CircuitBreaker::new(
            "sink",
            config(1, Duration::from_millis(50), 1),
        ));
        fail(&breaker).await.unwrap().unwrap_err();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // park one probe in flight, holding the only slot
        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, &'static str>(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            succeed(&breaker).await.unwrap_err(),
            BreakerError::TooManyRequests
        );
        slow.await.unwrap().unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    /// 🧪 The scheduled interval reset in Closed bumps the generation and
    /// clears the count streak — four failures across a reset don't trip a
    /// threshold of five... or even of four.
    #[tokio::test]
    async fn the_one_where_the_new_quarter_resets_the_scoreboard() {
        let breaker = CircuitBreaker::new(
            "sink",
            BreakerConfig {
                max_requests: 1,
                interval: Duration::from_millis(50),
                timeout: Duration::from_secs(60),
                failure_threshold: 4,
            },
        );
        for _ in 0..3 {
            fail(&breaker).await.unwrap().unwrap_err();
        }
        let generation_before = breaker.metrics().generation;
        tokio::time::sleep(Duration::from_millis(80)).await;
        // the streak died with the old generation
        fail(&breaker).await.unwrap().unwrap_err();
        let m = breaker.metrics();
        assert_eq!(m.state, BreakerState::Closed);
        assert!(m.generation > generation_before);
        assert_eq!(m.counts.consecutive_failure, 1);
    }

    /// 🧪 The registry creates lazily, returns the SAME breaker thereafter,
    /// and never evicts.
    #[tokio::test]
    async fn the_one_where_the_registry_never_forgets_a_face() {
        let registry = BreakerRegistry::new(config(2, Duration::from_secs(60), 1));
        let a1 = registry.get("alpha");
        let a2 = registry.get("alpha");
        assert!(Arc::ptr_eq(&a1, &a2), "same sink, same breaker");

        fail(&a1).await.unwrap().unwrap_err();
        fail(&a1).await.unwrap().unwrap_err();
        registry.get("beta");

        let states = registry.states();
        assert_eq!(states["alpha"], BreakerState::Open);
        assert_eq!(states["beta"], BreakerState::Closed);
        assert_eq!(registry.all_metrics().len(), 2);
    }
}
