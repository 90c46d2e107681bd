// ai
//! 🚏 The sink router — fan-out, failure strategy, and the delivery envelope.
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. THE LOADING DOCK — ONE EVENT, THREE TRUCKS
//!
//! A worker shows up with an event. The router owns the sinks — all of them
//! — and decides who ships it and in what order: everyone at once
//! (parallel, spawn-per-sink, join-all) or one at a time (sequential, with
//! `stop` bailing at the first failure and `continue` soldiering on).
//!
//! Every individual sink call travels inside the DELIVERY ENVELOPE:
//!
//! ```text
//!   retry runner ─▶ circuit breaker ─▶ sink.send
//!        │                               │
//!        └──── dead-letter queue ◀───────┘   (abandonment only)
//! ```
//!
//! The ordering is deliberate. The breaker sees only calls the retry logic
//! approved, so one flaky request doesn't pollute its counts with
//! half-hearted probes. The DLQ receives only events the breaker has
//! declined to keep retrying — it's the archive of genuine abandonment,
//! not a scratchpad of transient sadness.
//!
//! 🧠 Knowledge graph: the router OWNS its sinks (each behind a mutex,
//! because sinks are `&mut self` I/O objects shared by many workers).
//! Sinks never reference the router back. Metrics aggregation walks the
//! owned list. No cycles, no weak pointers, no séances.
//!
//! ## Batching 📦
//!
//! A sink with `batch_size > 1` gets a batcher task and a bounded
//! async-channel. Workers drop events into the channel and move on; the
//! batcher flushes on size or linger, running the same envelope around
//! `send_batch`. Abandoned batches are DLQ'd event by event — the envelope
//! does not do group discounts.
//!
//! 🦆 (the duck rides in the last truck. the duck always arrives.)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{BreakerError, DeliveryError, SinkError, SinkErrorKind};
use crate::events::Event;
use crate::reliability::dlq::DeadLetterQueue;
use crate::reliability::retry::{RetryFailure, RetryPolicy};
use crate::reliability::breaker::{BreakerRegistry, CircuitBreaker};
use crate::sinks::{Sink, SinkBackend, SinkConfig, SinkMetrics};

/// 🚏 Fan-out scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    /// 🚀 Spawn-per-sink, join-all.
    #[default]
    Parallel,
    /// 🚶 One sink at a time, in configured order.
    Sequential,
}

/// 💥 What a per-sink failure means for the sinks after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// 🛑 Sequential mode bails at the first failure.
    Stop,
    /// 🐴 Every sink gets its chance; failures are collected, not contagious.
    #[default]
    Continue,
}

/// 🔧 Router configuration — the `[router]` section.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub mode: RouterMode,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
}

/// 💀 What the router reports when one or more sinks failed an event.
#[derive(Debug, Error)]
pub struct RouterError {
    pub failures: Vec<(String, DeliveryError)>,
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "delivery failed at {} sink(s): ", self.failures.len())?;
        for (i, (name, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{name}: {err}")?;
        }
        Ok(())
    }
}

/// One sink plus its envelope fittings.
struct SinkRoute {
    name: String,
    sink: tokio::sync::Mutex<SinkBackend>,
    breaker: Arc<CircuitBreaker>,
    /// 📦 Present iff this sink batches; workers feed it instead of sending.
    batch_tx: Option<Sender<Event>>,
}

/// 📊 Router-level counters (per-sink counters live on the sinks).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterMetrics {
    pub delivered: u64,
    pub failed: u64,
    pub circuit_open: u64,
    pub dlq_rejected: u64,
}

/// 🚏 Owns the sinks, runs the envelope, keeps the books.
pub struct SinkRouter {
    routes: Vec<Arc<SinkRoute>>,
    mode: RouterMode,
    strategy: FailureStrategy,
    retry: RetryPolicy,
    dlq: Arc<DeadLetterQueue>,
    batcher_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    delivered: AtomicU64,
    failed: AtomicU64,
    circuit_open: AtomicU64,
    dlq_rejected: AtomicU64,
}

impl std::fmt::Debug for SinkRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRouter")
            .field("sinks", &self.routes.iter().map(|r| &r.name).collect::<Vec<_>>())
            .field("mode", &self.mode)
            .finish()
    }
}

impl SinkRouter {
    /// 🏗️ Build routes from config: resolve each sink, fetch its breaker
    /// from the registry, spawn a batcher when `batch_size > 1`.
    pub async fn new(
        sink_configs: &[SinkConfig],
        config: RouterConfig,
        retry: RetryPolicy,
        registry: &BreakerRegistry,
        dlq: Arc<DeadLetterQueue>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<SinkRouter> {
        anyhow::ensure!(
            !sink_configs.is_empty(),
            "💀 A router with zero sinks is a very elaborate /dev/null. Configure at least one."
        );

        let mut routes = Vec::with_capacity(sink_configs.len());
        let mut batcher_plans = Vec::new();
        for sink_config in sink_configs {
            let backend = SinkBackend::from_config(sink_config).await?;
            let name = backend.name().to_string();
            let common = sink_config.common();

            let (batch_tx, batch_rx) = if common.batch_size > 1 {
                // 📬 bounded: a stuck batcher pushes back on workers instead
                // of quietly buffering the heap away
                let (tx, rx) = async_channel::bounded(common.batch_size * 2);
                (Some(tx), Some((rx, common.batch_size, common.batch_linger)))
            } else {
                (None, None)
            };

            let route = Arc::new(SinkRoute {
                breaker: registry.get(&name),
                name,
                sink: tokio::sync::Mutex::new(backend),
                batch_tx,
            });
            if let Some(plan) = batch_rx {
                batcher_plans.push((route.clone(), plan));
            }
            routes.push(route);
        }

        let router = SinkRouter {
            routes,
            mode: config.mode,
            strategy: config.failure_strategy,
            retry,
            dlq,
            batcher_handles: std::sync::Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            circuit_open: AtomicU64::new(0),
            dlq_rejected: AtomicU64::new(0),
        };

        for (route, (rx, batch_size, linger)) in batcher_plans {
            let handle = router.spawn_batcher(route, rx, batch_size, linger, cancel.clone());
            router
                .batcher_handles
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(handle);
        }

        Ok(router)
    }

    /// 📡 Deliver one event to every sink per the configured mode/strategy.
    pub async fn deliver(
        self: &Arc<Self>,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<(), RouterError> {
        let mut failures = Vec::new();
        match self.mode {
            RouterMode::Parallel => {
                // 🚀 spawn-per-sink, join-all, collect the wreckage
                let mut handles = Vec::with_capacity(self.routes.len());
                for route in &self.routes {
                    let router = self.clone();
                    let route = route.clone();
                    let event = event.clone();
                    let cancel = cancel.clone();
                    handles.push(tokio::spawn(async move {
                        let name = route.name.clone();
                        (name, router.deliver_to_route(&route, event, &cancel).await)
                    }));
                }
                for handle in futures::future::join_all(handles).await {
                    match handle {
                        Ok((_, Ok(()))) => {}
                        Ok((name, Err(err))) => failures.push((name, err)),
                        Err(join_err) => {
                            // a panicked delivery task counts as a failed sink
                            failures.push((
                                "unknown".to_string(),
                                DeliveryError::Terminal(SinkError::terminal(format!(
                                    "delivery task panicked: {join_err}"
                                ))),
                            ));
                        }
                    }
                }
            }
            RouterMode::Sequential => {
                for route in &self.routes {
                    match self.deliver_to_route(route, event.clone(), cancel).await {
                        Ok(()) => {}
                        Err(err) => {
                            failures.push((route.name.clone(), err));
                            if self.strategy == FailureStrategy::Stop {
                                break; // 🛑 first failure returns immediately
                            }
                        }
                    }
                }
            }
        }

        if failures.is_empty() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            Err(RouterError { failures })
        }
    }

    /// 🔒 Close the shop: stop batchers (final flush included), close sinks.
    pub async fn close(&self) -> anyhow::Result<()> {
        for route in &self.routes {
            if let Some(tx) = &route.batch_tx {
                tx.close();
            }
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .batcher_handles
                .lock()
                .unwrap_or_else(|p| p.into_inner()),
        );
        for handle in handles {
            let _ = handle.await;
        }
        for route in &self.routes {
            let mut sink = route.sink.lock().await;
            if let Err(err) = sink.close().await {
                warn!("🗑️ sink '{}' close failed: {err}", route.name);
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> RouterMetrics {
        RouterMetrics {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
            dlq_rejected: self.dlq_rejected.load(Ordering::Relaxed),
        }
    }

    /// 📊 Per-sink delivery counters, keyed by sink name.
    pub async fn sink_metrics(&self) -> BTreeMap<String, SinkMetrics> {
        let mut out = BTreeMap::new();
        for route in &self.routes {
            let sink = route.sink.lock().await;
            out.insert(route.name.clone(), sink.metrics());
        }
        out
    }

    /// One event → one route. Batched routes get a channel hand-off (the
    /// batcher runs the envelope later); direct routes run it right here.
    async fn deliver_to_route(
        &self,
        route: &SinkRoute,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        if let Some(tx) = &route.batch_tx {
            return match tx.send(event).await {
                Ok(()) => Ok(()),
                Err(_) => Err(DeliveryError::Terminal(SinkError::terminal(format!(
                    "batcher for sink '{}' is closed",
                    route.name
                )))),
            };
        }
        self.run_envelope(route, std::slice::from_ref(&event), cancel)
            .await
    }

    /// 🛡️ The delivery envelope: retry(breaker(sink)), DLQ on abandonment.
    /// Works on a slice so single sends and batches share it.
    async fn run_envelope(
        &self,
        route: &SinkRoute,
        events: &[Event],
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        /// The envelope-internal error: breaker refusals and sink failures
        /// travel different roads out of the retry runner.
        #[derive(Debug)]
        enum AttemptError {
            Breaker(BreakerError),
            Sink(SinkError),
        }
        impl std::fmt::Display for AttemptError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    AttemptError::Breaker(err) => write!(f, "{err}"),
                    AttemptError::Sink(err) => write!(f, "{err}"),
                }
            }
        }

        // sink invocations actually made — breaker refusals don't count,
        // the sink never saw those
        let sink_attempts = AtomicU32::new(0);

        let outcome = self
            .retry
            .run(
                cancel,
                // 🔁 classifier: only a Retryable SINK error goes around again
                |err: &AttemptError| {
                    matches!(err, AttemptError::Sink(s) if s.kind == SinkErrorKind::Retryable)
                },
                |_attempt| async {
                    let admitted = route
                        .breaker
                        .call(async {
                            sink_attempts.fetch_add(1, Ordering::Relaxed);
                            let mut sink = route.sink.lock().await;
                            if events.len() == 1 {
                                sink.send(cancel, &events[0]).await
                            } else {
                                sink.send_batch(cancel, events).await
                            }
                        })
                        .await;
                    match admitted {
                        Err(refused) => Err(AttemptError::Breaker(refused)),
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(sink_err)) => Err(AttemptError::Sink(sink_err)),
                    }
                },
            )
            .await;

        let attempts = sink_attempts.load(Ordering::Relaxed);
        match outcome {
            Ok(()) => Ok(()),
            Err(RetryFailure::Cancelled) => Err(DeliveryError::Cancelled),
            Err(RetryFailure::Halted(AttemptError::Breaker(_))) => {
                // 🔴 the breaker declined — these events already failed enough
                // to trip it; they go straight to the DLQ, no further retries
                self.circuit_open.fetch_add(1, Ordering::Relaxed);
                self.dead_letter(
                    route,
                    events,
                    format!("circuit open for sink '{}'", route.name),
                    attempts,
                );
                Err(DeliveryError::CircuitOpen(route.name.clone()))
            }
            Err(RetryFailure::Halted(AttemptError::Sink(sink_err))) => {
                if sink_err.kind == SinkErrorKind::Cancelled {
                    // 🛑 shutdown, not failure — no DLQ entry for this one
                    return Err(DeliveryError::Cancelled);
                }
                self.dead_letter(route, events, sink_err.to_string(), attempts);
                Err(DeliveryError::Terminal(sink_err))
            }
            Err(RetryFailure::Exhausted { last, .. }) => {
                let last = match last {
                    AttemptError::Sink(sink_err) => sink_err,
                    // breaker errors are classified non-retryable, so they
                    // can only exit through Halted — but belt and suspenders
                    AttemptError::Breaker(err) => SinkError::retryable(err.to_string()),
                };
                self.dead_letter(route, events, last.to_string(), attempts);
                Err(DeliveryError::RetryExhausted { attempts, last })
            }
        }
    }

    /// 🪦 Abandonment paperwork: every event of the failed call gets its own
    /// DLQ entry. A full DLQ is terminal — counted, logged, gone.
    fn dead_letter(&self, route: &SinkRoute, events: &[Event], error: String, attempts: u32) {
        for event in events {
            let metadata = BTreeMap::from([("sink".to_string(), route.name.clone())]);
            if let Err(err) = self
                .dlq
                .enqueue(event.clone(), error.clone(), attempts, metadata)
            {
                self.dlq_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "🪦 DLQ refused an abandoned event from sink '{}' ({err}) — terminal loss",
                    route.name
                );
            }
        }
    }

    /// 📦 The batcher task for one sink: collect until size or linger, then
    /// flush through the envelope. Channel closure = final flush + exit.
    fn spawn_batcher(
        &self,
        route: Arc<SinkRoute>,
        rx: Receiver<Event>,
        batch_size: usize,
        linger: std::time::Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        // the batcher needs the envelope, which needs &self — share the
        // reliability fittings instead of the whole router
        let retry = self.retry.clone();
        let dlq = self.dlq.clone();
        tokio::spawn(async move {
            let shadow = BatcherEnvelope { retry, dlq };
            let mut batch: Vec<Event> = Vec::with_capacity(batch_size);
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => {
                            batch.push(event);
                            if batch.len() >= batch_size {
                                shadow.flush(&route, &mut batch, &cancel).await;
                            }
                        }
                        Err(_) => {
                            // channel closed: final flush, lights off
                            shadow.flush(&route, &mut batch, &cancel).await;
                            debug!("📦 batcher for '{}' drained and done", route.name);
                            return;
                        }
                    },
                    _ = tokio::time::sleep(linger), if !batch.is_empty() => {
                        shadow.flush(&route, &mut batch, &cancel).await;
                    }
                }
            }
        })
    }
}

/// The slice of router state a batcher task carries along: just enough to
/// run the envelope without holding the router itself across tasks.
struct BatcherEnvelope {
    retry: RetryPolicy,
    dlq: Arc<DeadLetterQueue>,
}

impl BatcherEnvelope {
    async fn flush(&self, route: &SinkRoute, batch: &mut Vec<Event>, cancel: &CancellationToken) {
        if batch.is_empty() {
            return;
        }
        let events = std::mem::take(batch);
        // same envelope as the router's, same DLQ-on-abandonment — inlined
        // here because the batcher outlives any one deliver() call
        let refused = self
            .retry
            .run(
                cancel,
                |err: &SinkError| err.kind == SinkErrorKind::Retryable,
                |_attempt| async {
                    match route
                        .breaker
                        .call(async {
                            let mut sink = route.sink.lock().await;
                            sink.send_batch(cancel, &events).await
                        })
                        .await
                    {
                        Err(refused) => Err(SinkError {
                            kind: SinkErrorKind::Terminal,
                            message: refused.to_string(),
                        }),
                        Ok(result) => result,
                    }
                },
            )
            .await;

        match refused {
            Ok(()) => {}
            Err(RetryFailure::Cancelled) => {
                warn!(
                    "📦 batch for '{}' cancelled mid-flush; {} event(s) to the DLQ",
                    route.name,
                    events.len()
                );
                self.dead_letter(route, &events, "cancelled mid-batch".to_string(), 0);
            }
            Err(RetryFailure::Halted(err)) => {
                self.dead_letter(route, &events, err.to_string(), 1);
            }
            Err(RetryFailure::Exhausted { attempts, last }) => {
                self.dead_letter(route, &events, last.to_string(), attempts);
            }
        }
    }

    fn dead_letter(&self, route: &SinkRoute, events: &[Event], error: String, attempts: u32) {
        for event in events {
            let metadata = BTreeMap::from([("sink".to_string(), route.name.clone())]);
            if self
                .dlq
                .enqueue(event.clone(), error.clone(), attempts, metadata)
                .is_err()
            {
                warn!("🪦 DLQ refused a batched event from '{}' — terminal loss", route.name);
            }
        }
    }
}
