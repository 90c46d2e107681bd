// ai
//! 🧵 The drain pool — `worker.count` tasks pulling events off the ring and
//! pushing them through the job function.
//!
//! 🎬 *[a shift whistle blows. N workers clock in. the ring buffer holds
//! the day's backlog. somewhere, a sink waits. nobody asked if the sink
//! was ready. the sink is never ready.]*
//!
//! ## Contract 📜
//! - Each worker loops: dequeue → run `job_fn(ctx, event)` under the
//!   per-job timeout → count the outcome. Job failures NEVER crash the
//!   worker; the reliability envelope inside the job already did the
//!   mourning (retry, breaker, DLQ).
//! - A timeout cancels the job's context, counts a timeout, and moves on.
//! - `scale(n)` retargets atomically: surplus workers exit at their next
//!   loop top (no in-flight event is abandoned — the check happens BEFORE
//!   dequeue), missing workers are spawned inline into the lowest free slots.
//! - `shutdown()` closes the buffer, lets the pool drain it dry, and joins
//!   everyone. In-flight jobs finish under their own timeout.
//!
//! 🦆 (the duck is worker 0. the duck has perfect attendance.)

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::RingBuffer;
use crate::errors::BufferError;
use crate::events::Event;

fn default_worker_count() -> usize {
    4
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(10)
}

/// 🔧 Worker pool configuration — the `[worker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// 🧵 Starting worker count. `scale()` can move it later.
    #[serde(default = "default_worker_count", alias = "worker_count")]
    pub count: usize,
    /// ⏳ Per-event deadline inside a worker.
    #[serde(with = "humantime_serde", default = "default_job_timeout")]
    pub job_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            count: default_worker_count(),
            job_timeout: default_job_timeout(),
        }
    }
}

/// 📦 The job: one event in, success or a (fully-envelope-handled) error out.
/// The pool owns scheduling and deadlines; the job owns semantics.
pub type JobFn =
    Arc<dyn Fn(CancellationToken, Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 📊 One worker's lifetime ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
}

/// 📊 Pool-wide counters plus the per-worker breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    pub active_workers: usize,
    pub target_workers: usize,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub jobs_timeout: u64,
    pub per_worker: BTreeMap<usize, WorkerStats>,
}

/// 🧵 The fixed-but-rescalable drain pool.
pub struct WorkerPool {
    buffer: Arc<RingBuffer>,
    job: JobFn,
    job_timeout: Duration,
    cancel: CancellationToken,
    /// 🎯 desired worker count; workers compare their slot against this
    target: AtomicUsize,
    /// 🪑 slots currently occupied by a live worker
    slots: Mutex<BTreeSet<usize>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    processed: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    per_worker: Mutex<BTreeMap<usize, WorkerStats>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("target", &self.target.load(Ordering::Relaxed))
            .field("job_timeout", &self.job_timeout)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        buffer: Arc<RingBuffer>,
        config: PoolConfig,
        job: JobFn,
        cancel: CancellationToken,
    ) -> Arc<WorkerPool> {
        Arc::new(WorkerPool {
            buffer,
            job,
            job_timeout: config.job_timeout,
            cancel,
            target: AtomicUsize::new(config.count.max(1)),
            slots: Mutex::new(BTreeSet::new()),
            handles: Mutex::new(Vec::new()),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            per_worker: Mutex::new(BTreeMap::new()),
        })
    }

    /// 🚀 Clock in the starting shift.
    pub fn start(self: &Arc<Self>) {
        let target = self.target.load(Ordering::Relaxed);
        self.spawn_up_to(target);
    }

    /// ⚖️ Retarget the pool. Extra workers exit at their next loop top;
    /// missing workers are spawned inline. No in-flight event is lost
    /// either way — the exit check happens before dequeue.
    pub fn scale(self: &Arc<Self>, n: usize) {
        let n = n.max(1);
        debug!("⚖️ pool rescale → {n}");
        self.target.store(n, Ordering::Release);
        self.spawn_up_to(n);
    }

    /// 🏗️ Fill the lowest free slots until `n` workers are seated.
    fn spawn_up_to(self: &Arc<Self>, n: usize) {
        let mut slots = self.lock_slots();
        let mut handles = self.lock_handles();
        while slots.len() < n {
            // lowest slot id not currently occupied
            let slot = (0..).find(|candidate| !slots.contains(candidate)).unwrap_or(0);
            slots.insert(slot);
            let pool = self.clone();
            handles.push(tokio::spawn(pool.worker_loop(slot)));
        }
    }

    /// 🔄 One worker's whole career.
    async fn worker_loop(self: Arc<Self>, slot: usize) {
        debug!("🧵 worker {slot} clocking in");
        loop {
            // ⚖️ scale-down check — BEFORE dequeue, so no claimed event dies
            if slot >= self.target.load(Ordering::Acquire) {
                debug!("🧵 worker {slot} retired by rescale");
                break;
            }
            match self.buffer.dequeue(&self.cancel).await {
                Ok(event) => self.run_job(slot, event).await,
                Err(BufferError::Closed) => {
                    debug!("🧵 worker {slot}: buffer drained and closed, going home");
                    break;
                }
                Err(BufferError::Cancelled) => break,
                // dequeue never reports Full; if it ever does, leaving is sane
                Err(BufferError::Full) => break,
            }
        }
        self.lock_slots().remove(&slot);
    }

    /// ⏱️ One event through the job fn, under the deadline.
    async fn run_job(&self, slot: usize, event: Event) {
        let job_cancel = self.cancel.child_token();
        let outcome =
            tokio::time::timeout(self.job_timeout, (self.job)(job_cancel.clone(), event)).await;
        match outcome {
            Err(_elapsed) => {
                // ⏰ deadline blown: cancel the job's context (the dropped
                // future is already gone; the token tells anything it spawned)
                job_cancel.cancel();
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.bump_worker(slot, false);
                warn!("⏰ worker {slot}: job exceeded {:?}", self.job_timeout);
            }
            Ok(Ok(())) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.bump_worker(slot, true);
            }
            Ok(Err(err)) => {
                // the envelope inside the job already retried/DLQ'd; this is
                // bookkeeping, not a crisis — the worker NEVER crashes
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.bump_worker(slot, false);
                debug!("🧵 worker {slot}: job reported failure: {err:#}");
            }
        }
    }

    /// 🔒 Close the buffer, let the pool drink it dry, join everyone.
    pub async fn shutdown(self: &Arc<Self>) {
        self.buffer.close();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_handles());
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            active_workers: self.lock_slots().len(),
            target_workers: self.target.load(Ordering::Relaxed),
            jobs_processed: self.processed.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            jobs_timeout: self.timeouts.load(Ordering::Relaxed),
            per_worker: self.lock_per_worker().clone(),
        }
    }

    fn bump_worker(&self, slot: usize, success: bool) {
        let mut per_worker = self.lock_per_worker();
        let stats = per_worker.entry(slot).or_default();
        if success {
            stats.processed += 1;
        } else {
            stats.failed += 1;
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, BTreeSet<usize>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_per_worker(&self) -> std::sync::MutexGuard<'_, BTreeMap<usize, WorkerStats>> {
        self.per_worker.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BackpressurePolicy;
    use futures::FutureExt;
    use std::sync::atomic::AtomicU64 as TestCounter;

    fn buffer() -> Arc<RingBuffer> {
        Arc::new(RingBuffer::new(
            64,
            BackpressurePolicy::Block {
                timeout: Duration::from_secs(5),
            },
        ))
    }

    fn counting_job(counter: Arc<TestCounter>) -> JobFn {
        Arc::new(move |_cancel, _event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            .boxed()
        })
    }

    /// 🧪 The pool drains everything the producers enqueue, then shuts down
    /// clean when the buffer closes.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_the_shift_drains_the_whole_backlog() {
        let ring = buffer();
        let counter = Arc::new(TestCounter::new(0));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(
            ring.clone(),
            PoolConfig {
                count: 3,
                job_timeout: Duration::from_secs(5),
            },
            counting_job(counter.clone()),
            cancel.clone(),
        );
        pool.start();

        for i in 0..200 {
            ring.enqueue(Event::message_only(&format!("e{i}"), "t"), &cancel)
                .await
                .unwrap();
        }
        pool.shutdown().await;

        assert_eq!(counter.load(Ordering::Relaxed), 200);
        let m = pool.metrics();
        assert_eq!(m.jobs_processed, 200);
        assert_eq!(m.jobs_failed, 0);
        assert_eq!(m.active_workers, 0, "everyone clocked out");
        // conservation all the way through the pool
        let b = ring.metrics();
        assert_eq!(b.enqueued, b.dequeued);
    }

    /// 🧪 Job failures are counted, never fatal — the worker keeps working.
    #[tokio::test]
    async fn the_one_where_a_bad_job_does_not_end_the_career() {
        let ring = buffer();
        let cancel = CancellationToken::new();
        let job: JobFn = Arc::new(|_cancel, event| {
            async move {
                if event.message.contains("bad") {
                    anyhow::bail!("scripted job failure")
                }
                Ok(())
            }
            .boxed()
        });
        let pool = WorkerPool::new(
            ring.clone(),
            PoolConfig {
                count: 1,
                job_timeout: Duration::from_secs(5),
            },
            job,
            cancel.clone(),
        );
        pool.start();

        for msg in ["good", "bad", "good", "bad", "good"] {
            ring.enqueue(Event::message_only(msg, "t"), &cancel).await.unwrap();
        }
        pool.shutdown().await;

        let m = pool.metrics();
        assert_eq!(m.jobs_processed, 3);
        assert_eq!(m.jobs_failed, 2);
        assert_eq!(m.per_worker[&0].processed, 3);
        assert_eq!(m.per_worker[&0].failed, 2);
    }

    /// 🧪 A job that naps past the deadline is timed out and counted; the
    /// pool moves on to the next event.
    #[tokio::test]
    async fn the_one_where_the_slow_job_meets_the_deadline_reaper() {
        let ring = buffer();
        let cancel = CancellationToken::new();
        let job: JobFn = Arc::new(|_cancel, event| {
            async move {
                if event.message == "slow" {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(())
            }
            .boxed()
        });
        let pool = WorkerPool::new(
            ring.clone(),
            PoolConfig {
                count: 1,
                job_timeout: Duration::from_millis(50),
            },
            job,
            cancel.clone(),
        );
        pool.start();

        ring.enqueue(Event::message_only("slow", "t"), &cancel).await.unwrap();
        ring.enqueue(Event::message_only("quick", "t"), &cancel).await.unwrap();
        pool.shutdown().await;

        let m = pool.metrics();
        assert_eq!(m.jobs_timeout, 1);
        assert_eq!(m.jobs_processed, 1, "the quick one still made it");
    }

    /// 🧪 Scaling down retires surplus workers at their next loop top;
    /// scaling back up reseats the freed slots. Nothing in flight is lost.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_the_shift_shrinks_and_regrows_without_losses() {
        let ring = buffer();
        let counter = Arc::new(TestCounter::new(0));
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(
            ring.clone(),
            PoolConfig {
                count: 4,
                job_timeout: Duration::from_secs(5),
            },
            counting_job(counter.clone()),
            cancel.clone(),
        );
        pool.start();
        assert_eq!(pool.metrics().target_workers, 4);

        for i in 0..50 {
            ring.enqueue(Event::message_only(&format!("a{i}"), "t"), &cancel)
                .await
                .unwrap();
        }
        pool.scale(1);
        // give the retirees a moment to notice
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.metrics().active_workers <= 4);

        pool.scale(3);
        for i in 0..50 {
            ring.enqueue(Event::message_only(&format!("b{i}"), "t"), &cancel)
                .await
                .unwrap();
        }
        pool.shutdown().await;

        assert_eq!(counter.load(Ordering::Relaxed), 100, "every event processed");
    }
}
