//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where events must flow or be accounted for..."
//! 🎬 "One supervisor dared to wire it all together."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module — part middle manager, part air-traffic control,
//! part that one project manager who actually keeps the runbook current.
//!
//! It owns the runtime topology, which is to say: everything with a pulse.
//!
//! ```text
//!   source₁ ─┐
//!   source₂ ─┼─▶ [ingest workers] ─▶ ring buffer ─▶ [drain pool] ─▶ router ─▶ sinks
//!   source_n ┘         │ WAL tee                                      │ envelope
//!                      ▼                                              ▼
//!                  WAL sync task                                  retry/breaker/DLQ
//!                                         DLQ flush task · stats task
//! ```
//!
//! Startup order: background loops first, drain pool second, ingest last —
//! nobody pours water before the drain exists. Shutdown order is the exact
//! reverse: sources dry up, the buffer closes, the pool drinks it dry, the
//! router flushes its batchers, the background loops take a final lap, and
//! only then do the WAL and DLQ rule off their ledgers.

pub(crate) mod workers;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app_config::AppConfig;
use crate::buffer::RingBuffer;
use crate::metrics::{MetricsSnapshot, PipelineMetrics, StatsDisplay};
use crate::parsers::ParserBackend;
use crate::reliability::breaker::BreakerRegistry;
use crate::reliability::dlq::DeadLetterQueue;
use crate::sinks::router::SinkRouter;
use crate::sources::SourceBackend;
use crate::supervisors::workers::drain_pool::{JobFn, WorkerPool};
use crate::supervisors::workers::ingest_worker::IngestWorker;
use crate::supervisors::workers::Worker;
use crate::transforms::TransformChain;
use crate::wal::Wal;

/// 📦 The Supervisor: because even a lock-free pipeline needs someone who
/// knows the startup order by heart and the shutdown order better.
pub(crate) struct Supervisor {
    /// 🔧 The sacred scrolls of configuration, passed down from `run()`
    /// through the ancient ritual of `.clone()`.
    app_config: AppConfig,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig) -> Supervisor {
        Supervisor { app_config }
    }

    /// 🧵 Unleash the workers — then wait for the water to run out and the
    /// drains to finish, in that order, every time.
    ///
    /// Returns the final whole-pipeline metrics snapshot: the receipt.
    pub(crate) async fn start_workers(
        &self,
        sources: Vec<SourceBackend>,
        router: Arc<SinkRouter>,
        wal: Option<Arc<Wal>>,
        dlq: Arc<DeadLetterQueue>,
        registry: Arc<BreakerRegistry>,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
    ) -> Result<MetricsSnapshot> {
        let buffer = Arc::new(RingBuffer::new(
            self.app_config.buffer.capacity,
            self.app_config.buffer.backpressure(),
        ));
        let transforms = Arc::new(
            TransformChain::from_configs(&self.app_config.transforms)
                .context("Failed to build the transform chain")?,
        );

        // 🔄 background loops live on their own child token so the main
        // shutdown can give them one final, orderly lap
        let background = cancel.child_token();
        let mut background_handles = Vec::new();
        if let Some(wal) = &wal {
            background_handles.push(wal.clone().run_sync_loop(background.clone()));
        }
        background_handles.push(dlq.clone().run_flush_loop(background.clone()));

        // 🧵 the drain pool: each job = one event through the router envelope
        let job: JobFn = {
            let router = router.clone();
            Arc::new(move |job_cancel, event| {
                let router = router.clone();
                Box::pin(async move {
                    router.deliver(&event, &job_cancel).await?;
                    Ok(())
                })
            })
        };
        let pool = WorkerPool::new(
            buffer.clone(),
            self.app_config.worker.clone(),
            job,
            cancel.clone(),
        );
        pool.start();

        // 📺 optional stats renderer
        let stats_handle = if self.app_config.stats.enabled {
            let interval = self.app_config.stats.interval;
            let (buffer, wal, pool, router, dlq, registry, metrics, stats_cancel) = (
                buffer.clone(),
                wal.clone(),
                pool.clone(),
                router.clone(),
                dlq.clone(),
                registry.clone(),
                metrics.clone(),
                background.clone(),
            );
            Some(tokio::spawn(async move {
                let mut display = StatsDisplay::new();
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let snap = assemble_snapshot(
                                &metrics, &buffer, wal.as_deref(), &pool, &router, &dlq, &registry,
                            )
                            .await;
                            display.update(&snap);
                        }
                        _ = stats_cancel.cancelled() => {
                            display.finish();
                            return;
                        }
                    }
                }
            }))
        } else {
            None
        };

        // 🚰 one ingest worker per source, each with its own parser instance
        let mut ingest_handles = Vec::with_capacity(sources.len());
        for source in sources {
            let parser = ParserBackend::from_config(&self.app_config.parser)
                .context("Failed to build a parser from config")?;
            let worker = IngestWorker::new(
                source,
                parser,
                transforms.clone(),
                buffer.clone(),
                wal.clone(),
                metrics.clone(),
                cancel.clone(),
            );
            ingest_handles.push(worker.start());
        }

        // ⏳ wait for the sources to run dry (or the token to fire)
        let results = futures::future::join_all(ingest_handles).await;
        for result in results {
            // 🤯 result?? — the outer `?` unwraps the JoinHandle, the inner
            // `?` unwraps the worker's own verdict.
            result??;
        }
        debug!("🚰 all sources drained");

        // 🔒 shutdown choreography, in reverse of startup
        buffer.close();
        pool.shutdown().await;
        router.close().await.context("Failed to close the sink router")?;

        background.cancel();
        for handle in background_handles {
            let _ = handle.await;
        }
        if let Some(handle) = stats_handle {
            let _ = handle.await;
        }
        if let Some(wal) = &wal {
            wal.close().await.context("Failed to close the WAL")?;
        }
        dlq.close().await.context("Failed to close the DLQ")?;

        let snapshot =
            assemble_snapshot(&metrics, &buffer, wal.as_deref(), &pool, &router, &dlq, &registry)
                .await;
        info!(
            "🧾 final tally: {} ingested, {} delivered, {} in DLQ, {} dropped",
            snapshot.ingest.ingested,
            snapshot.router.delivered,
            snapshot.dlq.size,
            snapshot.ingest.ingest_dropped + snapshot.buffer.dropped + snapshot.dlq.dropped,
        );
        Ok(snapshot)
    }
}

/// 📊 Walk every component and freeze the numbers into one flat snapshot.
async fn assemble_snapshot(
    metrics: &PipelineMetrics,
    buffer: &RingBuffer,
    wal: Option<&Wal>,
    pool: &WorkerPool,
    router: &SinkRouter,
    dlq: &DeadLetterQueue,
    registry: &BreakerRegistry,
) -> MetricsSnapshot {
    MetricsSnapshot {
        ingest: metrics.ingest_snapshot(),
        buffer: buffer.metrics(),
        wal: wal.map(|w| w.metrics()),
        pool: pool.metrics(),
        router: router.metrics(),
        sinks: router.sink_metrics().await,
        dlq: dlq.metrics(),
        breakers: registry.states(),
        uptime: metrics.uptime(),
    }
}
