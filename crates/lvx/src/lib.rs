//! 🚀 lvx — the core library crate, the beating heart, the engine room
//! where raw log lines become delivered, acknowledged, at-least-once events.
//!
//! 📦 This crate contains the parsers, the ring buffer, the WAL, the worker
//! pool, the reliability layer, and all the existential dread that comes
//! with promising "at-least-once" out loud in a design doc. 🦆
//!
//! The shape of the thing:
//!
//! ```text
//!   sources → parser → transforms → ring buffer ──▶ drain pool ──▶ router
//!                          (WAL tee ┘)                   retry → breaker → sink
//!                                                              └─▶ DLQ
//! ```
//!
//! ⚠️ "The singularity will happen before this crate reaches 1.0"

pub mod app_config;
pub mod buffer;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod parsers;
pub mod reliability;
pub mod sinks;
pub mod sources;
mod supervisors;
pub mod transforms;
pub mod wal;

// 🔧 the pool's knobs and counters are part of the public config/metrics
// surface even though the pool itself answers only to the supervisor
pub use supervisors::workers::drain_pool::{PoolConfig, PoolMetrics, WorkerStats};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app_config::AppConfig;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::reliability::breaker::BreakerRegistry;
use crate::reliability::dlq::DeadLetterQueue;
use crate::sinks::router::SinkRouter;
use crate::sources::SourceBackend;
use crate::supervisors::Supervisor;
use crate::wal::Wal;

/// 🚀 The grand entry point. The big kahuna. The main event.
///
/// Runs the pipeline until every configured source reports EOF, then drains
/// and closes everything in order. Returns the final metrics snapshot —
/// the receipt for where every event ended up.
pub async fn run(app_config: AppConfig) -> Result<MetricsSnapshot> {
    run_with_shutdown(app_config, CancellationToken::new()).await
}

/// 🚀 Like [`run`], but the caller holds the shutdown token. Cancel it and
/// every stage — buffer waiters, retry backoffs, in-flight sink calls,
/// worker loops — winds down cooperatively.
pub async fn run_with_shutdown(
    app_config: AppConfig,
    cancel: CancellationToken,
) -> Result<MetricsSnapshot> {
    let start_time = SystemTime::now();
    info!("🚀 LOGVEX IS SPINNING UP — hold onto your log lines, we are AGGREGATING, baby!");

    // 🚰 Build the source backends from config — one ingest lane each.
    let mut sources = Vec::with_capacity(app_config.sources.len());
    for source_config in &app_config.sources {
        sources.push(
            SourceBackend::from_config(source_config)
                .await
                .context("Failed to create source backend")?,
        );
    }
    anyhow::ensure!(
        !sources.is_empty(),
        "💀 Zero sources configured. A pipeline with no inlet is just a very quiet process."
    );

    // 📼 The WAL is optional; the section being present AND enabled turns it on.
    let wal = match &app_config.wal {
        Some(cfg) if cfg.enabled => Some(Arc::new(
            Wal::open(cfg.clone())
                .await
                .context("Failed to open the write-ahead log")?,
        )),
        _ => None,
    };

    // 🪦 The DLQ and the breaker registry back the delivery envelope.
    let dlq = Arc::new(
        DeadLetterQueue::open(app_config.dlq.clone())
            .await
            .context("Failed to open the dead-letter queue")?,
    );
    let registry = Arc::new(BreakerRegistry::new(app_config.breaker.clone()));

    // 🚏 The router owns the sinks; the registry hands it their breakers.
    let router = Arc::new(
        SinkRouter::new(
            &app_config.sinks,
            app_config.router,
            app_config.retry.clone(),
            &registry,
            dlq.clone(),
            &cancel,
        )
        .await
        .context("Failed to build the sink router")?,
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let supervisor = Supervisor::new(app_config.clone());
    let report = supervisor
        .start_workers(sources, router, wal, dlq, registry, metrics, cancel)
        .await?;

    info!(
        "🎉 PIPELINE DRAINED! Took: {:#?} — every event delivered, dead-lettered, \
         or honestly accounted for. That's the whole promise. 🦆",
        start_time.elapsed().unwrap_or_default()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{BufferConfig, BufferPolicyKind};
    use crate::events::Event;
    use crate::metrics::StatsConfig;
    use crate::parsers::{CommonParserConfig, ObjectParserConfig, ParserConfig};
    use crate::reliability::breaker::BreakerConfig;
    use crate::reliability::dlq::DlqConfig;
    use crate::reliability::retry::RetryPolicy;
    use crate::sinks::router::RouterConfig;
    use crate::sinks::{CommonSinkConfig, SinkConfig};
    use crate::sources::in_mem::InMemorySourceConfig;
    use crate::sources::SourceConfig;
    use crate::transforms::TransformConfig;
    use crate::wal::WalConfig;
    use std::time::Duration;

    fn base_config(dir: &std::path::Path, sink: SinkConfig) -> AppConfig {
        AppConfig {
            sources: vec![SourceConfig::InMemory(InMemorySourceConfig {
                lines: vec![
                    r#"{"ts":"2024-01-15T10:30:00Z","lvl":"INFO","msg":"service started","port":8080}"#.to_string(),
                    r#"{"ts":"2024-01-15T10:30:01Z","lvl":"ERROR","msg":"disk full","host":"h1"}"#.to_string(),
                    "not json at all, just a line with feelings".to_string(),
                ],
                name: "fixture".to_string(),
            })],
            parser: ParserConfig::Object(ObjectParserConfig {
                common: CommonParserConfig {
                    time_field: Some("ts".to_string()),
                    level_field: Some("lvl".to_string()),
                    message_field: Some("msg".to_string()),
                    ..CommonParserConfig::default()
                },
            }),
            transforms: vec![TransformConfig::TypeInfer(Default::default())],
            buffer: BufferConfig {
                capacity: 64,
                policy: BufferPolicyKind::Block,
                sample_rate: 10,
                block_timeout: Duration::from_secs(5),
            },
            wal: Some(WalConfig {
                enabled: true,
                dir: dir.join("wal"),
                segment_bytes: 1 << 20,
                max_segments: 8,
                sync_interval: Duration::from_millis(100),
                compaction: Default::default(),
                retention: None,
                required: false,
            }),
            worker: PoolConfig {
                count: 2,
                job_timeout: Duration::from_secs(5),
            },
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
                multiplier: 2.0,
                jitter: false,
            },
            breaker: BreakerConfig::default(),
            dlq: DlqConfig {
                dir: dir.join("dlq"),
                max_size: 100,
                max_age: None,
                flush_interval: Duration::from_secs(60),
            },
            sinks: vec![sink],
            router: RouterConfig::default(),
            stats: StatsConfig::default(),
        }
    }

    /// 🧪 The whole journey: three lines in, three NDJSON events on disk,
    /// a WAL with three journaled entries, an empty DLQ, a balanced ledger.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_three_lines_made_it_all_the_way_home() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.ndjson");
        let config = base_config(
            dir.path(),
            SinkConfig::File(crate::sinks::FileSinkConfig {
                path: out_path.to_str().unwrap().to_string(),
                common: CommonSinkConfig::default(),
            }),
        );

        let report = run(config).await.unwrap();

        // 📊 the receipt balances
        assert_eq!(report.ingest.ingested, 3);
        assert_eq!(report.ingest.parse_errors, 0);
        assert_eq!(report.router.delivered, 3);
        assert_eq!(report.dlq.size, 0);
        assert_eq!(report.buffer.enqueued, 3);
        assert_eq!(report.buffer.dequeued, 3);
        let wal = report.wal.expect("wal was enabled");
        assert_eq!(wal.entries_written, 3);

        // 📂 the sink file holds the real thing
        let text = std::fs::read_to_string(&out_path).unwrap();
        let events: Vec<Event> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 3);

        let error_event = events.iter().find(|e| e.level == "error").unwrap();
        assert_eq!(error_event.message, "disk full");
        assert_eq!(error_event.source, "fixture");
        // the JSON number stayed a number through the whole trip
        let started = events.iter().find(|e| e.message == "service started").unwrap();
        assert_eq!(
            started.fields["port"],
            crate::events::FieldValue::Int(8080)
        );
        // the non-JSON line degraded to a message-only event and STILL shipped
        assert!(events.iter().any(|e| e.message.contains("feelings")));
    }

    /// 🧪 When every delivery fails terminally, at-least-once means the DLQ
    /// holds every event and the receipt says so.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_the_sink_is_down_and_the_dlq_catches_everyone() {
        let dir = tempfile::tempdir().unwrap();
        // an http sink pointed at a port that will never answer
        let mut config = base_config(
            dir.path(),
            SinkConfig::Http(crate::sinks::HttpSinkConfig {
                url: "http://127.0.0.1:1/void".to_string(),
                gzip: false,
                username: None,
                password: None,
                timeout: Duration::from_millis(200),
                common: CommonSinkConfig::default(),
            }),
        );
        // keep the retry ladder short; the point is the DLQ, not the wait
        config.retry.max_attempts = 2;

        let report = run(config).await.unwrap();

        assert_eq!(report.ingest.ingested, 3);
        assert_eq!(report.router.delivered, 0);
        assert_eq!(report.dlq.size, 3, "every event accounted for in the DLQ");

        // and the DLQ persisted — a reopened queue still holds them
        let dlq = DeadLetterQueue::open(DlqConfig {
            dir: dir.path().join("dlq"),
            max_size: 100,
            max_age: None,
            flush_interval: Duration::from_secs(60),
        })
        .await
        .unwrap();
        assert_eq!(dlq.len(), 3);
        let entry = dlq.peek().unwrap();
        assert!(entry.attempts >= 1);
        assert!(!entry.error.is_empty());
    }
}
