// ai
//! 🚰 The ingest worker — one per source, pumping lines into events.
//!
//! 🎬 *[a raw line leaves the source. it passes the parser (structure),
//! the transform chain (manners), the WAL (a paper trail), and steps onto
//! the ring buffer (the queue for the club). elapsed time: microseconds.
//! character development: immense.]*
//!
//! ## The loop 📜
//! read line → parse (or degrade gracefully) → transforms → WAL tee →
//! ring buffer, with the configured backpressure policy deciding what
//! "the ring is full" means for this producer.
//!
//! ## Loss accounting 💧
//! - Empty lines: `parse_errors` (the only parse error there is).
//! - Block-policy timeouts: `ingest_dropped` — the producer counts and
//!   drops, per its station in life. Drop/Sample losses are counted by the
//!   buffer itself.
//! - WAL append failures: `wal_errors`, and the event STILL enters the ring
//!   (durability is best-effort) — unless the WAL is configured `required`,
//!   in which case the failure is fatal and surfaces to the supervisor.
//!
//! Multiline housekeeping: the pending-accumulation idle check runs between
//! lines and the tail flushes at EOF. (No mid-read select against the
//! source — `read_line` is not cancel-safe, and half a line is worse than a
//! late flush.)

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::RingBuffer;
use crate::errors::BufferError;
use crate::events::Event;
use crate::metrics::PipelineMetrics;
use crate::parsers::{Parser, ParserBackend};
use crate::sources::{Source, SourceBackend};
use crate::supervisors::workers::Worker;
use crate::transforms::TransformChain;
use crate::wal::Wal;

/// 🚰 Source → parser → transforms → WAL tee → ring buffer.
pub(crate) struct IngestWorker {
    source: SourceBackend,
    /// 🔎 Own parser per source — the multiline accumulator is per-stream
    /// state and sharing it across sources would splice strangers' logs.
    parser: ParserBackend,
    transforms: Arc<TransformChain>,
    buffer: Arc<RingBuffer>,
    wal: Option<Arc<Wal>>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
}

impl IngestWorker {
    pub(crate) fn new(
        source: SourceBackend,
        parser: ParserBackend,
        transforms: Arc<TransformChain>,
        buffer: Arc<RingBuffer>,
        wal: Option<Arc<Wal>>,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
    ) -> IngestWorker {
        IngestWorker {
            source,
            parser,
            transforms,
            buffer,
            wal,
            metrics,
            cancel,
        }
    }

    /// 📥 One event through transforms, WAL, and the ring.
    /// `Ok(true)` = keep ingesting; `Ok(false)` = the ring is done with us.
    async fn admit(&self, event: Event) -> Result<bool> {
        let event = self.transforms.apply(event);

        // 📼 WAL tee — admission to the ring is what we're journaling
        if let Some(wal) = &self.wal {
            if let Err(err) = wal.append(&event).await {
                self.metrics.record_wal_error();
                if wal.is_required() {
                    // the operator asked for the stronger guarantee; honor it
                    return Err(err).context(
                        "💀 WAL append failed and wal.required = true — stopping the \
                         ingest path rather than accepting events we can't journal",
                    );
                }
                warn!("📼 WAL append failed (best-effort mode, event continues): {err}");
            }
        }

        match self.buffer.enqueue(event, &self.cancel).await {
            Ok(()) => {
                self.metrics.record_ingested();
                Ok(true)
            }
            Err(BufferError::Full) => {
                // ⏳ Block policy timed out — count the loss, keep reading
                self.metrics.record_ingest_dropped();
                Ok(true)
            }
            Err(BufferError::Closed) | Err(BufferError::Cancelled) => Ok(false),
        }
    }
}

impl Worker for IngestWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let source_name = self.source.name().to_string();
            debug!("🚰 ingest worker for '{source_name}' started");

            loop {
                if self.cancel.is_cancelled() {
                    break;
                }

                // ⏳ multiline housekeeping between lines
                if let Some(event) = self.parser.flush_idle() {
                    if !self.admit(event).await? {
                        break;
                    }
                }

                let Some(line) = self.source.next_line().await.with_context(|| {
                    format!("💀 source '{source_name}' failed mid-read; ingest stops here")
                })?
                else {
                    break; // 🏁 EOF
                };

                match self.parser.parse(&line, &source_name) {
                    // the only parse error: structurally empty input.
                    // counted, dropped, forgotten.
                    Err(_) => self.metrics.record_parse_error(),
                    // absorbed into a multiline accumulation
                    Ok(None) => {}
                    Ok(Some(event)) => {
                        if !self.admit(event).await? {
                            break;
                        }
                    }
                }
            }

            // 🚿 EOF (or shutdown): drain the parser's pending tail
            if let Some(event) = self.parser.flush() {
                let _ = self.admit(event).await?;
            }
            debug!("🚰 ingest worker for '{source_name}' done");
            Ok(())
        })
    }
}
