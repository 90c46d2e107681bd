// ai
//! 📂 FileSink — NDJSON onto disk, one event per line.
//!
//! It's a BufWriter around a tokio `File` in append mode. Simple. Honest.
//! Does not retry (that's the envelope's job). Does not have opinions about
//! your event schema. It writes what you give it, newline-terminated, and
//! flushes when told.
//!
//! ⚠️ Append mode, not truncate — a log sink that eats its own history on
//! restart is a prank, not a sink.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::errors::SinkError;
use crate::events::Event;
use crate::sinks::{CommonSinkConfig, Sink, SinkMetrics};

/// 🔧 File sink config — a path, plus the common knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSinkConfig {
    pub path: String,
    #[serde(flatten, default)]
    pub common: CommonSinkConfig,
}

/// 📂 Appends events to a local NDJSON file.
pub struct FileSink {
    writer: BufWriter<tokio::fs::File>,
    name: String,
    metrics: SinkMetrics,
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("name", &self.name)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl FileSink {
    /// 🚀 Open (or create) the file in append mode and stand ready.
    pub async fn new(config: FileSinkConfig) -> Result<FileSink> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .await
            .with_context(|| {
                format!(
                    "💀 The sink file '{}' would not open. We knocked. We pleaded. \
                     The filesystem remained unmoved. Check the parent directory, \
                     check the permissions, check your assumptions.",
                    config.path
                )
            })?;
        Ok(FileSink {
            writer: BufWriter::new(file),
            name: config
                .common
                .name
                .clone()
                .unwrap_or_else(|| format!("file:{}", config.path)),
            metrics: SinkMetrics::default(),
        })
    }

    /// 📄 Serialize one event to its NDJSON line.
    fn encode(event: &Event) -> Result<Vec<u8>, SinkError> {
        let mut line = serde_json::to_vec(event)
            // a value that cannot become JSON will not improve with retries
            .map_err(|err| SinkError::terminal(format!("event refused to serialize: {err}")))?;
        line.push(b'\n');
        Ok(line)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), SinkError> {
        self.writer.write_all(buf).await.map_err(|err| {
            // disk trouble is usually transient (full, slow, remounting) —
            // let the envelope decide how long to care
            SinkError::retryable(format!("file sink write failed: {err}"))
        })?;
        self.metrics.bytes += buf.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn send(&mut self, _cancel: &CancellationToken, event: &Event) -> Result<(), SinkError> {
        let line = FileSink::encode(event)?;
        trace!("📬 {} byte line → file sink '{}'", line.len(), self.name);
        match self.write(&line).await {
            Ok(()) => {
                self.metrics.sent += 1;
                Ok(())
            }
            Err(err) => {
                self.metrics.failed += 1;
                Err(err)
            }
        }
    }

    async fn send_batch(
        &mut self,
        _cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<(), SinkError> {
        let mut buf = Vec::with_capacity(events.len() * 256);
        for event in events {
            buf.extend_from_slice(&FileSink::encode(event)?);
        }
        match self.write(&buf).await {
            Ok(()) => {
                self.metrics.sent += events.len() as u64;
                self.metrics.batches += 1;
                Ok(())
            }
            Err(err) => {
                self.metrics.failed += events.len() as u64;
                Err(err)
            }
        }
    }

    /// 🗑️ Flush the BufWriter and sync. Without this, the last lines sit in
    /// the buffer forever — a letter written but never sent.
    async fn close(&mut self) -> Result<(), SinkError> {
        self.writer
            .flush()
            .await
            .map_err(|err| SinkError::retryable(format!("file sink flush failed: {err}")))?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|err| SinkError::retryable(format!("file sink fsync failed: {err}")))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> SinkMetrics {
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: &std::path::Path) -> FileSinkConfig {
        FileSinkConfig {
            path: path.to_str().unwrap().to_string(),
            common: CommonSinkConfig::default(),
        }
    }

    #[tokio::test]
    async fn the_one_where_events_become_lines_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");
        let cancel = CancellationToken::new();

        let mut sink = FileSink::new(config(&path)).await.unwrap();
        sink.send(&cancel, &Event::message_only("first", "t")).await.unwrap();
        sink.send_batch(
            &cancel,
            &[
                Event::message_only("second", "t"),
                Event::message_only("third", "t"),
            ],
        )
        .await
        .unwrap();
        sink.close().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let back: Event = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back.message, "first");

        let m = sink.metrics();
        assert_eq!(m.sent, 3);
        assert_eq!(m.batches, 1);
        assert_eq!(m.failed, 0);
    }

    /// 🧪 Append mode: a reopened sink extends the file, never truncates it.
    #[tokio::test]
    async fn the_one_where_the_history_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");
        let cancel = CancellationToken::new();

        for round in 0..2 {
            let mut sink = FileSink::new(config(&path)).await.unwrap();
            sink.send(&cancel, &Event::message_only(&format!("round {round}"), "t"))
                .await
                .unwrap();
            sink.close().await.unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2, "restart appended, not truncated");
    }
}
