// ai
//! 🕳️ Sinks — where events finally leave the building.
//!
//! 🚰 The parser pours, the buffer holds, the workers carry, and the sink
//! swallows. Everything upstream of this module is OUR problem; the sink is
//! the boundary where events become someone else's infrastructure.
//!
//! 🎭 This module is the casting agency. Need NDJSON appended to a file?
//! POSTed over HTTP with optional gzip? Hoarded in a Vec for a test
//! assertion? We've got a sink for that.
//!
//! # Contract 📜
//! - `send` / `send_batch` take a cancellation token and event reference(s);
//!   the sink serializes and ships, nothing more. Buffering and batching are
//!   the router's department; reliability is the envelope's.
//! - Failures carry a `kind` — Retryable, Terminal, or Cancelled — because
//!   the retry classifier branches on DATA, not on error-message archaeology.
//! - `close` flushes and finalizes. MUST be called. Skipping `close` is a
//!   bug. It is also considered rude.
//! - `name` keys the per-sink circuit breaker and the metrics tables.
//!
//! ⚠️ The singularity will arrive before we add a fourth sink variant.
//! At that point, the AGI can implement `Sink` for itself and cut us out.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::SinkError;
use crate::events::Event;

pub(crate) mod file;
pub(crate) mod http;
pub(crate) mod in_mem;
pub(crate) mod router;

pub use file::{FileSink, FileSinkConfig};
pub use http::{HttpSink, HttpSinkConfig};
pub use in_mem::InMemorySink;
pub use router::{FailureStrategy, RouterConfig, RouterError, RouterMetrics, RouterMode, SinkRouter};

use tokio_util::sync::CancellationToken;

fn default_batch_size() -> usize {
    1
}

fn default_batch_linger() -> Duration {
    Duration::from_millis(200)
}

/// 🔧 Knobs every sink shares, flattened into each variant's config.
///
/// 🧠 Knowledge graph: same co-location principle as the parser's common
/// config — one struct, one promotion point, no scavenger hunts at 2am.
#[derive(Debug, Deserialize, Clone)]
pub struct CommonSinkConfig {
    /// 🏷️ Label for breaker keying and metrics. Defaults per sink type.
    #[serde(default)]
    pub name: Option<String>,
    /// 📦 Events per `send_batch` call. 1 = no batcher task, direct sends.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// ⏳ Max time a partial batch waits before flushing anyway.
    #[serde(with = "humantime_serde", default = "default_batch_linger")]
    pub batch_linger: Duration,
}

impl Default for CommonSinkConfig {
    fn default() -> CommonSinkConfig {
        CommonSinkConfig {
            name: None,
            batch_size: default_batch_size(),
            batch_linger: default_batch_linger(),
        }
    }
}

/// 📊 Per-sink delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkMetrics {
    pub sent: u64,
    pub batches: u64,
    pub failed: u64,
    pub bytes: u64,
}

/// 🕳️ A sink: pure I/O on fully-formed events, with classified failures.
#[async_trait]
pub trait Sink: std::fmt::Debug {
    /// 📡 Ship one event. I/O only. No questions asked.
    async fn send(&mut self, cancel: &CancellationToken, event: &Event) -> Result<(), SinkError>;

    /// 📦 Ship several events in one I/O operation, all-or-nothing from the
    /// caller's point of view.
    async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<(), SinkError>;

    /// 🗑️ Flush, finalize, release. Always. No exceptions. Not even Fridays.
    async fn close(&mut self) -> Result<(), SinkError>;

    /// 🏷️ The label the breaker and the metrics tables know this sink by.
    fn name(&self) -> &str;

    /// 📊 Delivery counters so far.
    fn metrics(&self) -> SinkMetrics;
}

/// 🎭 The many faces of a Sink — a polymorphic casting call for destinations.
///
/// Mirrors `SourceBackend` and `ParserBackend`. The enum dispatches every
/// trait method to the concrete type; the router never needs to know whether
/// bytes land on disk, on the wire, or in a test's Vec.
#[derive(Debug)]
pub enum SinkBackend {
    File(FileSink),
    Http(HttpSink),
    InMemory(InMemorySink),
}

/// 🔧 Sink configuration — `type` picks the backend.
///
/// ```toml
/// [[sinks]]
/// type = "http"
/// url = "http://search.internal:9200/_bulk"
/// gzip = true
/// batch_size = 100
/// ```
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// 📂 NDJSON appended to a local file.
    File(FileSinkConfig),
    /// 📡 NDJSON POSTed to an HTTP endpoint, optionally gzipped.
    Http(HttpSinkConfig),
    /// 🧪 In-memory capture for tests. No I/O, no regrets.
    InMemory {
        #[serde(flatten, default)]
        common: CommonSinkConfig,
    },
}

impl SinkConfig {
    /// 🔧 The common knobs, whichever variant we are.
    pub fn common(&self) -> &CommonSinkConfig {
        match self {
            SinkConfig::File(cfg) => &cfg.common,
            SinkConfig::Http(cfg) => &cfg.common,
            SinkConfig::InMemory { common } => common,
        }
    }
}

impl SinkBackend {
    /// 🔧 Resolve a sink from config. Same approach as the parser resolver:
    /// match, construct, wrap. Fallible construction fails at startup.
    pub async fn from_config(config: &SinkConfig) -> anyhow::Result<SinkBackend> {
        Ok(match config {
            SinkConfig::File(cfg) => SinkBackend::File(FileSink::new(cfg.clone()).await?),
            SinkConfig::Http(cfg) => SinkBackend::Http(HttpSink::new(cfg.clone())?),
            SinkConfig::InMemory { common } => {
                SinkBackend::InMemory(InMemorySink::new(common.name.clone()))
            }
        })
    }
}

#[async_trait]
impl Sink for SinkBackend {
    async fn send(&mut self, cancel: &CancellationToken, event: &Event) -> Result<(), SinkError> {
        match self {
            SinkBackend::File(s) => s.send(cancel, event).await,
            SinkBackend::Http(s) => s.send(cancel, event).await,
            SinkBackend::InMemory(s) => s.send(cancel, event).await,
        }
    }

    async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<(), SinkError> {
        match self {
            SinkBackend::File(s) => s.send_batch(cancel, events).await,
            SinkBackend::Http(s) => s.send_batch(cancel, events).await,
            SinkBackend::InMemory(s) => s.send_batch(cancel, events).await,
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        match self {
            SinkBackend::File(s) => s.close().await,
            SinkBackend::Http(s) => s.close().await,
            SinkBackend::InMemory(s) => s.close().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            SinkBackend::File(s) => s.name(),
            SinkBackend::Http(s) => s.name(),
            SinkBackend::InMemory(s) => s.name(),
        }
    }

    fn metrics(&self) -> SinkMetrics {
        match self {
            SinkBackend::File(s) => s.metrics(),
            SinkBackend::Http(s) => s.metrics(),
            SinkBackend::InMemory(s) => s.metrics(),
        }
    }
}
