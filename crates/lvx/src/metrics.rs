// AI
//! 📊 metrics.rs — "Is it working?" — every operator, every pipeline, forever.
//!
//! 🚀 This module answers the age-old question "where are my logs?" with
//! cold hard counters, a live stats table, and zero global state. The
//! metrics handle is an explicit object threaded through construction —
//! no process-wide collector singleton, no action-at-a-distance. If a
//! component counts something, you can see exactly who handed it the pen.
//!
//! ⚠️ Warning: watching the stats table will not make the sinks faster.
//! Neither will refreshing it. We've tried. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use comfy_table::{presets::NOTHING, Cell, CellAlignment, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::buffer::BufferMetrics;
use crate::reliability::breaker::BreakerState;
use crate::reliability::dlq::DlqMetrics;
use crate::sinks::router::RouterMetrics;
use crate::sinks::SinkMetrics;
use crate::supervisors::workers::drain_pool::PoolMetrics;
use crate::wal::WalMetrics;

/// 🔢 Formats a number with commas for the 3 people in the audience who
/// like readability. "1000000 events" → "1,000,000 events".
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, the pipeline has been up a while. Good for it.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(1)
}

/// 🔧 Stats display configuration — the `[stats]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(with = "humantime_serde", default = "default_stats_interval")]
    pub interval: Duration,
}

impl Default for StatsConfig {
    fn default() -> StatsConfig {
        StatsConfig {
            enabled: false,
            interval: default_stats_interval(),
        }
    }
}

/// 📊 Ingest-side counters. The explicit handle the ingest workers write to.
#[derive(Debug)]
pub struct PipelineMetrics {
    ingested: AtomicU64,
    parse_errors: AtomicU64,
    wal_errors: AtomicU64,
    ingest_dropped: AtomicU64,
    start: Instant,
}

/// 📊 A frozen view of the ingest counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    pub ingested: u64,
    pub parse_errors: u64,
    pub wal_errors: u64,
    /// 💧 Block-policy timeouts at producers (Drop/Sample losses are the
    /// buffer's own `dropped`).
    pub ingest_dropped: u64,
}

impl PipelineMetrics {
    pub fn new() -> PipelineMetrics {
        PipelineMetrics {
            ingested: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            wal_errors: AtomicU64::new(0),
            ingest_dropped: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn record_ingested(&self) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wal_error(&self) {
        self.wal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingest_dropped(&self) {
        self.ingest_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ingest_snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            wal_errors: self.wal_errors.load(Ordering::Relaxed),
            ingest_dropped: self.ingest_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for PipelineMetrics {
    fn default() -> PipelineMetrics {
        PipelineMetrics::new()
    }
}

/// 📊 The flat, read-only, whole-pipeline snapshot. One struct, every
/// counter from every component, assembled by the supervisor on demand.
/// The scrape endpoint (an external collaborator) serializes THIS.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub ingest: IngestSnapshot,
    pub buffer: BufferMetrics,
    pub wal: Option<WalMetrics>,
    pub pool: PoolMetrics,
    pub router: RouterMetrics,
    pub sinks: BTreeMap<String, SinkMetrics>,
    pub dlq: DlqMetrics,
    pub breakers: BTreeMap<String, BreakerState>,
    pub uptime: Duration,
}

/// 📺 The live terminal stats display, for humans watching the pipeline go.
///
/// A spinner (event totals are open-ended; there is no 100%) plus a comfy
/// table of the numbers that matter at a glance. Rates come from a
/// 5-second sliding window so one hiccup doesn't look like a seismograph.
pub struct StatsDisplay {
    bar: ProgressBar,
    /// 🔄 (when, events delivered) samples for the rate window
    samples: VecDeque<(Instant, u64)>,
}

impl std::fmt::Debug for StatsDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("StatsDisplay").finish()
    }
}

impl StatsDisplay {
    pub fn new() -> StatsDisplay {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                // safe unwrap: template string is hardcoded and valid, I checked, twice
                .unwrap(),
        );
        let mut samples = VecDeque::new();
        samples.push_back((Instant::now(), 0u64));
        StatsDisplay { bar, samples }
    }

    /// 🔄 Feed a fresh snapshot, re-render the table.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.samples.push_back((now, snapshot.router.delivered));

        let rate = match self.samples.front() {
            Some(&(oldest_t, oldest_n)) if now > oldest_t => {
                let elapsed = now.duration_since(oldest_t).as_secs_f64();
                (snapshot.router.delivered.saturating_sub(oldest_n)) as f64 / elapsed
            }
            _ => 0.0,
        };

        let total_lost = snapshot.ingest.ingest_dropped
            + snapshot.buffer.dropped
            + snapshot.dlq.dropped;

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} ev/s", format_number(rate as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} ingested", format_number(snapshot.ingest.ingested)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} delivered", format_number(snapshot.router.delivered)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("buffer {}%", snapshot.buffer.utilization_pct))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} dropped", format_number(total_lost)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} in DLQ", format_number(snapshot.dlq.size)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} workers", snapshot.pool.active_workers))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} parse errs",
                format_number(snapshot.ingest.parse_errors)
            ))
            .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} up", format_duration(snapshot.uptime)))
                .set_alignment(CellAlignment::Right),
        ]);

        self.bar.set_message(format!("logvex\n{table}"));
        self.bar.tick();
    }

    /// ✅ Ring the bell. We made it. (Or we got EOF. Same energy.)
    pub fn finish(&self) {
        self.bar.finish();
    }
}

impl Default for StatsDisplay {
    fn default() -> StatsDisplay {
        StatsDisplay::new()
    }
}
