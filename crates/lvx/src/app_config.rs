//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the
//! fridge. In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! The tree, section by section: `[[sources]]` feed lines, `[parser]` makes
//! events, `[[transforms]]` groom them, `[buffer]` holds them, `[wal]`
//! journals them, `[worker]` drains them, `[retry]`/`[breaker]`/`[dlq]`
//! keep the promises, `[[sinks]]` + `[router]` ship them, `[stats]` watches.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use tracing::info;

use crate::buffer::BackpressurePolicy;
use crate::metrics::StatsConfig;
use crate::parsers::ParserConfig;
use crate::reliability::breaker::BreakerConfig;
use crate::reliability::dlq::DlqConfig;
use crate::reliability::retry::RetryPolicy;
use crate::sinks::router::RouterConfig;
use crate::sinks::SinkConfig;
use crate::sources::SourceConfig;
use crate::supervisors::workers::drain_pool::PoolConfig;
use crate::transforms::TransformConfig;
use crate::wal::WalConfig;

// ============================================================
// 📬 BufferConfig — the knobs on the ring
// ============================================================

fn default_capacity() -> usize {
    8192
}

fn default_sample_rate() -> u64 {
    10
}

fn default_block_timeout() -> Duration {
    Duration::from_secs(5)
}

/// 🚰 Which full-buffer behavior the operator signed up for.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BufferPolicyKind {
    /// ⏳ Producers wait (bounded). Pressure reaches the sources.
    #[default]
    Block,
    /// 🗑️ Oldest resident evicted. Pressure absorbed, loss counted.
    Drop,
    /// 🎲 1-of-N kept while full. Statistical honesty under fire.
    Sample,
}

/// 🔧 Ring-buffer configuration — the `[buffer]` section.
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    /// 📏 Requested capacity; rounded up to a power of two at construction.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub policy: BufferPolicyKind,
    /// 🎲 The N in "keep 1 of every N" (sample policy only).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u64,
    /// ⏳ How long a Block-policy enqueue waits before giving up.
    #[serde(with = "humantime_serde", default = "default_block_timeout")]
    pub block_timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> BufferConfig {
        BufferConfig {
            capacity: default_capacity(),
            policy: BufferPolicyKind::default(),
            sample_rate: default_sample_rate(),
            block_timeout: default_block_timeout(),
        }
    }
}

impl BufferConfig {
    /// 🔄 Config → the buffer's runtime policy value.
    pub fn backpressure(&self) -> BackpressurePolicy {
        match self.policy {
            BufferPolicyKind::Block => BackpressurePolicy::Block {
                timeout: self.block_timeout,
            },
            BufferPolicyKind::Drop => BackpressurePolicy::DropOldest,
            BufferPolicyKind::Sample => BackpressurePolicy::Sample {
                rate: self.sample_rate,
            },
        }
    }
}

// ============================================================
// 📦 AppConfig — one struct to rule them all
// ============================================================

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🚰 Where lines come from. One ingest task each.
    pub sources: Vec<SourceConfig>,
    /// 🔎 How lines become events. One parser instance per source (the
    /// multiline accumulator is per-stream state).
    pub parser: ParserConfig,
    /// 🔄 The operator chain, applied in configured order.
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub buffer: BufferConfig,
    /// 📼 Optional durability. Absent section = memory-only pipeline.
    #[serde(default)]
    pub wal: Option<WalConfig>,
    #[serde(default)]
    pub worker: PoolConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// 🪦 The queue of last resort. Required — at-least-once needs a floor.
    pub dlq: DlqConfig,
    /// 🕳️ Where events go. At least one, or the pipeline is performance art.
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

/// 🚀 Load the config — from a file, from env vars, or from sheer hope.
///
/// 🔧 Merges environment variables (LVX_*) with an optional TOML file.
/// TOML wins on conflicts — files are deliberate, environments are ambient.
///
/// 📐 DESIGN NOTE (tribal knowledge, now written down):
///   - `config_file_name` = None  → env vars only. No file. No assumptions.
///   - `config_file_name` = Some  → env vars + TOML, merged.
///
/// 💀 Returns an error if the config is unparseable. Which it will be,
/// the first time. Check the error message — it's contextual, informative,
/// and written with love. Or despair. Hard to tell at 3am.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("LVX_"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment \
             variables (LVX_*). The file exists in our hearts, but apparently \
             the contents and the schema are not on speaking terms.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables \
                 (LVX_*). No file was provided — this one's all on the \
                 environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
