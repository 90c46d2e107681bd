// ai
//! 🚰 Sources — where raw lines come from. Maximally ignorant of content.
//!
//! A source is a faucet, not a chef: it pours one raw line per call and
//! does NOT parse, split, or understand anything. The parser downstream has
//! the opinions. The ingest worker turns the faucet.
//!
//! This is the thin edge of the system — real deployments hang file
//! tailers, syslog listeners, and HTTP receivers here; the engine only
//! needs the contract. Two adapters ship in-tree: a line-by-line file
//! reader and an in-memory fixture for tests and demos.
//!
//! # Contract 📜
//! - `next_line` returns `Ok(Some(line))` while data flows, `Ok(None)` at
//!   EOF. The well is dry. The golden retriever goes home. 🐕
//! - `name` is the source tag stamped on every event from this source.
//! - The borrow checker demands `&mut self` because sources have state.
//!   And feelings. Mostly state.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

pub(crate) mod file;
pub(crate) mod in_mem;

pub use file::{FileSource, FileSourceConfig};
pub use in_mem::{InMemorySource, InMemorySourceConfig};

/// 🚰 One raw line per call, origin-tagged, content-agnostic.
#[async_trait]
pub trait Source: std::fmt::Debug {
    /// 📄 The next raw line, or `None` at EOF.
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// 🏷️ The tag events from this source carry in their `source` field.
    fn name(&self) -> &str;
}

/// 🎭 The many faces of a Source — same enum-dispatch shape as everything
/// else in this codebase. Consistency isn't a virtue here, it's a reflex.
#[derive(Debug)]
pub enum SourceBackend {
    File(FileSource),
    InMemory(InMemorySource),
}

/// 🔧 Source configuration — `type` picks the adapter.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// 📂 Read a local file line by line, start to finish.
    File(FileSourceConfig),
    /// 🧪 A fixed list of lines. No I/O, no surprises, no regrets.
    InMemory(InMemorySourceConfig),
}

impl SourceBackend {
    pub async fn from_config(config: &SourceConfig) -> Result<SourceBackend> {
        Ok(match config {
            SourceConfig::File(cfg) => SourceBackend::File(FileSource::new(cfg.clone()).await?),
            SourceConfig::InMemory(cfg) => {
                SourceBackend::InMemory(InMemorySource::new(cfg.clone()))
            }
        })
    }
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_line(&mut self) -> Result<Option<String>> {
        match self {
            SourceBackend::File(s) => s.next_line().await,
            SourceBackend::InMemory(s) => s.next_line().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            SourceBackend::File(s) => s.name(),
            SourceBackend::InMemory(s) => s.name(),
        }
    }
}
