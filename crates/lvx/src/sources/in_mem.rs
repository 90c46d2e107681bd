// ai
//! 🧪 InMemorySource — a faucet fed by a Vec. Lives fast, EOFs young.
//!
//! Hand it lines at construction (or take the built-in sample set) and it
//! vends them one at a time until the Vec runs dry. No disk. No regrets.
//! Very YOLO. The integration tests drink almost exclusively from this tap.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::sources::Source;

fn default_name() -> String {
    "in_memory".to_string()
}

/// 🔧 In-memory source config.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemorySourceConfig {
    /// 📄 The lines to vend, in order. Empty = the built-in sample set.
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default = "default_name")]
    pub name: String,
}

/// 🧪 Vends a fixed list of lines, then EOF.
#[derive(Debug)]
pub struct InMemorySource {
    lines: std::vec::IntoIter<String>,
    name: String,
}

impl InMemorySource {
    pub fn new(config: InMemorySourceConfig) -> InMemorySource {
        let lines = if config.lines.is_empty() {
            // 🎁 the starter pack: one of each flavor, for demos
            vec![
                r#"{"ts":"2024-01-15T10:30:00Z","lvl":"INFO","msg":"service started","port":8080}"#
                    .to_string(),
                r#"{"ts":"2024-01-15T10:30:01Z","lvl":"WARN","msg":"cache miss storm","rate":0.92}"#
                    .to_string(),
                r#"{"ts":"2024-01-15T10:30:02Z","lvl":"ERROR","msg":"disk full","host":"h1"}"#
                    .to_string(),
                "not json at all, just a line with feelings".to_string(),
            ]
        } else {
            config.lines
        };
        let name = if config.name.is_empty() {
            default_name()
        } else {
            config.name
        };
        InMemorySource {
            lines: lines.into_iter(),
            name,
        }
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_vec_runs_dry_on_schedule() {
        let mut source = InMemorySource::new(InMemorySourceConfig {
            lines: vec!["a".to_string(), "b".to_string()],
            name: "fixture".to_string(),
        });
        assert_eq!(source.name(), "fixture");
        assert_eq!(source.next_line().await.unwrap().unwrap(), "a");
        assert_eq!(source.next_line().await.unwrap().unwrap(), "b");
        assert!(source.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn the_one_where_the_starter_pack_has_four_flavors() {
        let mut source = InMemorySource::new(InMemorySourceConfig::default());
        let mut count = 0;
        while source.next_line().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
