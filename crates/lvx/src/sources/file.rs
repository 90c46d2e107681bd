// ai
//! 📂 FileSource — reads a file line by line and moves on with its life.
//!
//! Think of it as a very diligent intern who reads a massive log file,
//! never complains, and stops only at EOF. No tailing, no inotify, no
//! rotation-chasing — that's a collaborator's job. This adapter exists so
//! the engine has a real disk-backed source to drink from.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::sources::Source;

/// 🔧 File source config — just the path.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub path: String,
}

/// 📂 Line-by-line reader over a tokio `BufReader`.
pub struct FileSource {
    reader: BufReader<File>,
    name: String,
    line_buf: String,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource").field("name", &self.name).finish()
    }
}

impl FileSource {
    pub async fn new(config: FileSourceConfig) -> Result<FileSource> {
        let file = File::open(&config.path).await.with_context(|| {
            format!(
                "💀 The door to '{}' would not budge. We knocked. We pleaded. \
                 We checked if it existed (it might not). We checked permissions \
                 (they might be wrong). The file remains unopened. We remain outside.",
                config.path
            )
        })?;
        Ok(FileSource {
            reader: BufReader::new(file),
            name: config.path,
            line_buf: String::new(),
        })
    }
}

#[async_trait]
impl Source for FileSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.line_buf.clear();
        let read = self
            .reader
            .read_line(&mut self.line_buf)
            .await
            .with_context(|| format!("💀 read from '{}' failed mid-file", self.name))?;
        if read == 0 {
            return Ok(None); // 🏁 EOF. Fin. The end.
        }
        // strip the frame, keep the content — even if the content is empty
        // (the parser is the one with standards about empty lines)
        let line = self.line_buf.trim_end_matches(['\n', '\r']).to_string();
        Ok(Some(line))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_intern_reads_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first line\nsecond line\r\nthird line\n").unwrap();

        let mut source = FileSource::new(FileSourceConfig {
            path: path.to_str().unwrap().to_string(),
        })
        .await
        .unwrap();

        assert_eq!(source.next_line().await.unwrap().unwrap(), "first line");
        assert_eq!(source.next_line().await.unwrap().unwrap(), "second line");
        assert_eq!(source.next_line().await.unwrap().unwrap(), "third line");
        assert!(source.next_line().await.unwrap().is_none(), "EOF is None");
    }

    #[tokio::test]
    async fn the_one_where_the_missing_file_fails_at_the_door() {
        let result = FileSource::new(FileSourceConfig {
            path: "/definitely/not/a/real/path.log".to_string(),
        })
        .await;
        assert!(result.is_err());
    }
}
