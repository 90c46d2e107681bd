// ai
//! 📼 Segments — the WAL's unit of real estate.
//!
//! One segment = one append-only file, named `wal-<00000042>.log` so that a
//! plain lexical sort of the directory IS the creation order. Only the
//! highest-id segment is ever writable; everything below it is sealed,
//! read-only, and waiting for compaction to decide its fate.
//!
//! A sealed segment is never reopened for write. Ever. Segments are like
//! concert tickets: once torn, torn. 🦆

use std::path::{Path, PathBuf};

/// 📛 Filename shape: `<prefix><08d id><suffix>`.
pub(crate) const SEGMENT_PREFIX: &str = "wal-";
pub(crate) const SEGMENT_SUFFIX: &str = ".log";

/// 📼 One WAL segment file and what we know about it.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    /// 🔢 Monotonic id; doubles as the creation-order sort key.
    pub id: u64,
    pub path: PathBuf,
    /// 📏 Bytes currently in the file (tracked, not re-statted).
    pub byte_size: u64,
    /// 🔒 Sealed segments take no further writes. No exceptions.
    pub read_only: bool,
}

impl Segment {
    pub(crate) fn file_name(id: u64) -> String {
        format!("{SEGMENT_PREFIX}{id:08}{SEGMENT_SUFFIX}")
    }

    pub(crate) fn path_for(dir: &Path, id: u64) -> PathBuf {
        dir.join(Segment::file_name(id))
    }

    /// 🔎 Parse a segment id back out of a filename. Anything that doesn't
    /// match the shape exactly is somebody else's file and returns `None`.
    pub(crate) fn parse_id(file_name: &str) -> Option<u64> {
        let id = file_name
            .strip_prefix(SEGMENT_PREFIX)?
            .strip_suffix(SEGMENT_SUFFIX)?;
        // 08-padded digits only — "wal-notanumber.log" is not one of ours
        if id.len() != 8 || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        id.parse().ok()
    }
}
