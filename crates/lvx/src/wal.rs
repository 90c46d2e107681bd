// ai
//! 📼 The write-ahead log — durability between "the buffer took it" and
//! "a sink acknowledged it".
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. DATA CENTER — THE POWER FLICKERS
//!
//! The process dies mid-stride. RAM evaporates. The ring buffer's residents
//! are gone, unmourned. But the WAL's segments are still on disk, every
//! fully-framed record intact, and the torn half-record at the tail gets
//! quietly truncated on reopen. A crash loses at most what was in flight
//! inside the process. Never what was durably written. That's the deal.
//!
//! 🦆 (the duck is fsync'd. the duck survives the crash. the duck remembers.)
//!
//! ---
//!
//! ## Shape 📜
//!
//! A directory of `wal-<08d>.log` segments. One writable (the highest id,
//! append-only, buffered), zero or more sealed. Entries are newline-framed
//! JSON — self-delimiting, resumable after arbitrary truncation, and
//! greppable at 3am, which is not nothing.
//!
//! - **Write**: one framed entry per call; rotation seals the segment
//!   (flush + fsync + read-only) when it would outgrow `segment_bytes`.
//! - **Read**: scan segments in id order; an entry that fails to decode is
//!   skipped with a counter bump, never surfaced — readers don't throw over
//!   one bad line.
//! - **Compaction**: size-based, time-based, or manual. Whole segments only,
//!   oldest first, never the writable one.
//! - **Truncate**: drop sealed segments whose entries are all older than the
//!   given offset. Partially-overlapping segments stay whole — we do not
//!   rewrite segments, ever.
//! - **Recovery**: list, sort, reopen. The highest segment tolerates a torn
//!   tail: parsing stops at the first unframeable record and that byte
//!   position becomes the new write position.
//!
//! Concurrency: one mutex around the whole WAL state (writer included).
//! Readers take it too — the seek+scan is short, and "the WAL is not the
//! hot path" is a design decision, not an accident. The ring buffer is the
//! hot path. The WAL is the insurance paperwork.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use memchr::memchr_iter;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::WalError;
use crate::events::Event;

pub(crate) mod segment;

use segment::Segment;

fn default_segment_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_max_segments() -> usize {
    8
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_enabled() -> bool {
    true
}

/// 🗜️ When do old segments get deleted?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompactionPolicy {
    /// 📏 Keep at most `max_segments`; the oldest sealed ones go first.
    #[default]
    Size,
    /// ⏳ Delete sealed segments whose newest entry is older than `retention`.
    Time,
    /// 🤝 Only when `compact()` is called. The operator drives.
    Manual,
}

/// 🔧 WAL configuration — the `[wal]` section of the config tree.
#[derive(Debug, Clone, Deserialize)]
pub struct WalConfig {
    /// 🔌 Master switch. Off = the pipeline runs memory-only.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 📁 Segment directory.
    pub dir: PathBuf,
    /// 📏 Rotation threshold per segment.
    #[serde(default = "default_segment_bytes")]
    pub segment_bytes: u64,
    /// 🗜️ Retention count for size-based compaction.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// 🔄 Background flush+fsync cadence.
    #[serde(with = "humantime_serde", default = "default_sync_interval")]
    pub sync_interval: Duration,
    /// 🗜️ Which compaction policy runs after each rotation.
    #[serde(default)]
    pub compaction: CompactionPolicy,
    /// ⏳ Age bound for time-based compaction.
    #[serde(default, with = "humantime_serde::option")]
    pub retention: Option<Duration>,
    /// 💀 When true, a failed append is fatal to the ingest path instead of
    /// best-effort. The operator opts into the stronger guarantee explicitly.
    #[serde(default)]
    pub required: bool,
}

/// 📄 One journaled record: a globally monotonic offset, the instant it was
/// admitted, and the event itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub offset: u64,
    pub enqueued_at: DateTime<Utc>,
    pub event: Event,
}

/// 📊 WAL counters, all readable without taking the write mutex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalMetrics {
    pub bytes_written: u64,
    pub entries_written: u64,
    pub segments_created: u64,
    pub segments_current: u64,
    pub compactions: u64,
    pub corrupt_entries: u64,
}

/// Everything the mutex guards: the segment list, the buffered writer for
/// the current segment, and the offset cursor.
struct WalInner {
    segments: Vec<Segment>,
    writer: BufWriter<fs::File>,
    current_size: u64,
    next_offset: u64,
    closed: bool,
}

/// 📼 The segmented write-ahead log.
pub struct Wal {
    config: WalConfig,
    inner: tokio::sync::Mutex<WalInner>,
    bytes_written: AtomicU64,
    entries_written: AtomicU64,
    segments_created: AtomicU64,
    segments_current: AtomicU64,
    compactions: AtomicU64,
    corrupt_entries: AtomicU64,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.config.dir)
            .field("metrics", &self.metrics())
            .finish()
    }
}

/// What a byte-scan of one segment found.
struct ScanOutcome {
    entries: Vec<WalEntry>,
    corrupt: u64,
    /// Byte position just past the last contiguous valid record (recovery mode).
    valid_end: u64,
}

/// 🔎 Walk newline-framed records. Two moods:
/// - recovery (`stop_at_first_bad`): the valid prefix is the truth, the rest
///   is a torn tail to truncate away.
/// - read (`!stop_at_first_bad`): a bad record is skipped and counted; the
///   scan soldiers on.
fn scan_bytes(bytes: &[u8], stop_at_first_bad: bool) -> ScanOutcome {
    let mut out = ScanOutcome {
        entries: Vec::new(),
        corrupt: 0,
        valid_end: 0,
    };
    let mut start = 0usize;
    for nl in memchr_iter(b'\n', bytes) {
        match serde_json::from_slice::<WalEntry>(&bytes[start..nl]) {
            Ok(entry) => {
                if stop_at_first_bad {
                    out.valid_end = (nl + 1) as u64;
                }
                out.entries.push(entry);
            }
            Err(_) => {
                out.corrupt += 1;
                if stop_at_first_bad {
                    return out;
                }
            }
        }
        start = nl + 1;
    }
    // -- 📼 trailing bytes with no newline: a torn record. Not framed, not real.
    out
}

impl Wal {
    /// 🚀 Open (or create) the WAL in its directory and recover its state.
    ///
    /// Recovery: list files, parse ids, sort ascending, seal everything,
    /// then reopen the highest id for append — after truncating any torn
    /// tail down to the last fully-framed record.
    pub async fn open(config: WalConfig) -> Result<Wal, WalError> {
        fs::create_dir_all(&config.dir).await?;

        // 🔎 discover segments
        let mut ids = Vec::new();
        let mut dir = fs::read_dir(&config.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = Segment::parse_id(name) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();

        let mut segments = Vec::with_capacity(ids.len().max(1));
        for &id in &ids {
            let path = Segment::path_for(&config.dir, id);
            let byte_size = fs::metadata(&path).await?.len();
            segments.push(Segment {
                id,
                path,
                byte_size,
                read_only: true,
            });
        }

        let mut corrupt = 0u64;
        let mut next_offset = 0u64;

        // 📼 tolerate a torn tail on the highest segment only — everything
        // below it was sealed with a flush+fsync and is trusted as-is
        if let Some(last) = segments.last_mut() {
            let bytes = fs::read(&last.path).await?;
            let scan = scan_bytes(&bytes, true);
            corrupt += scan.corrupt;
            if scan.valid_end < bytes.len() as u64 {
                warn!(
                    "📼 truncating torn WAL tail in {:?}: {} -> {} bytes",
                    last.path,
                    bytes.len(),
                    scan.valid_end
                );
                let file = fs::OpenOptions::new().write(true).open(&last.path).await?;
                file.set_len(scan.valid_end).await?;
                file.sync_all().await?;
                last.byte_size = scan.valid_end;
            }
            if let Some(entry) = scan.entries.last() {
                next_offset = entry.offset + 1;
            }
        }

        // 🔢 if the highest segment was empty, the offset cursor lives in an
        // older one — walk down until an entry shows up
        if next_offset == 0 && segments.len() > 1 {
            for seg in segments.iter().rev().skip(1) {
                let bytes = fs::read(&seg.path).await?;
                let scan = scan_bytes(&bytes, false);
                corrupt += scan.corrupt;
                if let Some(entry) = scan.entries.last() {
                    next_offset = entry.offset + 1;
                    break;
                }
            }
        }

        // 🏗️ reopen the highest segment writable, or create segment zero
        let mut created = 0u64;
        let (writer, current_size) = match segments.last_mut() {
            Some(last) => {
                last.read_only = false;
                let file = fs::OpenOptions::new().append(true).open(&last.path).await?;
                (BufWriter::new(file), last.byte_size)
            }
            None => {
                let path = Segment::path_for(&config.dir, 0);
                let file = fs::File::create(&path).await?;
                segments.push(Segment {
                    id: 0,
                    path,
                    byte_size: 0,
                    read_only: false,
                });
                created = 1;
                (BufWriter::new(file), 0)
            }
        };

        debug!(
            "📼 WAL open: {} segment(s), next offset {}, {} corrupt record(s) skipped",
            segments.len(),
            next_offset,
            corrupt
        );

        let segments_current = segments.len() as u64;
        Ok(Wal {
            config,
            inner: tokio::sync::Mutex::new(WalInner {
                segments,
                writer,
                current_size,
                next_offset,
                closed: false,
            }),
            bytes_written: AtomicU64::new(0),
            entries_written: AtomicU64::new(0),
            segments_created: AtomicU64::new(created),
            segments_current: AtomicU64::new(segments_current),
            compactions: AtomicU64::new(0),
            corrupt_entries: AtomicU64::new(corrupt),
        })
    }

    /// 📥 Append one event. Returns the entry's offset — strictly the
    /// previous offset plus one, across the whole lifetime of the WAL.
    pub async fn append(&self, event: &Event) -> Result<u64, WalError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(WalError::Closed);
        }

        let offset = inner.next_offset;
        let entry = WalEntry {
            offset,
            enqueued_at: Utc::now(),
            event: event.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        // 📏 rotate BEFORE the write that would overflow the segment
        if inner.current_size > 0
            && inner.current_size + line.len() as u64 > self.config.segment_bytes
        {
            self.rotate(&mut inner).await?;
        }

        inner.writer.write_all(&line).await?;
        inner.current_size += line.len() as u64;
        inner.next_offset += 1;

        self.bytes_written
            .fetch_add(line.len() as u64, Ordering::Relaxed);
        self.entries_written.fetch_add(1, Ordering::Relaxed);
        Ok(offset)
    }

    /// 🚿 Flush the user-space buffer and fsync the current segment.
    /// The background sync task calls this on its interval; callers who need
    /// stronger durability right now call it themselves.
    pub async fn sync(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.writer.flush().await?;
        inner.writer.get_ref().sync_all().await?;
        Ok(())
    }

    /// 📤 Read entries with `offset >= from`, up to `limit` of them,
    /// scanning segments in id order. Bad records are skipped and counted.
    pub async fn read_from(&self, from: u64, limit: usize) -> Result<Vec<WalEntry>, WalError> {
        let mut inner = self.inner.lock().await;
        // flush so the scan sees everything appended so far
        if !inner.closed {
            inner.writer.flush().await?;
        }

        let mut out = Vec::new();
        for seg in &inner.segments {
            if out.len() >= limit {
                break;
            }
            let bytes = fs::read(&seg.path).await?;
            let scan = scan_bytes(&bytes, false);
            self.corrupt_entries.fetch_add(scan.corrupt, Ordering::Relaxed);
            for entry in scan.entries {
                if entry.offset >= from {
                    out.push(entry);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    /// 📤 Every entry across all segments, in offset order.
    pub async fn read_all(&self) -> Result<Vec<WalEntry>, WalError> {
        self.read_from(0, usize::MAX).await
    }

    /// 🗜️ Run the configured compaction policy now.
    pub async fn compact(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().await;
        self.compact_locked(&mut inner).await
    }

    /// ✂️ Discard sealed segments whose entries are ALL strictly older than
    /// `offset`. A segment that straddles the boundary stays whole — the WAL
    /// never rewrites a segment, it only deletes them entire.
    pub async fn truncate(&self, offset: u64) -> Result<(), WalError> {
        let mut inner = self.inner.lock().await;
        while inner.segments.len() > 1 {
            let seg = &inner.segments[0];
            if !seg.read_only {
                break;
            }
            let bytes = fs::read(&seg.path).await?;
            let scan = scan_bytes(&bytes, false);
            let all_older = scan
                .entries
                .last()
                .is_none_or(|entry| entry.offset < offset);
            if !all_older {
                break;
            }
            let seg = inner.segments.remove(0);
            debug!("✂️ truncate: removing fully-acknowledged segment {:?}", seg.path);
            fs::remove_file(&seg.path).await?;
            self.segments_current.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// 🔒 Final flush + fsync, then no more writes.
    pub async fn close(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.writer.flush().await?;
        inner.writer.get_ref().sync_all().await?;
        inner.closed = true;
        Ok(())
    }

    /// 📊 Snapshot the counters without touching the mutex.
    pub fn metrics(&self) -> WalMetrics {
        WalMetrics {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            segments_created: self.segments_created.load(Ordering::Relaxed),
            segments_current: self.segments_current.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
        }
    }

    /// 💀 Is a failed append fatal for the ingest path?
    pub fn is_required(&self) -> bool {
        self.config.required
    }

    /// 🔄 The background sync loop: flush+fsync every `sync_interval` until
    /// cancelled, then one final sync on the way out.
    pub fn run_sync_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick fires immediately; skip straight to the cadence
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sync().await {
                            warn!("📼 background WAL sync failed: {err}");
                        }
                    }
                    _ = cancel.cancelled() => {
                        if let Err(err) = self.sync().await {
                            warn!("📼 final WAL sync failed: {err}");
                        }
                        return;
                    }
                }
            }
        })
    }

    /// 📏 Seal the current segment (flush + fsync + read-only) and open the
    /// next id. Auto-compaction runs here for the Size/Time policies —
    /// rotation is the only moment the segment count can grow.
    async fn rotate(&self, inner: &mut WalInner) -> Result<(), WalError> {
        inner.writer.flush().await?;
        inner.writer.get_ref().sync_all().await?;

        let next_id = {
            let current = inner
                .segments
                .last_mut()
                .expect("wal always holds a current segment");
            current.read_only = true;
            current.byte_size = inner.current_size;
            current.id + 1
        };

        let path = Segment::path_for(&self.config.dir, next_id);
        debug!("📏 WAL rotation: sealing segment, opening {:?}", path);
        let file = fs::File::create(&path).await?;
        inner.writer = BufWriter::new(file);
        inner.current_size = 0;
        inner.segments.push(Segment {
            id: next_id,
            path,
            byte_size: 0,
            read_only: false,
        });
        self.segments_created.fetch_add(1, Ordering::Relaxed);
        self.segments_current.fetch_add(1, Ordering::Relaxed);

        if self.config.compaction != CompactionPolicy::Manual {
            self.compact_locked(inner).await?;
        }
        Ok(())
    }

    /// 🗜️ The policy switch. Whole sealed segments only, oldest first, and
    /// the writable segment is untouchable no matter what the policy says.
    async fn compact_locked(&self, inner: &mut WalInner) -> Result<(), WalError> {
        match self.config.compaction {
            CompactionPolicy::Manual | CompactionPolicy::Size => {
                // Manual compacts like Size when invoked explicitly
                while inner.segments.len() > self.config.max_segments.max(1) {
                    if !inner.segments[0].read_only {
                        break;
                    }
                    let seg = inner.segments.remove(0);
                    debug!("🗜️ size compaction: removing {:?}", seg.path);
                    fs::remove_file(&seg.path).await?;
                    self.compactions.fetch_add(1, Ordering::Relaxed);
                    self.segments_current.fetch_sub(1, Ordering::Relaxed);
                }
            }
            CompactionPolicy::Time => {
                let Some(retention) = self.config.retention else {
                    return Ok(());
                };
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
                loop {
                    let Some(seg) = inner.segments.first() else { break };
                    if !seg.read_only {
                        break;
                    }
                    let bytes = fs::read(&seg.path).await?;
                    let scan = scan_bytes(&bytes, false);
                    // segment age = its NEWEST entry; an all-corrupt segment
                    // has no age and gets the benefit of the doubt
                    let expired = scan
                        .entries
                        .last()
                        .is_some_and(|entry| entry.enqueued_at < cutoff);
                    if !expired {
                        break;
                    }
                    let seg = inner.segments.remove(0);
                    debug!("🗜️ time compaction: removing {:?}", seg.path);
                    fs::remove_file(&seg.path).await?;
                    self.compactions.fetch_add(1, Ordering::Relaxed);
                    self.segments_current.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }
}
