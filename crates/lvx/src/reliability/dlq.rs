// ai
//! 🪦 The dead-letter queue — the sink of last resort.
//!
//! 🎬 *[an event arrives, visibly exhausted. three retries. one open
//! breaker. it has seen things. the DLQ pours it a drink and writes
//! down its story: the error, the attempt count, the timestamps.]*
//!
//! Events land here when delivery has been abandoned — retries exhausted or
//! breaker declined. They wait, bounded and disk-backed, for an operator to
//! dequeue, retry, or clear them. The DLQ is not a landfill; it's a waiting
//! room with a capacity sign on the wall and a TTL on the magazines.
//!
//! ## Mechanics 📜
//! - In-memory `VecDeque` behind one mutex; guarded sections are short and
//!   allocation-only. Disk writes happen AFTER snapshotting, outside the lock.
//! - Persistence: newline-framed JSON, rewritten wholesale to a temp file
//!   and renamed on each flush — dequeues and clears make an append-only
//!   file a lie, and rename is the atomic honesty we can afford.
//! - Flush happens on the configured interval and on close; reopening the
//!   directory rehydrates entries in insertion order.
//! - `max_size` bounds the queue (enqueue fails, drop counter bumps);
//!   `max_age` evicts the expired on every enqueue.
//!
//! 🦆 (the duck sits in the DLQ voluntarily. the duck likes the quiet.)

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::DlqError;
use crate::events::Event;

const DLQ_FILE: &str = "dlq.jsonl";
const DLQ_TMP_FILE: &str = "dlq.jsonl.tmp";

fn default_max_size() -> usize {
    1024
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

/// 🔧 DLQ configuration — the `[dlq]` section of the config tree.
#[derive(Debug, Clone, Deserialize)]
pub struct DlqConfig {
    /// 📁 Where the persistence file lives.
    pub dir: PathBuf,
    /// 📏 Hard capacity. At the limit, enqueues fail and the event drops.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// ⏳ Entries older than this are evicted on the next enqueue.
    #[serde(default, with = "humantime_serde::option")]
    pub max_age: Option<Duration>,
    /// 🔄 Background persistence cadence.
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,
}

/// 🪦 One abandoned delivery, with its paperwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub event: Event,
    /// 💬 The last error the delivery envelope saw, as text.
    pub error: String,
    /// 🔢 How many sink invocations this event burned before landing here.
    pub attempts: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// 🗂️ Whatever the envelope wanted to note down: sink name, worker id...
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// 📊 DLQ counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DlqMetrics {
    pub size: u64,
    pub enqueued: u64,
    pub dequeued: u64,
    /// 💧 Enqueues refused because the queue was full. Terminal loss.
    pub dropped: u64,
    /// ⏳ Entries evicted by max_age.
    pub expired: u64,
}

struct DlqInner {
    entries: VecDeque<DlqEntry>,
    closed: bool,
}

/// 🪦 Disk-persistent bounded queue for abandoned events.
pub struct DeadLetterQueue {
    config: DlqConfig,
    inner: Mutex<DlqInner>,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
    expired: AtomicU64,
}

impl std::fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("dir", &self.config.dir)
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl DeadLetterQueue {
    /// 🚀 Open the DLQ, rehydrating any persisted entries in insertion order.
    pub async fn open(config: DlqConfig) -> Result<DeadLetterQueue, std::io::Error> {
        tokio::fs::create_dir_all(&config.dir).await?;
        let path = config.dir.join(DLQ_FILE);
        let mut entries = VecDeque::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                for line in bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
                    match serde_json::from_slice::<DlqEntry>(line) {
                        Ok(entry) => entries.push_back(entry),
                        // one mangled line does not get to hold the rest hostage
                        Err(err) => warn!("🪦 skipping undecodable DLQ entry: {err}"),
                    }
                }
                debug!("🪦 DLQ rehydrated {} entr(ies) from {:?}", entries.len(), path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        Ok(DeadLetterQueue {
            config,
            inner: Mutex::new(DlqInner {
                entries,
                closed: false,
            }),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        })
    }

    /// 📥 Append an abandoned event. `DlqError::Full` at capacity — the
    /// event is dropped and counted, and that is the terminal state. There
    /// is no queue behind the queue of last resort.
    pub fn enqueue(
        &self,
        event: Event,
        error: impl Into<String>,
        attempts: u32,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), DlqError> {
        let now = Utc::now();
        let entry = DlqEntry {
            event,
            error: error.into(),
            attempts,
            first_seen: now,
            last_seen: now,
            metadata,
        };
        self.enqueue_entry(entry)
    }

    /// 🔁 Re-enqueue a previously dequeued entry, attempt count bumped,
    /// first_seen preserved — the paperwork remembers the whole saga.
    pub fn retry(&self, mut entry: DlqEntry) -> Result<(), DlqError> {
        entry.attempts += 1;
        entry.last_seen = Utc::now();
        self.enqueue_entry(entry)
    }

    fn enqueue_entry(&self, entry: DlqEntry) -> Result<(), DlqError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(DlqError::Closed);
        }
        self.evict_expired(&mut inner);
        if inner.entries.len() >= self.config.max_size {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(DlqError::Full);
        }
        inner.entries.push_back(entry);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 📤 Remove and return the oldest entry.
    pub fn dequeue(&self) -> Option<DlqEntry> {
        let mut inner = self.lock();
        let entry = inner.entries.pop_front();
        if entry.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    /// 👀 The oldest entry, left in place.
    pub fn peek(&self) -> Option<DlqEntry> {
        self.lock().entries.front().cloned()
    }

    /// 📋 Everything, oldest first.
    pub fn get_all(&self) -> Vec<DlqEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// 🧹 Empty the queue. The entries are gone; the counters remember.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> DlqMetrics {
        DlqMetrics {
            size: self.len() as u64,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    /// 💾 Persist the current state: snapshot under the lock, write outside
    /// it, rename into place.
    pub async fn flush(&self) -> Result<(), std::io::Error> {
        let snapshot: Vec<DlqEntry> = {
            let inner = self.lock();
            inner.entries.iter().cloned().collect()
        };

        let mut buf = Vec::with_capacity(snapshot.len() * 256);
        for entry in &snapshot {
            // an entry that cannot serialize cannot be persisted; it stays
            // in memory and the flush carries on without it
            match serde_json::to_vec(entry) {
                Ok(line) => {
                    buf.extend_from_slice(&line);
                    buf.push(b'\n');
                }
                Err(err) => warn!("🪦 DLQ entry refused to serialize: {err}"),
            }
        }

        let tmp = self.config.dir.join(DLQ_TMP_FILE);
        let path = self.config.dir.join(DLQ_FILE);
        tokio::fs::write(&tmp, &buf).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// 🔒 Final flush, then no more enqueues.
    pub async fn close(&self) -> Result<(), std::io::Error> {
        self.flush().await?;
        self.lock().closed = true;
        Ok(())
    }

    /// 🔄 The background flush loop: persist every `flush_interval` until
    /// cancelled, with one last flush on the way out.
    pub fn run_flush_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.flush().await {
                            warn!("🪦 background DLQ flush failed: {err}");
                        }
                    }
                    _ = cancel.cancelled() => {
                        if let Err(err) = self.flush().await {
                            warn!("🪦 final DLQ flush failed: {err}");
                        }
                        return;
                    }
                }
            }
        })
    }

    /// ⏳ Age-based eviction, run on every enqueue.
    fn evict_expired(&self, inner: &mut DlqInner) {
        let Some(max_age) = self.config.max_age else {
            return;
        };
        let cutoff =
            Utc::now() - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        while inner
            .entries
            .front()
            .is_some_and(|entry| entry.last_seen < cutoff)
        {
            inner.entries.pop_front();
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn lock(&self) -> MutexGuard<'_, DlqInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
