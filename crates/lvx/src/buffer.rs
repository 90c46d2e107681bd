// ai
//! 📬 The ring buffer — the bounded heart of the pipeline.
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. THE HOT PATH — EVERY EVENT PASSES THROUGH HERE
//!
//! Between the parsers (many, fast, excitable) and the workers (several,
//! steady, long-suffering) sits one fixed-size ring of slots. No locks on
//! the hot path. No unbounded queues quietly eating the heap. Just two
//! monotonic counters, a CAS apiece, and a per-slot sequence number that
//! tells everyone whose turn it is.
//!
//! 🦆 (the duck is slot zero. the duck has been overwritten 4 billion times.
//! the duck does not complain. the duck is lock-free.)
//!
//! ---
//!
//! ## The protocol 📜
//!
//! Capacity `C` is a power of two. `write_seq` and `read_seq` only ever go
//! up; occupancy is their difference; the slot for sequence `s` is
//! `s & (C-1)`. Each slot carries its own sequence counter:
//!
//! - slot.seq == s        → empty, waiting for the producer that claims `s`
//! - slot.seq == s + 1    → full, holding the event for sequence `s`
//! - slot.seq == s + C    → empty again, recycled for the next lap
//!
//! Producers contend only on `write_seq` (one CAS), consumers only on
//! `read_seq` (one CAS). The slot sequence is the publication barrier: a
//! winner of the counter CAS owns the slot exclusively until it bumps the
//! slot seq, so no two tasks ever touch the same `Option<Event>` at once.
//! That invariant is what makes the one `unsafe` block down there sound.
//!
//! ## Backpressure, in three flavors 🚰
//!
//! - **Block**: wait (bounded) for a consumer to make room. Pressure reaches
//!   the producer, which is sometimes exactly what you want.
//! - **DropOldest**: evict the oldest resident and move in. The eviction CAS
//!   may lose to a real consumer — that's still a win, the slot is free
//!   either way, and the consumer got a delivery instead of a funeral.
//! - **Sample**: while full, keep 1 of every N arrivals (evicting to make
//!   room for the keeper), count the rest as dropped.
//!
//! ## Wake-ups 🔔
//!
//! Two `tokio::sync::Notify` channels — "not empty" and "not full" — with
//! coalescing semantics: a signal while one is already pending is a no-op.
//! Waiters re-check occupancy after every wake; spurious wakes are welcome
//! here, they just burn a loop iteration.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::errors::BufferError;
use crate::events::Event;

/// 🚰 What happens when the ring is full and another event shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// ⏳ Wait for room, up to the deadline. `BufferError::Full` after that.
    Block { timeout: Duration },
    /// 🗑️ Evict the oldest resident. Never blocks, never errors.
    DropOldest,
    /// 🎲 Keep 1 of every N arrivals while full; count the rest as dropped.
    Sample { rate: u64 },
}

/// 📊 A point-in-time, lock-free view of the buffer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferMetrics {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub current_size: u64,
    pub capacity: u64,
    pub utilization_pct: u64,
}

/// One slot: a sequence counter and the cell it guards.
struct Slot {
    seq: AtomicU64,
    value: UnsafeCell<Option<Event>>,
}

// Slot access is serialized by the sequence protocol documented on
// `RingBuffer` above: a task touches a slot's cell only between winning the
// counter CAS and bumping the slot seq, so concurrent access across threads
// is already mutually exclusive in practice.
unsafe impl Sync for Slot {}

/// 📬 The bounded MPMC ring buffer between parsing and draining.
pub struct RingBuffer {
    slots: Box<[Slot]>,
    mask: u64,
    capacity: u64,
    policy: BackpressurePolicy,
    write_seq: AtomicU64,
    read_seq: AtomicU64,
    closed: AtomicBool,
    /// 🔔 coalescing wake channels — see the module doc
    not_empty: Notify,
    not_full: Notify,
    /// 🎲 buffer-private counter for the Sample policy's 1-of-N decision
    sample_counter: AtomicU64,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
}

// Slot access is serialized by the sequence protocol above: a task touches a
// slot's cell only between winning the counter CAS and bumping the slot seq.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("occupancy", &self.occupancy())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl RingBuffer {
    /// 🏗️ Build a ring with at least `capacity` slots (rounded up to the next
    /// power of two, minimum 2 — a ring of one slot is just a very slow
    /// variable).
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> RingBuffer {
        let capacity = capacity.next_power_of_two().max(2) as u64;
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicU64::new(i),
                value: UnsafeCell::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RingBuffer {
            slots,
            mask: capacity - 1,
            capacity,
            policy,
            write_seq: AtomicU64::new(0),
            read_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            sample_counter: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// 📏 Occupancy right now. Monotonic counters, so this is just a subtraction.
    pub fn occupancy(&self) -> u64 {
        let w = self.write_seq.load(Ordering::Relaxed);
        let r = self.read_seq.load(Ordering::Relaxed);
        w.saturating_sub(r)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 📊 Snapshot the counters. Never blocks a producer or consumer.
    pub fn metrics(&self) -> BufferMetrics {
        let current_size = self.occupancy();
        BufferMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            current_size,
            capacity: self.capacity,
            utilization_pct: current_size * 100 / self.capacity,
        }
    }

    /// 🔒 Close the ring: enqueues start failing, dequeues drain what's left
    /// and then report `Closed`. Both wake channels fire so nobody hangs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// 📥 Enqueue one event under the configured policy.
    ///
    /// Returns `Ok(())` when the event was accepted — which, for the Sample
    /// policy, includes "accepted and immediately sampled away" (counted in
    /// both `enqueued` and `dropped`, so conservation still balances).
    pub async fn enqueue(
        &self,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<(), BufferError> {
        let mut block_deadline: Option<tokio::time::Instant> = None;
        loop {
            if self.is_closed() {
                return Err(BufferError::Closed);
            }

            let w = self.write_seq.load(Ordering::Relaxed);
            let r = self.read_seq.load(Ordering::Relaxed);

            // saturating: a consumer may advance read_seq between the loads
            if w.saturating_sub(r) >= self.capacity {
                // 🚰 full: the policy decides
                match self.policy {
                    BackpressurePolicy::Block { timeout } => {
                        let deadline = *block_deadline
                            .get_or_insert_with(|| tokio::time::Instant::now() + timeout);
                        // 🛡️ lost-wakeup guard: register the waiter BEFORE the
                        // final fullness re-check, then await
                        let notified = self.not_full.notified();
                        if self.occupancy() < self.capacity {
                            continue;
                        }
                        if self.is_closed() {
                            return Err(BufferError::Closed);
                        }
                        tokio::select! {
                            _ = notified => {}
                            _ = cancel.cancelled() => return Err(BufferError::Cancelled),
                            _ = tokio::time::sleep_until(deadline) => {
                                return Err(BufferError::Full)
                            }
                        }
                        continue;
                    }
                    BackpressurePolicy::DropOldest => {
                        self.evict_oldest().await;
                        continue;
                    }
                    BackpressurePolicy::Sample { rate } => {
                        let n = self.sample_counter.fetch_add(1, Ordering::Relaxed);
                        if n % rate.max(1) == 0 {
                            // 🎯 the keeper: make room, then go store it
                            self.evict_oldest().await;
                            continue;
                        }
                        // 🎲 sampled away — enters the ledger, never the ring
                        self.enqueued.fetch_add(1, Ordering::Relaxed);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                }
            }

            // 🎯 claim the write sequence — the only producer contention point
            if self
                .write_seq
                .compare_exchange_weak(w, w + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let slot = &self.slots[(w & self.mask) as usize];
                // the previous lap's consumer may still be clearing this slot
                self.wait_for_slot(slot, w).await;
                // SAFETY: winning the CAS on `write_seq` at `w` grants exclusive
                // access to slot `w & mask` until we publish via slot.seq below.
                unsafe {
                    *slot.value.get() = Some(event);
                }
                slot.seq.store(w + 1, Ordering::Release);
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                self.not_empty.notify_one();
                return Ok(());
            }
            // CAS lost to a sibling producer — go around
        }
    }

    /// 📤 Dequeue one event, waiting if the ring is empty.
    ///
    /// Returns `Closed` once the ring is closed AND drained — closing does
    /// not strand residents.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<Event, BufferError> {
        loop {
            let r = self.read_seq.load(Ordering::Relaxed);
            let w = self.write_seq.load(Ordering::Relaxed);

            if r >= w {
                // 💤 empty — closed means done, otherwise park until a producer knocks
                if self.is_closed() {
                    return Err(BufferError::Closed);
                }
                let notified = self.not_empty.notified();
                if self.occupancy() > 0 {
                    continue;
                }
                if self.is_closed() {
                    return Err(BufferError::Closed);
                }
                tokio::select! {
                    _ = notified => {}
                    _ = cancel.cancelled() => return Err(BufferError::Cancelled),
                }
                continue;
            }

            // 🎯 claim the read sequence — no event is ever observed twice
            if self
                .read_seq
                .compare_exchange_weak(r, r + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let slot = &self.slots[(r & self.mask) as usize];
                // the producer that claimed `r` may still be mid-store
                self.wait_for_slot(slot, r + 1).await;
                // SAFETY: winning the CAS on `read_seq` at `r` grants exclusive
                // access to slot `r & mask` until we recycle via slot.seq below.
                let event = unsafe { (*slot.value.get()).take() }
                    .expect("ring slot published without a value; sequence protocol violated");
                slot.seq.store(r + self.capacity, Ordering::Release);
                self.dequeued.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_one();
                return Ok(event);
            }
        }
    }

    /// 🗑️ One eviction step for the Drop/Sample policies.
    ///
    /// CAS `read_seq` forward by one. Losing the race means a real consumer
    /// took the slot — which freed it just the same, so the caller proceeds
    /// either way. The `dropped` counter moves only when WE discard an event;
    /// the racing consumer's take was a delivery, not a drop, and counting it
    /// here would unbalance the conservation ledger.
    async fn evict_oldest(&self) {
        let r = self.read_seq.load(Ordering::Relaxed);
        let w = self.write_seq.load(Ordering::Relaxed);
        if r >= w {
            return; // drained under us — nothing to evict, room exists now
        }
        if self
            .read_seq
            .compare_exchange(r, r + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let slot = &self.slots[(r & self.mask) as usize];
            self.wait_for_slot(slot, r + 1).await;
            // SAFETY: same exclusivity argument as `dequeue` — we won the read CAS.
            let _evicted = unsafe { (*slot.value.get()).take() };
            slot.seq.store(r + self.capacity, Ordering::Release);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.not_full.notify_one();
        }
    }

    /// ⏳ Spin briefly, then yield, until the slot's sequence reaches
    /// `expected`. The wait is bounded by the peer's two instructions
    /// between its CAS win and its publish — this is a handoff, not a queue.
    async fn wait_for_slot(&self, slot: &Slot, expected: u64) {
        let mut spins: u32 = 0;
        while slot.seq.load(Ordering::Acquire) != expected {
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

}
