//! 🏁 Ring buffer throughput — because "it's lock-free" is a claim,
//! and claims get benchmarked.

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use lvx::buffer::{BackpressurePolicy, RingBuffer};
use lvx::events::Event;

/// 📬 SPSC round trip: N events enqueued then drained on one task.
fn bench_spsc_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    c.bench_function("ring_spsc_1k_round_trip", |b| {
        b.to_async(&rt).iter(|| async {
            let ring = RingBuffer::new(1024, BackpressurePolicy::DropOldest);
            let cancel = CancellationToken::new();
            for i in 0..1000 {
                ring.enqueue(Event::message_only("bench event payload", "bench"), &cancel)
                    .await
                    .unwrap();
                let _ = i;
            }
            for _ in 0..1000 {
                ring.dequeue(&cancel).await.unwrap();
            }
        });
    });
}

/// 🧵 MPMC contention: 4 producers, 4 consumers, 4k events through a small ring.
fn bench_mpmc_contended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    c.bench_function("ring_mpmc_4x4_4k", |b| {
        b.to_async(&rt).iter(|| async {
            let ring = Arc::new(RingBuffer::new(
                256,
                BackpressurePolicy::Block {
                    timeout: Duration::from_secs(10),
                },
            ));
            let cancel = CancellationToken::new();

            let mut tasks = Vec::new();
            for _ in 0..4 {
                let ring = ring.clone();
                let cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    for _ in 0..1000 {
                        ring.enqueue(Event::message_only("bench event payload", "bench"), &cancel)
                            .await
                            .unwrap();
                    }
                }));
            }
            for _ in 0..4 {
                let ring = ring.clone();
                let cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    for _ in 0..1000 {
                        ring.dequeue(&cancel).await.unwrap();
                    }
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_spsc_round_trip, bench_mpmc_contended);
criterion_main!(benches);
