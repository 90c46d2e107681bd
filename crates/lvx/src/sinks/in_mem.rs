// ai
//! 🧪 InMemorySink — the sink that never forgets (until the process exits).
//!
//! Receives events and hoards them in a shared Vec wrapped in a Mutex
//! wrapped in an Arc. It's types all the way down. Clone-able because tests
//! need to peek inside after handing `self` off to the pipeline — the `Arc`
//! means everyone shares the same Vec. Communist data, but in a good way.
//!
//! It can also be told to FAIL on command — always-Retryable, always-
//! Terminal, your pick — which makes it the designated crash-test dummy for
//! the retry runner, the breaker, and the DLQ. Somebody has to do it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{SinkError, SinkErrorKind};
use crate::events::Event;
use crate::sinks::{Sink, SinkMetrics};

/// 🧪 In-memory capture sink, with an optional scripted failure mode.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    /// 🔒 The vault. The evidence locker. Every event that "shipped".
    pub received: Arc<tokio::sync::Mutex<Vec<Event>>>,
    name: String,
    /// 💥 When set, every send fails with this kind. Tests only, by honor code.
    fail_with: Option<SinkErrorKind>,
    metrics: SinkMetrics,
}

impl InMemorySink {
    pub fn new(name: Option<String>) -> InMemorySink {
        InMemorySink {
            received: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            name: name.unwrap_or_else(|| "in_memory".to_string()),
            fail_with: None,
            metrics: SinkMetrics::default(),
        }
    }

    /// 💥 Scripted sabotage: every subsequent send fails with `kind`.
    pub fn fail_with(mut self, kind: SinkErrorKind) -> InMemorySink {
        self.fail_with = Some(kind);
        self
    }

    /// 🔧 Stop failing. The sink forgives, the metrics don't forget.
    pub fn heal(&mut self) {
        self.fail_with = None;
    }

    fn scripted_failure(&mut self, count: u64) -> Option<SinkError> {
        let kind = self.fail_with?;
        self.metrics.failed += count;
        Some(SinkError {
            kind,
            message: "scripted in-memory failure".to_string(),
        })
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn send(&mut self, _cancel: &CancellationToken, event: &Event) -> Result<(), SinkError> {
        if let Some(err) = self.scripted_failure(1) {
            return Err(err);
        }
        // 🔒 The Mutex is load-bearing. Do not remove. I know it looks optional.
        self.received.lock().await.push(event.clone());
        self.metrics.sent += 1;
        Ok(())
    }

    async fn send_batch(
        &mut self,
        _cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<(), SinkError> {
        if let Some(err) = self.scripted_failure(events.len() as u64) {
            return Err(err);
        }
        self.received.lock().await.extend(events.iter().cloned());
        self.metrics.sent += events.len() as u64;
        self.metrics.batches += 1;
        Ok(())
    }

    /// 🗑️ Closes with all the ceremony of closing a browser tab. We live in
    /// RAM; when this drops, the OS reclaims everything faster than HR
    /// reclaims your badge on your last day.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> SinkMetrics {
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_evidence_locker_keeps_everything() {
        let cancel = CancellationToken::new();
        let mut sink = InMemorySink::new(None);
        sink.send(&cancel, &Event::message_only("a", "t")).await.unwrap();
        sink.send_batch(
            &cancel,
            &[Event::message_only("b", "t"), Event::message_only("c", "t")],
        )
        .await
        .unwrap();

        let received = sink.received.lock().await;
        let messages: Vec<&str> = received.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["a", "b", "c"]);
        assert_eq!(sink.metrics().sent, 3);
    }

    #[tokio::test]
    async fn the_one_where_the_crash_test_dummy_crashes_on_cue() {
        let cancel = CancellationToken::new();
        let mut sink = InMemorySink::new(None).fail_with(SinkErrorKind::Retryable);
        let err = sink.send(&cancel, &Event::message_only("a", "t")).await.unwrap_err();
        assert_eq!(err.kind, SinkErrorKind::Retryable);
        assert!(sink.received.lock().await.is_empty());

        sink.heal();
        sink.send(&cancel, &Event::message_only("a", "t")).await.unwrap();
        assert_eq!(sink.received.lock().await.len(), 1);
    }
}
