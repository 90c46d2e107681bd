// ai
//! 📡 HttpSink — NDJSON over the wire, optionally squeezed through gzip.
//!
//! One POST per send (or per batch). The HTTP status does the triage for the
//! retry classifier: network trouble and 5xx/429 are Retryable (the server
//! is having a day), other 4xx are Terminal (WE are having a day, and
//! retrying our own bad request is just scheduling more embarrassment).
//!
//! 🫁 gzip is optional and happens in memory before the request goes out —
//! bandwidth is expensive, bytes are squishy, CPUs are bored.
//!
//! Knock knock. Who's there? HTTP POST. HTTP POST who?
//! HTTP POST your NDJSON and hope the endpoint's in a good mood. 🦆

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::SinkError;
use crate::events::Event;
use crate::sinks::{CommonSinkConfig, Sink, SinkMetrics};

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// 🔧 HTTP sink config.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpSinkConfig {
    /// 📡 Where to POST the bodies. The documents. Where to POST the documents.
    pub url: String,
    /// 🫁 Compress request bodies and say so in Content-Encoding.
    #[serde(default)]
    pub gzip: bool,
    /// 🔒 Basic auth, if the endpoint has a bouncer.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// ⏳ Whole-request deadline.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(flatten, default)]
    pub common: CommonSinkConfig,
}

/// 📡 POSTs NDJSON payloads to one endpoint, reusing one client.
pub struct HttpSink {
    client: reqwest::Client,
    config: HttpSinkConfig,
    name: String,
    metrics: SinkMetrics,
}

impl std::fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSink")
            .field("name", &self.name)
            .field("url", &self.config.url)
            .field("gzip", &self.config.gzip)
            .finish()
    }
}

impl HttpSink {
    /// 🚀 Build the client — 10s to handshake, `timeout` for the whole
    /// request. If the endpoint can't shake hands in 10 seconds it is not
    /// having a good time, and neither are we.
    pub fn new(config: HttpSinkConfig) -> Result<HttpSink> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()
            .context(
                "💀 The HTTP client refused to be born. Probably a missing TLS \
                 cert or a cursed system OpenSSL. Either way: tragic.",
            )?;
        let name = config
            .common
            .name
            .clone()
            .unwrap_or_else(|| format!("http:{}", config.url));
        Ok(HttpSink {
            client,
            config,
            name,
            metrics: SinkMetrics::default(),
        })
    }

    /// 📄 Events → NDJSON body.
    fn encode(events: &[Event]) -> Result<Vec<u8>, SinkError> {
        let mut body = Vec::with_capacity(events.len() * 256);
        for event in events {
            let line = serde_json::to_vec(event)
                .map_err(|err| SinkError::terminal(format!("event refused to serialize: {err}")))?;
            body.extend_from_slice(&line);
            body.push(b'\n');
        }
        Ok(body)
    }

    /// 📡 The one POST path. Status codes do the triage.
    async fn post(
        &mut self,
        cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<(), SinkError> {
        let mut body = HttpSink::encode(events)?;

        let mut request = self.client.post(&self.config.url);
        if self.config.gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&body)
                .and_then(|_| encoder.finish())
                .map(|compressed| body = compressed)
                .map_err(|err| SinkError::terminal(format!("gzip of payload failed: {err}")))?;
            request = request.header("Content-Encoding", "gzip");
        }
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }
        let request = request
            .header("Content-Type", "application/x-ndjson")
            .body(body.clone());

        debug!(
            "📡 POSTing {} event(s), {} bytes → '{}'",
            events.len(),
            body.len(),
            self.name
        );

        let response = tokio::select! {
            response = request.send() => response,
            _ = cancel.cancelled() => return Err(SinkError::cancelled()),
        };

        match response {
            // 🌐 the wire itself failed — the server may be fine, try again
            Err(err) => Err(SinkError::retryable(format!("http request failed: {err}"))),
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    self.metrics.sent += events.len() as u64;
                    self.metrics.bytes += body.len() as u64;
                    Ok(())
                } else if status.is_server_error() || status.as_u16() == 429 {
                    // 🔥 their problem (or their rate limiter) — retryable
                    Err(SinkError::retryable(format!(
                        "http sink returned {status}"
                    )))
                } else {
                    // 🧱 our problem — no amount of retrying fixes a 400
                    Err(SinkError::terminal(format!("http sink returned {status}")))
                }
            }
        }
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&mut self, cancel: &CancellationToken, event: &Event) -> Result<(), SinkError> {
        let result = self.post(cancel, std::slice::from_ref(event)).await;
        if result.is_err() {
            self.metrics.failed += 1;
        }
        result
    }

    async fn send_batch(
        &mut self,
        cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<(), SinkError> {
        let result = self.post(cancel, events).await;
        match &result {
            Ok(()) => self.metrics.batches += 1,
            Err(_) => self.metrics.failed += events.len() as u64,
        }
        result
    }

    /// 🗑️ Nothing buffered here — the connection pool just says goodbye.
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
