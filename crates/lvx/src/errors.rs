// ai
//! 💀 Errors — the taxonomy of everything that can go wrong, and will.
//!
//! 🎬 *[a montage: a full buffer, a torn WAL record, a sink returning 503,
//! a breaker slamming shut, a DLQ politely declining. sad trombone.]*
//!
//! Every failure in this pipeline has a name and a type. No string matching,
//! no `error.to_string().contains("connection")` folklore — the sink tells
//! you its error kind, the buffer tells you full-vs-closed, the retry runner
//! tells you it gave up. Classification is data, not archaeology.
//!
//! 🧠 Knowledge graph: typed enums here (thiserror), `anyhow::Context` at the
//! assembly/CLI boundary. The split is deliberate — the engine needs to
//! *branch* on errors, the operator just needs to *read* them.
//!
//! 🦆 (the duck has seen every one of these in production. the duck endures.)

use thiserror::Error;

/// 📄 The only terminal parser error: structurally empty input.
///
/// Malformed content is NOT an error — it degrades to a message-only event.
/// An empty line, though, carries no information worth an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty input line")]
    EmptyInput,
}

/// 📬 Ring-buffer failures — full, closed, or told to stop waiting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// ⏳ Block policy waited out its deadline. Drop/Sample never raise this.
    #[error("buffer full: block policy timed out waiting for a free slot")]
    Full,
    /// 🔒 The buffer was closed — no more enqueues, drain what remains.
    #[error("buffer closed")]
    Closed,
    /// 🛑 A cancellation token fired while we were waiting.
    #[error("buffer wait cancelled")]
    Cancelled,
}

/// 📼 WAL failures. I/O and encoding surface to the caller; a record that
/// fails to *decode* never does — it bumps a corruption counter and the
/// reader moves on.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("wal is closed")]
    Closed,
}

/// 🚦 How bad is a sink failure, really? The sink itself gets to say.
///
/// This kind drives the retry classifier: `Retryable` goes around again,
/// `Terminal` goes straight to the DLQ, `Cancelled` goes nowhere at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkErrorKind {
    /// 🔁 Transient — timeouts, 5xx, "the cluster is thinking about it".
    Retryable,
    /// 🧱 Permanent — bad payload, 4xx, "no amount of retrying fixes this".
    Terminal,
    /// 🛑 Cooperative cancellation — not a failure, just a shutdown.
    Cancelled,
}

/// 💀 A sink call failure, with its classification riding along as data.
#[derive(Debug, Clone, Error)]
#[error("sink error ({kind:?}): {message}")]
pub struct SinkError {
    pub kind: SinkErrorKind,
    pub message: String,
}

impl SinkError {
    pub fn retryable(message: impl Into<String>) -> SinkError {
        SinkError {
            kind: SinkErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> SinkError {
        SinkError {
            kind: SinkErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn cancelled() -> SinkError {
        SinkError {
            kind: SinkErrorKind::Cancelled,
            message: "cancelled".to_string(),
        }
    }

    /// 🔁 Should the retry runner go around again for this one?
    pub fn is_retryable(&self) -> bool {
        self.kind == SinkErrorKind::Retryable
    }
}

/// 🚧 Circuit-breaker refusals — the breaker never explains, it just declines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerError {
    /// 🔴 Open state: fail fast, come back after the timeout.
    #[error("circuit breaker is open")]
    Open,
    /// 🟡 Half-open and already probing at capacity.
    #[error("circuit breaker is half-open and at its probe limit")]
    TooManyRequests,
}

/// 📦 The end-to-end delivery verdict for one event at one sink.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// 🔁💀 The retry runner gave up. Wraps the last sink error it saw.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: SinkError },
    /// 🔴 The breaker refused the call outright.
    #[error("circuit open for sink '{0}'")]
    CircuitOpen(String),
    /// 🧱 The sink said Terminal on the first try. No retries were owed.
    #[error("terminal sink failure: {0}")]
    Terminal(SinkError),
    /// 🛑 Shutdown mid-delivery. Nobody's fault.
    #[error("delivery cancelled")]
    Cancelled,
}

/// 🪦 Dead-letter queue refusals. When the queue of last resort says no,
/// the event is dropped and a counter remembers it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DlqError {
    #[error("dead-letter queue is full")]
    Full,
    #[error("dead-letter queue is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 🧪 Classification is data: the classifier branches on `kind`, not text.
    #[test]
    fn the_one_where_errors_carry_their_own_triage_tag() {
        assert!(SinkError::retryable("503").is_retryable());
        assert!(!SinkError::terminal("400").is_retryable());
        assert!(!SinkError::cancelled().is_retryable());
        assert_eq!(SinkError::cancelled().kind, SinkErrorKind::Cancelled);
    }

    /// 🧪 Display strings stay readable — operators grep these at 3am.
    #[test]
    fn the_one_where_the_error_message_is_legible_at_three_am() {
        let err = DeliveryError::RetryExhausted {
            attempts: 3,
            last: SinkError::retryable("connection refused"),
        };
        let text = err.to_string();
        assert!(text.contains("3 attempts"), "got: {text}");
        assert!(text.contains("connection refused"), "got: {text}");
    }
}
