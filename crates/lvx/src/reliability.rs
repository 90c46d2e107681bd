// ai
//! 🛡️ Reliability — the layer that stands between "the sink hiccuped" and
//! "we lost your event".
//!
//! Three mechanisms, stacked in a deliberate order around every sink call:
//!
//! ```text
//!   retry runner ──▶ circuit breaker ──▶ sink
//!        │                                │
//!        └───────── dead-letter queue ◀───┘   (only on abandonment)
//! ```
//!
//! The ordering is the point: the breaker sees only calls the retry logic
//! has approved, and the DLQ receives only events the breaker has declined
//! to keep retrying. Retry handles the transient, the breaker handles the
//! systemic, the DLQ handles the terminal. Each layer has exactly one job,
//! like a well-run kitchen. 🦆
//!
//! The envelope that actually stacks these lives with the sink router —
//! this module provides the three mechanisms themselves.

pub(crate) mod breaker;
pub(crate) mod dlq;
pub(crate) mod retry;

pub use breaker::{BreakerConfig, BreakerMetrics, BreakerRegistry, BreakerState, CircuitBreaker, Counts};
pub use dlq::{DeadLetterQueue, DlqConfig, DlqEntry, DlqMetrics};
pub use retry::{RetryFailure, RetryPolicy};
