// ai
//! 🧵 The multiline parser — reuniting stack traces with their families.
//!
//! 🎬 *[a Java exception enters, forty lines tall. each line alone is
//! meaningless. together, they are a story. a sad story, but a story.]*
//!
//! ## The state machine 📜
//!
//! ```text
//!   Idle ──line──▶ Accumulating(event, last_seen)
//!     ▲                   │
//!     │    non-continuation line: flush, restart with the new line
//!     │    continuation line: append to message, stay
//!     │    idle timeout / EOF flush: emit what we have
//!     └───────────────────┘
//! ```
//!
//! - `pattern` decides what a continuation looks like; `negate` flips it.
//!   `^\s` with negate=false: indented lines continue. `^\d{4}-` with
//!   negate=true: anything NOT starting like a timestamp continues.
//! - A hard `max_lines` cap bounds the accumulator — a log that never stops
//!   continuing is a memory leak with a narrative arc.
//! - An idle `timeout` flushes an accumulator the source has gone quiet on,
//!   so the last stack trace of the night doesn't wait for dawn.
//!
//! 🦆 (the duck holds the accumulated lines. gently. like bread.)

use std::time::{Duration, Instant};

use ::regex::Regex;
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::ParseError;
use crate::events::Event;
use crate::parsers::{assemble_event, reject_empty, CommonParserConfig, Parser};

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

// 🔢 500: deep enough for any stack trace written by humans.
// Stack traces written by recursion bugs get truncated, which is a mercy.
fn default_max_lines() -> usize {
    500
}

/// 🔧 Multiline parser config.
#[derive(Debug, Deserialize, Clone)]
pub struct MultilineParserConfig {
    /// 🔎 The continuation pattern.
    pub pattern: String,
    /// 🔄 Flip the match: lines NOT matching the pattern are continuations.
    #[serde(default)]
    pub negate: bool,
    /// ⏳ Idle time before a pending accumulation is force-flushed.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// 📏 Hard cap on accumulated lines per event.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(flatten, default)]
    pub common: CommonParserConfig,
}

/// 🧵 The accumulator's two moods.
#[derive(Debug)]
enum State {
    /// 💤 Nothing pending. The next line starts a fresh event.
    Idle,
    /// 📦 An event under construction, waiting for its continuation lines.
    Accumulating {
        event: Event,
        lines: usize,
        last_line_at: Instant,
    },
}

/// 🧵 Accumulates continuation lines into single events.
///
/// The only parser variant with state, the only one that returns `None`
/// from `parse()` (line absorbed), and the only one whose `flush()` does
/// anything. Event assembly (promotion, statics, timestamp fallback)
/// happens on the FIRST line; continuations append to the message only.
#[derive(Debug)]
pub struct MultilineParser {
    regex: Regex,
    config: MultilineParserConfig,
    state: State,
}

impl MultilineParser {
    pub fn new(config: MultilineParserConfig) -> Result<MultilineParser> {
        let regex = Regex::new(&config.pattern).with_context(|| {
            format!(
                "💀 The multiline continuation pattern '{}' did not compile. \
                 Can't glue lines together with a broken glue gun.",
                config.pattern
            )
        })?;
        Ok(MultilineParser {
            regex,
            config,
            state: State::Idle,
        })
    }

    /// 🔎 Is this line a continuation of the previous one?
    fn is_continuation(&self, line: &str) -> bool {
        self.regex.is_match(line) != self.config.negate
    }

    /// 🏗️ Start a fresh accumulation from a first line.
    fn start(&mut self, line: &str, source: &str) {
        self.state = State::Accumulating {
            event: assemble_event(line, source, Default::default(), &self.config.common),
            lines: 1,
            last_line_at: Instant::now(),
        };
    }

    /// 🚿 Take whatever is pending, leaving Idle behind.
    fn take_pending(&mut self) -> Option<Event> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::Accumulating { event, .. } => Some(event),
        }
    }
}

impl Parser for MultilineParser {
    fn parse(&mut self, line: &str, source: &str) -> Result<Option<Event>, ParseError> {
        reject_empty(line)?;

        let continuation = self.is_continuation(line);
        match std::mem::replace(&mut self.state, State::Idle) {
            // 💤 first line after a flush: everything starts an accumulation,
            // continuation-shaped or not. There is nothing to continue *from*.
            State::Idle => {
                self.start(line, source);
                Ok(None)
            }
            State::Accumulating {
                mut event, lines, ..
            } => {
                if continuation && lines < self.config.max_lines {
                    // 🧵 continuation: append and keep waiting
                    event.message.push('\n');
                    event.message.push_str(line);
                    if let Some(raw) = event.raw.as_mut() {
                        raw.push('\n');
                        raw.push_str(line);
                    }
                    self.state = State::Accumulating {
                        event,
                        lines: lines + 1,
                        last_line_at: Instant::now(),
                    };
                    Ok(None)
                } else {
                    // 🚿 record boundary (or the cap said enough): flush what we
                    // have, restart with the line in hand
                    self.start(line, source);
                    Ok(Some(event))
                }
            }
        }
    }

    fn flush(&mut self) -> Option<Event> {
        self.take_pending()
    }

    fn flush_idle(&mut self) -> Option<Event> {
        match &self.state {
            State::Accumulating { last_line_at, .. }
                if last_line_at.elapsed() >= self.config.timeout =>
            {
                self.take_pending()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(pattern: &str, negate: bool, max_lines: usize) -> MultilineParser {
        MultilineParser::new(MultilineParserConfig {
            pattern: pattern.to_string(),
            negate,
            timeout: Duration::from_millis(20),
            max_lines,
            common: CommonParserConfig::default(),
        })
        .unwrap()
    }

    /// 🧪 The classic: indented lines glue onto the line above them.
    #[test]
    fn the_one_where_the_stack_trace_gets_its_family_back() {
        let mut p = parser(r"^\s", false, 500);
        assert!(p.parse("NullPointerException: oh no", "app").unwrap().is_none());
        assert!(p.parse("    at com.example.Foo.bar(Foo.java:42)", "app").unwrap().is_none());
        assert!(p.parse("    at com.example.Main.main(Main.java:7)", "app").unwrap().is_none());

        // next record boundary flushes the accumulated one
        let flushed = p.parse("INFO next request", "app").unwrap().unwrap();
        assert_eq!(
            flushed.message,
            "NullPointerException: oh no\n    at com.example.Foo.bar(Foo.java:42)\n    at com.example.Main.main(Main.java:7)"
        );

        // EOF flush drains the trailing record
        let tail = p.flush().unwrap();
        assert_eq!(tail.message, "INFO next request");
        assert!(p.flush().is_none(), "flush is idempotent on Idle");
    }

    /// 🧪 Negate mode: lines that do NOT look like a record start continue.
    #[test]
    fn the_one_where_negation_turns_the_pattern_inside_out() {
        let mut p = parser(r"^\d{4}-", true, 500);
        assert!(p.parse("2024-01-15 something happened", "s").unwrap().is_none());
        assert!(p.parse("  detail: it was bad", "s").unwrap().is_none());
        let flushed = p.parse("2024-01-16 new day new record", "s").unwrap().unwrap();
        assert_eq!(flushed.message, "2024-01-15 something happened\n  detail: it was bad");
    }

    /// 🧪 The hard cap: line max_lines+1 forces a flush even mid-continuation.
    #[test]
    fn the_one_where_the_recursion_bug_meets_the_bouncer() {
        let mut p = parser(r"^\s", false, 2);
        assert!(p.parse("start", "s").unwrap().is_none());
        assert!(p.parse("  one", "s").unwrap().is_none());
        // cap is 2 — this continuation can't join, so the pending event flushes
        let flushed = p.parse("  two", "s").unwrap().unwrap();
        assert_eq!(flushed.message, "start\n  one");
        // and the overflow line started a new accumulation
        assert_eq!(p.flush().unwrap().message, "  two");
    }

    /// 🧪 Idle timeout: a quiet accumulator gets evicted by flush_idle.
    #[test]
    fn the_one_where_the_last_record_of_the_night_goes_home() {
        let mut p = parser(r"^\s", false, 500);
        assert!(p.parse("lonely record", "s").unwrap().is_none());
        assert!(p.flush_idle().is_none(), "not idle long enough yet");
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(p.flush_idle().unwrap().message, "lonely record");
        assert!(p.flush_idle().is_none());
    }
}
