// ai
//! 📦 Events — the one record type that rides the whole pipeline.
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. DATA CENTER — 3:47 AM
//!
//! 🌩️ A line of text is born in a container somewhere. It has no structure.
//! It has no timestamp. It has a stack trace from a language nobody on the
//! team admits to knowing. And then — the parser finds it, wraps it in an
//! `Event`, and suddenly it has a level, a message, a source, and a future.
//!
//! ✅ Every stage of this pipeline — parser, transforms, ring buffer, WAL,
//! workers, sinks, DLQ — speaks exactly one type: this one. There is no
//! second record type. There is no "internal representation". There is only
//! the `Event`, carried from ingest to egress like a responsible adult
//! carrying groceries in one trip.
//!
//! 🦆
//!
//! ---
//!
//! ⚠️ NOTE: When the singularity occurs, it will also be logged as an Event.
//! level = "fatal", probably.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 🏷️ A field value — the tagged sum that replaced the untyped map of yore.
///
/// Logs carry strings, numbers, bools, and the occasional nested object.
/// This enum carries all of them without resorting to `Box<dyn Any>`, which
/// is a phrase that should appear only in cautionary tales.
///
/// Serialized `untagged` so the on-disk/wire shape stays plain JSON —
/// `{"host":"h1","retries":3}` — and the legacy shape round-trips. Variant
/// order matters for deserialization: integers must be tried before floats,
/// or every `3` becomes `3.0` and a test somewhere starts crying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 🔢 A whole number. The honest kind.
    Int(i64),
    /// 🧮 A float. The kind with opinions about equality.
    Float(f64),
    /// ✅ True or false. No vibes-based third state.
    Bool(bool),
    /// 📦 Free text — the natural habitat of a log field.
    Str(String),
    /// 🪆 A nested map, because structured logging never stays flat for long.
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// 📄 Borrow the string inside, if this is a string. No coercion, no drama.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// 🔄 Convert a `serde_json::Value` into a field value.
    ///
    /// Nulls and arrays have no seat in the field model, so they ride along
    /// as their JSON text. Lossy on type, lossless on content.
    pub fn from_json(value: serde_json::Value) -> FieldValue {
        match value {
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else {
                    // -- 🧮 u64 overflow or a real float — either way it's f64 now
                    FieldValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => FieldValue::Str(s),
            serde_json::Value::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from_json(v)))
                    .collect(),
            ),
            // -- 🗑️ null/array: stringified, not dropped. Data loss is for other pipelines.
            other => FieldValue::Str(other.to_string()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// 🎯 The Event — one log record, one destiny, at-least-once guarantees.
///
/// This is the atomic unit of aggregation. Born in a parser, buffered in the
/// ring, optionally journaled to the WAL, delivered to sinks, and — if the
/// universe is unkind — retired to the dead-letter queue with full honors.
///
/// # Invariants 📜
/// - `timestamp` is never the zero instant — parse-time fallback is "now".
/// - `level` is one of the canonical five (`debug|info|warn|error|fatal`)
///   or the raw source string when normalization had nothing to say. Empty
///   means the parser found no level at all.
/// - `message` is never empty post-parse — it falls back to the raw line.
/// - `fields` never contains the keys already promoted to the top level.
///
/// `fields` is a `BTreeMap` so two identical parses serialize to identical
/// bytes. Determinism is a feature, not an accident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 🕰️ When it happened — source-declared, or ingest wall-clock if the
    /// source kept that information to itself.
    pub timestamp: DateTime<Utc>,
    /// 🚨 Normalized severity, or passthrough, or empty-for-unknown.
    #[serde(default)]
    pub level: String,
    /// 📦 The payload text. The reason any of this infrastructure exists.
    pub message: String,
    /// 🏷️ Opaque origin tag — a file path, a listener name, a vibe.
    pub source: String,
    /// 🗺️ Everything the parser extracted that didn't get promoted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldValue>,
    /// 📼 The verbatim original line, kept only when a downstream consumer
    /// actually wants the uncut footage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Event {
    /// 🏗️ The graceful-degradation constructor: a message-only event.
    ///
    /// When a line refuses to match anything, the parser does not fail —
    /// it wraps the raw line in this and moves on. Timestamp is now, level
    /// is empty, fields are empty. The line made it. That's what counts.
    pub fn message_only(line: &str, source: &str) -> Event {
        Event {
            timestamp: Utc::now(),
            level: String::new(),
            message: line.to_string(),
            source: source.to_string(),
            fields: BTreeMap::new(),
            raw: None,
        }
    }
}

// ============================================================
// 🚨 Level normalization — the severity Rosetta Stone
// ============================================================

/// The canonical five, in ascending order of how bad your evening is.
pub const LEVEL_DEBUG: &str = "debug";
pub const LEVEL_INFO: &str = "info";
pub const LEVEL_WARN: &str = "warn";
pub const LEVEL_ERROR: &str = "error";
pub const LEVEL_FATAL: &str = "fatal";

/// 🚨 Map the wild west of severity spellings onto the canonical five.
///
/// `WARNING`, `warn`, `Warn` — all the same amount of concern, all spelled
/// differently by different frameworks, because consensus is hard and log
/// libraries are many. Anything the table doesn't recognize passes through
/// unchanged — we normalize, we don't censor.
pub fn normalize_level(raw: &str) -> String {
    // -- 🧹 one lowercase pass, then a match — no allocation festival per alias
    match raw.to_ascii_lowercase().as_str() {
        "debug" | "trace" => LEVEL_DEBUG.to_string(),
        "info" | "information" => LEVEL_INFO.to_string(),
        "warn" | "warning" => LEVEL_WARN.to_string(),
        "error" | "err" => LEVEL_ERROR.to_string(),
        "fatal" | "critical" | "panic" => LEVEL_FATAL.to_string(),
        // -- 🤷 not in the table: passed through verbatim, per the contract
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 🧪 Property: every alias in the normalization table lands on canon.
    #[test]
    fn the_one_where_every_severity_dialect_speaks_canon() {
        let table = [
            ("DEBUG", "debug"),
            ("debug", "debug"),
            ("TRACE", "debug"),
            ("trace", "debug"),
            ("INFO", "info"),
            ("info", "info"),
            ("INFORMATION", "info"),
            ("information", "info"),
            ("WARN", "warn"),
            ("warn", "warn"),
            ("WARNING", "warn"),
            ("warning", "warn"),
            ("ERROR", "error"),
            ("error", "error"),
            ("ERR", "error"),
            ("err", "error"),
            ("FATAL", "fatal"),
            ("fatal", "fatal"),
            ("CRITICAL", "fatal"),
            ("critical", "fatal"),
            ("PANIC", "fatal"),
            ("panic", "fatal"),
        ];
        for (input, want) in table {
            assert_eq!(
                normalize_level(input),
                want,
                "severity '{input}' should normalize to '{want}'"
            );
        }
    }

    /// 🧪 Unknown severities pass through untouched — we don't editorialize.
    #[test]
    fn the_one_where_notice_stays_notice_because_we_are_not_the_police() {
        assert_eq!(normalize_level("NOTICE"), "NOTICE");
        assert_eq!(normalize_level("sev1"), "sev1");
        assert_eq!(normalize_level(""), "");
    }

    /// 🧪 FieldValue deserializes JSON with integers staying integers.
    /// Untagged variant order is load-bearing here. Do not alphabetize it.
    #[test]
    fn the_one_where_three_does_not_become_three_point_zero() {
        let fields: BTreeMap<String, FieldValue> =
            serde_json::from_str(r#"{"retries":3,"ratio":0.5,"ok":true,"host":"h1"}"#).unwrap();
        assert_eq!(fields["retries"], FieldValue::Int(3));
        assert_eq!(fields["ratio"], FieldValue::Float(0.5));
        assert_eq!(fields["ok"], FieldValue::Bool(true));
        assert_eq!(fields["host"], FieldValue::Str("h1".to_string()));
    }

    /// 🧪 Nested objects become nested maps; arrays ride along as JSON text.
    #[test]
    fn the_one_where_nesting_dolls_are_allowed_but_arrays_get_stringified() {
        let value = serde_json::json!({"ctx": {"pod": "a-1"}, "tags": ["x", "y"]});
        let serde_json::Value::Object(map) = value else {
            unreachable!()
        };
        let ctx = FieldValue::from_json(serde_json::Value::Object(map.clone()));
        match ctx {
            FieldValue::Map(m) => {
                assert_eq!(
                    m["ctx"],
                    FieldValue::Map(BTreeMap::from([(
                        "pod".to_string(),
                        FieldValue::Str("a-1".to_string())
                    )]))
                );
                assert_eq!(m["tags"], FieldValue::Str(r#"["x","y"]"#.to_string()));
            }
            other => panic!("expected a map, got {other:?}"),
        }
    }

    /// 🧪 Events round-trip through JSON byte-for-byte — the WAL depends on it.
    #[test]
    fn the_one_where_the_event_comes_back_from_json_unchanged() {
        let event = Event {
            timestamp: "2024-01-15T10:30:00Z".parse().unwrap(),
            level: "error".to_string(),
            message: "disk full".to_string(),
            source: "srv.log".to_string(),
            fields: BTreeMap::from([("host".to_string(), FieldValue::Str("h1".to_string()))]),
            raw: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        // -- 📏 determinism: serializing twice yields identical bytes
        assert_eq!(json, serde_json::to_string(&back).unwrap());
    }

    /// 🧪 The fallback constructor honors the post-parse invariants.
    #[test]
    fn the_one_where_garbage_still_gets_a_seat_on_the_bus() {
        let event = Event::message_only("garbage-line-no-brackets", "app.log");
        assert_eq!(event.message, "garbage-line-no-brackets");
        assert_eq!(event.source, "app.log");
        assert!(event.level.is_empty());
        assert!(event.fields.is_empty());
        assert!(event.timestamp.timestamp() > 0, "timestamp must be non-zero");
    }
}
