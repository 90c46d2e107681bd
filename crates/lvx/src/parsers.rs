// ai
//! 🔎 Parsers — same pattern as sinks and sources, because consistency is a feature 🎭🚀
//!
//! 🎬 COLD OPEN — INT. INGEST PATH — A RAW LINE ARRIVES, UNSTRUCTURED AND UNASHAMED
//!
//! Four parser variants, one contract. The object parser reads JSON lines.
//! The regex parser reads whatever your capture groups can catch. The pattern
//! parser expands `%{NAME}` templates into regexes so you don't have to
//! hand-write the syslog grammar at 2am. The multiline parser glues stack
//! traces back together like a patient archivist.
//!
//! ## Architecture — trait → concrete impls → enum dispatch 📐
//!
//! ```text
//!   ┌──────────────────────┐
//!   │ trait Parser         │
//!   │   fn parse()         │
//!   │   fn flush()         │
//!   └────────┬─────────────┘
//!            │
//!   ┌────────┴─────────────┐
//!   │ ObjectParser         │
//!   │ RegexParser          │
//!   │ PatternParser        │
//!   │ MultilineParser      │
//!   └────────┬─────────────┘
//!            │
//!   ┌────────┴─────────────┐
//!   │ enum ParserBackend   │
//!   │   impl Parser        │
//!   │   match dispatch     │
//!   └──────────────────────┘
//! ```
//!
//! ## Contract 📜
//! - Input: one line + a source tag. Output: at most one event, or the one
//!   and only parse error (structurally empty input).
//! - A line that doesn't match the parser's shape MUST NOT fail — it becomes
//!   a message-only event. Graceful degradation is the whole personality.
//! - Named captures / object keys land in `fields`; the configured
//!   time/level/message fields are promoted to the top level and REMOVED
//!   from `fields`. No duplication. One home per datum.
//! - Static fields from config merge last and may overwrite. Operator intent
//!   beats extracted data. The operator pays the pager bill.
//! - Multiline is the only variant that returns `None` from `parse()` (line
//!   absorbed) and the only one with a non-trivial `flush()`.
//!
//! ⚠️ The singularity will be ingested by the pattern parser. It will match
//! `%{GREEDYDATA}`. Everything matches `%{GREEDYDATA}`. 🦆

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;

use crate::errors::ParseError;
use crate::events::{normalize_level, Event, FieldValue};

pub(crate) mod multiline;
pub(crate) mod object;
pub(crate) mod pattern;
pub(crate) mod regex;
pub(crate) mod timestamp;

pub use self::multiline::{MultilineParser, MultilineParserConfig};
pub use self::object::{ObjectParser, ObjectParserConfig};
pub use self::pattern::{PatternParser, PatternParserConfig};
// -- 🔎 `self::` is load-bearing: a bare `use regex::...` here would be
// -- ambiguous between our submodule and the regex crate. Uniform paths giveth,
// -- uniform paths taketh away.
pub use self::regex::{RegexParser, RegexParserConfig};

// ============================================================
// 🔧 CommonParserConfig — the knobs every variant shares
// ============================================================

/// ⚙️ Promotion + enrichment knobs shared by all four parser variants.
///
/// 🧠 Knowledge graph: same role as `CommonSinkConfig` plays for sinks —
/// one flattened struct embedded in each variant's config so the TOML stays
/// flat and the promotion logic stays in exactly one place.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonParserConfig {
    /// 🕰️ Which extracted field holds the timestamp.
    #[serde(default)]
    pub time_field: Option<String>,
    /// 🚨 Which extracted field holds the severity.
    #[serde(default)]
    pub level_field: Option<String>,
    /// 📦 Which extracted field holds the message body.
    #[serde(default)]
    pub message_field: Option<String>,
    /// 🕰️ A chrono format string tried before the standard list.
    #[serde(default)]
    pub time_format: Option<String>,
    /// 🏷️ Operator-supplied fields, merged last, allowed to overwrite.
    #[serde(default)]
    pub static_fields: BTreeMap<String, String>,
    /// 📼 Keep the verbatim input line on the event.
    #[serde(default)]
    pub keep_raw: bool,
}

// ============================================================
// 📜 The Parser trait + the dispatching enum
// ============================================================

/// 🔎 Parser — one line in, at most one event out, exactly one way to fail.
///
/// `&mut self` because the multiline variant carries an accumulator between
/// calls. The other three are stateless and simply don't care.
pub trait Parser: std::fmt::Debug {
    /// 📄 Parse one line. `Ok(None)` means "absorbed, keep feeding me"
    /// (multiline only). `Err` means the line was structurally empty.
    fn parse(&mut self, line: &str, source: &str) -> Result<Option<Event>, ParseError>;

    /// 🚿 Drain whatever is pending (multiline tail at EOF). Default: nothing.
    fn flush(&mut self) -> Option<Event> {
        None
    }

    /// ⏳ Flush a pending accumulation that has gone idle past its timeout.
    /// Called opportunistically by the ingest loop. Default: nothing pending.
    fn flush_idle(&mut self) -> Option<Event> {
        None
    }
}

/// 🎭 The many faces of a Parser — a polymorphic casting call for line formats.
///
/// Mirrors `SinkBackend` / `SourceBackend` on the I/O ends of the pipeline.
/// The enum dispatches via match; the ingest worker never knows (or cares)
/// which grammar is doing the reading.
#[derive(Debug)]
pub enum ParserBackend {
    Object(ObjectParser),
    Regex(RegexParser),
    Pattern(PatternParser),
    Multiline(MultilineParser),
}

/// 🔧 Parser configuration — `type` selects the variant, the rest is flattened.
///
/// ```toml
/// [parser]
/// type = "regex"
/// pattern = '^(?P<ts>\S+)\s+\[(?P<lvl>\w+)\]\s+(?P<msg>.*)$'
/// time_field = "ts"
/// level_field = "lvl"
/// message_field = "msg"
/// ```
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParserConfig {
    /// 📦 JSON-object lines — self-describing, the easy life.
    Object(ObjectParserConfig),
    /// 🔎 A regex with named capture groups.
    Regex(RegexParserConfig),
    /// 📚 A `%{NAME}` template expanded against the pattern library.
    Pattern(PatternParserConfig),
    /// 🧵 Continuation-line gluing for stack traces and their friends.
    Multiline(MultilineParserConfig),
}

impl ParserBackend {
    /// 🔧 Resolve a parser from config. Same approach as the sink/source
    /// resolvers in `lib.rs`: match the config enum, construct the concrete
    /// type, wrap it in the dispatching enum.
    ///
    /// Construction is where bad regexes and unknown `%{NAMES}` fail —
    /// loudly, at startup, not silently in the hot path.
    pub fn from_config(config: &ParserConfig) -> Result<ParserBackend> {
        Ok(match config {
            ParserConfig::Object(cfg) => ParserBackend::Object(ObjectParser::new(cfg.clone())),
            ParserConfig::Regex(cfg) => ParserBackend::Regex(RegexParser::new(cfg.clone())?),
            ParserConfig::Pattern(cfg) => ParserBackend::Pattern(PatternParser::new(cfg.clone())?),
            ParserConfig::Multiline(cfg) => {
                ParserBackend::Multiline(MultilineParser::new(cfg.clone())?)
            }
        })
    }
}

impl Parser for ParserBackend {
    #[inline]
    fn parse(&mut self, line: &str, source: &str) -> Result<Option<Event>, ParseError> {
        match self {
            ParserBackend::Object(p) => p.parse(line, source),
            ParserBackend::Regex(p) => p.parse(line, source),
            ParserBackend::Pattern(p) => p.parse(line, source),
            ParserBackend::Multiline(p) => p.parse(line, source),
        }
    }

    fn flush(&mut self) -> Option<Event> {
        match self {
            ParserBackend::Object(p) => p.flush(),
            ParserBackend::Regex(p) => p.flush(),
            ParserBackend::Pattern(p) => p.flush(),
            ParserBackend::Multiline(p) => p.flush(),
        }
    }

    fn flush_idle(&mut self) -> Option<Event> {
        match self {
            ParserBackend::Object(p) => p.flush_idle(),
            ParserBackend::Regex(p) => p.flush_idle(),
            ParserBackend::Pattern(p) => p.flush_idle(),
            ParserBackend::Multiline(p) => p.flush_idle(),
        }
    }
}

// ============================================================
// 🏗️ Shared event assembly — extraction is per-variant, promotion is not
// ============================================================

/// 🏗️ Assemble an `Event` from extracted fields + the common config.
///
/// This is the one place where promotion happens, for every variant:
/// 1. time field → parsed (configured format, then the standard list),
///    wall-clock fallback. Removed from `fields`.
/// 2. level field → normalized through the severity table. Removed.
/// 3. message field → top-level message; raw line if absent/empty. Removed.
/// 4. static fields merge last, overwriting on collision.
///
/// He who promotes in four places, debugs four promotion bugs. — Ancient proverb 📜
pub(crate) fn assemble_event(
    line: &str,
    source: &str,
    mut fields: BTreeMap<String, FieldValue>,
    common: &CommonParserConfig,
) -> Event {
    // 🕰️ 1. timestamp promotion
    let timestamp = common
        .time_field
        .as_deref()
        .and_then(|key| fields.remove(key))
        .and_then(|value| timestamp::parse_field(&value, common.time_format.as_deref()))
        .unwrap_or_else(Utc::now);

    // 🚨 2. level promotion — non-strings get stringified, then normalized
    let level = match common
        .level_field
        .as_deref()
        .and_then(|key| fields.remove(key))
    {
        Some(FieldValue::Str(s)) => normalize_level(&s),
        Some(FieldValue::Int(i)) => normalize_level(&i.to_string()),
        Some(other) => normalize_level(&field_to_text(&other)),
        None => String::new(),
    };

    // 📦 3. message promotion — the raw line is the fallback of last resort
    let message = match common
        .message_field
        .as_deref()
        .and_then(|key| fields.remove(key))
    {
        Some(FieldValue::Str(s)) if !s.is_empty() => s,
        Some(FieldValue::Str(_)) | None => line.to_string(),
        Some(other) => field_to_text(&other),
    };

    // 🏷️ 4. operator statics merge last — explicit intent wins
    for (key, value) in &common.static_fields {
        fields.insert(key.clone(), FieldValue::Str(value.clone()));
    }

    Event {
        timestamp,
        level,
        message,
        source: source.to_string(),
        fields,
        raw: common.keep_raw.then(|| line.to_string()),
    }
}

/// 📄 Render a non-string field value as text, for promotion into a
/// string-typed slot. JSON representation, no surprises.
fn field_to_text(value: &FieldValue) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// 📏 The shared empty-input check — the only terminal parser error.
pub(crate) fn reject_empty(line: &str) -> Result<(), ParseError> {
    if line.trim().is_empty() {
        return Err(ParseError::EmptyInput);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_with(time: &str, level: &str, msg: &str) -> CommonParserConfig {
        CommonParserConfig {
            time_field: Some(time.to_string()),
            level_field: Some(level.to_string()),
            message_field: Some(msg.to_string()),
            ..CommonParserConfig::default()
        }
    }

    /// 🧪 Promotion removes the promoted keys — no duplication, one home per datum.
    #[test]
    fn the_one_where_promoted_fields_pack_up_and_leave_the_map() {
        let fields = BTreeMap::from([
            ("ts".to_string(), FieldValue::from("2024-01-15T10:30:00Z")),
            ("lvl".to_string(), FieldValue::from("ERROR")),
            ("msg".to_string(), FieldValue::from("disk full")),
            ("host".to_string(), FieldValue::from("h1")),
        ]);
        let event = assemble_event("raw", "srv.log", fields, &common_with("ts", "lvl", "msg"));
        assert_eq!(event.level, "error");
        assert_eq!(event.message, "disk full");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-15T10:30:00+00:00");
        assert!(!event.fields.contains_key("ts"));
        assert!(!event.fields.contains_key("lvl"));
        assert!(!event.fields.contains_key("msg"));
        assert_eq!(event.fields["host"], FieldValue::from("h1"));
    }

    /// 🧪 Static fields merge last and overwrite — the operator outranks the data.
    #[test]
    fn the_one_where_the_operator_gets_the_final_word() {
        let mut common = CommonParserConfig::default();
        common
            .static_fields
            .insert("env".to_string(), "prod".to_string());
        common
            .static_fields
            .insert("host".to_string(), "override".to_string());
        let fields = BTreeMap::from([("host".to_string(), FieldValue::from("h1"))]);
        let event = assemble_event("raw", "s", fields, &common);
        assert_eq!(event.fields["env"], FieldValue::from("prod"));
        assert_eq!(event.fields["host"], FieldValue::from("override"));
    }

    /// 🧪 Missing message field → the raw line steps in. Never empty post-parse.
    #[test]
    fn the_one_where_the_raw_line_understudies_for_the_message() {
        let event = assemble_event(
            "the original line",
            "s",
            BTreeMap::new(),
            &CommonParserConfig::default(),
        );
        assert_eq!(event.message, "the original line");
        assert!(event.level.is_empty());
    }

    /// 🧪 The one-and-only parser error: structurally empty input.
    #[test]
    fn the_one_where_whitespace_is_not_a_log_line() {
        assert_eq!(reject_empty("   \t "), Err(ParseError::EmptyInput));
        assert_eq!(reject_empty(""), Err(ParseError::EmptyInput));
        assert!(reject_empty("x").is_ok());
    }
}
