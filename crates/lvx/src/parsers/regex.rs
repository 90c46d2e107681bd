// ai
//! 🔎 The regex parser — named capture groups as a log schema.
//!
//! You bring the regex, we bring the promotion machinery. Named groups land
//! in `fields`, the configured time/level/message groups get promoted, and a
//! line that doesn't match gets the message-only treatment instead of an
//! error, because the regex being wrong at 3am is a *given*, not an edge case.
//!
//! 🦆 (the duck once wrote `.*` and called it a parser. the duck was promoted.)

use ::regex::Regex;
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::ParseError;
use crate::events::{Event, FieldValue};
use crate::parsers::{assemble_event, reject_empty, CommonParserConfig, Parser};

/// 🔧 Regex parser config — one pattern with named groups, plus the common knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct RegexParserConfig {
    /// 🔎 The pattern. Named groups (`(?P<name>...)`) become fields.
    pub pattern: String,
    #[serde(flatten, default)]
    pub common: CommonParserConfig,
}

/// 🔎 Parses lines against a compiled regex with named capture groups.
///
/// Compilation happens once, at construction — a bad pattern fails the
/// pipeline at startup, not at line forty million.
#[derive(Debug, Clone)]
pub struct RegexParser {
    regex: Regex,
    config: RegexParserConfig,
}

impl RegexParser {
    pub fn new(config: RegexParserConfig) -> Result<RegexParser> {
        let regex = Regex::new(&config.pattern).with_context(|| {
            format!(
                "💀 The regex '{}' did not compile. The parser cannot parse \
                 with a pattern that is itself unparseable. Very chicken, very egg.",
                config.pattern
            )
        })?;
        Ok(RegexParser { regex, config })
    }

    /// 🔎 Run the pattern, pour named captures into a field map.
    /// Shared with the pattern parser, which is just this with a wardrobe change.
    pub(crate) fn captures_to_fields(
        regex: &Regex,
        line: &str,
    ) -> Option<std::collections::BTreeMap<String, FieldValue>> {
        let caps = regex.captures(line)?;
        let mut fields = std::collections::BTreeMap::new();
        for name in regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                fields.insert(name.to_string(), FieldValue::Str(m.as_str().to_string()));
            }
        }
        Some(fields)
    }
}

impl Parser for RegexParser {
    fn parse(&mut self, line: &str, source: &str) -> Result<Option<Event>, ParseError> {
        reject_empty(line)?;

        // -- 🤷 no match → empty field map → message-only event. No failure.
        let fields = RegexParser::captures_to_fields(&self.regex, line).unwrap_or_default();
        Ok(Some(assemble_event(line, source, fields, &self.config.common)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> RegexParser {
        RegexParser::new(RegexParserConfig {
            pattern: r"^(?P<ts>\S+)\s+\[(?P<lvl>\w+)\]\s+(?P<msg>.*)$".to_string(),
            common: CommonParserConfig {
                time_field: Some("ts".to_string()),
                level_field: Some("lvl".to_string()),
                message_field: Some("msg".to_string()),
                ..CommonParserConfig::default()
            },
        })
        .unwrap()
    }

    /// 🧪 A matching line: groups extracted, promoted, removed from fields.
    #[test]
    fn the_one_where_the_named_groups_find_their_way_home() {
        let event = parser()
            .parse("2024-01-15T10:30:00Z [WARN] cache miss storm", "api.log")
            .unwrap()
            .unwrap();
        assert_eq!(event.level, "warn");
        assert_eq!(event.message, "cache miss storm");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-15T10:30:00+00:00");
        assert!(event.fields.is_empty(), "everything was promoted");
    }

    /// 🧪 The S2 scenario: a non-matching line degrades gracefully.
    #[test]
    fn the_one_where_garbage_does_not_match_and_nobody_panics() {
        let before = chrono::Utc::now();
        let event = parser()
            .parse("garbage-line-no-brackets", "s")
            .unwrap()
            .unwrap();
        assert_eq!(event.message, "garbage-line-no-brackets");
        assert!(event.level.is_empty());
        assert!(event.fields.is_empty());
        // timestamp ≈ now — somewhere between "just before" and "just after"
        assert!(event.timestamp >= before && event.timestamp <= chrono::Utc::now());
    }

    /// 🧪 A bad pattern fails at construction, loudly, with the pattern named.
    #[test]
    fn the_one_where_the_broken_regex_is_caught_at_the_door() {
        let result = RegexParser::new(RegexParserConfig {
            pattern: "(unclosed".to_string(),
            common: CommonParserConfig::default(),
        });
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("(unclosed"));
    }
}
