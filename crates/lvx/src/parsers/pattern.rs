// ai
//! 📚 The pattern parser — a regex library with human-readable names.
//!
//! 🎬 COLD OPEN — INT. ONBOARDING — SOMEONE IS HAND-WRITING THE SYSLOG REGEX
//!
//! Nobody should type `[A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2}` from memory.
//! Someone already did, once, and it lives in the library now. You write
//! `%{SYSLOGTIMESTAMP:timestamp}` and the expansion engine does the rest —
//! recursively, because patterns reference patterns reference patterns.
//!
//! ## Expansion rules 📜
//! - `%{NAME}` → the named regex, wrapped non-capturing: `(?:...)`.
//! - `%{NAME:field}` → the named regex, captured: `(?P<field>...)`.
//! - Expansion iterates until no tokens remain, capped at 100 rounds —
//!   a cycle in custom patterns hits the cap and fails construction.
//! - An unknown name is a construction-time error. Fail at the door.
//!
//! ⚠️ Custom patterns shadow built-ins on name collision. The operator is
//! allowed to disagree with the library. The library will survive.
//!
//! 🦆 (the duck is `%{GREEDYDATA}`. the duck matches everything.)

use std::collections::BTreeMap;

use ::regex::Regex;
use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::errors::ParseError;
use crate::events::Event;
use crate::parsers::regex::RegexParser;
use crate::parsers::{assemble_event, reject_empty, CommonParserConfig, Parser};

/// 🔁 Expansion rounds before we declare the custom patterns cyclic.
const MAX_EXPANSION_ROUNDS: usize = 100;

/// 📚 The built-in library: primitives first, composite templates after.
///
/// Composites reference primitives by token, which is exactly the point —
/// they exercise the same recursive expansion the operator's patterns get.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    // -- primitives
    ("WORD", r"\b\w+\b"),
    ("NOTSPACE", r"\S+"),
    ("DATA", r".*?"),
    ("GREEDYDATA", r".*"),
    ("INT", r"[+-]?\d+"),
    ("NUMBER", r"[+-]?\d+(?:\.\d+)?"),
    ("IP", r"\d{1,3}(?:\.\d{1,3}){3}"),
    (
        "HOSTNAME",
        r"[A-Za-z0-9][A-Za-z0-9\-]*(?:\.[A-Za-z0-9][A-Za-z0-9\-]*)*",
    ),
    ("IPORHOST", r"(?:%{IP}|%{HOSTNAME})"),
    ("USERNAME", r"[a-zA-Z0-9._-]+"),
    ("PROG", r"[\w._/%-]+"),
    ("PID", r"\d+"),
    ("QUOTEDSTRING", r#""[^"]*""#),
    (
        "LOGLEVEL",
        r"(?:[Tt]race|TRACE|[Dd]ebug|DEBUG|[Ii]nfo|INFO|[Ww]arn(?:ing)?|WARN(?:ING)?|[Ee]rr(?:or)?|ERR(?:OR)?|[Ff]atal|FATAL|[Cc]ritical|CRITICAL|[Pp]anic|PANIC)",
    ),
    (
        "TIMESTAMP_ISO8601",
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
    ),
    ("SYSLOGTIMESTAMP", r"[A-Z][a-z]{2} +\d{1,2} \d{2}:\d{2}:\d{2}"),
    (
        "HTTPDATE",
        r"\d{2}/[A-Z][a-z]{2}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4}",
    ),
    (
        "JAVACLASS",
        r"(?:[a-zA-Z$_][a-zA-Z$_0-9]*\.)+[a-zA-Z$_][a-zA-Z$_0-9]*",
    ),
    // -- composite templates: whole line shapes, ready to promote
    (
        "SYSLOGLINE",
        r"%{SYSLOGTIMESTAMP:timestamp} %{NOTSPACE:hostname} %{PROG:program}(?:\[%{PID:pid}\])?: %{GREEDYDATA:message}",
    ),
    (
        "COMMONAPACHELOG",
        r#"%{IPORHOST:clientip} %{NOTSPACE:ident} %{NOTSPACE:auth} \[%{HTTPDATE:timestamp}\] "%{WORD:verb} %{NOTSPACE:request}(?: HTTP/%{NUMBER:httpversion})?" %{INT:response} (?:%{INT:bytes}|-)"#,
    ),
    (
        "COMBINEDAPACHELOG",
        r"%{COMMONAPACHELOG} %{QUOTEDSTRING:referrer} %{QUOTEDSTRING:agent}",
    ),
];

/// 🔧 Pattern parser config — a template string plus optional custom patterns.
#[derive(Debug, Deserialize, Clone)]
pub struct PatternParserConfig {
    /// 📚 The template, e.g. `%{SYSLOGLINE}` or a bespoke mix of tokens.
    pub pattern: String,
    /// 🧩 Operator-defined named patterns; shadow built-ins on collision.
    #[serde(default)]
    pub custom_patterns: BTreeMap<String, String>,
    #[serde(flatten, default)]
    pub common: CommonParserConfig,
}

/// 📚 A regex parser wearing a template wardrobe.
///
/// All the interesting work happens at construction: tokens expand, the
/// final regex compiles, and from then on this is the regex parser's
/// match-and-promote loop with zero per-line overhead for the templating.
#[derive(Debug, Clone)]
pub struct PatternParser {
    regex: Regex,
    config: PatternParserConfig,
}

impl PatternParser {
    pub fn new(config: PatternParserConfig) -> Result<PatternParser> {
        let expanded = expand_pattern(&config.pattern, &config.custom_patterns)?;
        let regex = Regex::new(&expanded).with_context(|| {
            format!(
                "💀 The pattern '{}' expanded to a regex that would not compile. \
                 The expansion was: '{expanded}'. One of these is lying.",
                config.pattern
            )
        })?;
        Ok(PatternParser { regex, config })
    }
}

impl Parser for PatternParser {
    fn parse(&mut self, line: &str, source: &str) -> Result<Option<Event>, ParseError> {
        reject_empty(line)?;
        let fields = RegexParser::captures_to_fields(&self.regex, line).unwrap_or_default();
        Ok(Some(assemble_event(line, source, fields, &self.config.common)))
    }
}

/// 🔁 Expand `%{NAME}` / `%{NAME:field}` tokens until none remain.
///
/// Custom patterns are consulted first, then the built-in library.
/// Hitting the round cap with tokens still present means the operator has
/// written a cycle, and cycles do not terminate, and we'd rather they not
/// terminate at *startup* instead of in production.
fn expand_pattern(pattern: &str, custom: &BTreeMap<String, String>) -> Result<String> {
    // -- 🔎 the token grammar itself is a regex. it's regexes all the way down.
    let token =
        Regex::new(r"%\{(?P<name>\w+)(?::(?P<field>\w+))?\}").expect("token regex is static");
    let builtins: BTreeMap<&str, &str> = BUILTIN_PATTERNS.iter().copied().collect();

    let mut expanded = pattern.to_string();
    for _ in 0..MAX_EXPANSION_ROUNDS {
        if !token.is_match(&expanded) {
            return Ok(expanded);
        }

        let mut unknown: Option<String> = None;
        let next = token
            .replace_all(&expanded, |caps: &::regex::Captures<'_>| {
                let name = &caps["name"];
                let def = custom
                    .get(name)
                    .map(String::as_str)
                    .or_else(|| builtins.get(name).copied());
                match (def, caps.name("field")) {
                    (Some(def), Some(field)) => format!("(?P<{}>{def})", field.as_str()),
                    (Some(def), None) => format!("(?:{def})"),
                    (None, _) => {
                        // -- 💀 remember the first unknown; leave the token in place
                        unknown.get_or_insert_with(|| name.to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        if let Some(name) = unknown {
            bail!(
                "💀 Unknown pattern name '%{{{name}}}' — not in the built-in library, \
                 not in custom_patterns. The expansion engine cannot expand a rumor."
            );
        }
        expanded = next;
    }

    bail!(
        "💀 Pattern expansion did not settle after {MAX_EXPANSION_ROUNDS} rounds — \
         the custom patterns are cyclic. Somewhere, a pattern references itself \
         and dreams of infinity. Construction declines to participate."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FieldValue;

    /// 🧪 The syslog composite: expand, match, promote.
    #[test]
    fn the_one_where_syslog_parses_without_anyone_typing_the_regex() {
        let mut parser = PatternParser::new(PatternParserConfig {
            pattern: "%{SYSLOGLINE}".to_string(),
            custom_patterns: BTreeMap::new(),
            common: CommonParserConfig {
                time_field: Some("timestamp".to_string()),
                message_field: Some("message".to_string()),
                ..CommonParserConfig::default()
            },
        })
        .unwrap();

        let event = parser
            .parse("Jan 15 10:30:00 web-1 sshd[4242]: accepted publickey for deploy", "syslog")
            .unwrap()
            .unwrap();
        assert_eq!(event.message, "accepted publickey for deploy");
        assert_eq!(event.fields["hostname"], FieldValue::from("web-1"));
        assert_eq!(event.fields["program"], FieldValue::from("sshd"));
        assert_eq!(event.fields["pid"], FieldValue::from("4242"));
        assert!(!event.fields.contains_key("timestamp"), "promoted away");
    }

    /// 🧪 The apache common log composite — the other classic.
    #[test]
    fn the_one_where_the_access_log_gives_up_its_secrets() {
        let mut parser = PatternParser::new(PatternParserConfig {
            pattern: "%{COMMONAPACHELOG}".to_string(),
            custom_patterns: BTreeMap::new(),
            common: CommonParserConfig {
                time_field: Some("timestamp".to_string()),
                ..CommonParserConfig::default()
            },
        })
        .unwrap();

        let line = r#"192.168.0.1 - frank [15/Jan/2024:10:30:00 +0000] "GET /index.html HTTP/1.1" 200 2326"#;
        let event = parser.parse(line, "access.log").unwrap().unwrap();
        assert_eq!(event.fields["clientip"], FieldValue::from("192.168.0.1"));
        assert_eq!(event.fields["verb"], FieldValue::from("GET"));
        assert_eq!(event.fields["response"], FieldValue::from("200"));
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-15T10:30:00+00:00");
        // -- message field not configured → message falls back to the raw line
        assert_eq!(event.message, line);
    }

    /// 🧪 Custom patterns participate in expansion and shadow nothing they don't name.
    #[test]
    fn the_one_where_the_operator_brings_their_own_vocabulary() {
        let mut parser = PatternParser::new(PatternParserConfig {
            pattern: "%{REQID:req} %{GREEDYDATA:message}".to_string(),
            custom_patterns: BTreeMap::from([(
                "REQID".to_string(),
                r"req-[0-9a-f]{8}".to_string(),
            )]),
            common: CommonParserConfig {
                message_field: Some("message".to_string()),
                ..CommonParserConfig::default()
            },
        })
        .unwrap();

        let event = parser.parse("req-deadbeef handling upload", "s").unwrap().unwrap();
        assert_eq!(event.fields["req"], FieldValue::from("req-deadbeef"));
        assert_eq!(event.message, "handling upload");
    }

    /// 🧪 Unknown names fail construction — the library does not guess.
    #[test]
    fn the_one_where_a_rumored_pattern_is_not_a_pattern() {
        let result = PatternParser::new(PatternParserConfig {
            pattern: "%{TOTALLY_REAL_PATTERN}".to_string(),
            custom_patterns: BTreeMap::new(),
            common: CommonParserConfig::default(),
        });
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("TOTALLY_REAL_PATTERN"));
    }

    /// 🧪 Cyclic custom patterns hit the round cap and fail construction.
    #[test]
    fn the_one_where_the_ouroboros_is_escorted_off_the_premises() {
        let result = PatternParser::new(PatternParserConfig {
            pattern: "%{A}".to_string(),
            custom_patterns: BTreeMap::from([
                ("A".to_string(), "%{B}".to_string()),
                ("B".to_string(), "%{A}".to_string()),
            ]),
            common: CommonParserConfig::default(),
        });
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("cyclic"));
    }

    /// 🧪 Non-matching lines degrade to message-only, same as the regex parser.
    #[test]
    fn the_one_where_the_template_shrugs_and_passes_it_through() {
        let mut parser = PatternParser::new(PatternParserConfig {
            pattern: "^%{SYSLOGLINE}$".to_string(),
            custom_patterns: BTreeMap::new(),
            common: CommonParserConfig::default(),
        })
        .unwrap();
        let event = parser.parse("not syslog in the slightest", "s").unwrap().unwrap();
        assert_eq!(event.message, "not syslog in the slightest");
        assert!(event.fields.is_empty());
    }
}
