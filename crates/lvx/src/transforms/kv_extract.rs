// ai
//! 🔑 kv-extract — mining `key=value` pairs out of the message.
//!
//! Two strategies, one order of preference:
//! 1. A configured regex with `key`/`value` named groups, applied across the
//!    whole message (`captures_iter`). Precise, opt-in, regex-priced.
//! 2. The fallback: split on the pair separator, split each pair on the kv
//!    separator, trim quotes, done. Cheap and right surprisingly often.
//!
//! Regex first, THEN fallback — and "then" means "instead", not "also":
//! if a pattern is configured, the splitter stays on the bench even when the
//! pattern finds nothing. Mixing strategies per-line makes output depend on
//! which strategy got lucky, and nobody can debug luck.
//!
//! Extracted values land in `fields` as strings (optionally under a prefix);
//! the `type_infer` operator downstream is the one with opinions about types.
//! The message itself is left intact. We extract, we don't redact. 🦆

use ::regex::Regex;
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::events::{Event, FieldValue};
use crate::transforms::Transform;

fn default_pair_separator() -> String {
    " ".to_string()
}

fn default_kv_separator() -> String {
    "=".to_string()
}

/// 🔧 kv-extract config.
#[derive(Debug, Deserialize, Clone)]
pub struct KvExtractConfig {
    /// 🔎 Optional regex with `(?P<key>...)` and `(?P<value>...)` groups.
    /// When set, it is the only strategy used.
    #[serde(default)]
    pub pattern: Option<String>,
    /// ✂️ What separates one pair from the next (fallback strategy).
    #[serde(default = "default_pair_separator")]
    pub pair_separator: String,
    /// ✂️ What separates a key from its value (fallback strategy).
    #[serde(default = "default_kv_separator")]
    pub kv_separator: String,
    /// 🏷️ Optional prefix for extracted keys, e.g. `kv_` → `kv_latency_ms`.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl Default for KvExtractConfig {
    fn default() -> KvExtractConfig {
        KvExtractConfig {
            pattern: None,
            pair_separator: default_pair_separator(),
            kv_separator: default_kv_separator(),
            prefix: None,
        }
    }
}

/// 🔑 Extracts key=value pairs from the message into fields.
#[derive(Debug)]
pub struct KvExtractTransform {
    pattern: Option<Regex>,
    config: KvExtractConfig,
}

impl KvExtractTransform {
    pub fn new(config: KvExtractConfig) -> Result<KvExtractTransform> {
        let pattern = match &config.pattern {
            Some(p) => {
                let regex = Regex::new(p).with_context(|| {
                    format!("💀 kv-extract pattern '{p}' did not compile — no keys were harmed, none were extracted either")
                })?;
                // key/value groups are the contract; missing them is a config bug
                // we catch at the door, not a silent no-op we discover in a dashboard
                let names: Vec<_> = regex.capture_names().flatten().collect();
                if !names.contains(&"key") || !names.contains(&"value") {
                    anyhow::bail!(
                        "💀 kv-extract pattern '{p}' needs (?P<key>...) and (?P<value>...) groups — got {names:?}"
                    );
                }
                Some(regex)
            }
            None => None,
        };
        Ok(KvExtractTransform { pattern, config })
    }

    /// 🏷️ Apply the configured prefix, if any.
    fn field_key(&self, key: &str) -> String {
        match &self.config.prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    fn insert(&self, event: &mut Event, key: &str, value: &str) {
        if key.is_empty() {
            return;
        }
        // -- ✂️ values arrive quoted often enough that trimming is table stakes
        let value = value.trim_matches('"');
        event
            .fields
            .insert(self.field_key(key), FieldValue::Str(value.to_string()));
    }
}

impl Transform for KvExtractTransform {
    fn apply(&self, mut event: Event) -> Event {
        let message = event.message.clone();
        match &self.pattern {
            // 1️⃣ regex strategy — exclusive when configured
            Some(regex) => {
                for caps in regex.captures_iter(&message) {
                    if let (Some(k), Some(v)) = (caps.name("key"), caps.name("value")) {
                        self.insert(&mut event, k.as_str(), v.as_str());
                    }
                }
            }
            // 2️⃣ split strategy — the cheap and cheerful default
            None => {
                for pair in message.split(self.config.pair_separator.as_str()) {
                    if let Some((key, value)) = pair.split_once(self.config.kv_separator.as_str()) {
                        self.insert(&mut event, key.trim(), value.trim());
                    }
                }
            }
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_splitter_mines_the_message_for_pairs() {
        let t = KvExtractTransform::new(KvExtractConfig::default()).unwrap();
        let out = t.apply(Event::message_only(
            r#"request done latency_ms=42 status=200 path="/api/v1""#,
            "s",
        ));
        assert_eq!(out.fields["latency_ms"], FieldValue::from("42"));
        assert_eq!(out.fields["status"], FieldValue::from("200"));
        assert_eq!(out.fields["path"], FieldValue::from("/api/v1"));
        // words without a separator are not pairs and are not invented
        assert!(!out.fields.contains_key("request"));
        // the message survives, verbatim
        assert!(out.message.contains("latency_ms=42"));
    }

    #[test]
    fn the_one_where_the_regex_strategy_takes_precedence() {
        let t = KvExtractTransform::new(KvExtractConfig {
            pattern: Some(r"(?P<key>\w+):(?P<value>\d+)".to_string()),
            ..KvExtractConfig::default()
        })
        .unwrap();
        // message contains BOTH colon-pairs (regex) and equals-pairs (fallback);
        // only the configured regex gets to extract
        let out = t.apply(Event::message_only("a:1 b=2 c:3", "s"));
        assert_eq!(out.fields["a"], FieldValue::from("1"));
        assert_eq!(out.fields["c"], FieldValue::from("3"));
        assert!(!out.fields.contains_key("b"), "fallback stays benched");
    }

    #[test]
    fn the_one_where_the_prefix_keeps_extracted_keys_in_their_lane() {
        let t = KvExtractTransform::new(KvExtractConfig {
            prefix: Some("kv_".to_string()),
            ..KvExtractConfig::default()
        })
        .unwrap();
        let out = t.apply(Event::message_only("user=alice", "s"));
        assert_eq!(out.fields["kv_user"], FieldValue::from("alice"));
    }

    #[test]
    fn the_one_where_a_pattern_without_the_contract_groups_is_refused() {
        let result = KvExtractTransform::new(KvExtractConfig {
            pattern: Some(r"(?P<nope>\w+)".to_string()),
            ..KvExtractConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn the_one_where_custom_separators_are_honored() {
        let t = KvExtractTransform::new(KvExtractConfig {
            pair_separator: ",".to_string(),
            kv_separator: ":".to_string(),
            ..KvExtractConfig::default()
        })
        .unwrap();
        let out = t.apply(Event::message_only("a:1,b:2", "s"));
        assert_eq!(out.fields["a"], FieldValue::from("1"));
        assert_eq!(out.fields["b"], FieldValue::from("2"));
    }
}
