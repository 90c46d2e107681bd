// ai
//! 📦 The object parser — for logs that already did the hard part.
//!
//! JSON lines in, events out. The keys become fields, the configured
//! time/level/message keys get promoted, and anything that isn't valid JSON
//! degrades to a message-only event without so much as a raised eyebrow.
//!
//! 🦆 (the duck parses nothing. the duck is self-describing.)

use serde::Deserialize;

use crate::errors::ParseError;
use crate::events::{Event, FieldValue};
use crate::parsers::{assemble_event, reject_empty, CommonParserConfig, Parser};

/// 🔧 Object parser config — it's all in the common knobs.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ObjectParserConfig {
    #[serde(flatten, default)]
    pub common: CommonParserConfig,
}

/// 📦 Parses self-describing JSON-object lines.
///
/// # Contract 📜
/// - A JSON object → keys become `fields`, promotion applies.
/// - Valid JSON that is NOT an object (a bare number, a string, an array)
///   → message-only event. We don't invent structure that isn't there.
/// - Invalid JSON → message-only event. Malformed is not an error.
#[derive(Debug, Clone)]
pub struct ObjectParser {
    config: ObjectParserConfig,
}

impl ObjectParser {
    pub fn new(config: ObjectParserConfig) -> ObjectParser {
        ObjectParser { config }
    }
}

impl Parser for ObjectParser {
    fn parse(&mut self, line: &str, source: &str) -> Result<Option<Event>, ParseError> {
        reject_empty(line)?;

        let fields = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| (k, FieldValue::from_json(v)))
                .collect(),
            // -- 🤷 not an object, or not JSON at all: message-only, move on
            _ => Default::default(),
        };

        Ok(Some(assemble_event(line, source, fields, &self.config.common)))
    }
}
