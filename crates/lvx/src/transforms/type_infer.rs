// ai
//! 🔮 type-infer — best-effort typing for string fields.
//!
//! `"42"` wants to be an Int. `"true"` wants to be a Bool. `"0.5"` wants to
//! be a Float. This operator lets them. Everything else stays a string,
//! because guessing harder than this is how you turn a zip code into a
//! number and lose the leading zero at 3am.
//!
//! Scope: the configured field list, or — when the list is empty — every
//! string field on the event. Nested maps are left alone; inference is a
//! top-level courtesy, not a deep traversal.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::events::{Event, FieldValue};
use crate::transforms::Transform;

/// 🔧 type-infer config — which fields to consider. Empty = all string fields.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TypeInferConfig {
    #[serde(default)]
    pub fields: Vec<String>,
}

/// 🔮 Converts string field values to bool/int/float where they parse cleanly.
#[derive(Debug)]
pub struct TypeInferTransform {
    fields: BTreeSet<String>,
}

impl TypeInferTransform {
    pub fn new(config: TypeInferConfig) -> TypeInferTransform {
        TypeInferTransform {
            fields: config.fields.into_iter().collect(),
        }
    }
}

/// 🔮 The inference ladder: bool, then int, then float, then "you stay a string".
fn infer(s: &str) -> Option<FieldValue> {
    match s {
        "true" | "True" | "TRUE" => return Some(FieldValue::Bool(true)),
        "false" | "False" | "FALSE" => return Some(FieldValue::Bool(false)),
        _ => {}
    }
    // 🛡️ leading-zero guard: "02134" is an identifier wearing a number costume.
    // i64::parse would happily eat the zero and a postal code would never be
    // the same. Dotted values ("0.5") are exempt — that zero is structural.
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.len() > 1 && unsigned.starts_with('0') && !unsigned.contains('.') {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(FieldValue::Int(i));
    }
    // -- 🧮 floats last: "1" should be Int(1), not Float(1.0)
    if let Ok(f) = s.parse::<f64>() {
        // f64::parse also accepts "inf"/"nan" — finite-only keeps those textual
        if f.is_finite() {
            return Some(FieldValue::Float(f));
        }
    }
    None
}

impl Transform for TypeInferTransform {
    fn apply(&self, mut event: Event) -> Event {
        for (key, value) in event.fields.iter_mut() {
            if !self.fields.is_empty() && !self.fields.contains(key) {
                continue;
            }
            if let FieldValue::Str(s) = value {
                if let Some(typed) = infer(s) {
                    *value = typed;
                }
            }
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(pairs: &[(&str, &str)]) -> Event {
        let mut e = Event::message_only("m", "s");
        for (k, v) in pairs {
            e.fields
                .insert(k.to_string(), FieldValue::Str(v.to_string()));
        }
        e
    }

    #[test]
    fn the_one_where_strings_discover_their_true_selves() {
        let t = TypeInferTransform::new(TypeInferConfig::default());
        let out = t.apply(event_with(&[
            ("count", "42"),
            ("ratio", "0.5"),
            ("ok", "true"),
            ("name", "alice"),
            ("neg", "-7"),
        ]));
        assert_eq!(out.fields["count"], FieldValue::Int(42));
        assert_eq!(out.fields["ratio"], FieldValue::Float(0.5));
        assert_eq!(out.fields["ok"], FieldValue::Bool(true));
        assert_eq!(out.fields["name"], FieldValue::from("alice"));
        assert_eq!(out.fields["neg"], FieldValue::Int(-7));
    }

    #[test]
    fn the_one_where_the_scoped_list_protects_the_zip_codes() {
        let t = TypeInferTransform::new(TypeInferConfig {
            fields: vec!["count".to_string()],
        });
        let out = t.apply(event_with(&[("count", "42"), ("zip", "02134")]));
        assert_eq!(out.fields["count"], FieldValue::Int(42));
        // not in scope → the leading zero lives
        assert_eq!(out.fields["zip"], FieldValue::from("02134"));
    }

    #[test]
    fn the_one_where_already_typed_fields_are_left_in_peace() {
        let t = TypeInferTransform::new(TypeInferConfig::default());
        let mut e = Event::message_only("m", "s");
        e.fields.insert("n".to_string(), FieldValue::Int(1));
        assert_eq!(t.apply(e).fields["n"], FieldValue::Int(1));
    }
}
