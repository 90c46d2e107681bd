// ai
//! 🏷️ Rename — the witness-protection program for field keys.
//!
//! Old name in, new name out, value untouched. If the new name already
//! exists, the renamed value overwrites it — a rename is a statement of
//! intent, not a negotiation.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::events::Event;
use crate::transforms::Transform;

/// 🔧 Rename config — old key → new key.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RenameConfig {
    pub mapping: BTreeMap<String, String>,
}

/// 🏷️ Remaps field keys according to the configured mapping.
#[derive(Debug)]
pub struct RenameTransform {
    mapping: BTreeMap<String, String>,
}

impl RenameTransform {
    pub fn new(config: RenameConfig) -> RenameTransform {
        RenameTransform {
            mapping: config.mapping,
        }
    }
}

impl Transform for RenameTransform {
    fn apply(&self, mut event: Event) -> Event {
        for (old, new) in &self.mapping {
            if let Some(value) = event.fields.remove(old) {
                event.fields.insert(new.clone(), value);
            }
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FieldValue;

    #[test]
    fn the_one_where_the_field_gets_a_new_identity() {
        let t = RenameTransform::new(RenameConfig {
            mapping: BTreeMap::from([("src_ip".to_string(), "client_ip".to_string())]),
        });
        let mut e = Event::message_only("m", "s");
        e.fields
            .insert("src_ip".to_string(), FieldValue::from("10.0.0.1"));
        let out = t.apply(e);
        assert!(!out.fields.contains_key("src_ip"));
        assert_eq!(out.fields["client_ip"], FieldValue::from("10.0.0.1"));
    }

    #[test]
    fn the_one_where_renaming_a_ghost_changes_nothing() {
        let t = RenameTransform::new(RenameConfig {
            mapping: BTreeMap::from([("nope".to_string(), "still_nope".to_string())]),
        });
        let out = t.apply(Event::message_only("m", "s"));
        assert!(out.fields.is_empty());
    }

    #[test]
    fn the_one_where_the_rename_steamrolls_the_incumbent() {
        let t = RenameTransform::new(RenameConfig {
            mapping: BTreeMap::from([("a".to_string(), "b".to_string())]),
        });
        let mut e = Event::message_only("m", "s");
        e.fields.insert("a".to_string(), FieldValue::from("new"));
        e.fields.insert("b".to_string(), FieldValue::from("old"));
        let out = t.apply(e);
        assert_eq!(out.fields["b"], FieldValue::from("new"));
        assert!(!out.fields.contains_key("a"));
    }
}
