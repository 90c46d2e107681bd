// ai
//! ➕ Add — static field injection, the operator's rubber stamp.
//!
//! Every event through this operator gets the configured fields, overwriting
//! on collision. Environment tags, team labels, "this came from the legacy
//! cluster, handle with gloves" — that kind of thing.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::events::{Event, FieldValue};
use crate::transforms::Transform;

/// 🔧 Add config — key → value, injected verbatim as strings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AddFieldsConfig {
    pub fields: BTreeMap<String, String>,
}

/// ➕ Stamps the configured fields onto every event.
#[derive(Debug)]
pub struct AddFieldsTransform {
    fields: BTreeMap<String, FieldValue>,
}

impl AddFieldsTransform {
    pub fn new(config: AddFieldsConfig) -> AddFieldsTransform {
        AddFieldsTransform {
            fields: config
                .fields
                .into_iter()
                .map(|(k, v)| (k, FieldValue::Str(v)))
                .collect(),
        }
    }
}

impl Transform for AddFieldsTransform {
    fn apply(&self, mut event: Event) -> Event {
        for (key, value) in &self.fields {
            event.fields.insert(key.clone(), value.clone());
        }
        event
    }
}
