// ai
//! 🚪 Filter — the velvet rope for fields.
//!
//! Include list: only these fields get in (empty list = everyone's invited).
//! Exclude list: these fields specifically do not. Exclude wins on conflict,
//! because "no" is a complete sentence.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::events::Event;
use crate::transforms::Transform;

/// 🔧 Filter config — two lists, both optional.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    /// ✅ Keep only these fields. Empty = keep all.
    #[serde(default)]
    pub include: Vec<String>,
    /// 🚫 Drop these fields. Applied after include.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// 🚪 Keeps or drops fields by name. Top-level attributes (timestamp, level,
/// message, source) are not fields and are never touched here.
#[derive(Debug)]
pub struct FilterTransform {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl FilterTransform {
    pub fn new(config: FilterConfig) -> FilterTransform {
        FilterTransform {
            include: config.include.into_iter().collect(),
            exclude: config.exclude.into_iter().collect(),
        }
    }
}

impl Transform for FilterTransform {
    fn apply(&self, mut event: Event) -> Event {
        event.fields.retain(|key, _| {
            let included = self.include.is_empty() || self.include.contains(key);
            included && !self.exclude.contains(key)
        });
        event
    }
}
