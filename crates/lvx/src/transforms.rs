// ai
//! 🔄 Transforms — same pattern as parsers and sinks, because consistency is a feature 🎭🚀
//!
//! 🎬 COLD OPEN — INT. THE SPACE BETWEEN PARSER AND BUFFER — EVENTS IN TRANSIT
//!
//! The parser made the event. The buffer will carry it. In between stands a
//! short, orderly queue of operators, each of which takes an event, does one
//! specific thing to it, and hands it along. Filter. Rename. Add. Extract.
//! Infer. Nobody blocks. Nobody fails. Nobody improvises.
//!
//! ## Architecture — trait → concrete impls → enum dispatch 📐
//!
//! ```text
//!   ┌───────────────────────┐
//!   │ trait Transform       │
//!   │   fn apply(Event)     │
//!   └────────┬──────────────┘
//!            │
//!   ┌────────┴──────────────┐
//!   │ FilterTransform       │
//!   │ RenameTransform       │
//!   │ AddFieldsTransform    │
//!   │ KvExtractTransform    │
//!   │ TypeInferTransform    │
//!   └────────┬──────────────┘
//!            │
//!   ┌────────┴──────────────┐
//!   │ enum EventTransform   │
//!   │   impl Transform      │
//!   │   match dispatch      │
//!   └───────────────────────┘
//! ```
//!
//! ## Contract 📜
//! - Input: owned `Event`. Output: owned `Event`. No references, no sharing.
//! - Transforms never fail on a well-formed event. The fallible part of a
//!   transform's life (regex compilation) happens at construction.
//! - Order matters and is the operator's to choose — the chain applies them
//!   exactly as configured, first to last.
//!
//! ⚠️ The singularity will be a transform chain that transforms itself.
//! Until then, these five will do. 🦆

use anyhow::Result;
use serde::Deserialize;

use crate::events::Event;

pub(crate) mod add_fields;
pub(crate) mod filter;
pub(crate) mod kv_extract;
pub(crate) mod rename;
pub(crate) mod type_infer;

pub use add_fields::{AddFieldsConfig, AddFieldsTransform};
pub use filter::{FilterConfig, FilterTransform};
pub use kv_extract::{KvExtractConfig, KvExtractTransform};
pub use rename::{RenameConfig, RenameTransform};
pub use type_infer::{TypeInferConfig, TypeInferTransform};

/// 🔄 Transform — one event in, one event out, no excuses.
pub trait Transform: std::fmt::Debug {
    /// 🔄 Apply this operator. Ownership transfers in and out — the event is
    /// yours for the duration, and you WILL give it back.
    fn apply(&self, event: Event) -> Event;
}

/// 🎯 The dispatching enum for transforms. Same shape as `ParserBackend`
/// and `SinkBackend`. The match is the only runtime dispatch; the branch
/// predictor eats it for breakfast.
#[derive(Debug)]
pub enum EventTransform {
    Filter(FilterTransform),
    Rename(RenameTransform),
    Add(AddFieldsTransform),
    KvExtract(KvExtractTransform),
    TypeInfer(TypeInferTransform),
}

/// 🔧 Transform configuration — `type` picks the operator.
///
/// ```toml
/// [[transforms]]
/// type = "kv_extract"
/// prefix = "kv_"
///
/// [[transforms]]
/// type = "type_infer"
/// ```
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformConfig {
    Filter(FilterConfig),
    Rename(RenameConfig),
    Add(AddFieldsConfig),
    KvExtract(KvExtractConfig),
    TypeInfer(TypeInferConfig),
}

impl EventTransform {
    /// 🔧 Resolve one operator from its config. Regex-bearing operators can
    /// fail here, at startup, where failures belong.
    pub fn from_config(config: &TransformConfig) -> Result<EventTransform> {
        Ok(match config {
            TransformConfig::Filter(cfg) => {
                EventTransform::Filter(FilterTransform::new(cfg.clone()))
            }
            TransformConfig::Rename(cfg) => {
                EventTransform::Rename(RenameTransform::new(cfg.clone()))
            }
            TransformConfig::Add(cfg) => EventTransform::Add(AddFieldsTransform::new(cfg.clone())),
            TransformConfig::KvExtract(cfg) => {
                EventTransform::KvExtract(KvExtractTransform::new(cfg.clone())?)
            }
            TransformConfig::TypeInfer(cfg) => {
                EventTransform::TypeInfer(TypeInferTransform::new(cfg.clone()))
            }
        })
    }
}

impl Transform for EventTransform {
    #[inline]
    fn apply(&self, event: Event) -> Event {
        match self {
            EventTransform::Filter(t) => t.apply(event),
            EventTransform::Rename(t) => t.apply(event),
            EventTransform::Add(t) => t.apply(event),
            EventTransform::KvExtract(t) => t.apply(event),
            EventTransform::TypeInfer(t) => t.apply(event),
        }
    }
}

/// ⛓️ An ordered chain of operators. The pipeline owns exactly one of these
/// per ingest path and runs every event through it, front to back.
#[derive(Debug, Default)]
pub struct TransformChain {
    transforms: Vec<EventTransform>,
}

impl TransformChain {
    /// 🔧 Build the chain from config, preserving the configured order.
    pub fn from_configs(configs: &[TransformConfig]) -> Result<TransformChain> {
        let transforms = configs
            .iter()
            .map(EventTransform::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(TransformChain { transforms })
    }

    /// 🔄 Run the event through every operator, in order.
    pub fn apply(&self, event: Event) -> Event {
        self.transforms
            .iter()
            .fold(event, |event, transform| transform.apply(event))
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}
