//! Metadata recorded for a processed upload.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field carrying the time of the last completed run.
pub const PROCESSED_AT_FIELD: &str = "processedAt";

/// Partial document merged into the metadata store after a run.
///
/// Only carries the flags of renditions that actually succeeded; the store
/// merges it additively so flags written by earlier runs survive.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedMetadata {
    /// Document key, the source's base name.
    pub key: String,

    /// Rendition flag -> produced.
    pub flags: BTreeMap<String, bool>,

    pub processed_at: DateTime<Utc>,
}

impl DerivedMetadata {
    pub fn new(key: impl Into<String>, processed_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            flags: BTreeMap::new(),
            processed_at,
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into(), true);
        self
    }

    /// Field map handed to `MetadataStore::merge_document`.
    pub fn into_fields(self) -> Map<String, Value> {
        let mut fields: Map<String, Value> = self
            .flags
            .into_iter()
            .map(|(flag, produced)| (flag, Value::Bool(produced)))
            .collect();
        fields.insert(
            PROCESSED_AT_FIELD.to_string(),
            Value::String(self.processed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        fields
    }
}
