//! Storage "object finalized" events and the source asset they describe.

use super::object::ObjectLocation;
use serde::{Deserialize, Deserializer, Serialize};

/// Descriptor delivered by the storage trigger whenever an object is finalized.
///
/// Delivery is at-least-once; the same descriptor may arrive more than once.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    /// Bucket holding the new object.
    pub bucket: String,

    /// Object key (path) inside the bucket.
    pub name: String,

    /// Declared MIME type, if the uploader supplied one.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Object size in bytes. Storage notifications often encode it as a string.
    #[serde(default, deserialize_with = "size_from_number_or_string")]
    pub size: u64,

    /// Object generation; distinguishes overwrites of the same key.
    #[serde(default)]
    pub generation: Option<String>,
}

fn size_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// An uploaded object that passed admission.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SourceAsset {
    pub location: ObjectLocation,
    pub size_bytes: u64,
    pub content_type: String,
    pub generation: Option<String>,
}

impl SourceAsset {
    pub fn new(event: &StorageEvent, content_type: &str) -> Self {
        Self {
            location: ObjectLocation::new(&event.bucket, event.name.trim_start_matches('/')),
            size_bytes: event.size,
            content_type: content_type.to_string(),
            generation: event.generation.clone(),
        }
    }

    /// Final path segment, e.g. `cat.jpg` for `upload/cat.jpg`.
    pub fn file_name(&self) -> &str {
        file_name(&self.location.path)
    }

    /// Metadata key: the file name cut at its first `.`.
    ///
    /// `upload/cat.jpg` and `full/cat.jpg` both map to `cat`, so every
    /// rendition of one upload converges on the same document.
    pub fn base_name(&self) -> &str {
        base_name(self.file_name())
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn base_name(file_name: &str) -> &str {
    match file_name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem,
        _ => file_name,
    }
}
