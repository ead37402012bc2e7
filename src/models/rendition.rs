//! Rendition targets: how big, where to, and which metadata flag they set.

use super::{event::SourceAsset, object::ObjectLocation};
use serde::Serialize;

/// Target box for one resize. The output covers it and is centre-cropped,
/// aspect ratio kept.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeOptions {
    pub width: u32,
    pub height: u32,

    /// Never scale beyond the source's native resolution.
    pub without_enlargement: bool,
}

impl ResizeOptions {
    pub fn cover(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            without_enlargement: true,
        }
    }
}

/// Destination template: a bucket plus an optional folder inside it.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,

    /// Folder without slashes; empty means the bucket root.
    pub folder: String,
}

impl Destination {
    pub fn new(bucket: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            folder: folder.into().trim_matches('/').to_string(),
        }
    }

    /// Path prefix reserved for derived output, e.g. `thumbnail/`.
    pub fn prefix(&self) -> Option<String> {
        (!self.folder.is_empty()).then(|| format!("{}/", self.folder))
    }
}

/// One target transformation, fixed before any source byte is read.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RenditionSpec {
    /// Rendition kind, e.g. `thumbnail`.
    pub name: String,
    pub resize: ResizeOptions,
    pub destination: Destination,

    /// Metadata field set to `true` once this rendition is written.
    pub metadata_flag: Option<String>,
}

impl RenditionSpec {
    pub fn destination_for(&self, asset: &SourceAsset) -> ObjectLocation {
        let path = match self.destination.prefix() {
            Some(prefix) => format!("{}{}", prefix, asset.file_name()),
            None => asset.file_name().to_string(),
        };
        ObjectLocation::new(&self.destination.bucket, path)
    }
}
