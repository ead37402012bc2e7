//! Represents an object (file) addressed inside a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an object lives: bucket plus path-like key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    /// Bucket name (S3-style naming rules).
    pub bucket: String,

    /// Object key within the bucket, e.g. `thumbnail/cat.jpg`.
    pub path: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

/// Result of a committed write.
///
/// Describes the stored payload, not the bytes themselves.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredObject {
    /// Final location of the committed object.
    pub location: ObjectLocation,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MD5 checksum of the payload, lowercase hex.
    pub etag: String,

    /// MIME type recorded at write time, e.g. `image/jpeg`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// When the object was committed.
    pub last_modified: DateTime<Utc>,
}
