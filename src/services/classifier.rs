//! Admission decision for incoming storage events.
//!
//! Pure and total: the same event always gets the same answer, nothing is
//! logged or touched here.

use crate::models::{
    event::{SourceAsset, StorageEvent},
    rendition::RenditionSpec,
};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit(SourceAsset),
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingObjectName,
    NotAnImage { content_type: Option<String> },
    TooLarge { size: u64, max: u64 },
    /// The object is pipeline output; processing it again would loop.
    DerivedOutput { location: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingObjectName => write!(f, "event carries no object name"),
            Self::NotAnImage { content_type } => write!(
                f,
                "content type `{}` is not an image",
                content_type.as_deref().unwrap_or("<none>")
            ),
            Self::TooLarge { size, max } => {
                write!(f, "size {} bytes exceeds the {} byte maximum", size, max)
            }
            Self::DerivedOutput { location } => {
                write!(f, "object lies under derived output `{}`", location)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventClassifier {
    max_size_bytes: u64,
    /// Path prefixes such as `thumbnail/`.
    derived_prefixes: Vec<String>,
    /// Buckets that receive renditions at their root.
    derived_buckets: Vec<String>,
}

impl EventClassifier {
    /// Reserve every rendition destination as derived output.
    pub fn new(max_size_bytes: u64, specs: &[RenditionSpec]) -> Self {
        let mut derived_prefixes = Vec::new();
        let mut derived_buckets = Vec::new();
        for spec in specs {
            match spec.destination.prefix() {
                Some(prefix) if !derived_prefixes.contains(&prefix) => {
                    derived_prefixes.push(prefix)
                }
                Some(_) => {}
                None if !derived_buckets.contains(&spec.destination.bucket) => {
                    derived_buckets.push(spec.destination.bucket.clone())
                }
                None => {}
            }
        }
        Self {
            max_size_bytes,
            derived_prefixes,
            derived_buckets,
        }
    }

    pub fn classify(&self, event: &StorageEvent) -> Admission {
        let path = event.name.trim_start_matches('/');
        if path.is_empty() || path.ends_with('/') {
            return Admission::Reject(RejectReason::MissingObjectName);
        }

        let content_type = match event.content_type.as_deref() {
            Some(ct) if is_image(ct) => ct,
            other => {
                return Admission::Reject(RejectReason::NotAnImage {
                    content_type: other.map(str::to_string),
                });
            }
        };

        if event.size > self.max_size_bytes {
            return Admission::Reject(RejectReason::TooLarge {
                size: event.size,
                max: self.max_size_bytes,
            });
        }

        if let Some(prefix) = self.derived_prefixes.iter().find(|p| path.starts_with(p.as_str())) {
            return Admission::Reject(RejectReason::DerivedOutput {
                location: prefix.clone(),
            });
        }
        if self.derived_buckets.contains(&event.bucket) {
            return Admission::Reject(RejectReason::DerivedOutput {
                location: format!("{}/", event.bucket),
            });
        }

        Admission::Admit(SourceAsset::new(event, content_type))
    }
}

fn is_image(content_type: &str) -> bool {
    content_type
        .get(..6)
        .is_some_and(|family| family.eq_ignore_ascii_case("image/"))
}
