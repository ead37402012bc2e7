//! Static rendition plan.

use crate::{
    config::ConfigError,
    models::{event::SourceAsset, rendition::RenditionSpec},
};
use std::collections::HashSet;

/// Maps an admitted asset to the ordered renditions to produce.
///
/// The plan is validated once at construction and never depends on the
/// asset's content.
#[derive(Debug, Clone)]
pub struct RenditionPlanner {
    specs: Vec<RenditionSpec>,
}

impl RenditionPlanner {
    pub fn new(specs: Vec<RenditionSpec>) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::EmptyPlan);
        }

        let mut names = HashSet::new();
        for spec in &specs {
            if spec.resize.width == 0 || spec.resize.height == 0 {
                return Err(ConfigError::ZeroDimension(spec.name.clone()));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateRendition(spec.name.clone()));
            }
        }

        for (i, first) in specs.iter().enumerate() {
            if let Some(second) = specs[i + 1..]
                .iter()
                .find(|other| other.destination == first.destination)
            {
                return Err(ConfigError::DuplicateDestination {
                    first: first.name.clone(),
                    second: second.name.clone(),
                });
            }
        }

        Ok(Self { specs })
    }

    pub fn plan(&self, _asset: &SourceAsset) -> &[RenditionSpec] {
        &self.specs
    }

    pub fn specs(&self) -> &[RenditionSpec] {
        &self.specs
    }
}
