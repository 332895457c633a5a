// LogScope - core/preset.rs
//
// Named filter presets: the one piece of state that outlives a session.
// The wire shape is camelCase JSON and must round-trip exactly; storage
// lives in `app::presets`.

use crate::core::filter::{CombineMode, Filter};
use crate::util::constants::PRESET_FILE_VERSION;
use crate::util::error::{PresetError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPreset {
    pub id: String,
    pub name: String,
    pub filters: Vec<Filter>,
    pub created_at: DateTime<Utc>,
    /// Serialised as `null` until the preset is first applied.
    pub last_used: Option<DateTime<Utc>>,
}

impl FilterPreset {
    /// Create a preset, validating every filter.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        filters: Vec<Filter>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let preset = Self {
            id: id.into(),
            name: name.into(),
            filters,
            created_at,
            last_used: None,
        };
        preset.validate()?;
        Ok(preset)
    }

    /// Re-validate the stored filters, including sibling id uniqueness.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut ids = HashSet::new();
        for filter in &self.filters {
            if !ids.insert(filter.id.as_str()) {
                return Err(ValidationError::DuplicateFilterId {
                    filter_id: filter.id.clone(),
                });
            }
            filter.validate()?;
        }
        Ok(())
    }

    /// Wrap the preset as a single SAVED filter with AND semantics.
    pub fn to_saved_filter(&self) -> Result<Filter, ValidationError> {
        Filter::saved(
            &format!("preset:{}", self.id),
            &self.name,
            self.filters.clone(),
            CombineMode::All,
        )
    }

    pub fn mark_used(&mut self, at: DateTime<Utc>) {
        self.last_used = Some(at);
    }
}

/// On-disk container for all presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetFile {
    pub version: u32,
    #[serde(default)]
    pub presets: Vec<FilterPreset>,
}

impl Default for PresetFile {
    fn default() -> Self {
        Self {
            version: PRESET_FILE_VERSION,
            presets: Vec::new(),
        }
    }
}

impl PresetFile {
    /// Check the schema version and every preset.
    pub fn validate(&self) -> Result<(), PresetError> {
        if self.version != PRESET_FILE_VERSION {
            return Err(PresetError::VersionMismatch {
                found: self.version,
                expected: PRESET_FILE_VERSION,
            });
        }
        for preset in &self.presets {
            preset.validate().map_err(|source| PresetError::Invalid {
                preset_id: preset.id.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
