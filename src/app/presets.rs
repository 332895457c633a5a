// LogScope - app/presets.rs
//
// Preset persistence.
//
// - Saved atomically: write a sibling temp file, then rename.
// - A missing file is a normal first run. A corrupt or incompatible file
//   yields an empty store plus the error.
// - The data directory is created on first save.

use crate::core::preset::{FilterPreset, PresetFile};
use crate::util::error::{PresetError, ValidationError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
    file: PresetFile,
}

impl PresetStore {
    /// An empty store that will save to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: PresetFile::default(),
        }
    }

    /// Load presets from `path`.
    ///
    /// Always returns a usable store; the error is `Some` when the file
    /// existed but was rejected.
    pub fn load(path: impl Into<PathBuf>) -> (Self, Option<PresetError>) {
        let path = path.into();
        match read_file(&path) {
            Ok(Some(file)) => {
                tracing::debug!(
                    path = %path.display(),
                    count = file.presets.len(),
                    "Presets loaded"
                );
                (Self { path, file }, None)
            }
            Ok(None) => (Self::empty(path), None),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Preset file rejected");
                (Self::empty(path), Some(e))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn presets(&self) -> &[FilterPreset] {
        &self.file.presets
    }

    pub fn get(&self, id: &str) -> Option<&FilterPreset> {
        self.file.presets.iter().find(|p| p.id == id)
    }

    /// First preset whose name matches, ignoring case.
    pub fn get_by_name(&self, name: &str) -> Option<&FilterPreset> {
        self.file
            .presets
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Insert or replace by id. Returns the replaced preset.
    pub fn upsert(&mut self, preset: FilterPreset) -> Result<Option<FilterPreset>, ValidationError> {
        preset.validate()?;
        match self.file.presets.iter_mut().find(|p| p.id == preset.id) {
            Some(existing) => Ok(Some(std::mem::replace(existing, preset))),
            None => {
                self.file.presets.push(preset);
                Ok(None)
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<FilterPreset> {
        let pos = self.file.presets.iter().position(|p| p.id == id)?;
        Some(self.file.presets.remove(pos))
    }

    /// Stamp `last_used`. Returns `false` for an unknown id.
    pub fn mark_used(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        match self.file.presets.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.mark_used(at);
                true
            }
            None => false,
        }
    }

    pub fn save(&self) -> Result<(), PresetError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PresetError::Io { path, source }
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let json = serde_json::to_string_pretty(&self.file).map_err(|source| PresetError::Json {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes()).map_err(io_err(&tmp))?;
        if let Err(source) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(PresetError::Io {
                path: self.path.clone(),
                source,
            });
        }

        tracing::debug!(
            path = %self.path.display(),
            count = self.file.presets.len(),
            "Presets saved"
        );
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Option<PresetFile>, PresetError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PresetError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let file: PresetFile = serde_json::from_str(&content).map_err(|source| PresetError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    file.validate()?;
    Ok(Some(file))
}
