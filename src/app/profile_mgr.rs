// LogScope - app/profile_mgr.rs
//
// The set of format profiles available to a session: built-ins embedded
// in the binary plus user TOML files, where a user profile replaces the
// built-in with the same id. Invalid user files are reported and skipped.

use crate::core::model::FormatProfile;
use crate::core::profile::{self, DetectionResult};
use crate::util::constants;
use crate::util::error::ProfileError;
use std::path::Path;
use std::sync::Arc;

/// Immutable, cheaply shared profile list.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Arc<[FormatProfile]>,
}

/// Outcome of choosing a profile for one file.
#[derive(Debug, Clone)]
pub struct ProfileChoice<'a> {
    pub profile: &'a FormatProfile,
    /// `None` when the fallback was used.
    pub detection: Option<DetectionResult>,
}

impl ProfileRegistry {
    /// Built-in profiles only.
    pub fn builtin() -> Self {
        Self::from_profiles(profile::load_builtin_profiles())
    }

    pub fn from_profiles(profiles: Vec<FormatProfile>) -> Self {
        Self {
            profiles: profiles.into(),
        }
    }

    /// Built-ins merged with the `.toml` files in `user_dir`, if it exists.
    ///
    /// Returns the registry and any non-fatal errors.
    pub fn load(user_dir: Option<&Path>) -> (Self, Vec<ProfileError>) {
        let mut profiles = profile::load_builtin_profiles();
        let mut errors = Vec::new();
        tracing::debug!(builtin_count = profiles.len(), "Loaded built-in profiles");

        match user_dir {
            Some(dir) if dir.is_dir() => {
                let (user_profiles, user_errors) = load_user_profiles(dir);
                errors.extend(user_errors);
                for user_profile in user_profiles {
                    match profiles.iter().position(|p| p.id == user_profile.id) {
                        Some(pos) => {
                            tracing::info!(
                                profile_id = %user_profile.id,
                                "User profile overrides built-in"
                            );
                            profiles[pos] = user_profile;
                        }
                        None => {
                            tracing::info!(
                                profile_id = %user_profile.id,
                                "Loaded user-defined profile"
                            );
                            profiles.push(user_profile);
                        }
                    }
                }
            }
            Some(dir) => tracing::debug!(
                dir = %dir.display(),
                "User profile directory does not exist (skipping)"
            ),
            None => {}
        }

        if profiles.len() > constants::MAX_PROFILES {
            tracing::warn!(
                count = profiles.len(),
                max = constants::MAX_PROFILES,
                "Too many profiles loaded, truncating"
            );
            errors.push(ProfileError::TooManyProfiles {
                count: profiles.len(),
                max: constants::MAX_PROFILES,
            });
            profiles.truncate(constants::MAX_PROFILES);
        }

        for e in &errors {
            tracing::warn!(error = %e, "Profile load problem");
        }
        tracing::info!(total = profiles.len(), "Profile loading complete");
        (Self::from_profiles(profiles), errors)
    }

    pub fn profiles(&self) -> &[FormatProfile] {
        &self.profiles
    }

    pub fn get(&self, id: &str) -> Option<&FormatProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Pick the profile for a file from its name and first lines.
    pub fn choose(&self, file_name: &str, sample_lines: &[String]) -> Option<ProfileChoice<'_>> {
        let detection = profile::auto_detect(file_name, sample_lines, &self.profiles);
        let profile = profile::select_profile(file_name, sample_lines, &self.profiles)?;
        let detection = detection.filter(|d| d.profile_id == profile.id);
        Some(ProfileChoice { profile, detection })
    }
}

fn load_user_profiles(dir: &Path) -> (Vec<FormatProfile>, Vec<ProfileError>) {
    let mut profiles = Vec::new();
    let mut errors = Vec::new();

    let mut paths: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| match e {
                Ok(e) => Some(e.path()),
                Err(source) => {
                    errors.push(ProfileError::Io {
                        path: dir.to_path_buf(),
                        source,
                    });
                    None
                }
            })
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect(),
        Err(source) => {
            errors.push(ProfileError::Io {
                path: dir.to_path_buf(),
                source,
            });
            return (profiles, errors);
        }
    };
    // Deterministic override order when two files share an id.
    paths.sort();

    for path in paths {
        let size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(source) => {
                errors.push(ProfileError::Io { path, source });
                continue;
            }
        };
        if size > constants::MAX_PROFILE_FILE_SIZE {
            errors.push(ProfileError::FileTooLarge {
                path,
                size,
                max_size: constants::MAX_PROFILE_FILE_SIZE,
            });
            continue;
        }

        let loaded = std::fs::read_to_string(&path)
            .map_err(|source| ProfileError::Io {
                path: path.clone(),
                source,
            })
            .and_then(|content| profile::parse_profile_toml(&content, &path))
            .and_then(|def| profile::validate_and_compile(def, &path, false));
        match loaded {
            Ok(p) => profiles.push(p),
            Err(e) => errors.push(e),
        }
    }

    (profiles, errors)
}
