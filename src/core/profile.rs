// LogScope - core/profile.rs
//
// Format profile loading, validation, and auto-detection.
// Core layer: accepts TOML strings and sample lines, never touches the
// filesystem. I/O is handled by app::profile_mgr which feeds content here.

use crate::core::model::{FormatProfile, MultilineMode, Severity};
use crate::util::constants;
use crate::util::error::ProfileError;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

// =============================================================================
// TOML deserialization structures (raw input)
// =============================================================================

/// Raw TOML profile definition as deserialized from a .toml file.
/// Validated and compiled into a `FormatProfile` for runtime use.
#[derive(Debug, Deserialize)]
pub struct ProfileDefinition {
    pub profile: ProfileMeta,
    pub detection: DetectionDef,
    pub parsing: ParsingDef,
    #[serde(default)]
    pub severity_mapping: SeverityMappingDef,
}

#[derive(Debug, Deserialize)]
pub struct ProfileMeta {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DetectionDef {
    #[serde(default)]
    pub file_patterns: Vec<String>,
    pub content_match: String,
}

#[derive(Debug, Deserialize)]
pub struct ParsingDef {
    pub line_pattern: String,
    pub timestamp_format: String,
    #[serde(default)]
    pub multiline_mode: MultilineMode,
}

#[derive(Debug, Deserialize, Default)]
pub struct SeverityMappingDef {
    #[serde(default)]
    pub critical: Vec<String>,
    #[serde(default)]
    pub error: Vec<String>,
    #[serde(default)]
    pub warning: Vec<String>,
    #[serde(default)]
    pub info: Vec<String>,
    #[serde(default)]
    pub debug: Vec<String>,
    #[serde(default)]
    pub trace: Vec<String>,
}

// =============================================================================
// Profile validation and compilation
// =============================================================================

/// Parse a TOML string into a `ProfileDefinition`.
///
/// `source_path` is used for error messages only.
pub fn parse_profile_toml(
    toml_content: &str,
    source_path: &Path,
) -> Result<ProfileDefinition, ProfileError> {
    toml::from_str(toml_content).map_err(|e| ProfileError::TomlParse {
        path: source_path.to_path_buf(),
        source: e,
    })
}

/// Validate a `ProfileDefinition` and compile it into a runtime `FormatProfile`.
pub fn validate_and_compile(
    def: ProfileDefinition,
    source_path: &Path,
    is_builtin: bool,
) -> Result<FormatProfile, ProfileError> {
    let id = &def.profile.id;

    let required: [(&str, &'static str); 5] = [
        (id.as_str(), "profile.id"),
        (def.profile.name.as_str(), "profile.name"),
        (def.detection.content_match.as_str(), "detection.content_match"),
        (def.parsing.line_pattern.as_str(), "parsing.line_pattern"),
        (def.parsing.timestamp_format.as_str(), "parsing.timestamp_format"),
    ];
    for (value, field) in required {
        if value.is_empty() {
            return Err(ProfileError::MissingField {
                profile_id: if id.is_empty() {
                    "(empty)".to_string()
                } else {
                    id.clone()
                },
                field,
            });
        }
    }

    let content_match = compile_regex(id, "detection.content_match", &def.detection.content_match)?;
    let line_pattern = compile_regex(id, "parsing.line_pattern", &def.parsing.line_pattern)?;

    let capture_names: Vec<&str> = line_pattern.capture_names().flatten().collect();
    if !capture_names.contains(&"message") {
        tracing::warn!(
            profile_id = id,
            source = %source_path.display(),
            "Profile line_pattern has no 'message' capture group; \
             entire line will be used as message"
        );
    }

    let mapping = def.severity_mapping;
    let mut severity_mapping = BTreeMap::new();
    for (severity, names) in [
        (Severity::Critical, mapping.critical),
        (Severity::Error, mapping.error),
        (Severity::Warning, mapping.warning),
        (Severity::Info, mapping.info),
        (Severity::Debug, mapping.debug),
        (Severity::Trace, mapping.trace),
    ] {
        if !names.is_empty() {
            severity_mapping.insert(severity, names);
        }
    }

    Ok(FormatProfile {
        id: id.clone(),
        name: def.profile.name,
        version: def.profile.version,
        description: def.profile.description,
        file_patterns: def.detection.file_patterns,
        content_match,
        line_pattern,
        timestamp_format: def.parsing.timestamp_format,
        multiline_mode: def.parsing.multiline_mode,
        severity_mapping,
        is_builtin,
    })
}

/// Compile a regex pattern with length validation to prevent ReDoS.
fn compile_regex(
    profile_id: &str,
    field: &'static str,
    pattern: &str,
) -> Result<Regex, ProfileError> {
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(ProfileError::RegexTooLong {
            profile_id: profile_id.to_string(),
            field,
            length: pattern.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }

    Regex::new(pattern).map_err(|e| ProfileError::InvalidRegex {
        profile_id: profile_id.to_string(),
        field,
        pattern: pattern.to_string(),
        source: e,
    })
}

// =============================================================================
// Auto-detection
// =============================================================================

/// Result of attempting to auto-detect a file's format.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Profile ID of the best match.
    pub profile_id: String,
    /// Confidence score (0.0 - 1.0). Ratio of lines matching content_match.
    pub confidence: f64,
}

/// Attempt to auto-detect the format of a file by sampling its first lines.
///
/// Tests each profile's `content_match` regex against the sample lines
/// and returns the profile with the highest match ratio, or None if no
/// profile reaches the minimum confidence. A filename glob match adds a
/// fixed bonus. The plain-text fallback never competes.
pub fn auto_detect(
    file_name: &str,
    sample_lines: &[String],
    profiles: &[FormatProfile],
) -> Option<DetectionResult> {
    let samples: Vec<&String> = sample_lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .collect();
    if samples.is_empty() || profiles.is_empty() {
        return None;
    }

    let mut best: Option<DetectionResult> = None;

    for profile in profiles {
        if profile.id == constants::FALLBACK_PROFILE_ID {
            continue;
        }

        let matches = samples
            .iter()
            .filter(|line| profile.content_match.is_match(line))
            .count();

        let mut confidence = matches as f64 / samples.len() as f64;

        let filename_match = profile.file_patterns.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(file_name))
                .unwrap_or(false)
        });
        if filename_match && matches > 0 {
            confidence = (confidence + constants::AUTO_DETECT_FILENAME_BONUS).min(1.0);
        }

        if confidence >= constants::AUTO_DETECT_MIN_CONFIDENCE
            && best.as_ref().map_or(true, |b| confidence > b.confidence)
        {
            best = Some(DetectionResult {
                profile_id: profile.id.clone(),
                confidence,
            });
        }
    }

    tracing::debug!(
        file = file_name,
        result = ?best,
        "Auto-detection complete"
    );

    best
}

/// Pick the profile for a file: the auto-detected one, else the plain-text
/// fallback, else the first profile available.
pub fn select_profile<'a>(
    file_name: &str,
    sample_lines: &[String],
    profiles: &'a [FormatProfile],
) -> Option<&'a FormatProfile> {
    if let Some(detected) = auto_detect(file_name, sample_lines, profiles) {
        if let Some(p) = profiles.iter().find(|p| p.id == detected.profile_id) {
            return Some(p);
        }
    }
    profiles
        .iter()
        .find(|p| p.id == constants::FALLBACK_PROFILE_ID)
        .or_else(|| profiles.first())
}

// =============================================================================
// Built-in profiles (embedded at compile time)
// =============================================================================

/// Embedded TOML content for built-in profiles as (filename, content).
///
/// Order matters: auto-detection keeps the first profile on a tie, so the
/// more specific formats come before the generic one.
pub fn builtin_profile_sources() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "log4j_default.toml",
            include_str!("../../profiles/log4j_default.toml"),
        ),
        (
            "syslog_rfc3164.toml",
            include_str!("../../profiles/syslog_rfc3164.toml"),
        ),
        (
            "generic_timestamp.toml",
            include_str!("../../profiles/generic_timestamp.toml"),
        ),
        (
            "plain_text.toml",
            include_str!("../../profiles/plain_text.toml"),
        ),
    ]
}

/// Load and validate all built-in profiles.
///
/// Invalid profiles are logged and skipped (non-fatal).
pub fn load_builtin_profiles() -> Vec<FormatProfile> {
    let mut profiles = Vec::new();

    for (filename, content) in builtin_profile_sources() {
        let path = std::path::PathBuf::from(format!("<builtin>/{filename}"));
        match parse_profile_toml(content, &path)
            .and_then(|def| validate_and_compile(def, &path, true))
        {
            Ok(profile) => {
                tracing::debug!(profile_id = %profile.id, "Loaded built-in profile");
                profiles.push(profile);
            }
            Err(e) => {
                tracing::error!(file = filename, error = %e, "Failed to load built-in profile");
            }
        }
    }

    profiles
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID_PROFILE_TOML: &str = r#"
[profile]
id = "test-profile"
name = "Test Profile"
description = "A test profile"

[detection]
file_patterns = ["test*.log"]
content_match = '^\[\d{4}-\d{2}-\d{2}'

[parsing]
line_pattern = '^\[(?P<timestamp>[^\]]+)\]\s(?P<level>\w+)\s+(?P<message>.+)$'
timestamp_format = "%Y-%m-%d %H:%M:%S"

[severity_mapping]
error = ["Error", "ERR"]
warning = ["Warning", "WARN"]
info = ["Info"]
"#;

    fn compile(toml: &str) -> Result<FormatProfile, ProfileError> {
        let path = PathBuf::from("test.toml");
        let def = parse_profile_toml(toml, &path)?;
        validate_and_compile(def, &path, false)
    }

    #[test]
    fn test_compile_valid_profile() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        assert_eq!(profile.id, "test-profile");
        assert_eq!(profile.version, "1.0");
        assert!(!profile.is_builtin);
        assert_eq!(profile.multiline_mode, MultilineMode::Continuation);
    }

    #[test]
    fn test_severity_mapping_case_insensitive_with_name_fallback() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        assert_eq!(profile.map_severity("ERR"), Some(Severity::Error));
        assert_eq!(profile.map_severity("error"), Some(Severity::Error));
        assert_eq!(profile.map_severity("Warning"), Some(Severity::Warning));
        // Not mapped by the profile but a recognised level name.
        assert_eq!(profile.map_severity("debug"), Some(Severity::Debug));
        assert_eq!(profile.map_severity("UNKNOWN_LEVEL"), None);
    }

    #[test]
    fn test_missing_required_field() {
        let toml = r#"
[profile]
id = ""
name = "Empty ID"

[detection]
content_match = "test"

[parsing]
line_pattern = "(?P<message>.+)"
timestamp_format = "%Y"
"#;
        match compile(toml).unwrap_err() {
            ProfileError::MissingField { field, .. } => assert_eq!(field, "profile.id"),
            other => panic!("Expected MissingField, got: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_regex() {
        let toml = r#"
[profile]
id = "bad-regex"
name = "Bad Regex"

[detection]
content_match = "[invalid"

[parsing]
line_pattern = "(?P<message>.+)"
timestamp_format = "%Y"
"#;
        assert!(matches!(
            compile(toml).unwrap_err(),
            ProfileError::InvalidRegex { .. }
        ));
    }

    #[test]
    fn test_regex_too_long() {
        let long_pattern = "a".repeat(constants::MAX_REGEX_PATTERN_LENGTH + 1);
        let toml = format!(
            r#"
[profile]
id = "long-regex"
name = "Long Regex"

[detection]
content_match = '{long_pattern}'

[parsing]
line_pattern = "(?P<message>.+)"
timestamp_format = "%Y"
"#
        );
        assert!(matches!(
            compile(&toml).unwrap_err(),
            ProfileError::RegexTooLong { .. }
        ));
    }

    #[test]
    fn test_auto_detect_matches_best_profile() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        let sample_lines = vec![
            "[2024-01-15 14:30:22] Error Something failed".to_string(),
            "[2024-01-15 14:30:23] Info Normal operation".to_string(),
            "Some unrelated line".to_string(),
        ];

        let det = auto_detect("test.log", &sample_lines, &[profile]).unwrap();
        assert_eq!(det.profile_id, "test-profile");
        // 2/3 lines match + filename bonus
        assert!(det.confidence > 0.8);
    }

    #[test]
    fn test_auto_detect_no_match() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        let sample_lines = vec!["no match here".to_string(), "also no match".to_string()];
        assert!(auto_detect("random.dat", &sample_lines, &[profile]).is_none());
    }

    #[test]
    fn test_select_profile_falls_back_to_plain_text() {
        let profiles = load_builtin_profiles();
        let samples = vec!["just words".to_string(), "more words".to_string()];
        let chosen = select_profile("notes.txt", &samples, &profiles).unwrap();
        assert_eq!(chosen.id, constants::FALLBACK_PROFILE_ID);
    }

    #[test]
    fn test_select_profile_detects_builtin_formats() {
        let profiles = load_builtin_profiles();
        let log4j = vec![
            "2024-01-15 14:30:22,123 ERROR [main] com.example.App - boom".to_string(),
            "2024-01-15 14:30:23,001 INFO  [main] com.example.App - ok".to_string(),
        ];
        assert_eq!(select_profile("app.log", &log4j, &profiles).unwrap().id, "log4j");

        let syslog = vec!["Jan 15 14:30:22 host sshd[12]: Accepted key".to_string()];
        assert_eq!(
            select_profile("auth.log", &syslog, &profiles).unwrap().id,
            "syslog-rfc3164"
        );
    }

    #[test]
    fn test_infer_severity_from_message() {
        let profile = compile(VALID_PROFILE_TOML).unwrap();
        assert_eq!(
            profile.infer_severity_from_message("An Error occurred in module X"),
            Some(Severity::Error)
        );
        assert_eq!(profile.infer_severity_from_message("Everything is fine"), None);
    }

    #[test]
    fn test_load_builtin_profiles() {
        let profiles = load_builtin_profiles();
        assert_eq!(profiles.len(), builtin_profile_sources().len());
        assert!(profiles.iter().any(|p| p.id == "plain-text"));
        assert!(profiles.iter().all(|p| p.is_builtin));
    }
}
