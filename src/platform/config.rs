// LogScope - platform/config.rs
//
// Platform directory resolution and config.toml loading with startup
// validation. Every value is range-checked against a named constant; an
// invalid value falls back to its default and produces a warning.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::core::anomaly::AnomalyConfig;
use crate::core::timeline::ZoomLevel;
use crate::platform::fs::DiscoveryConfig;
use crate::util::constants;
use directories::ProjectDirs;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Resolved platform paths for configuration and data.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logscope/).
    pub config_dir: PathBuf,

    /// User profile directory (e.g. ~/.config/logscope/profiles/).
    pub user_profiles_dir: PathBuf,

    /// Data directory; holds presets.json.
    pub data_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to the current directory if platform dirs cannot be
    /// determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            let user_profiles_dir = config_dir.join(constants::PROFILES_DIR_NAME);
            let data_dir = proj_dirs.data_dir().to_path_buf();

            tracing::debug!(
                config = %config_dir.display(),
                profiles = %user_profiles_dir.display(),
                data = %data_dir.display(),
                "Platform paths resolved"
            );

            Self {
                config_dir,
                user_profiles_dir,
                data_dir,
            }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self::rooted_at(Path::new("."))
        }
    }

    /// All paths under one root directory.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.to_path_buf(),
            user_profiles_dir: root.join(constants::PROFILES_DIR_NAME),
            data_dir: root.to_path_buf(),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }

    pub fn presets_file(&self) -> PathBuf {
        self.data_dir.join(constants::PRESETS_FILE_NAME)
    }
}

// =============================================================================
// config.toml shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are ignored so a newer config file still loads.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub ingest: IngestSection,
    pub parsing: ParsingSection,
    pub timeline: TimelineSection,
    pub anomaly: AnomalySection,
    pub discovery: DiscoverySection,
    pub logging: LoggingSection,
}

/// `[ingest]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// Read chunk size in bytes.
    pub chunk_size_bytes: Option<usize>,
    /// Files above this size are memory mapped.
    pub large_file_threshold_bytes: Option<u64>,
    /// Entries per `Entries` event.
    pub entry_batch_size: Option<usize>,
}

/// `[parsing]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ParsingSection {
    /// Maximum single entry size in bytes.
    pub max_entry_size_bytes: Option<usize>,
    /// Lines sampled for format auto-detection.
    pub content_detection_lines: Option<usize>,
}

/// `[timeline]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct TimelineSection {
    pub default_zoom: Option<String>,
    pub max_buckets: Option<usize>,
}

/// `[anomaly]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct AnomalySection {
    pub rate_window_secs: Option<i64>,
    pub baseline_windows: Option<usize>,
    pub sensitivity: Option<f64>,
    pub similarity_threshold: Option<f64>,
    pub min_cluster_size: Option<usize>,
}

/// `[discovery]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Maximum directory recursion depth.
    pub max_depth: Option<usize>,
    /// Maximum files to discover per scan.
    pub max_files: Option<usize>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Validated application configuration derived from `config.toml`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Ingest --
    pub chunk_size: usize,
    pub large_file_threshold: u64,
    pub entry_batch_size: usize,

    // -- Parsing --
    pub max_entry_size: usize,
    pub content_detection_lines: usize,

    // -- Timeline --
    pub default_zoom: ZoomLevel,
    pub max_buckets: usize,

    // -- Anomaly --
    pub anomaly: AnomalyConfig,

    // -- Discovery --
    pub max_depth: usize,
    pub max_files: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

impl AppConfig {
    /// The `[discovery]` section as walker settings.
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            max_depth: self.max_depth,
            max_files: self.max_files,
            include_patterns: self.include_patterns.clone(),
            exclude_patterns: self.exclude_patterns.clone(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            large_file_threshold: constants::DEFAULT_LARGE_FILE_THRESHOLD,
            entry_batch_size: constants::DEFAULT_ENTRY_BATCH_SIZE,
            max_entry_size: constants::DEFAULT_MAX_ENTRY_SIZE,
            content_detection_lines: constants::DEFAULT_CONTENT_DETECTION_LINES,
            default_zoom: ZoomLevel::default(),
            max_buckets: constants::MAX_TIMELINE_BUCKETS,
            anomaly: AnomalyConfig::default(),
            max_depth: constants::DEFAULT_MAX_DEPTH,
            max_files: constants::DEFAULT_MAX_FILES,
            include_patterns: to_strings(constants::DEFAULT_INCLUDE_PATTERNS),
            exclude_patterns: to_strings(constants::DEFAULT_EXCLUDE_PATTERNS),
            log_level: None,
        }
    }
}

fn to_strings(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

/// Accept `value` if it lies in `range`, otherwise record a warning.
fn in_range<T: PartialOrd + Display + Copy>(
    key: &str,
    value: Option<T>,
    range: RangeInclusive<T>,
    default: T,
    warnings: &mut Vec<String>,
) -> Option<T> {
    let value = value?;
    if range.contains(&value) {
        Some(value)
    } else {
        warnings.push(format!(
            "{key} = {value} is out of range ({}-{}). Using default ({default}).",
            range.start(),
            range.end(),
        ));
        None
    }
}

/// Load and validate `config.toml` from the given config directory.
///
/// Returns the validated config and a list of non-fatal warnings. A
/// missing file yields defaults with no warnings (first run); an
/// unreadable or unparseable file yields defaults with one warning.
pub fn load_config(config_dir: &Path) -> (AppConfig, Vec<String>) {
    let config_path = config_dir.join(constants::CONFIG_FILE_NAME);

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), Vec::new());
    }

    let content = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!(
                "Could not read config file '{}': {e}. Using defaults.",
                config_path.display()
            );
            tracing::warn!("{}", msg);
            return (AppConfig::default(), vec![msg]);
        }
    };

    let (config, warnings) = parse_config(&content, &config_path);
    tracing::info!(
        path = %config_path.display(),
        warnings = warnings.len(),
        "Loaded config.toml"
    );
    (config, warnings)
}

/// Validate config.toml content. `path` is used in messages only.
pub fn parse_config(content: &str, path: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    let raw: RawConfig = match toml::from_str(content) {
        Ok(r) => r,
        Err(e) => {
            let msg = format!(
                "Failed to parse config file '{}': {e}. Using defaults.",
                path.display()
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    let mut config = AppConfig::default();
    let w = &mut warnings;

    // -- Ingest --
    if let Some(v) = in_range(
        "[ingest] chunk_size_bytes",
        raw.ingest.chunk_size_bytes,
        constants::MIN_CHUNK_SIZE..=constants::MAX_CHUNK_SIZE,
        constants::DEFAULT_CHUNK_SIZE,
        w,
    ) {
        config.chunk_size = v;
    }
    if let Some(v) = in_range(
        "[ingest] large_file_threshold_bytes",
        raw.ingest.large_file_threshold_bytes,
        1..=u64::MAX,
        constants::DEFAULT_LARGE_FILE_THRESHOLD,
        w,
    ) {
        config.large_file_threshold = v;
    }
    if let Some(v) = in_range(
        "[ingest] entry_batch_size",
        raw.ingest.entry_batch_size,
        constants::MIN_ENTRY_BATCH_SIZE..=constants::MAX_ENTRY_BATCH_SIZE,
        constants::DEFAULT_ENTRY_BATCH_SIZE,
        w,
    ) {
        config.entry_batch_size = v;
    }

    // -- Parsing --
    if let Some(v) = in_range(
        "[parsing] max_entry_size_bytes",
        raw.parsing.max_entry_size_bytes,
        constants::MIN_MAX_ENTRY_SIZE..=constants::ABSOLUTE_MAX_ENTRY_SIZE,
        constants::DEFAULT_MAX_ENTRY_SIZE,
        w,
    ) {
        config.max_entry_size = v;
    }
    if let Some(v) = in_range(
        "[parsing] content_detection_lines",
        raw.parsing.content_detection_lines,
        1..=1_000,
        constants::DEFAULT_CONTENT_DETECTION_LINES,
        w,
    ) {
        config.content_detection_lines = v;
    }

    // -- Timeline --
    if let Some(ref zoom) = raw.timeline.default_zoom {
        match zoom.parse::<ZoomLevel>() {
            Ok(z) => config.default_zoom = z,
            Err(e) => w.push(format!(
                "[timeline] default_zoom: {e}. Using default ({}).",
                ZoomLevel::default()
            )),
        }
    }
    if let Some(v) = in_range(
        "[timeline] max_buckets",
        raw.timeline.max_buckets,
        constants::MIN_TIMELINE_BUCKETS..=constants::ABSOLUTE_MAX_TIMELINE_BUCKETS,
        constants::MAX_TIMELINE_BUCKETS,
        w,
    ) {
        config.max_buckets = v;
    }

    // -- Anomaly --
    let anomaly = &mut config.anomaly;
    if let Some(v) = in_range(
        "[anomaly] rate_window_secs",
        raw.anomaly.rate_window_secs,
        constants::MIN_RATE_WINDOW_SECS..=constants::MAX_RATE_WINDOW_SECS,
        constants::DEFAULT_RATE_WINDOW_SECS,
        w,
    ) {
        anomaly.rate_window_secs = v;
    }
    if let Some(v) = in_range(
        "[anomaly] baseline_windows",
        raw.anomaly.baseline_windows,
        constants::DEFAULT_MIN_BASELINE_WINDOWS..=constants::MAX_BASELINE_WINDOWS,
        constants::DEFAULT_BASELINE_WINDOWS,
        w,
    ) {
        anomaly.baseline_windows = v;
    }
    if let Some(v) = in_range(
        "[anomaly] sensitivity",
        raw.anomaly.sensitivity,
        constants::MIN_SENSITIVITY..=constants::MAX_SENSITIVITY,
        constants::DEFAULT_SENSITIVITY,
        w,
    ) {
        anomaly.sensitivity = v;
    }
    if let Some(v) = in_range(
        "[anomaly] similarity_threshold",
        raw.anomaly.similarity_threshold,
        0.05..=1.0,
        constants::DEFAULT_SIMILARITY_THRESHOLD,
        w,
    ) {
        anomaly.similarity_threshold = v;
    }
    if let Some(v) = in_range(
        "[anomaly] min_cluster_size",
        raw.anomaly.min_cluster_size,
        2..=100_000,
        constants::DEFAULT_MIN_CLUSTER_SIZE,
        w,
    ) {
        anomaly.min_cluster_size = v;
    }

    // -- Discovery --
    if let Some(v) = in_range(
        "[discovery] max_depth",
        raw.discovery.max_depth,
        1..=constants::ABSOLUTE_MAX_DEPTH,
        constants::DEFAULT_MAX_DEPTH,
        w,
    ) {
        config.max_depth = v;
    }
    if let Some(v) = in_range(
        "[discovery] max_files",
        raw.discovery.max_files,
        constants::MIN_MAX_FILES..=constants::ABSOLUTE_MAX_FILES,
        constants::DEFAULT_MAX_FILES,
        w,
    ) {
        config.max_files = v;
    }
    for (key, patterns, target) in [
        (
            "include_patterns",
            raw.discovery.include_patterns,
            &mut config.include_patterns,
        ),
        (
            "exclude_patterns",
            raw.discovery.exclude_patterns,
            &mut config.exclude_patterns,
        ),
    ] {
        let Some(patterns) = patterns else { continue };
        match patterns.iter().find(|p| glob::Pattern::new(p).is_err()) {
            Some(bad) => w.push(format!(
                "[discovery] {key} contains invalid glob \"{bad}\". Using defaults."
            )),
            None => *target = patterns,
        }
    }

    // -- Logging --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            w.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    (config, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> (AppConfig, Vec<String>) {
        parse_config(content, Path::new("config.toml"))
    }

    #[test]
    fn test_empty_config_yields_defaults() {
        let (config, warnings) = parse("");
        assert!(warnings.is_empty());
        assert_eq!(config.chunk_size, constants::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.default_zoom, ZoomLevel::Minute);
        assert_eq!(config.anomaly, AnomalyConfig::default());
    }

    #[test]
    fn test_valid_values_are_applied() {
        let (config, warnings) = parse(
            r#"
            [ingest]
            chunk_size_bytes = 65536
            entry_batch_size = 500

            [timeline]
            default_zoom = "hour"

            [anomaly]
            sensitivity = 2.5
            min_cluster_size = 3

            [logging]
            level = "DEBUG"

            [future_section]
            whatever = 1
            "#,
        );
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.entry_batch_size, 500);
        assert_eq!(config.default_zoom, ZoomLevel::Hour);
        assert_eq!(config.anomaly.sensitivity, 2.5);
        assert_eq!(config.anomaly.min_cluster_size, 3);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_out_of_range_values_fall_back_with_warning() {
        let (config, warnings) = parse(
            r#"
            [ingest]
            chunk_size_bytes = 1
            [timeline]
            default_zoom = "fortnight"
            [discovery]
            max_depth = 0
            include_patterns = ["[bad"]
            "#,
        );
        assert_eq!(warnings.len(), 4);
        assert!(warnings[0].contains("chunk_size_bytes"));
        assert_eq!(config.chunk_size, constants::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.default_zoom, ZoomLevel::Minute);
        assert_eq!(config.max_depth, constants::DEFAULT_MAX_DEPTH);
        assert_eq!(
            config.include_patterns,
            to_strings(constants::DEFAULT_INCLUDE_PATTERNS)
        );
    }

    #[test]
    fn test_malformed_toml_yields_defaults() {
        let (config, warnings) = parse("[ingest\nchunk_size_bytes = ");
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.max_files, constants::DEFAULT_MAX_FILES);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, warnings) = load_config(dir.path());
        assert!(warnings.is_empty());

        std::fs::write(
            dir.path().join(constants::CONFIG_FILE_NAME),
            "[discovery]\nmax_files = 42\n",
        )
        .unwrap();
        let (config, warnings) = load_config(dir.path());
        assert!(warnings.is_empty());
        assert_eq!(config.max_files, 42);
    }
}
