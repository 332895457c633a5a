// LogScope - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation; every variant keeps the causal chain
// for diagnostic logging. Subsystem errors convert into `LogScopeError`.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LogScope operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogScopeError {
    /// Profile loading or validation failed.
    Profile(ProfileError),

    /// File discovery failed.
    Discovery(DiscoveryError),

    /// A line could not be parsed (normally recorded, not raised).
    Parse(ParseError),

    /// A worker failed to process a file.
    Processing(ProcessingError),

    /// A filter or rule definition was rejected.
    Validation(ValidationError),

    /// An index update was rejected.
    Index(IndexError),

    /// An anomaly detection run did not produce a usable result.
    Detection(DetectionError),

    /// Export operation failed.
    Export(ExportError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// Preset storage failed.
    Preset(PresetError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for LogScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile(e) => write!(f, "Profile error: {e}"),
            Self::Discovery(e) => write!(f, "Discovery error: {e}"),
            Self::Parse(e) => write!(f, "Parse error: {e}"),
            Self::Processing(e) => write!(f, "Processing error: {e}"),
            Self::Validation(e) => write!(f, "Validation error: {e}"),
            Self::Index(e) => write!(f, "Index error: {e}"),
            Self::Detection(e) => write!(f, "Detection error: {e}"),
            Self::Export(e) => write!(f, "Export error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Preset(e) => write!(f, "Preset error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LogScopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Profile(e) => Some(e),
            Self::Discovery(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Processing(e) => Some(e),
            Self::Validation(e) => Some(e),
            Self::Index(e) => Some(e),
            Self::Detection(e) => Some(e),
            Self::Export(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Preset(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile errors
// ---------------------------------------------------------------------------

/// Errors related to format profile loading and validation.
#[derive(Debug)]
pub enum ProfileError {
    /// TOML file could not be parsed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Profile file exceeds the maximum allowed size.
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    /// A required field is missing from the profile definition.
    MissingField {
        profile_id: String,
        field: &'static str,
    },

    /// A regex pattern in the profile is invalid.
    InvalidRegex {
        profile_id: String,
        field: &'static str,
        pattern: String,
        source: regex::Error,
    },

    /// A regex pattern exceeds the maximum allowed length.
    RegexTooLong {
        profile_id: String,
        field: &'static str,
        length: usize,
        max_length: usize,
    },

    /// Maximum number of profiles exceeded.
    TooManyProfiles { count: usize, max: usize },

    /// I/O error reading a profile file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Failed to parse TOML '{}': {source}", path.display())
            }
            Self::FileTooLarge {
                path,
                size,
                max_size,
            } => write!(
                f,
                "Profile '{}' is {size} bytes, exceeds maximum of {max_size} bytes",
                path.display()
            ),
            Self::MissingField { profile_id, field } => {
                write!(
                    f,
                    "Profile '{profile_id}': missing required field '{field}'"
                )
            }
            Self::InvalidRegex {
                profile_id,
                field,
                pattern,
                source,
            } => write!(
                f,
                "Profile '{profile_id}': invalid regex in '{field}' ('{pattern}'): {source}"
            ),
            Self::RegexTooLong {
                profile_id,
                field,
                length,
                max_length,
            } => write!(
                f,
                "Profile '{profile_id}': regex in '{field}' is {length} chars, \
                 exceeds maximum of {max_length}"
            ),
            Self::TooManyProfiles { count, max } => {
                write!(f, "Too many profiles loaded ({count}), maximum is {max}")
            }
            Self::Io { path, source } => {
                write!(
                    f,
                    "I/O error reading profile '{}': {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ProfileError> for LogScopeError {
    fn from(e: ProfileError) -> Self {
        Self::Profile(e)
    }
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors related to expanding a directory argument into log files.
#[derive(Debug)]
pub enum DiscoveryError {
    /// The path does not exist or is not accessible.
    RootNotFound { path: PathBuf },

    /// The path is not a directory.
    NotADirectory { path: PathBuf },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootNotFound { path } => {
                write!(f, "Path '{}' does not exist", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "Path '{}' is not a directory", path.display())
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<DiscoveryError> for LogScopeError {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// A single line that could not be fully parsed.
///
/// These never abort a file: the line is kept as a raw-only entry and the
/// error is recorded in the file's parse statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line did not match the profile and carried no timestamp.
    LineParse {
        file_id: u64,
        line_number: u64,
        reason: String,
    },

    /// A timestamp capture could not be parsed.
    TimestampParse {
        file_id: u64,
        line_number: u64,
        raw_timestamp: String,
        format: String,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineParse {
                file_id,
                line_number,
                reason,
            } => write!(f, "file {file_id} line {line_number}: {reason}"),
            Self::TimestampParse {
                file_id,
                line_number,
                raw_timestamp,
                format,
            } => write!(
                f,
                "file {file_id} line {line_number}: cannot parse timestamp \
                 '{raw_timestamp}' with format '{format}'"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for LogScopeError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

// ---------------------------------------------------------------------------
// Processing errors
// ---------------------------------------------------------------------------

/// Worker-level failures. Each aborts processing of one file only.
#[derive(Debug)]
pub enum ProcessingError {
    /// The file could not be opened.
    Open { path: PathBuf, source: io::Error },

    /// Reading a chunk failed part-way through the file.
    Read {
        path: PathBuf,
        chunk_index: u64,
        source: io::Error,
    },

    /// Memory mapping a large file failed.
    Map { path: PathBuf, source: io::Error },

    /// The worker thread panicked.
    WorkerPanicked { file_id: u64 },

    /// The worker thread could not be reached.
    WorkerUnavailable { file_id: u64 },

    /// No profile (not even the fallback) is available for the file.
    NoProfile { path: PathBuf },
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "Cannot open '{}': {source}", path.display())
            }
            Self::Read {
                path,
                chunk_index,
                source,
            } => write!(
                f,
                "Read failed on '{}' at chunk {chunk_index}: {source}",
                path.display()
            ),
            Self::Map { path, source } => {
                write!(f, "Cannot memory-map '{}': {source}", path.display())
            }
            Self::WorkerPanicked { file_id } => {
                write!(f, "Worker for file {file_id} panicked")
            }
            Self::WorkerUnavailable { file_id } => {
                write!(f, "Worker for file {file_id} is no longer reachable")
            }
            Self::NoProfile { path } => {
                write!(f, "No format profile available for '{}'", path.display())
            }
        }
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Read { source, .. } => Some(source),
            Self::Map { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ProcessingError> for LogScopeError {
    fn from(e: ProcessingError) -> Self {
        Self::Processing(e)
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A malformed filter or rule definition, rejected at creation time.
#[derive(Debug)]
pub enum ValidationError {
    /// A set-valued field (levels, sources) is empty.
    EmptyValueSet {
        filter_id: String,
        field: &'static str,
    },

    /// A text filter has no search text.
    EmptyText { filter_id: String },

    /// A text or regex filter names no fields to search.
    NoSearchFields { filter_id: String },

    /// A regex pattern failed to compile.
    InvalidRegex {
        filter_id: String,
        pattern: String,
        source: regex::Error,
    },

    /// A regex pattern exceeds the maximum allowed length.
    RegexTooLong {
        filter_id: String,
        length: usize,
        max_length: usize,
    },

    /// A time range has its start after its end.
    InvalidTimeRange { start: String, end: String },

    /// A saved filter contains itself directly or transitively.
    CyclicSavedFilter { filter_id: String },

    /// Saved filters are nested deeper than allowed.
    NestingTooDeep { filter_id: String, max_depth: usize },

    /// Two filters in one set share an id.
    DuplicateFilterId { filter_id: String },

    /// A mutation referenced a filter id that does not exist.
    UnknownFilter { filter_id: String },

    /// A sequence rule or detector setting is unusable.
    InvalidRule { rule: String, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValueSet { filter_id, field } => {
                write!(f, "Filter '{filter_id}': '{field}' must not be empty")
            }
            Self::EmptyText { filter_id } => {
                write!(f, "Filter '{filter_id}': search text must not be empty")
            }
            Self::NoSearchFields { filter_id } => {
                write!(f, "Filter '{filter_id}': at least one field must be searched")
            }
            Self::InvalidRegex {
                filter_id,
                pattern,
                source,
            } => write!(
                f,
                "Filter '{filter_id}': invalid regex '{pattern}': {source}"
            ),
            Self::RegexTooLong {
                filter_id,
                length,
                max_length,
            } => write!(
                f,
                "Filter '{filter_id}': regex is {length} chars, exceeds maximum of {max_length}"
            ),
            Self::InvalidTimeRange { start, end } => {
                write!(f, "Time range start {start} is after end {end}")
            }
            Self::CyclicSavedFilter { filter_id } => {
                write!(f, "Saved filter '{filter_id}' contains itself")
            }
            Self::NestingTooDeep {
                filter_id,
                max_depth,
            } => write!(
                f,
                "Saved filter '{filter_id}' is nested deeper than {max_depth} levels"
            ),
            Self::DuplicateFilterId { filter_id } => {
                write!(f, "Filter id '{filter_id}' is already in use")
            }
            Self::UnknownFilter { filter_id } => {
                write!(f, "No filter with id '{filter_id}'")
            }
            Self::InvalidRule { rule, reason } => {
                write!(f, "Rule '{rule}': {reason}")
            }
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ValidationError> for LogScopeError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Index errors
// ---------------------------------------------------------------------------

/// Errors raised by the derived indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// An entry id was delivered twice. The whole batch is rejected.
    DuplicateEntry { file_id: u64, seq: u64 },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateEntry { file_id, seq } => {
                write!(f, "Entry {file_id}:{seq} is already indexed")
            }
        }
    }
}

impl std::error::Error for IndexError {}

impl From<IndexError> for LogScopeError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

// ---------------------------------------------------------------------------
// Aggregation conditions
// ---------------------------------------------------------------------------

/// Conditions reported alongside a degraded (empty) timeline.
///
/// Aggregation never fails; these ride on the result instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationError {
    /// No timestamped entries fall in the requested range.
    EmptyRange,

    /// The range at this zoom level would need too many buckets.
    BucketLimitExceeded { requested: u64, max: usize },
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRange => f.write_str("No entries in the requested range"),
            Self::BucketLimitExceeded { requested, max } => write!(
                f,
                "Range needs {requested} buckets, maximum is {max}. Choose a coarser zoom level."
            ),
        }
    }
}

impl std::error::Error for AggregationError {}

// ---------------------------------------------------------------------------
// Detection errors
// ---------------------------------------------------------------------------

/// Reasons an anomaly detection run produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    /// The run was cancelled before it finished.
    Cancelled,

    /// The entry set changed while the run was in flight.
    Stale {
        run_generation: u64,
        current_generation: u64,
    },

    /// The detection thread ended without delivering a result.
    WorkerLost { run_id: u64 },
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("Anomaly detection was cancelled"),
            Self::Stale {
                run_generation,
                current_generation,
            } => write!(
                f,
                "Anomaly results for generation {run_generation} discarded; \
                 store is at generation {current_generation}"
            ),
            Self::WorkerLost { run_id } => {
                write!(f, "Anomaly detection run {run_id} ended without a result")
            }
        }
    }
}

impl std::error::Error for DetectionError {}

impl From<DetectionError> for LogScopeError {
    fn from(e: DetectionError) -> Self {
        Self::Detection(e)
    }
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors related to export operations.
#[derive(Debug)]
pub enum ExportError {
    /// I/O error writing the export file.
    Io { path: PathBuf, source: io::Error },

    /// CSV serialisation error.
    Csv { path: PathBuf, source: csv::Error },

    /// JSON serialisation error.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Export would exceed maximum entry count.
    TooManyEntries { count: usize, max: usize },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Export I/O error '{}': {source}", path.display())
            }
            Self::Csv { path, source } => {
                write!(f, "CSV export error '{}': {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "JSON export error '{}': {source}", path.display())
            }
            Self::TooManyEntries { count, max } => write!(
                f,
                "Export of {count} entries exceeds maximum of {max}. \
                 Apply filters to reduce the result set."
            ),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ExportError> for LogScopeError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for LogScopeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Preset errors
// ---------------------------------------------------------------------------

/// Errors related to saved filter preset storage.
#[derive(Debug)]
pub enum PresetError {
    /// Reading or writing the preset file failed.
    Io { path: PathBuf, source: io::Error },

    /// The preset file is not valid JSON for the preset schema.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The preset file was written by an incompatible version.
    VersionMismatch { found: u32, expected: u32 },

    /// A stored preset contains a filter that fails validation.
    Invalid {
        preset_id: String,
        source: ValidationError,
    },
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Preset I/O error '{}': {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "Preset file '{}' is malformed: {source}", path.display())
            }
            Self::VersionMismatch { found, expected } => write!(
                f,
                "Preset file version {found} is not supported (expected {expected})"
            ),
            Self::Invalid { preset_id, source } => {
                write!(f, "Preset '{preset_id}' is invalid: {source}")
            }
        }
    }
}

impl std::error::Error for PresetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Invalid { source, .. } => Some(source),
            Self::VersionMismatch { .. } => None,
        }
    }
}

impl From<PresetError> for LogScopeError {
    fn from(e: PresetError) -> Self {
        Self::Preset(e)
    }
}

/// Convenience type alias for LogScope results.
pub type Result<T> = std::result::Result<T, LogScopeError>;
