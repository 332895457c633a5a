// LogScope - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no
// platform dependencies. These types are the shared vocabulary across
// all layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

/// Identifier of a file within one analysis session.
pub type FileId = u64;

// =============================================================================
// Entry identity
// =============================================================================

/// Unique identifier of a log entry.
///
/// `seq` is allocated by the worker that owns the file, so ids are unique
/// across concurrently processed files without any shared counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntryId {
    pub file_id: FileId,
    pub seq: u64,
}

impl EntryId {
    pub fn new(file_id: FileId, seq: u64) -> Self {
        Self { file_id, seq }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.seq)
    }
}

// =============================================================================
// Log Entry (normalised output of parsing)
// =============================================================================

/// A single parsed log event, normalised across all formats.
///
/// Immutable once emitted by the parser. Entries whose timestamp could not
/// be extracted carry only `id`, `file_id`, `line_number` and `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,

    /// Owning file.
    pub file_id: FileId,

    /// Line number in the source file where this entry begins (1-based).
    pub line_number: u64,

    /// Parsed timestamp in UTC.
    pub timestamp: Option<DateTime<Utc>>,

    /// Normalised severity level.
    pub level: Option<Severity>,

    /// Source component, host or module name (format-dependent).
    pub source: Option<String>,

    /// Message text, including any merged continuation lines.
    pub message: String,

    /// Original unparsed text from the source file.
    pub raw: String,
}

impl LogEntry {
    /// Build a raw-only entry for a line whose fields could not be extracted.
    pub fn raw_only(id: EntryId, line_number: u64, raw: String) -> Self {
        Self {
            id,
            file_id: id.file_id,
            line_number,
            timestamp: None,
            level: None,
            source: None,
            message: String::new(),
            raw,
        }
    }

    /// True when the parser extracted no structured fields from this line.
    pub fn is_raw_only(&self) -> bool {
        self.timestamp.is_none() && self.level.is_none() && self.source.is_none()
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Normalised severity levels, ordered from most to least severe.
///
/// All format-specific level strings (Error, ERR, E, error, Failed, etc.)
/// are mapped to one of these variants via the profile's severity mapping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl Severity {
    /// Returns all variants in display order (most severe first).
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Critical,
            Severity::Error,
            Severity::Warning,
            Severity::Info,
            Severity::Debug,
            Severity::Trace,
        ]
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
            Severity::Debug => "Debug",
            Severity::Trace => "Trace",
        }
    }

    /// Short label for compact display (e.g. table columns).
    pub fn short_label(&self) -> &'static str {
        match self {
            Severity::Critical => "CRIT",
            Severity::Error => "ERR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DBG",
            Severity::Trace => "TRC",
        }
    }

    /// Parse a user-supplied level name (case-insensitive, common aliases).
    pub fn parse_name(name: &str) -> Option<Severity> {
        match name.trim().to_ascii_lowercase().as_str() {
            "critical" | "crit" | "fatal" | "emerg" | "alert" => Some(Severity::Critical),
            "error" | "err" => Some(Severity::Error),
            "warning" | "warn" => Some(Severity::Warning),
            "info" | "information" | "notice" => Some(Severity::Info),
            "debug" | "dbg" => Some(Severity::Debug),
            "trace" | "verbose" => Some(Severity::Trace),
            _ => None,
        }
    }

    /// Critical or Error.
    pub fn is_error_level(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Error)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Severity counters
// =============================================================================

/// Per-severity counters. `unleveled` counts entries with no level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub error: usize,
    pub warning: usize,
    pub info: usize,
    pub debug: usize,
    pub trace: usize,
    pub unleveled: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, level: Option<Severity>) {
        match level {
            Some(Severity::Critical) => self.critical += 1,
            Some(Severity::Error) => self.error += 1,
            Some(Severity::Warning) => self.warning += 1,
            Some(Severity::Info) => self.info += 1,
            Some(Severity::Debug) => self.debug += 1,
            Some(Severity::Trace) => self.trace += 1,
            None => self.unleveled += 1,
        }
    }

    pub fn get(&self, level: Option<Severity>) -> usize {
        match level {
            Some(Severity::Critical) => self.critical,
            Some(Severity::Error) => self.error,
            Some(Severity::Warning) => self.warning,
            Some(Severity::Info) => self.info,
            Some(Severity::Debug) => self.debug,
            Some(Severity::Trace) => self.trace,
            None => self.unleveled,
        }
    }

    pub fn merge(&mut self, other: &SeverityCounts) {
        self.critical += other.critical;
        self.error += other.error;
        self.warning += other.warning;
        self.info += other.info;
        self.debug += other.debug;
        self.trace += other.trace;
        self.unleveled += other.unleveled;
    }

    pub fn total(&self) -> usize {
        self.critical
            + self.error
            + self.warning
            + self.info
            + self.debug
            + self.trace
            + self.unleveled
    }
}

// =============================================================================
// Multiline mode
// =============================================================================

/// How the parser handles lines that do not match the profile's line_pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultilineMode {
    /// Append non-matching, timestamp-less lines to the previous entry's
    /// message. This is the correct behaviour for stack traces.
    #[default]
    Continuation,

    /// Treat every non-matching line as its own entry.
    Raw,
}

// =============================================================================
// Format Profile (runtime representation)
// =============================================================================

/// Runtime representation of a format profile after TOML parsing and
/// regex compilation. Chosen once per file and shared by every line.
#[derive(Debug, Clone)]
pub struct FormatProfile {
    /// Unique profile identifier (e.g. "log4j").
    pub id: String,

    /// Human-readable name.
    pub name: String,

    pub version: String,

    pub description: String,

    /// Glob patterns for filename-based detection hints.
    pub file_patterns: Vec<String>,

    /// Compiled regex for content-based format detection.
    pub content_match: regex::Regex,

    /// Compiled regex for parsing individual log lines.
    /// Named capture groups: timestamp, level, source, message.
    pub line_pattern: regex::Regex,

    /// chrono format string for parsing the timestamp capture group.
    pub timestamp_format: String,

    pub multiline_mode: MultilineMode,

    /// Maps normalised Severity variants to lists of format-specific strings.
    /// Matching is case-insensitive.
    pub severity_mapping: BTreeMap<Severity, Vec<String>>,

    /// Whether this is a built-in profile (true) or user-defined (false).
    pub is_builtin: bool,
}

impl FormatProfile {
    /// Determines the normalised severity for a raw level string.
    ///
    /// Checks each severity mapping (case-insensitive); falls back to the
    /// common level names when the profile has no mapping for the value.
    pub fn map_severity(&self, raw_level: &str) -> Option<Severity> {
        let raw = raw_level.trim();
        for (severity, patterns) in &self.severity_mapping {
            if patterns.iter().any(|p| p.eq_ignore_ascii_case(raw)) {
                return Some(*severity);
            }
        }
        Severity::parse_name(raw)
    }

    /// Determines severity by scanning the message text for mapped keywords.
    ///
    /// Used for formats that have no explicit severity field. Returns the
    /// most severe match found, or `None` when nothing matches.
    pub fn infer_severity_from_message(&self, message: &str) -> Option<Severity> {
        let msg_lower = message.to_lowercase();
        Severity::all().iter().copied().find(|severity| {
            self.severity_mapping.get(severity).is_some_and(|patterns| {
                patterns
                    .iter()
                    .any(|p| msg_lower.contains(&p.to_lowercase()))
            })
        })
    }
}

// =============================================================================
// File metadata
// =============================================================================

/// Metadata for one ingested file.
///
/// Created when the file is submitted; the derived fields (`start_time`
/// onwards) are filled only on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: FileId,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// File extension, or "text" when the file has none.
    pub file_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// ceil(size / chunk_size).
    pub total_chunks: u64,
    /// Format profile chosen for the file.
    pub profile_id: Option<String>,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub log_count: Option<usize>,
    pub log_levels: BTreeMap<Severity, usize>,
    pub sources: BTreeSet<String>,
}

impl FileMetadata {
    pub fn new(
        id: FileId,
        path: PathBuf,
        size: u64,
        last_modified: Option<DateTime<Utc>>,
        chunk_size: usize,
    ) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "text".to_string());
        Self {
            id,
            name,
            path,
            size,
            file_type,
            last_modified,
            total_chunks: size.div_ceil(chunk_size.max(1) as u64),
            profile_id: None,
            start_time: None,
            end_time: None,
            log_count: None,
            log_levels: BTreeMap::new(),
            sources: BTreeSet::new(),
        }
    }

    /// True once the worker has reported completion.
    pub fn is_processed(&self) -> bool {
        self.log_count.is_some()
    }

    /// Fill the derived fields from a completed summary.
    pub fn finalize(&mut self, summary: FileSummary) {
        self.log_count = Some(summary.count);
        self.log_levels = summary.levels;
        self.sources = summary.sources;
        self.start_time = summary.start;
        self.end_time = summary.end;
    }
}

/// Running totals over a file's entries, built batch by batch while the
/// file streams in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSummary {
    pub count: usize,
    pub levels: BTreeMap<Severity, usize>,
    pub sources: BTreeSet<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl FileSummary {
    pub fn add(&mut self, entry: &LogEntry) {
        self.count += 1;
        if let Some(level) = entry.level {
            *self.levels.entry(level).or_default() += 1;
        }
        if let Some(ref source) = entry.source {
            if !self.sources.contains(source) {
                self.sources.insert(source.clone());
            }
        }
        if let Some(ts) = entry.timestamp {
            self.start = Some(self.start.map_or(ts, |s| s.min(ts)));
            self.end = Some(self.end.map_or(ts, |e| e.max(ts)));
        }
    }

    pub fn extend<'a>(&mut self, entries: impl IntoIterator<Item = &'a LogEntry>) {
        for entry in entries {
            self.add(entry);
        }
    }
}

// =============================================================================
// Transient reader output
// =============================================================================

/// A fixed-size slice of a file's bytes. Never stored.
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub file_id: FileId,
    pub chunk_index: u64,
    pub byte_range: Range<u64>,
    pub data: Vec<u8>,
}

/// One complete line reassembled from chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub file_id: FileId,
    /// 1-based line number.
    pub line_number: u64,
    pub text: String,
}

// =============================================================================
// Time selection
// =============================================================================

/// Inclusive time range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeSelection")]
pub struct TimeSelection {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeSelection {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeSelection> for TimeSelection {
    type Error = crate::util::error::ValidationError;

    fn try_from(raw: RawTimeSelection) -> Result<Self, Self::Error> {
        TimeSelection::new(raw.start, raw.end)
    }
}

impl TimeSelection {
    /// Returns `InvalidTimeRange` when `start > end`.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, crate::util::error::ValidationError> {
        if start > end {
            return Err(crate::util::error::ValidationError::InvalidTimeRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Inclusive on both ends.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// The smallest range covering every timestamped entry, if any.
    pub fn covering<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Option<Self> {
        let mut bounds: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        for ts in entries.into_iter().filter_map(|e| e.timestamp) {
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                None => (ts, ts),
            });
        }
        bounds.map(|(start, end)| Self { start, end })
    }
}
