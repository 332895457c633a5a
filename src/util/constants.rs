// LogScope - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogScope";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogScope";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Chunked reading
// =============================================================================

/// Default read chunk size in bytes (5 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Smallest configurable chunk size. Values below this are only useful in
/// tests, which construct readers directly rather than through config.
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Largest configurable chunk size (256 MiB).
pub const MAX_CHUNK_SIZE: usize = 256 * 1024 * 1024;

/// Maximum bytes kept for a single line; the rest of an overlong line is
/// dropped.
pub const MAX_PARTIAL_LINE_BYTES: usize = 8 * 1024 * 1024;

/// File size threshold in bytes above which files are memory mapped.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024; // 100 MB

/// Number of lines sampled from the start of a file for format auto-detection.
pub const DEFAULT_CONTENT_DETECTION_LINES: usize = 20;

// =============================================================================
// Parsing limits
// =============================================================================

/// Maximum size of a single log entry in bytes. Continuation content beyond
/// this is truncated.
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 64 * 1024; // 64 KB

/// Smallest configurable entry size cap.
pub const MIN_MAX_ENTRY_SIZE: usize = 1024;

/// Largest configurable entry size cap.
pub const ABSOLUTE_MAX_ENTRY_SIZE: usize = 16 * 1024 * 1024;

/// Suffix appended to a truncated entry message.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Maximum number of parse errors tracked per file before suppression.
pub const MAX_PARSE_ERRORS_PER_FILE: usize = 1_000;

// =============================================================================
// Ingest pipeline
// =============================================================================

/// Number of parsed entries a worker accumulates before sending a batch.
pub const DEFAULT_ENTRY_BATCH_SIZE: usize = 2_000;

/// Bounds for the configurable entry batch size.
pub const MIN_ENTRY_BATCH_SIZE: usize = 1;
pub const MAX_ENTRY_BATCH_SIZE: usize = 100_000;

/// How long `Coordinator::wait_idle` blocks on the event channel per
/// iteration before re-checking for outstanding files (ms).
pub const COORDINATOR_WAIT_INTERVAL_MS: u64 = 50;

/// Retry limits for transient I/O errors when opening a file.
pub const MAX_OPEN_RETRIES: u32 = 3;
pub const OPEN_RETRY_DELAYS_MS: [u64; 3] = [50, 100, 200];

// =============================================================================
// Filtering
// =============================================================================

/// Maximum regex pattern length to prevent ReDoS.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

/// Maximum nesting depth of saved filters.
pub const MAX_SAVED_FILTER_DEPTH: usize = 16;

/// Entry count above which filter evaluation runs in parallel.
pub const PARALLEL_FILTER_THRESHOLD: usize = 50_000;

// =============================================================================
// Timeline
// =============================================================================

/// Maximum number of dense buckets a single aggregation may emit.
pub const MAX_TIMELINE_BUCKETS: usize = 100_000;

/// Bounds for the configurable bucket limit.
pub const MIN_TIMELINE_BUCKETS: usize = 10;
pub const ABSOLUTE_MAX_TIMELINE_BUCKETS: usize = 1_000_000;

/// Bucket count `ZoomLevel::for_span` aims to stay under.
pub const DEFAULT_TARGET_BUCKETS: usize = 500;

// =============================================================================
// Anomaly detection
// =============================================================================

/// Width of a rate window in seconds.
pub const DEFAULT_RATE_WINDOW_SECS: i64 = 60;

/// Bounds for the configurable rate window.
pub const MIN_RATE_WINDOW_SECS: i64 = 1;
pub const MAX_RATE_WINDOW_SECS: i64 = 86_400;

/// Number of preceding windows forming the rolling baseline.
pub const DEFAULT_BASELINE_WINDOWS: usize = 10;

/// Minimum number of preceding windows before a window can be judged.
pub const DEFAULT_MIN_BASELINE_WINDOWS: usize = 3;

/// Upper bound on baseline windows.
pub const MAX_BASELINE_WINDOWS: usize = 1_000;

/// Z-score threshold beyond which a window is anomalous.
pub const DEFAULT_SENSITIVITY: f64 = 3.0;

/// Bounds for the configurable sensitivity.
pub const MIN_SENSITIVITY: f64 = 0.5;
pub const MAX_SENSITIVITY: f64 = 20.0;

/// Floor for the baseline standard deviation so a perfectly flat baseline
/// does not turn a single extra event into an infinite deviation.
pub const MIN_BASELINE_STDDEV: f64 = 1.0;

/// Token-overlap (Jaccard) similarity above which two messages cluster.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Minimum cluster size reported as an anomaly.
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 5;

/// Maximum number of clusters tracked during content clustering.
pub const MAX_CONTENT_CLUSTERS: usize = 2_000;

/// Maximum rate windows examined in one pass.
pub const MAX_RATE_WINDOWS: usize = 1_000_000;

// =============================================================================
// Discovery
// =============================================================================

/// Maximum directory recursion depth during discovery.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Hard upper bound on max depth.
pub const ABSOLUTE_MAX_DEPTH: usize = 50;

/// Maximum number of files to discover under a single directory argument.
pub const DEFAULT_MAX_FILES: usize = 500;

/// Bounds for the configurable max files.
pub const MIN_MAX_FILES: usize = 1;
pub const ABSOLUTE_MAX_FILES: usize = 10_000;

/// Default include glob patterns for log file discovery.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &["*.log", "*.log.[0-9]*", "*.txt"];

/// Default exclude glob patterns for log file discovery.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["*.gz", "*.zip", "*.bak", "*.tmp", ".git"];

// =============================================================================
// Profile limits
// =============================================================================

/// Maximum number of format profiles that can be loaded (built-in + user).
pub const MAX_PROFILES: usize = 100;

/// Maximum size of a profile TOML file in bytes.
pub const MAX_PROFILE_FILE_SIZE: u64 = 64 * 1024; // 64 KB

/// Minimum confidence threshold (0.0-1.0) for auto-detection to accept a match.
pub const AUTO_DETECT_MIN_CONFIDENCE: f64 = 0.3;

/// Confidence bonus added when a file's name matches a profile glob.
pub const AUTO_DETECT_FILENAME_BONUS: f64 = 0.2;

/// Profile id used when auto-detection finds nothing better.
pub const FALLBACK_PROFILE_ID: &str = "plain-text";

// =============================================================================
// Export
// =============================================================================

/// Maximum number of entries that can be exported in a single operation.
pub const MAX_EXPORT_ENTRIES: usize = 5_000_000;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration and persistence
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Saved filter presets file name (stored in the platform data directory).
pub const PRESETS_FILE_NAME: &str = "presets.json";

/// User profiles subdirectory name.
pub const PROFILES_DIR_NAME: &str = "profiles";

/// Schema version written to the presets file.
pub const PRESET_FILE_VERSION: u32 = 1;
