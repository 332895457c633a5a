// LogScope - platform/fs.rs
//
// Filesystem access for the ingest pipeline: opening files with retry,
// memory mapping large files, sampling lines for format detection, and
// expanding directory arguments into log files.
//
// Per-file discovery errors are non-fatal and collected as warnings.
// Exclude patterns short-circuit directory descent via filter_entry.

use crate::util::constants;
use crate::util::error::{DiscoveryError, ProcessingError};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Opening and reading
// =============================================================================

/// Returns true for transient I/O errors that are worth retrying.
fn is_transient_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Open `path`, retrying transient errors with capped backoff.
pub fn open_with_retry(path: &Path) -> io::Result<File> {
    let mut attempt = 0u32;
    loop {
        match File::open(path) {
            Ok(file) => return Ok(file),
            Err(e) if is_transient_error(&e) && attempt < constants::MAX_OPEN_RETRIES => {
                let delay = constants::OPEN_RETRY_DELAYS_MS
                    [(attempt as usize).min(constants::OPEN_RETRY_DELAYS_MS.len() - 1)];
                tracing::debug!(
                    file = %path.display(),
                    attempt = attempt + 1,
                    error = %e,
                    "Transient I/O error, retrying"
                );
                std::thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Byte source for one file: buffered for normal files, mapped for large.
pub enum FileSource {
    Buffered(BufReader<File>),
    Mapped(Cursor<memmap2::Mmap>),
}

impl FileSource {
    pub fn is_mapped(&self) -> bool {
        matches!(self, FileSource::Mapped(_))
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileSource::Buffered(r) => r.read(buf),
            FileSource::Mapped(r) => r.read(buf),
        }
    }
}

/// Open a file for ingest, mapping it when larger than `large_file_threshold`.
///
/// Returns the source and the file size in bytes.
pub fn open_source(
    path: &Path,
    large_file_threshold: u64,
) -> Result<(FileSource, u64), ProcessingError> {
    let file = open_with_retry(path).map_err(|source| ProcessingError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let size = file
        .metadata()
        .map_err(|source| ProcessingError::Open {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    if size > large_file_threshold {
        // SAFETY: the map is read-only and never mutated. A file truncated
        // by another process while mapped can fault; that risk is accepted
        // for log files that are already written.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|source| ProcessingError::Map {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            file = %path.display(),
            size_mb = size / (1024 * 1024),
            "Large file memory mapped"
        );
        return Ok((FileSource::Mapped(Cursor::new(mmap)), size));
    }

    Ok((FileSource::Buffered(BufReader::new(file)), size))
}

/// Read up to `max_lines` lines from the start of a file for detection.
///
/// Invalid UTF-8 is replaced rather than rejected. Returns an empty list
/// when the file cannot be read.
pub fn read_sample_lines(path: &Path, max_lines: usize) -> Vec<String> {
    let file = match open_with_retry(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(file = %path.display(), error = %e, "Cannot sample file");
            return Vec::new();
        }
    };

    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(max_lines);
    let mut buf = Vec::new();
    while lines.len() < max_lines {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                lines.push(text.trim_end_matches(['\n', '\r']).to_string());
            }
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "Sample read stopped");
                break;
            }
        }
    }
    lines
}

// =============================================================================
// Discovery
// =============================================================================

/// Limits and patterns for expanding directory arguments.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum directory recursion depth.
    pub max_depth: usize,

    /// Maximum number of files returned; the most recently modified win.
    pub max_files: usize,

    /// Filename globs a file must match. Empty means include everything.
    pub include_patterns: Vec<String>,

    /// Globs matched against filenames. Literal patterns (no wildcards)
    /// also prune directories of that name.
    pub exclude_patterns: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: constants::DEFAULT_MAX_DEPTH,
            max_files: constants::DEFAULT_MAX_FILES,
            include_patterns: constants::DEFAULT_INCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            exclude_patterns: constants::DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Discover log files under `root`.
///
/// Returns the accepted files and non-fatal warnings. Fails only when
/// `root` does not exist or is not a directory.
pub fn discover_files(
    root: &Path,
    config: &DiscoveryConfig,
) -> Result<(Vec<DiscoveredFile>, Vec<String>), DiscoveryError> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DiscoveryError::NotADirectory {
                path: root.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(DiscoveryError::RootNotFound {
                path: root.to_path_buf(),
            })
        }
    }

    let max_files = config.max_files.min(constants::ABSOLUTE_MAX_FILES);
    let max_depth = config.max_depth.min(constants::ABSOLUTE_MAX_DEPTH);

    tracing::debug!(
        root = %root.display(),
        max_depth,
        max_files,
        include = ?config.include_patterns,
        exclude = ?config.exclude_patterns,
        "Discovery starting"
    );

    let include_pats = compile_patterns(&config.include_patterns, "include");
    let exclude_pats = compile_patterns(&config.exclude_patterns, "exclude");

    let mut files: Vec<DiscoveredFile> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let walker = walkdir::WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.file_type().is_dir() && e.depth() > 0 {
                let name = e.file_name().to_str().unwrap_or("");
                return !is_excluded_component(name, &exclude_pats);
            }
            true
        });

    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                let path_str = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let msg = format!("Cannot access '{path_str}': {e}");
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            warnings.push(format!("Skipping '{}': non-UTF-8 filename", path.display()));
            continue;
        };

        if exclude_pats.iter().any(|p| p.matches(file_name)) {
            tracing::trace!(file = file_name, "Excluded by pattern");
            continue;
        }
        if !include_pats.is_empty() && !include_pats.iter().any(|p| p.matches(file_name)) {
            tracing::trace!(file = file_name, "Not matched by include patterns");
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                let msg = format!("Cannot read metadata for '{}': {e}", path.display());
                tracing::debug!(warning = %msg, "Discovery warning");
                warnings.push(msg);
                continue;
            }
        };

        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    let total_found = files.len();
    if total_found > max_files {
        // Newest first; files without an mtime are dropped first.
        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        files.truncate(max_files);
        files.sort_by(|a, b| a.path.cmp(&b.path));

        warnings.push(format!(
            "{total_found} log files were found but the limit is {max_files}. \
             Only the {max_files} most recently modified files are loaded."
        ));
        tracing::info!(
            total_found,
            limit = max_files,
            "File list truncated to most recently modified files"
        );
    }

    tracing::debug!(
        total_found,
        files_loaded = files.len(),
        warnings = warnings.len(),
        "Discovery complete"
    );
    Ok((files, warnings))
}

/// Expand command-line paths: files are taken as given, directories are
/// walked with `discover_files`. Problems become warnings.
pub fn expand_paths(
    paths: &[PathBuf],
    config: &DiscoveryConfig,
) -> (Vec<DiscoveredFile>, Vec<String>) {
    let mut files = Vec::new();
    let mut warnings = Vec::new();

    for path in paths {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => files.push(DiscoveredFile {
                path: path.clone(),
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            }),
            Ok(_) => match discover_files(path, config) {
                Ok((found, mut w)) => {
                    files.extend(found);
                    warnings.append(&mut w);
                }
                Err(e) => warnings.push(e.to_string()),
            },
            Err(e) => warnings.push(format!("Cannot access '{}': {e}", path.display())),
        }
    }

    (files, warnings)
}

fn compile_patterns(patterns: &[String], kind: &str) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                tracing::warn!(pattern = p, kind, error = %e, "Invalid glob pattern, skipping");
                None
            }
        })
        .collect()
}

/// Literal exclude patterns (no wildcards) name directories to prune.
fn is_excluded_component(dir_name: &str, exclude_pats: &[glob::Pattern]) -> bool {
    exclude_pats.iter().any(|p| {
        let s = p.as_str();
        !s.contains('*') && !s.contains('?') && !s.contains('[') && p.matches(dir_name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_temp_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("app.log"), "2024-01-01 12:00:00 INFO Hello\n").unwrap();
        fs::write(root.join("service.log"), "2024-01-01 12:00:01 ERROR Oops\n").unwrap();
        fs::write(root.join("backup.log.gz"), "binary").unwrap();
        fs::create_dir(root.join("subdir")).unwrap();
        fs::write(root.join("subdir/sub.log"), "2024-01-01 12:00:02 DEBUG x\n").unwrap();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git/packed.log"), "excluded\n").unwrap();
        dir
    }

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_discovers_log_files() {
        let dir = make_temp_tree();
        let (files, warnings) = discover_files(dir.path(), &DiscoveryConfig::default()).unwrap();
        let mut found = names(&files);
        found.sort();
        assert_eq!(found, vec!["app.log", "service.log", "sub.log"]);
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn test_max_depth_1_excludes_subdirs() {
        let dir = make_temp_tree();
        let config = DiscoveryConfig {
            max_depth: 1,
            ..Default::default()
        };
        let (files, _) = discover_files(dir.path(), &config).unwrap();
        assert!(!names(&files).contains(&"sub.log".to_string()));
    }

    #[test]
    fn test_max_files_truncates_with_warning() {
        let dir = make_temp_tree();
        let config = DiscoveryConfig {
            max_files: 2,
            ..Default::default()
        };
        let (files, warnings) = discover_files(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains('3') && warnings[0].contains('2'));
    }

    #[test]
    fn test_root_errors() {
        let missing = discover_files(Path::new("/nonexistent/logscope"), &DiscoveryConfig::default());
        assert!(matches!(missing, Err(DiscoveryError::RootNotFound { .. })));

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.log");
        fs::write(&file, "x").unwrap();
        let not_dir = discover_files(&file, &DiscoveryConfig::default());
        assert!(matches!(not_dir, Err(DiscoveryError::NotADirectory { .. })));
    }

    #[test]
    fn test_expand_paths_mixes_files_and_dirs() {
        let dir = make_temp_tree();
        let extra = tempfile::tempdir().unwrap();
        let single = extra.path().join("notes.data");
        fs::write(&single, "kept even though no pattern matches\n").unwrap();

        let (files, warnings) = expand_paths(
            &[
                single.clone(),
                dir.path().to_path_buf(),
                PathBuf::from("/nonexistent/x.log"),
            ],
            &DiscoveryConfig::default(),
        );
        assert_eq!(files.len(), 4);
        assert_eq!(files[0].path, single);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_open_source_maps_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        fs::write(&path, "line one\nline two\n").unwrap();

        let (mut small, size) = open_source(&path, 1024).unwrap();
        assert!(!small.is_mapped());
        assert_eq!(size, 18);

        let (mut mapped, _) = open_source(&path, 4).unwrap();
        assert!(mapped.is_mapped());

        let mut a = String::new();
        let mut b = String::new();
        small.read_to_string(&mut a).unwrap();
        mapped.read_to_string(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_open_source_missing_file() {
        let result = open_source(Path::new("/nonexistent/file.log"), 1024);
        assert!(matches!(result, Err(ProcessingError::Open { .. })));
    }

    #[test]
    fn test_read_sample_lines_is_lossy_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.log");
        fs::write(&path, b"one\r\ntw\xffo\nthree\nfour\n").unwrap();
        let lines = read_sample_lines(&path, 3);
        assert_eq!(lines, vec!["one", "tw\u{fffd}o", "three"]);
        assert!(read_sample_lines(Path::new("/nonexistent"), 3).is_empty());
    }
}
