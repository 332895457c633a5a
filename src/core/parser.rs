// LogScope - core/parser.rs
//
// Line parsing using format profiles.
// Core layer: works on reassembled `RawLine`s, never touches the filesystem.
//
// `LineParser` is stateless and classifies one line at a time.
// `FileParser` owns the per-file state: entry id allocation, merging of
// continuation lines into the pending entry, entry size caps and parse
// error bookkeeping. An entry is emitted only once no further line can
// extend it.

use crate::core::chunk;
use crate::core::model::{
    EntryId, FileId, FormatProfile, LogEntry, MultilineMode, RawLine, Severity,
};
use crate::util::constants;
use crate::util::error::ParseError;
use crate::util::logging;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::io::{self, Read};
use std::sync::OnceLock;

/// Configuration for parsing operations.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    pub max_entry_size: usize,
    pub max_parse_errors_per_file: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_entry_size: constants::DEFAULT_MAX_ENTRY_SIZE,
            max_parse_errors_per_file: constants::MAX_PARSE_ERRORS_PER_FILE,
        }
    }
}

// =============================================================================
// LineParser
// =============================================================================

/// Fields extracted from a line that starts a new entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFields {
    pub timestamp: DateTime<Utc>,
    pub level: Option<Severity>,
    pub source: Option<String>,
    pub message: String,
}

/// Classification of a single line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// The line starts a new entry with a valid timestamp.
    Record(ParsedFields),

    /// The line did not match the profile and carries no timestamp. It
    /// belongs to the preceding entry when the profile allows that.
    Continuation,

    /// The line matched the profile but no usable timestamp could be
    /// extracted. It becomes a raw-only entry.
    Unparsed(ParseError),
}

/// Stateless per-line parser bound to one format profile.
#[derive(Debug, Clone, Copy)]
pub struct LineParser<'p> {
    profile: &'p FormatProfile,
}

impl<'p> LineParser<'p> {
    pub fn new(profile: &'p FormatProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &'p FormatProfile {
        self.profile
    }

    /// Classify one raw line.
    pub fn parse_line(&self, line: &RawLine) -> ParsedLine {
        let text = line.text.as_str();
        let profile = self.profile;

        let Some(caps) = profile.line_pattern.captures(text) else {
            // A line the profile does not recognise may still open an entry
            // if it carries a recognisable timestamp of its own.
            return match sniff_timestamp(text) {
                Some(timestamp) => ParsedLine::Record(ParsedFields {
                    timestamp,
                    level: profile.infer_severity_from_message(text),
                    source: None,
                    message: text.to_string(),
                }),
                None => ParsedLine::Continuation,
            };
        };

        let message = caps
            .name("message")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| text.to_string());

        let timestamp = match caps.name("timestamp").map(|m| m.as_str()) {
            Some(raw_ts) => {
                match parse_timestamp(raw_ts, &profile.timestamp_format)
                    .or_else(|| sniff_timestamp(text))
                {
                    Some(ts) => ts,
                    None => {
                        return ParsedLine::Unparsed(ParseError::TimestampParse {
                            file_id: line.file_id,
                            line_number: line.line_number,
                            raw_timestamp: raw_ts.to_string(),
                            format: profile.timestamp_format.clone(),
                        })
                    }
                }
            }
            None => match sniff_timestamp(text) {
                Some(ts) => ts,
                None => {
                    return ParsedLine::Unparsed(ParseError::LineParse {
                        file_id: line.file_id,
                        line_number: line.line_number,
                        reason: "no timestamp found".to_string(),
                    })
                }
            },
        };

        // Explicit level capture first; an unrecognised value falls back to
        // keyword inference like a profile without a level field.
        let level = caps
            .name("level")
            .and_then(|m| profile.map_severity(m.as_str()))
            .or_else(|| profile.infer_severity_from_message(&message));

        let source = caps
            .name("source")
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        ParsedLine::Record(ParsedFields {
            timestamp,
            level,
            source,
            message,
        })
    }
}

// =============================================================================
// FileParser
// =============================================================================

/// Counters collected while parsing one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseStats {
    pub lines_read: u64,
    pub blank_lines: u64,
    pub entries_emitted: u64,
    pub raw_only_entries: u64,
    pub continuation_lines: u64,
    pub truncated_entries: u64,
    /// Total parse errors, including those past the retention cap.
    pub error_count: usize,
    /// First `max_parse_errors_per_file` parse errors.
    pub errors: Vec<ParseError>,
}

#[derive(Debug)]
struct PendingEntry {
    entry: LogEntry,
    truncated: bool,
}

/// Stateful parser for the lines of a single file, in order.
#[derive(Debug)]
pub struct FileParser<'p> {
    parser: LineParser<'p>,
    file_id: FileId,
    config: ParseConfig,
    next_seq: u64,
    pending: Option<PendingEntry>,
    stats: ParseStats,
}

impl<'p> FileParser<'p> {
    pub fn new(profile: &'p FormatProfile, file_id: FileId, config: ParseConfig) -> Self {
        Self {
            parser: LineParser::new(profile),
            file_id,
            config,
            next_seq: 0,
            pending: None,
            stats: ParseStats::default(),
        }
    }

    /// Feed the next line. Returns the previous entry once this line
    /// proves it complete.
    pub fn push_line(&mut self, line: &RawLine) -> Option<LogEntry> {
        self.stats.lines_read += 1;

        if line.text.trim().is_empty() {
            self.stats.blank_lines += 1;
            if self.continues_pending() {
                self.append_to_pending(&line.text);
                return None;
            }
            return self.raw_only(line);
        }

        match self.parser.parse_line(line) {
            ParsedLine::Record(fields) => {
                let id = self.allocate_id();
                let mut entry = LogEntry {
                    id,
                    file_id: self.file_id,
                    line_number: line.line_number,
                    timestamp: Some(fields.timestamp),
                    level: fields.level,
                    source: fields.source,
                    message: fields.message,
                    raw: line.text.clone(),
                };
                let truncated = self.cap_entry(&mut entry);
                self.replace_pending(entry, truncated)
            }
            ParsedLine::Continuation => {
                if self.continues_pending() {
                    self.append_to_pending(&line.text);
                    return None;
                }
                self.record_error(ParseError::LineParse {
                    file_id: self.file_id,
                    line_number: line.line_number,
                    reason: "line does not match profile and has no timestamp".to_string(),
                });
                self.raw_only(line)
            }
            ParsedLine::Unparsed(err) => {
                self.record_error(err);
                self.raw_only(line)
            }
        }
    }

    /// Feed a batch of lines, appending completed entries to `out`.
    pub fn push_lines(&mut self, lines: &[RawLine], out: &mut Vec<LogEntry>) {
        for line in lines {
            if let Some(entry) = self.push_line(line) {
                out.push(entry);
            }
        }
    }

    /// Flush the pending entry at end of input.
    pub fn finish(&mut self) -> Option<LogEntry> {
        self.pending.take().map(|p| p.entry)
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn into_stats(self) -> ParseStats {
        self.stats
    }

    fn allocate_id(&mut self) -> EntryId {
        let id = EntryId::new(self.file_id, self.next_seq);
        self.next_seq += 1;
        self.stats.entries_emitted += 1;
        id
    }

    fn raw_only(&mut self, line: &RawLine) -> Option<LogEntry> {
        let id = self.allocate_id();
        self.stats.raw_only_entries += 1;
        let mut entry = LogEntry::raw_only(id, line.line_number, line.text.clone());
        let truncated = self.cap_entry(&mut entry);
        self.replace_pending(entry, truncated)
    }

    fn continues_pending(&self) -> bool {
        self.parser.profile().multiline_mode == MultilineMode::Continuation
            && self.pending.is_some()
    }

    fn append_to_pending(&mut self, text: &str) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        self.stats.continuation_lines += 1;
        if pending.truncated {
            return;
        }
        let max = self.config.max_entry_size;
        let entry = &mut pending.entry;
        let mut cut = append_capped(&mut entry.raw, text, max);
        if !entry.is_raw_only() {
            cut |= append_capped(&mut entry.message, text, max);
        }
        if cut {
            pending.truncated = true;
            self.stats.truncated_entries += 1;
        }
    }

    fn replace_pending(&mut self, entry: LogEntry, truncated: bool) -> Option<LogEntry> {
        self.pending
            .replace(PendingEntry { entry, truncated })
            .map(|p| p.entry)
    }

    fn cap_entry(&mut self, entry: &mut LogEntry) -> bool {
        let max = self.config.max_entry_size;
        let cut = cap_string(&mut entry.message, max) | cap_string(&mut entry.raw, max);
        if cut {
            self.stats.truncated_entries += 1;
        }
        cut
    }

    fn record_error(&mut self, err: ParseError) {
        self.stats.error_count += 1;
        if self.stats.errors.len() < self.config.max_parse_errors_per_file {
            tracing::debug!(error = %err, "Parse error");
            self.stats.errors.push(err);
        } else if self.stats.error_count == self.config.max_parse_errors_per_file + 1 {
            tracing::warn!(
                file_id = self.file_id,
                max = self.config.max_parse_errors_per_file,
                "Parse error limit reached; further errors are counted only"
            );
        }
    }
}

/// Append `piece` on a new line, truncating the result to `max` bytes.
/// Returns true when truncation happened.
fn append_capped(target: &mut String, piece: &str, max: usize) -> bool {
    target.push('\n');
    target.push_str(piece);
    cap_string(target, max)
}

fn cap_string(s: &mut String, max: usize) -> bool {
    if s.len() <= max {
        return false;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str(constants::TRUNCATION_MARKER);
    true
}

/// Parse a whole stream into entries.
///
/// Drives `chunk::read_lines` and a `FileParser`; used where the caller does
/// not need progress reporting or batching.
pub fn parse_reader<R: Read>(
    reader: R,
    profile: &FormatProfile,
    file_id: FileId,
    chunk_size: usize,
    config: ParseConfig,
) -> io::Result<(Vec<LogEntry>, ParseStats)> {
    let mut parser = FileParser::new(profile, file_id, config);
    let mut entries = Vec::new();
    chunk::read_lines(reader, file_id, chunk_size, |lines, _| {
        parser.push_lines(&lines, &mut entries);
        true
    })?;
    entries.extend(parser.finish());

    tracing::debug!(
        file_id,
        profile = %profile.id,
        entries = entries.len(),
        errors = parser.stats().error_count,
        "Parsing complete"
    );
    Ok((entries, parser.into_stats()))
}

// =============================================================================
// Timestamp sniffing
// =============================================================================

/// Find and parse the first recognisable timestamp anywhere in `raw_line`.
///
/// Shapes are tried from most precise (RFC 3339 with offset) to least
/// precise (year-less syslog), so a looser shape never wins over a stricter
/// one on the same line.
pub fn sniff_timestamp(raw_line: &str) -> Option<DateTime<Utc>> {
    struct Sniffer {
        re: Regex,
        parse: fn(&str) -> Option<DateTime<Utc>>,
    }

    static SNIFFERS: OnceLock<Vec<Sniffer>> = OnceLock::new();

    let sniffers = SNIFFERS.get_or_init(|| {
        let table: [(&str, fn(&str) -> Option<DateTime<Utc>>); 10] = [
            // 2024-01-15T14:30:22.123+05:30, 2024-01-15T14:30:22Z
            (
                r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})",
                |s| {
                    let s = s.replace(',', ".");
                    DateTime::parse_from_rfc3339(&s)
                        .or_else(|_| DateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f%z"))
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc))
                },
            ),
            // 2024-01-15 14:30:22,123 / 2024-01-15T14:30:22.123 / no fraction
            (
                r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?",
                |s| naive_utc(&s.replace(',', ".").replace('T', " "), &["%Y-%m-%d %H:%M:%S%.f"]),
            ),
            // 2024/01/15 14:30:22
            (r"\d{4}/\d{2}/\d{2}[ T]\d{2}:\d{2}:\d{2}(?:\.\d+)?", |s| {
                naive_utc(&s.replace('/', "-").replace('T', " "), &["%Y-%m-%d %H:%M:%S%.f"])
            }),
            // 26.02.2026 22:07:56.535
            (r"\d{2}\.\d{2}\.\d{4} \d{2}:\d{2}:\d{2}(?:\.\d+)?", |s| {
                naive_utc(s, &["%d.%m.%Y %H:%M:%S%.f"])
            }),
            // Apache combined: 15/Jan/2024:14:30:22 +0000
            (r"\d{2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4}", |s| {
                DateTime::parse_from_str(s, "%d/%b/%Y:%H:%M:%S %z")
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
            // 01/15/2024 14:30:22 (US) or 15/01/2024 14:30:22 (day-first)
            (r"\d{2}/\d{2}/\d{4} \d{2}:\d{2}:\d{2}", |s| {
                let first: u32 = s.get(..2)?.parse().ok()?;
                if first > 12 {
                    naive_utc(s, &["%d/%m/%Y %H:%M:%S"])
                } else {
                    // Ambiguous dates resolve to month-first.
                    naive_utc(s, &["%m/%d/%Y %H:%M:%S", "%d/%m/%Y %H:%M:%S"])
                }
            }),
            // Jan 15 2024 14:30:22, January 15, 2024 14:30:22
            (r"[A-Z][a-z]{2,8} \d{1,2},? \d{4} \d{2}:\d{2}:\d{2}", |s| {
                let s = s.replace(',', " ");
                let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
                naive_utc(&s, &["%b %d %Y %H:%M:%S", "%B %d %Y %H:%M:%S"])
            }),
            // BSD syslog without a year: Jan 15 14:30:22
            (r"[A-Z][a-z]{2} [ \d]\d \d{2}:\d{2}:\d{2}", |s| {
                let with_year = format!("{} {s}", Utc::now().year());
                naive_utc(&with_year, &["%Y %b %e %H:%M:%S"])
            }),
            // Compact ISO: 20240115T143022
            (r"\d{8}[T ]\d{6}", |s| {
                naive_utc(&s.replace(' ', "T"), &["%Y%m%dT%H%M%S"])
            }),
            // Epoch seconds, only at line start so PIDs and ports never match.
            (r"^\d{10}(?:\.\d+)?", |s| {
                let secs = s.split('.').next()?.parse::<i64>().ok()?;
                DateTime::from_timestamp(secs, 0)
            }),
        ];

        table
            .into_iter()
            .filter_map(|(pattern, parse)| match Regex::new(pattern) {
                Ok(re) => Some(Sniffer { re, parse }),
                Err(e) => {
                    tracing::error!(pattern, error = %e, "Timestamp sniffer failed to compile");
                    None
                }
            })
            .collect()
    });

    sniffers.iter().find_map(|sniffer| {
        sniffer
            .re
            .find(raw_line)
            .and_then(|m| (sniffer.parse)(m.as_str()))
    })
}

fn naive_utc(s: &str, formats: &[&str]) -> Option<DateTime<Utc>> {
    formats
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|ndt| ndt.and_utc())
}

// =============================================================================
// Timestamp parsing
// =============================================================================

/// Parse a captured timestamp with the profile's chrono format string.
///
/// Tries, in order: the format as given; a date-only parse (midnight UTC);
/// RFC 3339; the format again after normalising `/`, `T` and comma
/// fractions; and finally current-year injection for formats without a
/// year. Year injection is best-effort: a file spanning New Year gets the
/// older entries in the wrong year.
pub fn parse_timestamp(raw: &str, format: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let with_format = |s: &str| -> Option<DateTime<Utc>> {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ndt.and_utc());
        }
        NaiveDate::parse_from_str(s, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|ndt| ndt.and_utc())
    };

    if let Some(ts) = with_format(trimmed) {
        return Some(ts);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let normalised = trimmed.replace('/', "-").replace('T', " ").replace(',', ".");
    if normalised != trimmed {
        if let Some(ts) = with_format(&normalised) {
            return Some(ts);
        }
    }

    if !format.contains("%Y") && !format.contains("%y") && !format.contains("%C") {
        let with_year = format!("{} {trimmed}", Utc::now().year());
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&with_year, &format!("%Y {format}")) {
            return Some(ndt.and_utc());
        }
    }

    tracing::trace!(
        raw = logging::preview(trimmed),
        format,
        "Timestamp did not parse with profile format"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile;
    use chrono::{TimeZone, Timelike};
    use std::io::Cursor;
    use std::path::PathBuf;

    fn compile(toml: &str) -> FormatProfile {
        let path = PathBuf::from("test.toml");
        let def = profile::parse_profile_toml(toml, &path).unwrap();
        profile::validate_and_compile(def, &path, false).unwrap()
    }

    fn bracket_profile(mode: &str) -> FormatProfile {
        compile(&format!(
            r#"
[profile]
id = "test"
name = "Test"

[detection]
content_match = '^\['

[parsing]
line_pattern = '^\[(?P<timestamp>[^\]]+)\]\s(?P<level>\w+)\s+(?:(?P<source>\w+):\s)?(?P<message>.+)$'
timestamp_format = "%Y-%m-%d %H:%M:%S"
multiline_mode = "{mode}"

[severity_mapping]
error = ["Error"]
warning = ["Warning"]
info = ["Info"]
"#
        ))
    }

    fn line(n: u64, text: &str) -> RawLine {
        RawLine {
            file_id: 3,
            line_number: n,
            text: text.to_string(),
        }
    }

    fn parse_all(profile: &FormatProfile, content: &str) -> (Vec<LogEntry>, ParseStats) {
        parse_reader(
            Cursor::new(content.as_bytes()),
            profile,
            3,
            64,
            ParseConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_line_extracts_fields() {
        let profile = bracket_profile("continuation");
        let parser = LineParser::new(&profile);
        let fields = match parser.parse_line(&line(1, "[2024-01-15 14:30:22] Error auth: Login failed")) {
            ParsedLine::Record(fields) => fields,
            other => panic!("expected record, got {other:?}"),
        };
        assert_eq!(fields.level, Some(Severity::Error));
        assert_eq!(fields.source.as_deref(), Some("auth"));
        assert_eq!(fields.message, "Login failed");
        assert_eq!(
            fields.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 22).unwrap()
        );
    }

    #[test]
    fn test_parse_line_is_stateless() {
        let profile = bracket_profile("continuation");
        let parser = LineParser::new(&profile);
        let l = line(5, "    at com.example.Main.run(Main.java:10)");
        assert_eq!(parser.parse_line(&l), ParsedLine::Continuation);
        assert_eq!(parser.parse_line(&l), ParsedLine::Continuation);
    }

    #[test]
    fn test_unparseable_timestamp_yields_raw_only_entry() {
        let profile = bracket_profile("continuation");
        let (entries, stats) = parse_all(&profile, "[not a time] Error boom\n");
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert!(e.is_raw_only());
        assert!(e.message.is_empty());
        assert_eq!(e.raw, "[not a time] Error boom");
        assert_eq!(e.line_number, 1);
        assert_eq!(stats.error_count, 1);
        assert!(matches!(stats.errors[0], ParseError::TimestampParse { .. }));
    }

    #[test]
    fn test_continuation_lines_merge_without_new_ids() {
        let profile = bracket_profile("continuation");
        let content = "[2024-01-15 14:30:22] Error Connection failed\n\
                       at com.example.Client.connect(Client.java:42)\n\
                       at com.example.Main.run(Main.java:10)\n\
                       [2024-01-15 14:30:23] Info Retry succeeded\n";
        let (entries, stats) = parse_all(&profile, content);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, EntryId::new(3, 0));
        assert_eq!(entries[1].id, EntryId::new(3, 1));
        assert!(entries[0].message.ends_with("Main.java:10)"));
        assert_eq!(entries[0].raw.lines().count(), 3);
        assert_eq!(entries[1].line_number, 4);
        assert_eq!(stats.continuation_lines, 2);
        assert_eq!(stats.error_count, 0);
    }

    #[test]
    fn test_raw_mode_keeps_each_line() {
        let profile = bracket_profile("raw");
        let content = "[2024-01-15 14:30:22] Error first\nloose line\n";
        let (entries, stats) = parse_all(&profile, content);
        assert_eq!(entries.len(), 2);
        assert!(entries[1].is_raw_only());
        assert_eq!(entries[1].raw, "loose line");
        assert_eq!(stats.raw_only_entries, 1);
    }

    #[test]
    fn test_leading_continuation_becomes_raw_only() {
        let profile = bracket_profile("continuation");
        let (entries, stats) = parse_all(&profile, "orphan\n[2024-01-15 14:30:22] Info ok\n");
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_raw_only());
        assert!(matches!(stats.errors[0], ParseError::LineParse { .. }));
    }

    #[test]
    fn test_blank_lines_join_pending_record_or_stand_alone() {
        let profile = bracket_profile("continuation");
        let content = "\n[2024-01-15 14:30:22] Error a\n    at frame(1)\n\n    at frame(2)\n[2024-01-15 14:30:23] Info b\n";
        let (entries, stats) = parse_all(&profile, content);
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_raw_only());
        assert_eq!(entries[0].line_number, 1);
        assert_eq!(entries[1].line_number, 2);
        assert_eq!(
            entries[1].raw,
            "[2024-01-15 14:30:22] Error a\n    at frame(1)\n\n    at frame(2)"
        );
        assert!(entries[1].message.ends_with("frame(1)\n\n    at frame(2)"));
        assert_eq!(entries[2].line_number, 6);
        assert_eq!(stats.blank_lines, 2);
        assert_eq!(stats.continuation_lines, 3);
        assert_eq!(stats.lines_read, 6);
        assert_eq!(stats.error_count, 0);
    }

    #[test]
    fn test_raw_mode_emits_one_entry_per_line() {
        let profiles = profile::load_builtin_profiles();
        let plain = profiles
            .iter()
            .find(|p| p.id == constants::FALLBACK_PROFILE_ID)
            .unwrap();
        let (entries, stats) = parse_all(plain, "a\n\n   \nb\n");
        assert_eq!(entries.len() as u64, stats.lines_read);
        let numbers: Vec<_> = entries.iter().map(|e| e.line_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(entries[2].raw, "   ");
        assert_eq!(stats.blank_lines, 2);
    }

    #[test]
    fn test_entry_truncation() {
        let profile = bracket_profile("continuation");
        let config = ParseConfig {
            max_entry_size: 1000,
            ..ParseConfig::default()
        };
        let mut parser = FileParser::new(&profile, 3, config);
        let long = format!("[2024-01-15 14:30:22] Error {}", "x".repeat(5000));
        assert!(parser.push_line(&line(1, &long)).is_none());
        parser.push_line(&line(2, "more continuation"));
        let entry = parser.finish().unwrap();
        assert!(entry.message.ends_with(constants::TRUNCATION_MARKER));
        assert!(entry.message.len() <= 1000 + constants::TRUNCATION_MARKER.len());
        assert!(!entry.message.contains("more continuation"));
        assert_eq!(parser.stats().truncated_entries, 1);
    }

    #[test]
    fn test_unmapped_level_falls_back_to_message_keywords() {
        let profile = bracket_profile("continuation");
        let parser = LineParser::new(&profile);
        let fields = match parser.parse_line(&line(1, "[2024-01-15 14:30:22] Odd an Error occurred")) {
            ParsedLine::Record(fields) => fields,
            other => panic!("expected record, got {other:?}"),
        };
        assert_eq!(fields.level, Some(Severity::Error));
    }

    #[test]
    fn test_plain_text_lines_get_sniffed_timestamps() {
        let profiles = profile::load_builtin_profiles();
        let plain = profiles
            .iter()
            .find(|p| p.id == constants::FALLBACK_PROFILE_ID)
            .unwrap();
        let content = "2024-01-15T14:30:22Z service failed to start\nno time here\n";
        let (entries, stats) = parse_all(plain, content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, Some(Severity::Error));
        assert!(entries[0].timestamp.is_some());
        assert!(entries[1].is_raw_only());
        assert_eq!(stats.error_count, 1);
    }

    #[test]
    fn test_error_retention_is_capped() {
        let profile = bracket_profile("raw");
        let config = ParseConfig {
            max_parse_errors_per_file: 2,
            ..ParseConfig::default()
        };
        let mut parser = FileParser::new(&profile, 3, config);
        for n in 1..=5 {
            parser.push_line(&line(n, "garbage"));
        }
        assert_eq!(parser.stats().error_count, 5);
        assert_eq!(parser.stats().errors.len(), 2);
    }

    // -------------------------------------------------------------------------
    // Timestamp parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 22).unwrap();
        let fmt = "%Y-%m-%d %H:%M:%S";
        assert_eq!(parse_timestamp("2024-01-15 14:30:22", fmt), Some(expected));
        assert_eq!(parse_timestamp("2024/01/15 14:30:22", fmt), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T14:30:22", fmt), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T14:30:22Z", fmt), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-15", "%Y-%m-%d"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("garbage", fmt), None);
        assert_eq!(parse_timestamp("", fmt), None);
    }

    #[test]
    fn test_parse_timestamp_fractional_and_comma() {
        let ts = parse_timestamp("2024-01-15 14:30:22,123", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 123);
        let ts = parse_timestamp("2024-01-15 14:30:22,123", "%Y-%m-%d %H:%M:%S,%3f").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_parse_timestamp_yearless_injects_current_year() {
        let ts = parse_timestamp("Jan  5 14:30:22", "%b %e %H:%M:%S").unwrap();
        assert_eq!(ts.year(), Utc::now().year());
        assert_eq!((ts.month(), ts.day(), ts.hour()), (1, 5, 14));
    }

    #[test]
    fn test_sniff_shapes() {
        let cases = [
            ("at 2024-01-15T14:30:22+05:30 ok", (2024, 1, 15, 9)),
            ("2024-01-15 14:30:22,123 INFO x", (2024, 1, 15, 14)),
            ("[2024/01/15 14:30:22] x", (2024, 1, 15, 14)),
            ("26.02.2026 22:07:56.535 x", (2026, 2, 26, 22)),
            ("1.2.3.4 - - [15/Jan/2024:14:30:22 +0000] GET", (2024, 1, 15, 14)),
            ("15/01/2024 14:30:22 x", (2024, 1, 15, 14)),
            ("01/15/2024 14:30:22 x", (2024, 1, 15, 14)),
            ("Jan 15, 2024 14:30:22 x", (2024, 1, 15, 14)),
            ("20240115T143022 x", (2024, 1, 15, 14)),
            ("1705329022 x", (2024, 1, 15, 14)),
        ];
        for (text, (y, m, d, h)) in cases {
            let ts = sniff_timestamp(text).unwrap_or_else(|| panic!("no timestamp in {text:?}"));
            assert_eq!((ts.year(), ts.month(), ts.day(), ts.hour()), (y, m, d, h), "{text}");
        }
    }

    #[test]
    fn test_sniff_ambiguous_slash_is_month_first() {
        let ts = sniff_timestamp("01/02/2024 10:00:00").unwrap();
        assert_eq!((ts.month(), ts.day()), (1, 2));
    }

    #[test]
    fn test_sniff_no_timestamp_returns_none() {
        assert!(sniff_timestamp("no timestamp here, pid 12345").is_none());
        assert!(sniff_timestamp("").is_none());
    }
}
