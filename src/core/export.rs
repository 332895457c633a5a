// LogScope - core/export.rs
//
// CSV and JSON export of filtered log entries.
// Core layer: writes to any Write trait object. The path is only used for
// error context.

use crate::core::model::LogEntry;
use crate::util::constants::MAX_EXPORT_ENTRIES;
use crate::util::error::ExportError;
use std::io::Write;
use std::path::Path;

fn check_count(count: usize) -> Result<(), ExportError> {
    if count > MAX_EXPORT_ENTRIES {
        return Err(ExportError::TooManyEntries {
            count,
            max: MAX_EXPORT_ENTRIES,
        });
    }
    Ok(())
}

/// Export entries to CSV.
///
/// Columns: id, file_id, line, timestamp, level, source, message, raw.
/// Missing optional fields are written as empty cells.
pub fn export_csv<W: Write>(
    entries: &[&LogEntry],
    writer: W,
    export_path: &Path,
) -> Result<usize, ExportError> {
    check_count(entries.len())?;
    let csv_err = |source| ExportError::Csv {
        path: export_path.to_path_buf(),
        source,
    };

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record([
            "id", "file_id", "line", "timestamp", "level", "source", "message", "raw",
        ])
        .map_err(csv_err)?;

    for entry in entries {
        let ts = entry
            .timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        csv_writer
            .write_record([
                entry.id.to_string().as_str(),
                &entry.file_id.to_string(),
                &entry.line_number.to_string(),
                &ts,
                entry.level.map(|l| l.label()).unwrap_or(""),
                entry.source.as_deref().unwrap_or(""),
                &entry.message,
                &entry.raw,
            ])
            .map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|e| ExportError::Io {
        path: export_path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(
        path = %export_path.display(),
        entries = entries.len(),
        "CSV export complete"
    );
    Ok(entries.len())
}

/// Export entries as a pretty-printed JSON array.
pub fn export_json<W: Write>(
    entries: &[&LogEntry],
    writer: W,
    export_path: &Path,
) -> Result<usize, ExportError> {
    check_count(entries.len())?;
    serde_json::to_writer_pretty(writer, entries).map_err(|e| ExportError::Json {
        path: export_path.to_path_buf(),
        source: e,
    })?;
    tracing::info!(
        path = %export_path.display(),
        entries = entries.len(),
        "JSON export complete"
    );
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{EntryId, Severity};
    use chrono::{TimeZone, Utc};

    fn make_entry(seq: u64, message: &str) -> LogEntry {
        let mut e = LogEntry::raw_only(EntryId::new(3, seq), seq + 1, format!("RAW {message}"));
        e.timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, seq as u32).unwrap());
        e.level = Some(Severity::Error);
        e.source = Some("auth".to_string());
        e.message = message.to_string();
        e
    }

    #[test]
    fn test_csv_export() {
        let entries = [make_entry(0, "Error one"), make_entry(1, "Error, two")];
        let refs: Vec<&LogEntry> = entries.iter().collect();
        let mut buf = Vec::new();
        let count = export_csv(&refs, &mut buf, Path::new("out.csv")).unwrap();
        assert_eq!(count, 2);

        let output = String::from_utf8(buf).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("id,file_id,line,timestamp,level,source,message,raw")
        );
        assert!(output.contains("3:0,3,1,2024-01-15T10:00:00+00:00,Error,auth,Error one"));
        // Embedded commas are quoted.
        assert!(output.contains("\"Error, two\""));
    }

    #[test]
    fn test_csv_export_leaves_missing_fields_empty() {
        let bare = LogEntry::raw_only(EntryId::new(1, 0), 1, "garbage".to_string());
        let mut buf = Vec::new();
        export_csv(&[&bare], &mut buf, Path::new("out.csv")).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("1:0,1,1,,,,,garbage"));
    }

    #[test]
    fn test_json_export() {
        let entry = make_entry(0, "Test message");
        let mut buf = Vec::new();
        let count = export_json(&[&entry], &mut buf, Path::new("out.json")).unwrap();
        assert_eq!(count, 1);

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value[0]["message"], "Test message");
        assert_eq!(value[0]["level"], "error");
    }
}
