// LogScope - app/store.rs
//
// The entry store: append-only segments of entries, the derived indexes,
// per-file records and a generation counter. The coordinator is its only
// writer. Readers take a `StoreSnapshot`, which shares segments and
// indexes by `Arc` and never observes later writes.

use crate::core::filter::{CompiledFilters, EntryLookup};
use crate::core::index::LogIndexes;
use crate::core::model::{EntryId, FileId, FileMetadata, LogEntry, TimeSelection};
use crate::core::parser::ParseStats;
use crate::core::timeline::{self, AggregatedTimelineData, ZoomLevel};
use crate::util::constants;
use crate::util::error::IndexError;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// File records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Queued,
    Processing,
    Completed,
    Cancelled,
    Failed(String),
}

impl FileStatus {
    /// Terminal files accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Cancelled | FileStatus::Failed(_)
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Queued => f.write_str("queued"),
            FileStatus::Processing => f.write_str("processing"),
            FileStatus::Completed => f.write_str("completed"),
            FileStatus::Cancelled => f.write_str("cancelled"),
            FileStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub metadata: FileMetadata,
    pub status: FileStatus,
    /// 0..=100, never decreases.
    pub progress: u8,
    /// Entries stored for this file so far.
    pub entries: usize,
    pub stats: Option<ParseStats>,
}

// =============================================================================
// Segments
// =============================================================================

/// One appended batch. Entry seqs within a batch are ascending.
#[derive(Debug, Clone)]
struct Segment {
    first_seq: u64,
    entries: Arc<[LogEntry]>,
}

impl Segment {
    fn find(&self, id: EntryId) -> Option<&LogEntry> {
        let offset = id.seq.checked_sub(self.first_seq)? as usize;
        match self.entries.get(offset) {
            Some(e) if e.id == id => Some(e),
            _ => self.entries.iter().find(|e| e.id == id),
        }
    }
}

/// Segment positions per file, ordered by first seq.
type SegmentIndex = BTreeMap<FileId, Vec<(u64, usize)>>;

fn locate<'a>(
    segments: &'a [Segment],
    by_file: &SegmentIndex,
    id: EntryId,
) -> Option<&'a LogEntry> {
    let positions = by_file.get(&id.file_id)?;
    let idx = positions.partition_point(|(first, _)| *first <= id.seq);
    let (_, seg) = positions.get(idx.checked_sub(1)?)?;
    segments.get(*seg)?.find(id)
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Default)]
pub struct EntryStore {
    segments: Vec<Segment>,
    by_file: SegmentIndex,
    indexes: Arc<LogIndexes>,
    files: BTreeMap<FileId, FileRecord>,
    len: usize,
    generation: u64,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented by every appended batch and every file status change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn register_file(&mut self, metadata: FileMetadata) {
        let id = metadata.id;
        self.files.insert(
            id,
            FileRecord {
                metadata,
                status: FileStatus::Queued,
                progress: 0,
                entries: 0,
                stats: None,
            },
        );
        self.generation += 1;
    }

    pub fn file(&self, id: FileId) -> Option<&FileRecord> {
        self.files.get(&id)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn set_status(&mut self, id: FileId, status: FileStatus) -> bool {
        let Some(record) = self.files.get_mut(&id) else {
            return false;
        };
        record.status = status;
        self.generation += 1;
        true
    }

    /// Raise progress; lower or equal values are ignored.
    pub fn set_progress(&mut self, id: FileId, percent: u8) -> bool {
        let Some(record) = self.files.get_mut(&id) else {
            return false;
        };
        let percent = percent.min(100);
        if percent <= record.progress {
            return false;
        }
        record.progress = percent;
        true
    }

    /// Append a batch of entries for one file.
    ///
    /// The indexes validate the batch first; a duplicate id rejects the
    /// whole batch and nothing is stored.
    pub fn append(&mut self, file_id: FileId, entries: Vec<LogEntry>) -> Result<usize, IndexError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let added = Arc::make_mut(&mut self.indexes).extend(&entries)?;

        let first_seq = entries.iter().map(|e| e.id.seq).min().unwrap_or_default();
        let position = self.segments.len();
        self.segments.push(Segment {
            first_seq,
            entries: entries.into(),
        });
        let positions = self.by_file.entry(file_id).or_default();
        let at = positions.partition_point(|(first, _)| *first <= first_seq);
        positions.insert(at, (first_seq, position));

        if let Some(record) = self.files.get_mut(&file_id) {
            record.entries += added;
        }
        self.len += added;
        self.generation += 1;
        Ok(added)
    }

    /// Record completion: the worker's metadata replaces the registered
    /// copy and the file becomes terminal.
    pub fn complete_file(&mut self, metadata: FileMetadata, stats: ParseStats) -> bool {
        let Some(record) = self.files.get_mut(&metadata.id) else {
            return false;
        };
        record.metadata = metadata;
        record.stats = Some(stats);
        record.status = FileStatus::Completed;
        record.progress = 100;
        self.generation += 1;
        true
    }

    pub fn get(&self, id: EntryId) -> Option<&LogEntry> {
        locate(&self.segments, &self.by_file, id)
    }

    pub fn indexes(&self) -> &LogIndexes {
        &self.indexes
    }

    /// An immutable view of the current state.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            segments: self.segments.clone(),
            by_file: self.by_file.clone(),
            indexes: Arc::clone(&self.indexes),
            files: self.files.clone(),
            len: self.len,
            generation: self.generation,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Consistent, immutable read view of the store at one generation.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    segments: Vec<Segment>,
    by_file: SegmentIndex,
    indexes: Arc<LogIndexes>,
    files: BTreeMap<FileId, FileRecord>,
    len: usize,
    generation: u64,
}

impl StoreSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries in arrival order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.segments.iter().flat_map(|s| s.entries.iter())
    }

    pub fn entry_refs(&self) -> Vec<&LogEntry> {
        self.entries().collect()
    }

    /// Entries of one file in line order.
    pub fn file_entries(&self, file_id: FileId) -> impl Iterator<Item = &LogEntry> {
        self.by_file
            .get(&file_id)
            .into_iter()
            .flatten()
            .filter_map(|(_, seg)| self.segments.get(*seg))
            .flat_map(|s| s.entries.iter())
    }

    pub fn get(&self, id: EntryId) -> Option<&LogEntry> {
        locate(&self.segments, &self.by_file, id)
    }

    pub fn indexes(&self) -> &LogIndexes {
        &self.indexes
    }

    pub fn file(&self, id: FileId) -> Option<&FileRecord> {
        self.files.get(&id)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    /// Ids of matching entries in arrival order.
    pub fn filter(&self, filters: &CompiledFilters) -> Vec<EntryId> {
        if filters.is_empty() {
            return self.entries().map(|e| e.id).collect();
        }
        if self.len >= constants::PARALLEL_FILTER_THRESHOLD {
            let parts: Vec<Vec<EntryId>> = self
                .segments
                .par_iter()
                .map(|s| {
                    s.entries
                        .iter()
                        .filter(|e| filters.matches(e))
                        .map(|e| e.id)
                        .collect()
                })
                .collect();
            return parts.into_iter().flatten().collect();
        }
        self.entries()
            .filter(|e| filters.matches(e))
            .map(|e| e.id)
            .collect()
    }

    /// Timeline over all entries, or over `ids` when given.
    pub fn timeline(
        &self,
        zoom: ZoomLevel,
        range: Option<TimeSelection>,
        max_buckets: usize,
        ids: Option<&[EntryId]>,
    ) -> AggregatedTimelineData {
        match ids {
            Some(ids) => timeline::aggregate_with_limit(
                ids.iter().filter_map(|id| self.get(*id)),
                zoom,
                range,
                max_buckets,
            ),
            None => timeline::aggregate_with_limit(self.entries(), zoom, range, max_buckets),
        }
    }

    /// Entries for `ids`, skipping unknown ids.
    pub fn resolve(&self, ids: &[EntryId]) -> Vec<&LogEntry> {
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }
}

impl EntryLookup for StoreSnapshot {
    fn entry(&self, id: EntryId) -> Option<&LogEntry> {
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::Filter;
    use crate::core::model::Severity;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn metadata(id: FileId) -> FileMetadata {
        FileMetadata {
            id,
            name: format!("f{id}.log"),
            path: PathBuf::from(format!("/tmp/f{id}.log")),
            size: 0,
            file_type: "log".into(),
            last_modified: None,
            total_chunks: 0,
            profile_id: None,
            start_time: None,
            end_time: None,
            log_count: None,
            log_levels: Default::default(),
            sources: Default::default(),
        }
    }

    fn entries(file_id: FileId, seqs: std::ops::Range<u64>) -> Vec<LogEntry> {
        seqs.map(|seq| {
            let mut e = LogEntry::raw_only(EntryId::new(file_id, seq), seq + 1, format!("l{seq}"));
            e.timestamp = Some(Utc.timestamp_opt(1_000 + seq as i64, 0).unwrap());
            e.level = Some(if seq % 2 == 0 { Severity::Error } else { Severity::Info });
            e.message = format!("l{seq}");
            e
        })
        .collect()
    }

    #[test]
    fn test_append_and_lookup_across_segments() {
        let mut store = EntryStore::new();
        store.register_file(metadata(1));
        store.register_file(metadata(2));
        store.append(1, entries(1, 0..3)).unwrap();
        store.append(2, entries(2, 0..2)).unwrap();
        store.append(1, entries(1, 3..5)).unwrap();

        assert_eq!(store.len(), 7);
        assert_eq!(store.get(EntryId::new(1, 4)).unwrap().message, "l4");
        assert_eq!(store.get(EntryId::new(2, 1)).unwrap().line_number, 2);
        assert!(store.get(EntryId::new(2, 9)).is_none());
        assert_eq!(store.file(1).unwrap().entries, 5);

        let snap = store.snapshot();
        let seqs: Vec<u64> = snap.file_entries(1).map(|e| e.id.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(snap.indexes().check_consistency(snap.entries()).is_consistent());
    }

    #[test]
    fn test_rejected_batch_stores_nothing() {
        let mut store = EntryStore::new();
        store.register_file(metadata(1));
        store.append(1, entries(1, 0..3)).unwrap();
        let generation = store.generation();

        assert!(store.append(1, entries(1, 2..4)).is_err());
        assert_eq!(store.len(), 3);
        assert_eq!(store.generation(), generation);
        assert_eq!(store.indexes().len(), 3);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let mut store = EntryStore::new();
        store.register_file(metadata(1));
        store.append(1, entries(1, 0..2)).unwrap();
        let snap = store.snapshot();

        store.append(1, entries(1, 2..6)).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.indexes().len(), 2);
        assert!(snap.get(EntryId::new(1, 3)).is_none());
        assert!(snap.generation() < store.generation());
        assert_eq!(store.snapshot().indexes().len(), 6);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut store = EntryStore::new();
        store.register_file(metadata(1));
        assert!(store.set_progress(1, 40));
        assert!(!store.set_progress(1, 20));
        assert!(!store.set_progress(1, 40));
        assert_eq!(store.file(1).unwrap().progress, 40);
        assert!(!store.set_progress(9, 10));
    }

    #[test]
    fn test_snapshot_filter_and_timeline() {
        let mut store = EntryStore::new();
        store.register_file(metadata(1));
        store.append(1, entries(1, 0..10)).unwrap();
        let snap = store.snapshot();

        let compiled = CompiledFilters::compile(&[Filter::errors_only("e").unwrap()]).unwrap();
        let ids = snap.filter(&compiled);
        assert_eq!(ids.len(), 5);
        assert_eq!(compiled.apply_ids(&snap, &ids).len(), 5);

        let data = snap.timeline(ZoomLevel::Second, None, 1_000, Some(&ids));
        assert_eq!(data.total_logs, 5);
        let all = snap.timeline(ZoomLevel::Minute, None, 1_000, None);
        assert_eq!(all.total_logs, 10);
    }
}
