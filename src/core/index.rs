// LogScope - core/index.rs
//
// Derived indexes over ingested entries: time (epoch second buckets),
// level and source. Indexes only ever grow; a batch is validated in full
// before any of it is applied, so a rejected batch leaves them untouched.

use crate::core::model::{EntryId, LogEntry, Severity, TimeSelection};
use crate::util::error::IndexError;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Time bucket key: whole seconds since the Unix epoch.
pub type BucketKey = i64;

#[derive(Debug, Clone, Default)]
pub struct LogIndexes {
    time: BTreeMap<BucketKey, BTreeSet<EntryId>>,
    levels: BTreeMap<Severity, BTreeSet<EntryId>>,
    sources: BTreeMap<String, BTreeSet<EntryId>>,
    known: HashSet<EntryId>,
    timestamped: usize,
}

impl LogIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a batch of entries.
    ///
    /// Returns the number of entries indexed. Any id already indexed, or
    /// repeated within the batch, rejects the whole batch.
    pub fn extend(&mut self, entries: &[LogEntry]) -> Result<usize, IndexError> {
        let mut batch_ids = HashSet::with_capacity(entries.len());
        for entry in entries {
            if self.known.contains(&entry.id) || !batch_ids.insert(entry.id) {
                return Err(IndexError::DuplicateEntry {
                    file_id: entry.id.file_id,
                    seq: entry.id.seq,
                });
            }
        }

        for entry in entries {
            self.known.insert(entry.id);
            if let Some(ts) = entry.timestamp {
                self.time.entry(ts.timestamp()).or_default().insert(entry.id);
                self.timestamped += 1;
            }
            if let Some(level) = entry.level {
                self.levels.entry(level).or_default().insert(entry.id);
            }
            if let Some(ref source) = entry.source {
                match self.sources.get_mut(source) {
                    Some(ids) => {
                        ids.insert(entry.id);
                    }
                    None => {
                        self.sources
                            .insert(source.clone(), BTreeSet::from([entry.id]));
                    }
                }
            }
        }

        Ok(entries.len())
    }

    /// Number of entries indexed, with or without a timestamp.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.known.contains(id)
    }

    /// Number of entries present in the time index.
    pub fn timestamped_len(&self) -> usize {
        self.timestamped
    }

    pub fn bucket_count(&self) -> usize {
        self.time.len()
    }

    /// Ids in every second bucket that overlaps `range`.
    ///
    /// Resolution is one second: entries in the first or last bucket may lie
    /// just outside a range with sub-second bounds.
    pub fn ids_in_range(&self, range: &TimeSelection) -> Vec<EntryId> {
        self.time
            .range(range.start().timestamp()..=range.end().timestamp())
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Earliest and latest bucket keys.
    pub fn time_bounds(&self) -> Option<(BucketKey, BucketKey)> {
        let first = self.time.keys().next()?;
        let last = self.time.keys().next_back()?;
        Some((*first, *last))
    }

    pub fn ids_for_level(&self, level: Severity) -> impl Iterator<Item = EntryId> + '_ {
        self.levels.get(&level).into_iter().flatten().copied()
    }

    pub fn ids_for_source<'a>(&'a self, source: &str) -> impl Iterator<Item = EntryId> + 'a {
        self.sources.get(source).into_iter().flatten().copied()
    }

    /// Entry count per level present in the index, most severe first.
    pub fn levels(&self) -> Vec<(Severity, usize)> {
        self.levels
            .iter()
            .map(|(level, ids)| (*level, ids.len()))
            .collect()
    }

    /// Distinct source values, sorted.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Verify the index against the entries it was built from.
    pub fn check_consistency<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a LogEntry>,
    ) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        let mut timestamped = HashSet::new();
        let mut all = HashSet::new();

        for entry in entries {
            all.insert(entry.id);
            if let Some(ts) = entry.timestamp {
                timestamped.insert(entry.id);
                let in_bucket = self
                    .time
                    .get(&ts.timestamp())
                    .is_some_and(|ids| ids.contains(&entry.id));
                if !in_bucket {
                    report.misplaced.push(entry.id);
                }
            }
        }

        let mut seen = HashSet::new();
        for ids in self.time.values() {
            for id in ids {
                if !seen.insert(*id) {
                    report.in_multiple_buckets.push(*id);
                }
                if !timestamped.contains(id) {
                    report.unexpected.push(*id);
                }
            }
        }
        for id in timestamped.difference(&seen) {
            report.missing.push(*id);
        }

        let dangling = self
            .levels
            .values()
            .chain(self.sources.values())
            .flatten()
            .chain(self.known.iter())
            .filter(|id| !all.contains(*id));
        let mut dangling: Vec<EntryId> = dangling.copied().collect();
        dangling.sort_unstable();
        dangling.dedup();
        report.dangling = dangling;

        report.missing.sort_unstable();
        report
    }
}

/// Violations found by `LogIndexes::check_consistency`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Timestamped entries absent from the time index.
    pub missing: Vec<EntryId>,
    /// Entries indexed under a bucket other than their own second.
    pub misplaced: Vec<EntryId>,
    /// Time-indexed ids without a timestamped entry.
    pub unexpected: Vec<EntryId>,
    /// Ids present in more than one time bucket.
    pub in_multiple_buckets: Vec<EntryId>,
    /// Ids in any index that reference no entry.
    pub dangling: Vec<EntryId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
            && self.misplaced.is_empty()
            && self.unexpected.is_empty()
            && self.in_multiple_buckets.is_empty()
            && self.dangling.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(seq: u64, secs: Option<i64>, level: Option<Severity>, source: Option<&str>) -> LogEntry {
        let mut e = LogEntry::raw_only(EntryId::new(1, seq), seq + 1, format!("line {seq}"));
        e.timestamp = secs.map(|s| Utc.timestamp_opt(s, 0).unwrap());
        e.level = level;
        e.source = source.map(str::to_string);
        e.message = format!("line {seq}");
        e
    }

    #[test]
    fn test_extend_populates_all_indexes() {
        let entries = vec![
            entry(0, Some(100), Some(Severity::Error), Some("auth")),
            entry(1, Some(100), Some(Severity::Info), Some("db")),
            entry(2, Some(101), Some(Severity::Error), None),
            entry(3, None, None, Some("auth")),
        ];
        let mut idx = LogIndexes::new();
        assert_eq!(idx.extend(&entries).unwrap(), 4);

        assert_eq!(idx.len(), 4);
        assert_eq!(idx.timestamped_len(), 3);
        assert_eq!(idx.bucket_count(), 2);
        assert_eq!(idx.ids_for_level(Severity::Error).count(), 2);
        assert_eq!(idx.ids_for_source("auth").count(), 2);
        assert_eq!(idx.ids_for_source("missing").count(), 0);
        assert_eq!(idx.sources().collect::<Vec<_>>(), vec!["auth", "db"]);
        assert_eq!(
            idx.levels(),
            vec![(Severity::Error, 2), (Severity::Info, 1)]
        );
        assert_eq!(idx.time_bounds(), Some((100, 101)));
        assert!(idx.check_consistency(&entries).is_consistent());
    }

    #[test]
    fn test_duplicate_rejects_whole_batch() {
        let mut idx = LogIndexes::new();
        idx.extend(&[entry(0, Some(100), None, None)]).unwrap();

        let replay = vec![entry(1, Some(101), None, None), entry(0, Some(100), None, None)];
        let err = idx.extend(&replay).unwrap_err();
        assert_eq!(err, IndexError::DuplicateEntry { file_id: 1, seq: 0 });
        // Entry 1 from the rejected batch was not applied.
        assert_eq!(idx.len(), 1);
        assert!(!idx.contains(&EntryId::new(1, 1)));

        let repeated = vec![entry(5, None, None, None), entry(5, None, None, None)];
        assert!(idx.extend(&repeated).is_err());
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_ids_in_range_is_inclusive() {
        let entries: Vec<_> = (0..10).map(|i| entry(i, Some(1000 + i as i64), None, None)).collect();
        let mut idx = LogIndexes::new();
        idx.extend(&entries).unwrap();

        let range = TimeSelection::new(
            Utc.timestamp_opt(1002, 0).unwrap(),
            Utc.timestamp_opt(1005, 0).unwrap(),
        )
        .unwrap();
        let ids = idx.ids_in_range(&range);
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], EntryId::new(1, 2));
        assert_eq!(ids[3], EntryId::new(1, 5));
    }

    #[test]
    fn test_consistency_detects_missing_entries() {
        let indexed = vec![entry(0, Some(100), None, None)];
        let mut idx = LogIndexes::new();
        idx.extend(&indexed).unwrap();

        let mut all = indexed.clone();
        all.push(entry(1, Some(200), None, None));
        let report = idx.check_consistency(&all);
        assert!(!report.is_consistent());
        assert_eq!(report.missing, vec![EntryId::new(1, 1)]);

        let report = idx.check_consistency(&[]);
        assert_eq!(report.unexpected, vec![EntryId::new(1, 0)]);
        assert_eq!(report.dangling, vec![EntryId::new(1, 0)]);
    }
}
