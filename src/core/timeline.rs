// LogScope - core/timeline.rs
//
// Bucketed event counts over time at a chosen zoom level.
// Aggregation never fails: an empty range or a range too wide for the
// zoom level yields a well-formed empty result carrying the condition.

use crate::core::model::{LogEntry, Severity, SeverityCounts, TimeSelection};
use crate::util::constants;
use crate::util::error::AggregationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Zoom levels
// =============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ZoomLevel {
    Second,
    #[default]
    Minute,
    Hour,
    Day,
}

impl ZoomLevel {
    /// All levels, finest first.
    pub fn all() -> &'static [ZoomLevel] {
        &[
            ZoomLevel::Second,
            ZoomLevel::Minute,
            ZoomLevel::Hour,
            ZoomLevel::Day,
        ]
    }

    pub fn bucket_width_ms(&self) -> i64 {
        match self {
            ZoomLevel::Second => 1_000,
            ZoomLevel::Minute => 60_000,
            ZoomLevel::Hour => 3_600_000,
            ZoomLevel::Day => 86_400_000,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ZoomLevel::Second => "second",
            ZoomLevel::Minute => "minute",
            ZoomLevel::Hour => "hour",
            ZoomLevel::Day => "day",
        }
    }

    /// The finest level whose bucket count over `range` stays within
    /// `max_buckets`. Falls back to `Day` when nothing fits.
    pub fn for_span(range: &TimeSelection, max_buckets: usize) -> ZoomLevel {
        ZoomLevel::all()
            .iter()
            .copied()
            .find(|zoom| bucket_span(range, *zoom).1 <= max_buckets as u64)
            .unwrap_or(ZoomLevel::Day)
    }
}

impl fmt::Display for ZoomLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Unrecognised zoom level name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseZoomLevelError(pub String);

impl fmt::Display for ParseZoomLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown zoom level '{}' (expected second, minute, hour or day)",
            self.0
        )
    }
}

impl std::error::Error for ParseZoomLevelError {}

impl FromStr for ZoomLevel {
    type Err = ParseZoomLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" | "s" => Ok(ZoomLevel::Second),
            "minute" | "minutes" | "m" => Ok(ZoomLevel::Minute),
            "hour" | "hours" | "h" => Ok(ZoomLevel::Hour),
            "day" | "days" | "d" => Ok(ZoomLevel::Day),
            _ => Err(ParseZoomLevelError(s.to_string())),
        }
    }
}

/// First bucket index and bucket count for `range` at `zoom`.
fn bucket_span(range: &TimeSelection, zoom: ZoomLevel) -> (i64, u64) {
    let width = zoom.bucket_width_ms();
    let first = range.start().timestamp_millis().div_euclid(width);
    let last = range.end().timestamp_millis().div_euclid(width);
    (first, (last - first) as u64 + 1)
}

// =============================================================================
// Aggregated output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineDataPoint {
    pub bucket_start: DateTime<Utc>,
    pub total: usize,
    pub counts: SeverityCounts,
    pub sources: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedTimelineData {
    pub zoom: ZoomLevel,
    /// Range covered; the explicit range, or the span of the timestamps.
    pub range: Option<TimeSelection>,
    pub points: Vec<TimelineDataPoint>,
    /// Always the sum of `points[..].total`.
    pub total_logs: usize,
    pub severity_totals: SeverityCounts,
    pub sources: BTreeSet<String>,
    /// Entries left out for having no timestamp.
    pub skipped_untimestamped: usize,
    /// Timestamped entries outside an explicit range.
    pub excluded_out_of_range: usize,
    pub condition: Option<AggregationError>,
}

impl AggregatedTimelineData {
    fn empty(zoom: ZoomLevel, range: Option<TimeSelection>, condition: AggregationError) -> Self {
        Self {
            zoom,
            range,
            points: Vec::new(),
            total_logs: 0,
            severity_totals: SeverityCounts::default(),
            sources: BTreeSet::new(),
            skipped_untimestamped: 0,
            excluded_out_of_range: 0,
            condition: Some(condition),
        }
    }

    /// The busiest bucket; the earliest one on a tie.
    pub fn peak(&self) -> Option<&TimelineDataPoint> {
        self.points.iter().fold(None, |best: Option<&TimelineDataPoint>, p| match best {
            Some(b) if b.total >= p.total => Some(b),
            _ => Some(p),
        })
    }

    /// Count for one severity (or unleveled) across all buckets.
    pub fn severity_total(&self, level: Option<Severity>) -> usize {
        self.severity_totals.get(level)
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// Bucket entries at `zoom` using the default bucket limit.
pub fn aggregate<'a>(
    entries: impl IntoIterator<Item = &'a LogEntry>,
    zoom: ZoomLevel,
    range: Option<TimeSelection>,
) -> AggregatedTimelineData {
    aggregate_with_limit(entries, zoom, range, constants::MAX_TIMELINE_BUCKETS)
}

/// Bucket entries at `zoom`, emitting dense buckets across the range.
///
/// Buckets are aligned to multiples of the zoom width since the epoch, and
/// each timestamped entry in range lands in exactly one of them.
pub fn aggregate_with_limit<'a>(
    entries: impl IntoIterator<Item = &'a LogEntry>,
    zoom: ZoomLevel,
    range: Option<TimeSelection>,
    max_buckets: usize,
) -> AggregatedTimelineData {
    let mut skipped = 0usize;
    let mut excluded = 0usize;
    let mut timed: Vec<(&LogEntry, DateTime<Utc>)> = Vec::new();

    for entry in entries {
        match entry.timestamp {
            None => skipped += 1,
            Some(ts) => match range {
                Some(r) if !r.contains(ts) => excluded += 1,
                _ => timed.push((entry, ts)),
            },
        }
    }

    let effective = match range {
        Some(r) => Some(r),
        None => TimeSelection::covering(timed.iter().map(|(e, _)| *e)),
    };

    let Some(effective) = effective.filter(|_| !timed.is_empty()) else {
        tracing::debug!(zoom = %zoom, skipped, excluded, "Timeline range is empty");
        let mut out = AggregatedTimelineData::empty(zoom, range, AggregationError::EmptyRange);
        out.skipped_untimestamped = skipped;
        out.excluded_out_of_range = excluded;
        return out;
    };

    let (first, count) = bucket_span(&effective, zoom);
    if count > max_buckets as u64 {
        tracing::warn!(
            zoom = %zoom,
            requested = count,
            max = max_buckets,
            "Timeline bucket limit exceeded"
        );
        let mut out = AggregatedTimelineData::empty(
            zoom,
            Some(effective),
            AggregationError::BucketLimitExceeded {
                requested: count,
                max: max_buckets,
            },
        );
        out.skipped_untimestamped = skipped;
        out.excluded_out_of_range = excluded;
        return out;
    }

    let width = zoom.bucket_width_ms();
    let mut points: Vec<TimelineDataPoint> = (0..count as i64)
        .map(|i| TimelineDataPoint {
            bucket_start: DateTime::from_timestamp_millis((first + i) * width)
                .unwrap_or(effective.start()),
            total: 0,
            counts: SeverityCounts::default(),
            sources: BTreeSet::new(),
        })
        .collect();

    let mut severity_totals = SeverityCounts::default();
    let mut sources = BTreeSet::new();
    for (entry, ts) in &timed {
        let idx = (ts.timestamp_millis().div_euclid(width) - first) as usize;
        let point = &mut points[idx];
        point.total += 1;
        point.counts.add(entry.level);
        severity_totals.add(entry.level);
        if let Some(ref source) = entry.source {
            if !point.sources.contains(source) {
                point.sources.insert(source.clone());
            }
            if !sources.contains(source) {
                sources.insert(source.clone());
            }
        }
    }

    tracing::debug!(
        zoom = %zoom,
        buckets = points.len(),
        entries = timed.len(),
        skipped,
        "Timeline aggregated"
    );

    AggregatedTimelineData {
        zoom,
        range: Some(effective),
        points,
        total_logs: timed.len(),
        severity_totals,
        sources,
        skipped_untimestamped: skipped,
        excluded_out_of_range: excluded,
        condition: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::EntryId;
    use chrono::TimeZone;

    fn at(seq: u64, secs: i64, level: Option<Severity>) -> LogEntry {
        let mut e = LogEntry::raw_only(EntryId::new(1, seq), seq + 1, String::new());
        e.timestamp = Some(Utc.timestamp_opt(secs, 0).unwrap());
        e.level = level;
        e.source = Some(format!("src{}", seq % 3));
        e
    }

    fn sample() -> Vec<LogEntry> {
        let base = 1_700_000_000; // 2023-11-14T22:13:20Z
        let levels = [Some(Severity::Error), Some(Severity::Info), None, Some(Severity::Warning)];
        let mut entries: Vec<_> = (0..200u64)
            .map(|i| at(i, base + (i as i64 * 37) % 7_200, levels[i as usize % 4]))
            .collect();
        let mut untimed = LogEntry::raw_only(EntryId::new(1, 999), 1000, "x".into());
        untimed.level = Some(Severity::Error);
        entries.push(untimed);
        entries
    }

    #[test]
    fn test_totals_match_at_every_zoom() {
        let entries = sample();
        for zoom in ZoomLevel::all() {
            let data = aggregate(&entries, *zoom, None);
            assert!(data.condition.is_none(), "{zoom}");
            let sum: usize = data.points.iter().map(|p| p.total).sum();
            assert_eq!(sum, data.total_logs, "{zoom}");
            assert_eq!(data.total_logs, 200, "{zoom}");
            assert_eq!(data.skipped_untimestamped, 1);
            for level in Severity::all().iter().map(|l| Some(*l)).chain([None]) {
                let per_point: usize = data.points.iter().map(|p| p.counts.get(level)).sum();
                assert_eq!(per_point, data.severity_total(level), "{zoom} {level:?}");
            }
        }
    }

    #[test]
    fn test_buckets_are_dense_and_aligned() {
        let entries = vec![at(0, 60, None), at(1, 245, None)];
        let data = aggregate(&entries, ZoomLevel::Minute, None);
        assert_eq!(data.points.len(), 4);
        assert_eq!(data.points[0].bucket_start.timestamp(), 60);
        assert_eq!(data.points[3].bucket_start.timestamp(), 240);
        assert_eq!(data.points[1].total, 0);
        assert_eq!(data.peak().unwrap().bucket_start.timestamp(), 60);
    }

    #[test]
    fn test_explicit_range_excludes_outside_entries() {
        let entries = vec![at(0, 10, None), at(1, 20, None), at(2, 30, None)];
        let range = TimeSelection::new(
            Utc.timestamp_opt(15, 0).unwrap(),
            Utc.timestamp_opt(25, 0).unwrap(),
        )
        .unwrap();
        let data = aggregate(&entries, ZoomLevel::Second, Some(range));
        assert_eq!(data.total_logs, 1);
        assert_eq!(data.excluded_out_of_range, 2);
        assert_eq!(data.points.len(), 11);
    }

    #[test]
    fn test_empty_input_reports_empty_range() {
        let data = aggregate(&[], ZoomLevel::Hour, None);
        assert_eq!(data.condition, Some(AggregationError::EmptyRange));
        assert!(data.points.is_empty());
        assert_eq!(data.total_logs, 0);
        assert!(data.peak().is_none());
    }

    #[test]
    fn test_bucket_limit_is_a_condition() {
        let entries = vec![at(0, 0, None), at(1, 86_400 * 10, None)];
        let data = aggregate_with_limit(&entries, ZoomLevel::Second, None, 1_000);
        assert!(matches!(
            data.condition,
            Some(AggregationError::BucketLimitExceeded { max: 1_000, .. })
        ));
        assert!(data.points.is_empty());
        assert_eq!(data.total_logs, 0);
    }

    #[test]
    fn test_for_span_picks_finest_fitting_zoom() {
        let range = TimeSelection::new(
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(3 * 3_600, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(ZoomLevel::for_span(&range, 500), ZoomLevel::Minute);
        assert_eq!(ZoomLevel::for_span(&range, 20_000), ZoomLevel::Second);
        assert_eq!(ZoomLevel::for_span(&range, 1), ZoomLevel::Day);
    }

    #[test]
    fn test_zoom_from_str() {
        assert_eq!("Hour".parse::<ZoomLevel>().unwrap(), ZoomLevel::Hour);
        assert_eq!("d".parse::<ZoomLevel>().unwrap(), ZoomLevel::Day);
        assert!("week".parse::<ZoomLevel>().is_err());
        assert_eq!(serde_json::to_string(&ZoomLevel::Second).unwrap(), "\"second\"");
    }
}
