// LogScope - core/anomaly.rs
//
// Multi-strategy anomaly detection over an entry snapshot.
//
// Three independent strategies run in parallel and are merged in a fixed
// order (time, content, sequence), which is also the order anomaly ids are
// assigned in:
//   - time-based: event rate per window against a rolling baseline
//   - content-based: clusters of similar error-level messages
//   - sequence-based: start/end pairs per correlation key
//
// Every strategy polls a shared cancel flag and the whole run fails with
// `DetectionError::Cancelled` once it is set.

use crate::core::model::{EntryId, LogEntry, Severity, TimeSelection};
use crate::util::constants;
use crate::util::error::{DetectionError, ValidationError};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

// =============================================================================
// Output types
// =============================================================================

/// Totally ordered anomaly severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AnomalySeverity::Low => "low",
            AnomalySeverity::Medium => "medium",
            AnomalySeverity::High => "high",
            AnomalySeverity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    TimeBased,
    ContentBased,
    SequenceBased,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    /// Position in detection order.
    pub id: u64,
    pub title: String,
    pub description: String,
    pub severity: AnomalySeverity,
    pub entry_ids: Vec<EntryId>,
    pub strategy: DetectionStrategy,
    pub window: Option<TimeSelection>,
}

/// Anomaly before its id is assigned at merge time.
struct Finding {
    title: String,
    description: String,
    severity: AnomalySeverity,
    entry_ids: Vec<EntryId>,
    strategy: DetectionStrategy,
    window: Option<TimeSelection>,
}

// =============================================================================
// Configuration
// =============================================================================

/// An expected ordering: every `start` must be followed by an `end` with the
/// same correlation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRule {
    pub name: String,
    pub start_pattern: String,
    pub end_pattern: String,
    /// Extracts the correlation key: group `key`, else group 1, else the
    /// whole match. Without a pattern all entries share one key.
    #[serde(default)]
    pub key_pattern: Option<String>,
    /// Longest allowed gap between a start and its end.
    #[serde(default)]
    pub max_gap_secs: Option<i64>,
    #[serde(default)]
    pub severity: AnomalySeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub rate_window_secs: i64,
    pub baseline_windows: usize,
    pub min_baseline_windows: usize,
    pub sensitivity: f64,
    pub similarity_threshold: f64,
    /// Inclusive: a cluster with exactly this many members is reported.
    pub min_cluster_size: usize,
    pub cluster_levels: BTreeSet<Severity>,
    pub sequence_rules: Vec<SequenceRule>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: constants::DEFAULT_RATE_WINDOW_SECS,
            baseline_windows: constants::DEFAULT_BASELINE_WINDOWS,
            min_baseline_windows: constants::DEFAULT_MIN_BASELINE_WINDOWS,
            sensitivity: constants::DEFAULT_SENSITIVITY,
            similarity_threshold: constants::DEFAULT_SIMILARITY_THRESHOLD,
            min_cluster_size: constants::DEFAULT_MIN_CLUSTER_SIZE,
            cluster_levels: BTreeSet::from([Severity::Critical, Severity::Error]),
            sequence_rules: Vec::new(),
        }
    }
}

fn invalid(rule: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidRule {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

impl AnomalyConfig {
    /// Validate settings and compile sequence rule patterns.
    pub fn compile(&self) -> Result<AnomalyDetector, ValidationError> {
        if !(constants::MIN_RATE_WINDOW_SECS..=constants::MAX_RATE_WINDOW_SECS)
            .contains(&self.rate_window_secs)
        {
            return Err(invalid(
                "rate_window_secs",
                format!(
                    "must be between {} and {}",
                    constants::MIN_RATE_WINDOW_SECS,
                    constants::MAX_RATE_WINDOW_SECS
                ),
            ));
        }
        if self.baseline_windows == 0 || self.baseline_windows > constants::MAX_BASELINE_WINDOWS {
            return Err(invalid(
                "baseline_windows",
                format!("must be between 1 and {}", constants::MAX_BASELINE_WINDOWS),
            ));
        }
        if self.min_baseline_windows == 0 || self.min_baseline_windows > self.baseline_windows {
            return Err(invalid(
                "min_baseline_windows",
                "must be at least 1 and at most baseline_windows",
            ));
        }
        if !(constants::MIN_SENSITIVITY..=constants::MAX_SENSITIVITY).contains(&self.sensitivity) {
            return Err(invalid(
                "sensitivity",
                format!(
                    "must be between {} and {}",
                    constants::MIN_SENSITIVITY,
                    constants::MAX_SENSITIVITY
                ),
            ));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(invalid("similarity_threshold", "must be in (0, 1]"));
        }
        if self.min_cluster_size < 2 {
            return Err(invalid("min_cluster_size", "must be at least 2"));
        }

        let mut names = BTreeSet::new();
        let mut rules = Vec::with_capacity(self.sequence_rules.len());
        for rule in &self.sequence_rules {
            if rule.name.is_empty() {
                return Err(invalid("(unnamed)", "sequence rule needs a name"));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(invalid(&rule.name, "duplicate rule name"));
            }
            if rule.max_gap_secs.is_some_and(|g| g < 0) {
                return Err(invalid(&rule.name, "max_gap_secs must not be negative"));
            }
            rules.push(CompiledRule {
                rule: rule.clone(),
                start: compile_rule_regex(&rule.name, "start_pattern", &rule.start_pattern)?,
                end: compile_rule_regex(&rule.name, "end_pattern", &rule.end_pattern)?,
                key: rule
                    .key_pattern
                    .as_deref()
                    .map(|p| compile_rule_regex(&rule.name, "key_pattern", p))
                    .transpose()?,
            });
        }

        Ok(AnomalyDetector {
            config: self.clone(),
            rules,
        })
    }
}

fn compile_rule_regex(rule: &str, field: &str, pattern: &str) -> Result<Regex, ValidationError> {
    if pattern.is_empty() {
        return Err(invalid(rule, format!("{field} must not be empty")));
    }
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(invalid(
            rule,
            format!(
                "{field} is {} chars, exceeds maximum of {}",
                pattern.len(),
                constants::MAX_REGEX_PATTERN_LENGTH
            ),
        ));
    }
    Regex::new(pattern).map_err(|e| invalid(rule, format!("{field}: {e}")))
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: SequenceRule,
    start: Regex,
    end: Regex,
    key: Option<Regex>,
}

impl CompiledRule {
    fn key_of(&self, text: &str) -> Option<String> {
        let Some(ref re) = self.key else {
            return Some(String::new());
        };
        let caps = re.captures(text)?;
        caps.name("key")
            .or_else(|| caps.get(1))
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
    }
}

// =============================================================================
// Detector
// =============================================================================

/// A validated configuration, ready to run.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    rules: Vec<CompiledRule>,
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), DetectionError> {
    if cancel.load(Ordering::Relaxed) {
        Err(DetectionError::Cancelled)
    } else {
        Ok(())
    }
}

fn text_of(entry: &LogEntry) -> &str {
    if entry.message.is_empty() {
        &entry.raw
    } else {
        &entry.message
    }
}

impl AnomalyDetector {
    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Run all three strategies and merge their findings.
    pub fn detect(
        &self,
        entries: &[&LogEntry],
        cancel: &AtomicBool,
    ) -> Result<Vec<Anomaly>, DetectionError> {
        let (time, (content, sequence)) = rayon::join(
            || self.detect_rate(entries, cancel),
            || {
                rayon::join(
                    || self.detect_content(entries, cancel),
                    || self.detect_sequences(entries, cancel),
                )
            },
        );
        let (time, content, sequence) = (time?, content?, sequence?);
        check_cancel(cancel)?;

        tracing::debug!(
            entries = entries.len(),
            time = time.len(),
            content = content.len(),
            sequence = sequence.len(),
            "Anomaly detection complete"
        );

        Ok(time
            .into_iter()
            .chain(content)
            .chain(sequence)
            .enumerate()
            .map(|(i, f)| Anomaly {
                id: i as u64,
                title: f.title,
                description: f.description,
                severity: f.severity,
                entry_ids: f.entry_ids,
                strategy: f.strategy,
                window: f.window,
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Time-based
    // -------------------------------------------------------------------------

    fn detect_rate(
        &self,
        entries: &[&LogEntry],
        cancel: &AtomicBool,
    ) -> Result<Vec<Finding>, DetectionError> {
        let cfg = &self.config;
        let width = cfg.rate_window_secs;
        let timed: Vec<(&LogEntry, i64)> = entries
            .iter()
            .filter_map(|e| e.timestamp.map(|ts| (*e, ts.timestamp().div_euclid(width))))
            .collect();
        let (Some(first), Some(last)) = (
            timed.iter().map(|(_, w)| *w).min(),
            timed.iter().map(|(_, w)| *w).max(),
        ) else {
            return Ok(Vec::new());
        };

        let n = (last - first + 1) as usize;
        if n > constants::MAX_RATE_WINDOWS {
            tracing::warn!(
                windows = n,
                max = constants::MAX_RATE_WINDOWS,
                "Too many rate windows; time-based detection skipped"
            );
            return Ok(Vec::new());
        }

        let mut members: Vec<Vec<EntryId>> = vec![Vec::new(); n];
        for (entry, w) in &timed {
            members[(*w - first) as usize].push(entry.id);
        }

        let mut findings = Vec::new();
        for i in 0..n {
            check_cancel(cancel)?;
            let from = i.saturating_sub(cfg.baseline_windows);
            let baseline = &members[from..i];
            if baseline.len() < cfg.min_baseline_windows {
                continue;
            }
            let counts: Vec<f64> = baseline.iter().map(|m| m.len() as f64).collect();
            let mean = counts.iter().sum::<f64>() / counts.len() as f64;
            let variance =
                counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
            let stddev = variance.sqrt().max(constants::MIN_BASELINE_STDDEV);

            let observed = members[i].len() as f64;
            let z = (observed - mean) / stddev;
            if z.abs() < cfg.sensitivity {
                continue;
            }

            let start_secs = (first + i as i64) * width;
            let window = DateTime::from_timestamp(start_secs, 0).and_then(|start| {
                let end = start + Duration::seconds(width) - Duration::milliseconds(1);
                TimeSelection::new(start, end).ok()
            });
            let kind = if z > 0.0 { "spike" } else { "drop" };
            // An empty window references the entries on either side of the gap.
            let entry_ids = if members[i].is_empty() {
                let before = members[..i].iter().rev().find_map(|m| m.last());
                let after = members[i + 1..].iter().find_map(|m| m.first());
                before.into_iter().chain(after).copied().collect()
            } else {
                members[i].clone()
            };
            findings.push(Finding {
                title: format!("Event rate {kind}"),
                description: format!(
                    "{observed} events in a {width}s window against a baseline of \
                     {mean:.1} ± {stddev:.1} (z = {z:.2})"
                ),
                severity: severity_for_deviation(z.abs() / cfg.sensitivity),
                entry_ids,
                strategy: DetectionStrategy::TimeBased,
                window,
            });
        }
        Ok(findings)
    }

    // -------------------------------------------------------------------------
    // Content-based
    // -------------------------------------------------------------------------

    fn detect_content(
        &self,
        entries: &[&LogEntry],
        cancel: &AtomicBool,
    ) -> Result<Vec<Finding>, DetectionError> {
        struct Cluster {
            template: String,
            tokens: BTreeSet<String>,
            members: Vec<EntryId>,
            timestamps: Vec<DateTime<Utc>>,
            has_critical: bool,
        }

        let cfg = &self.config;
        let mut clusters: Vec<Cluster> = Vec::new();
        let mut by_template: HashMap<String, usize> = HashMap::new();
        let mut unclustered = 0usize;

        for entry in entries {
            check_cancel(cancel)?;
            let Some(level) = entry.level.filter(|l| cfg.cluster_levels.contains(l)) else {
                continue;
            };

            let template = normalise_message(text_of(entry));
            let idx = match by_template.get(&template) {
                Some(idx) => Some(*idx),
                None => {
                    let tokens = tokenise(&template);
                    let best = clusters
                        .iter()
                        .enumerate()
                        .map(|(i, c)| (i, jaccard(&tokens, &c.tokens)))
                        .filter(|(_, sim)| *sim >= cfg.similarity_threshold)
                        .fold(None, |best: Option<(usize, f64)>, cur| match best {
                            Some(b) if b.1 >= cur.1 => Some(b),
                            _ => Some(cur),
                        });
                    match best {
                        Some((i, _)) => {
                            by_template.insert(template, i);
                            Some(i)
                        }
                        None if clusters.len() < constants::MAX_CONTENT_CLUSTERS => {
                            clusters.push(Cluster {
                                template: template.clone(),
                                tokens,
                                members: Vec::new(),
                                timestamps: Vec::new(),
                                has_critical: false,
                            });
                            by_template.insert(template, clusters.len() - 1);
                            Some(clusters.len() - 1)
                        }
                        None => None,
                    }
                }
            };

            let Some(idx) = idx else {
                unclustered += 1;
                continue;
            };
            let cluster = &mut clusters[idx];
            cluster.members.push(entry.id);
            cluster.timestamps.extend(entry.timestamp);
            cluster.has_critical |= level == Severity::Critical;
        }

        if unclustered > 0 {
            tracing::warn!(
                unclustered,
                max = constants::MAX_CONTENT_CLUSTERS,
                "Cluster limit reached; some messages were not clustered"
            );
        }

        let min = cfg.min_cluster_size;
        let findings = clusters
            .into_iter()
            .filter(|c| c.members.len() >= min)
            .map(|c| {
                let size = c.members.len();
                let mut severity = if size >= min * 10 {
                    AnomalySeverity::Critical
                } else if size >= min * 4 {
                    AnomalySeverity::High
                } else if size >= min * 2 {
                    AnomalySeverity::Medium
                } else {
                    AnomalySeverity::Low
                };
                if c.has_critical {
                    severity = severity.max(AnomalySeverity::High);
                }
                let window = match (c.timestamps.iter().min(), c.timestamps.iter().max()) {
                    (Some(lo), Some(hi)) => TimeSelection::new(*lo, *hi).ok(),
                    _ => None,
                };
                Finding {
                    title: format!("Repeated error: {}", truncate_chars(&c.template, 80)),
                    description: format!("{size} similar error-level messages"),
                    severity,
                    entry_ids: c.members,
                    strategy: DetectionStrategy::ContentBased,
                    window,
                }
            })
            .collect();
        Ok(findings)
    }

    // -------------------------------------------------------------------------
    // Sequence-based
    // -------------------------------------------------------------------------

    fn detect_sequences(
        &self,
        entries: &[&LogEntry],
        cancel: &AtomicBool,
    ) -> Result<Vec<Finding>, DetectionError> {
        if self.rules.is_empty() {
            return Ok(Vec::new());
        }

        let mut ordered: Vec<(&LogEntry, DateTime<Utc>)> = entries
            .iter()
            .filter_map(|e| e.timestamp.map(|ts| (*e, ts)))
            .collect();
        ordered.sort_by_key(|(e, ts)| (*ts, e.file_id, e.line_number));

        let mut findings = Vec::new();
        for rule in &self.rules {
            let name = &rule.rule.name;
            let severity = rule.rule.severity;
            let max_gap = rule.rule.max_gap_secs.map(Duration::seconds);
            let mut open: BTreeMap<String, VecDeque<(&LogEntry, DateTime<Utc>)>> = BTreeMap::new();

            for (entry, ts) in &ordered {
                check_cancel(cancel)?;
                let text = text_of(entry);
                let is_start = rule.start.is_match(text);
                if !is_start && !rule.end.is_match(text) {
                    continue;
                }
                let Some(key) = rule.key_of(text) else {
                    continue;
                };

                if is_start {
                    open.entry(key).or_default().push_back((entry, *ts));
                    continue;
                }

                match open.get_mut(&key).and_then(|q| q.pop_front()) {
                    None => findings.push(Finding {
                        title: format!("{name}: end without start"),
                        description: format!(
                            "End event for key '{key}' at line {} has no open start",
                            entry.line_number
                        ),
                        severity,
                        entry_ids: vec![entry.id],
                        strategy: DetectionStrategy::SequenceBased,
                        window: TimeSelection::new(*ts, *ts).ok(),
                    }),
                    Some((start, start_ts)) => {
                        let gap = *ts - start_ts;
                        if max_gap.is_some_and(|max| gap > max) {
                            findings.push(Finding {
                                title: format!("{name}: end arrived late"),
                                description: format!(
                                    "Key '{key}' took {}s, limit is {}s",
                                    gap.num_seconds(),
                                    rule.rule.max_gap_secs.unwrap_or_default()
                                ),
                                severity,
                                entry_ids: vec![start.id, entry.id],
                                strategy: DetectionStrategy::SequenceBased,
                                window: TimeSelection::new(start_ts, *ts).ok(),
                            });
                        }
                    }
                }
            }

            let mut unmatched: Vec<(String, &LogEntry, DateTime<Utc>)> = open
                .into_iter()
                .flat_map(|(key, q)| q.into_iter().map(move |(e, ts)| (key.clone(), e, ts)))
                .collect();
            unmatched.sort_by_key(|(_, e, ts)| (*ts, e.file_id, e.line_number));
            for (key, entry, ts) in unmatched {
                findings.push(Finding {
                    title: format!("{name}: start without end"),
                    description: format!(
                        "Start event for key '{key}' at line {} was never completed",
                        entry.line_number
                    ),
                    severity,
                    entry_ids: vec![entry.id],
                    strategy: DetectionStrategy::SequenceBased,
                    window: TimeSelection::new(ts, ts).ok(),
                });
            }
        }
        Ok(findings)
    }
}

/// Severity for a deviation expressed as a multiple of the sensitivity.
fn severity_for_deviation(ratio: f64) -> AnomalySeverity {
    if ratio < 1.5 {
        AnomalySeverity::Low
    } else if ratio < 2.0 {
        AnomalySeverity::Medium
    } else if ratio < 3.0 {
        AnomalySeverity::High
    } else {
        AnomalySeverity::Critical
    }
}

// =============================================================================
// Message normalisation
// =============================================================================

/// Replace variable parts of a message (ids, hex, numbers) with placeholders.
pub fn normalise_message(message: &str) -> String {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (
                r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
                "<id>",
            ),
            (r"(?i)\b0x[0-9a-f]+\b", "<hex>"),
            (r"(?i)\b[0-9a-f]*\d[0-9a-f]*[a-f][0-9a-f]*\b", "<hex>"),
            (r"\d+(?:\.\d+)*", "<num>"),
        ]
        .into_iter()
        .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, r)))
        .collect()
    });

    let mut out = message.trim().to_lowercase();
    for (re, replacement) in patterns {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}

fn tokenise(text: &str) -> BTreeSet<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '=' | '(' | ')' | '"' | '\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

// =============================================================================
// Severity resolution
// =============================================================================

/// The highest-severity anomaly referencing `entry_id`.
///
/// Equal severities resolve to the anomaly found first in `anomalies`, so
/// the result depends on detection order.
pub fn resolve_entry_severity(anomalies: &[Anomaly], entry_id: EntryId) -> Option<&Anomaly> {
    anomalies
        .iter()
        .filter(|a| a.entry_ids.contains(&entry_id))
        .fold(None, |best: Option<&Anomaly>, a| match best {
            Some(b) if b.severity >= a.severity => Some(b),
            _ => Some(a),
        })
}

/// `resolve_entry_severity` for every referenced entry at once.
pub fn highest_by_entry(anomalies: &[Anomaly]) -> HashMap<EntryId, &Anomaly> {
    let mut best: HashMap<EntryId, &Anomaly> = HashMap::new();
    for anomaly in anomalies {
        for id in &anomaly.entry_ids {
            best.entry(*id)
                .and_modify(|cur| {
                    if anomaly.severity > cur.severity {
                        *cur = anomaly;
                    }
                })
                .or_insert(anomaly);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(seq: u64, secs: i64, level: Option<Severity>, message: &str) -> LogEntry {
        let mut e = LogEntry::raw_only(EntryId::new(1, seq), seq + 1, message.to_string());
        e.timestamp = Some(Utc.timestamp_opt(secs, 0).unwrap());
        e.level = level;
        e.message = message.to_string();
        e
    }

    fn refs(entries: &[LogEntry]) -> Vec<&LogEntry> {
        entries.iter().collect()
    }

    fn anomaly(id: u64, severity: AnomalySeverity, ids: &[EntryId]) -> Anomaly {
        Anomaly {
            id,
            title: String::new(),
            description: String::new(),
            severity,
            entry_ids: ids.to_vec(),
            strategy: DetectionStrategy::TimeBased,
            window: None,
        }
    }

    #[test]
    fn test_severity_selection_picks_highest() {
        let target = EntryId::new(1, 7);
        let anomalies = vec![
            anomaly(0, AnomalySeverity::Medium, &[target]),
            anomaly(1, AnomalySeverity::Critical, &[target]),
            anomaly(2, AnomalySeverity::Low, &[target]),
        ];
        let best = resolve_entry_severity(&anomalies, target).unwrap();
        assert_eq!(best.severity, AnomalySeverity::Critical);
        assert_eq!(highest_by_entry(&anomalies)[&target].id, 1);
        assert!(resolve_entry_severity(&anomalies, EntryId::new(9, 9)).is_none());
    }

    #[test]
    fn test_severity_tie_resolves_to_first_found() {
        let target = EntryId::new(1, 1);
        let anomalies = vec![
            anomaly(0, AnomalySeverity::High, &[target]),
            anomaly(1, AnomalySeverity::High, &[target]),
        ];
        assert_eq!(resolve_entry_severity(&anomalies, target).unwrap().id, 0);
        assert_eq!(highest_by_entry(&anomalies)[&target].id, 0);
    }

    #[test]
    fn test_rate_spike_is_flagged() {
        let mut entries = Vec::new();
        let mut seq = 0;
        // Ten quiet windows with 2 events each, then a burst of 40.
        for w in 0..10i64 {
            for k in 0..2 {
                entries.push(entry(seq, w * 60 + k, Some(Severity::Info), "tick"));
                seq += 1;
            }
        }
        for k in 0..40 {
            entries.push(entry(seq, 600 + k, Some(Severity::Info), "tick"));
            seq += 1;
        }

        let detector = AnomalyConfig::default().compile().unwrap();
        let found = detector
            .detect(&refs(&entries), &AtomicBool::new(false))
            .unwrap();
        let rate: Vec<_> = found
            .iter()
            .filter(|a| a.strategy == DetectionStrategy::TimeBased)
            .collect();
        assert_eq!(rate.len(), 1);
        assert_eq!(rate[0].entry_ids.len(), 40);
        assert_eq!(rate[0].severity, AnomalySeverity::Critical);
        assert_eq!(rate[0].window.unwrap().start().timestamp(), 600);
    }

    #[test]
    fn test_rate_drop_references_entries_around_the_gap() {
        let mut entries = Vec::new();
        let mut seq = 0;
        // Ten windows of 10 events, one silent window, then 10 more.
        for w in (0..10i64).chain([11]) {
            for k in 0..10 {
                entries.push(entry(seq, w * 60 + k, Some(Severity::Info), "tick"));
                seq += 1;
            }
        }

        let detector = AnomalyConfig::default().compile().unwrap();
        let found = detector
            .detect(&refs(&entries), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Event rate drop");
        assert_eq!(found[0].window.unwrap().start().timestamp(), 600);
        assert_eq!(
            found[0].entry_ids,
            vec![EntryId::new(1, 99), EntryId::new(1, 100)]
        );
    }

    #[test]
    fn test_cluster_of_exactly_min_size_is_reported() {
        let min = constants::DEFAULT_MIN_CLUSTER_SIZE as u64;
        let make = |count: u64| -> Vec<LogEntry> {
            (0..count)
                .map(|i| entry(i, i as i64, Some(Severity::Error), &format!("worker {i} crashed")))
                .collect()
        };
        let detector = AnomalyConfig::default().compile().unwrap();
        let cancel = AtomicBool::new(false);

        let at_min = make(min);
        let found = detector.detect(&refs(&at_min), &cancel).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry_ids.len() as u64, min);

        let below = make(min - 1);
        assert!(detector.detect(&refs(&below), &cancel).unwrap().is_empty());
    }

    #[test]
    fn test_content_cluster_groups_similar_errors() {
        let mut entries = Vec::new();
        for i in 0..6u64 {
            entries.push(entry(
                i,
                i as i64,
                Some(Severity::Error),
                &format!("Connection to 10.0.0.{i} failed after {}ms", 100 + i),
            ));
        }
        entries.push(entry(6, 6, Some(Severity::Error), "Disk quota exceeded"));
        entries.push(entry(7, 7, Some(Severity::Info), "Connection to 10.0.0.1 failed after 5ms"));

        let detector = AnomalyConfig::default().compile().unwrap();
        let found = detector
            .detect(&refs(&entries), &AtomicBool::new(false))
            .unwrap();
        let clusters: Vec<_> = found
            .iter()
            .filter(|a| a.strategy == DetectionStrategy::ContentBased)
            .collect();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].entry_ids.len(), 6);
        assert_eq!(clusters[0].severity, AnomalySeverity::Low);
    }

    #[test]
    fn test_critical_member_raises_cluster_severity() {
        let entries: Vec<_> = (0..5u64)
            .map(|i| {
                let level = if i == 0 { Severity::Critical } else { Severity::Error };
                entry(i, i as i64, Some(level), &format!("worker {i} crashed"))
            })
            .collect();
        let detector = AnomalyConfig::default().compile().unwrap();
        let found = detector
            .detect(&refs(&entries), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, AnomalySeverity::High);
    }

    fn job_rule(max_gap_secs: Option<i64>) -> SequenceRule {
        SequenceRule {
            name: "job".into(),
            start_pattern: "job started".into(),
            end_pattern: "job finished".into(),
            key_pattern: Some(r"id=(?P<key>\w+)".into()),
            max_gap_secs,
            severity: AnomalySeverity::High,
        }
    }

    #[test]
    fn test_unmatched_start_yields_one_anomaly() {
        let entries = vec![
            entry(0, 0, None, "job started id=a"),
            entry(1, 1, None, "job started id=b"),
            entry(2, 2, None, "job finished id=a"),
        ];
        let config = AnomalyConfig {
            sequence_rules: vec![job_rule(None)],
            ..AnomalyConfig::default()
        };
        let found = config
            .compile()
            .unwrap()
            .detect(&refs(&entries), &AtomicBool::new(false))
            .unwrap();
        let seq: Vec<_> = found
            .iter()
            .filter(|a| a.strategy == DetectionStrategy::SequenceBased)
            .collect();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].entry_ids, vec![EntryId::new(1, 1)]);
        assert_eq!(seq[0].severity, AnomalySeverity::High);
    }

    #[test]
    fn test_orphan_end_and_late_end() {
        let entries = vec![
            entry(0, 0, None, "job finished id=x"),
            entry(1, 10, None, "job started id=y"),
            entry(2, 500, None, "job finished id=y"),
        ];
        let config = AnomalyConfig {
            sequence_rules: vec![job_rule(Some(60))],
            ..AnomalyConfig::default()
        };
        let found = config
            .compile()
            .unwrap()
            .detect(&refs(&entries), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].title.contains("end without start"));
        assert!(found[1].title.contains("late"));
        assert_eq!(found[1].entry_ids, vec![EntryId::new(1, 1), EntryId::new(1, 2)]);
        assert_eq!(found[1].id, 1);
    }

    #[test]
    fn test_cancelled_run_returns_error() {
        let entries = vec![entry(0, 0, Some(Severity::Error), "x")];
        let detector = AnomalyConfig::default().compile().unwrap();
        let result = detector.detect(&refs(&entries), &AtomicBool::new(true));
        assert_eq!(result.unwrap_err(), DetectionError::Cancelled);
    }

    #[test]
    fn test_config_validation() {
        let bad = AnomalyConfig {
            sensitivity: 0.0,
            ..AnomalyConfig::default()
        };
        assert!(bad.compile().is_err());

        let bad_rule = AnomalyConfig {
            sequence_rules: vec![SequenceRule {
                start_pattern: "[oops".into(),
                ..job_rule(None)
            }],
            ..AnomalyConfig::default()
        };
        assert!(matches!(
            bad_rule.compile(),
            Err(ValidationError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_normalise_message_masks_variables() {
        assert_eq!(
            normalise_message("Request 4f3a9c2e-1b2c-4d5e-8f90-123456789abc took 250ms"),
            "request <id> took <num>ms"
        );
        assert_eq!(normalise_message("addr 0xdeadBEEF"), "addr <hex>");
        assert_eq!(normalise_message("port 8080 closed"), "port <num> closed");
    }
}
