// LogScope - core/filter.rs
//
// Composable filter engine for log entries.
// Enabled top-level filters are AND-combined; SAVED filters nest a group
// with its own combine rule. Definitions are validated when created and
// compiled once (regexes included) before evaluation.
// Core layer: pure logic, no I/O.

use crate::core::model::{EntryId, LogEntry, Severity, TimeSelection};
use crate::util::constants;
use crate::util::error::ValidationError;
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

// =============================================================================
// Definitions
// =============================================================================

/// A single filter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: FilterKind,
}

fn enabled_by_default() -> bool {
    true
}

/// Filter payload, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterKind {
    /// Entry level is one of `levels`.
    LogLevel { levels: BTreeSet<Severity> },

    /// Entry source is one of `sources`.
    Source { sources: BTreeSet<String> },

    /// Entry timestamp lies in `range` (inclusive). Entries without a
    /// timestamp never match.
    Timestamp { range: TimeSelection },

    /// Substring match in any of `fields`.
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        #[serde(default)]
        case_sensitive: bool,
        #[serde(default = "default_fields")]
        fields: Vec<SearchField>,
    },

    /// Regex match in any of `fields`.
    Regex {
        pattern: String,
        #[serde(default)]
        flags: RegexFlags,
        #[serde(default = "default_fields")]
        fields: Vec<SearchField>,
    },

    /// An ordered group of filters combined by `combine`.
    Saved {
        filters: Vec<Filter>,
        #[serde(default)]
        combine: CombineMode,
    },
}

/// Entry fields a TEXT or REGEX filter can search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Message,
    Raw,
    Source,
    Level,
}

fn default_fields() -> Vec<SearchField> {
    vec![SearchField::Message, SearchField::Raw]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexFlags {
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub multi_line: bool,
    #[serde(default)]
    pub dot_matches_new_line: bool,
}

/// How a SAVED filter combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    #[default]
    All,
    Any,
}

// =============================================================================
// Construction and validation
// =============================================================================

impl Filter {
    fn build(id: &str, name: &str, kind: FilterKind) -> Result<Self, ValidationError> {
        let filter = Self {
            id: id.to_string(),
            enabled: true,
            name: name.to_string(),
            kind,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn log_level(
        id: &str,
        name: &str,
        levels: impl IntoIterator<Item = Severity>,
    ) -> Result<Self, ValidationError> {
        Self::build(
            id,
            name,
            FilterKind::LogLevel {
                levels: levels.into_iter().collect(),
            },
        )
    }

    pub fn source<S: Into<String>>(
        id: &str,
        name: &str,
        sources: impl IntoIterator<Item = S>,
    ) -> Result<Self, ValidationError> {
        Self::build(
            id,
            name,
            FilterKind::Source {
                sources: sources.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn timestamp(id: &str, name: &str, range: TimeSelection) -> Result<Self, ValidationError> {
        Self::build(id, name, FilterKind::Timestamp { range })
    }

    pub fn text(
        id: &str,
        name: &str,
        text: &str,
        case_sensitive: bool,
        fields: Vec<SearchField>,
    ) -> Result<Self, ValidationError> {
        Self::build(
            id,
            name,
            FilterKind::Text {
                text: text.to_string(),
                case_sensitive,
                fields,
            },
        )
    }

    pub fn regex(
        id: &str,
        name: &str,
        pattern: &str,
        flags: RegexFlags,
        fields: Vec<SearchField>,
    ) -> Result<Self, ValidationError> {
        Self::build(
            id,
            name,
            FilterKind::Regex {
                pattern: pattern.to_string(),
                flags,
                fields,
            },
        )
    }

    pub fn saved(
        id: &str,
        name: &str,
        filters: Vec<Filter>,
        combine: CombineMode,
    ) -> Result<Self, ValidationError> {
        Self::build(id, name, FilterKind::Saved { filters, combine })
    }

    /// Quick filter for Critical and Error entries.
    pub fn errors_only(id: &str) -> Result<Self, ValidationError> {
        Self::log_level(id, "Errors only", [Severity::Critical, Severity::Error])
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Re-check the definition, including every nested filter.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut ancestors = Vec::new();
        self.validate_at(&mut ancestors)
    }

    fn validate_at<'a>(&'a self, ancestors: &mut Vec<&'a str>) -> Result<(), ValidationError> {
        let filter_id = || self.id.clone();
        match &self.kind {
            FilterKind::LogLevel { levels } => {
                if levels.is_empty() {
                    return Err(ValidationError::EmptyValueSet {
                        filter_id: filter_id(),
                        field: "levels",
                    });
                }
            }
            FilterKind::Source { sources } => {
                if sources.is_empty() {
                    return Err(ValidationError::EmptyValueSet {
                        filter_id: filter_id(),
                        field: "sources",
                    });
                }
            }
            FilterKind::Timestamp { range } => {
                if range.start() > range.end() {
                    return Err(ValidationError::InvalidTimeRange {
                        start: range.start().to_rfc3339(),
                        end: range.end().to_rfc3339(),
                    });
                }
            }
            FilterKind::Text { text, fields, .. } => {
                if text.is_empty() {
                    return Err(ValidationError::EmptyText {
                        filter_id: filter_id(),
                    });
                }
                if fields.is_empty() {
                    return Err(ValidationError::NoSearchFields {
                        filter_id: filter_id(),
                    });
                }
            }
            FilterKind::Regex {
                pattern,
                flags,
                fields,
            } => {
                if fields.is_empty() {
                    return Err(ValidationError::NoSearchFields {
                        filter_id: filter_id(),
                    });
                }
                compile_regex(&self.id, pattern, flags)?;
            }
            FilterKind::Saved { filters, .. } => {
                if ancestors.contains(&self.id.as_str()) {
                    return Err(ValidationError::CyclicSavedFilter {
                        filter_id: filter_id(),
                    });
                }
                if ancestors.len() >= constants::MAX_SAVED_FILTER_DEPTH {
                    return Err(ValidationError::NestingTooDeep {
                        filter_id: filter_id(),
                        max_depth: constants::MAX_SAVED_FILTER_DEPTH,
                    });
                }
                ancestors.push(&self.id);
                let mut sibling_ids = HashSet::new();
                for child in filters {
                    if !sibling_ids.insert(child.id.as_str()) {
                        return Err(ValidationError::DuplicateFilterId {
                            filter_id: child.id.clone(),
                        });
                    }
                    child.validate_at(ancestors)?;
                }
                ancestors.pop();
            }
        }
        Ok(())
    }
}

fn compile_regex(filter_id: &str, pattern: &str, flags: &RegexFlags) -> Result<Regex, ValidationError> {
    if pattern.len() > constants::MAX_REGEX_PATTERN_LENGTH {
        return Err(ValidationError::RegexTooLong {
            filter_id: filter_id.to_string(),
            length: pattern.len(),
            max_length: constants::MAX_REGEX_PATTERN_LENGTH,
        });
    }
    RegexBuilder::new(pattern)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_matches_new_line)
        .build()
        .map_err(|e| ValidationError::InvalidRegex {
            filter_id: filter_id.to_string(),
            pattern: pattern.to_string(),
            source: e,
        })
}

// =============================================================================
// FilterSet
// =============================================================================

/// Ordered, validated collection of top-level filters.
///
/// Every mutation validates first; a rejected mutation leaves the set as
/// it was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_filters(filters: Vec<Filter>) -> Result<Self, ValidationError> {
        let mut set = Self::new();
        for filter in filters {
            set.add(filter)?;
        }
        Ok(set)
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.id == id)
    }

    pub fn add(&mut self, filter: Filter) -> Result<(), ValidationError> {
        filter.validate()?;
        if self.get(&filter.id).is_some() {
            return Err(ValidationError::DuplicateFilterId {
                filter_id: filter.id,
            });
        }
        tracing::debug!(filter_id = %filter.id, "Filter added");
        self.filters.push(filter);
        Ok(())
    }

    /// Replace the filter with the same id, keeping its position.
    pub fn replace(&mut self, filter: Filter) -> Result<Filter, ValidationError> {
        filter.validate()?;
        let slot = self
            .filters
            .iter_mut()
            .find(|f| f.id == filter.id)
            .ok_or_else(|| ValidationError::UnknownFilter {
                filter_id: filter.id.clone(),
            })?;
        Ok(std::mem::replace(slot, filter))
    }

    pub fn remove(&mut self, id: &str) -> Result<Filter, ValidationError> {
        let pos = self
            .filters
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| ValidationError::UnknownFilter {
                filter_id: id.to_string(),
            })?;
        Ok(self.filters.remove(pos))
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), ValidationError> {
        let filter = self
            .filters
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| ValidationError::UnknownFilter {
                filter_id: id.to_string(),
            })?;
        filter.enabled = enabled;
        Ok(())
    }

    pub fn compile(&self) -> Result<CompiledFilters, ValidationError> {
        CompiledFilters::compile(&self.filters)
    }
}

// =============================================================================
// Compiled evaluation
// =============================================================================

/// Random access to entries by id, for evaluating over an id subset.
pub trait EntryLookup: Sync {
    fn entry(&self, id: EntryId) -> Option<&LogEntry>;
}

#[derive(Debug, Clone)]
enum Matcher {
    Levels(BTreeSet<Severity>),
    Sources(BTreeSet<String>),
    Range(TimeSelection),
    Text {
        needle: String,
        case_sensitive: bool,
        fields: Vec<SearchField>,
    },
    Regex {
        re: Regex,
        fields: Vec<SearchField>,
    },
    Group {
        combine: CombineMode,
        children: Vec<Matcher>,
    },
}

impl Matcher {
    fn compile(filter: &Filter) -> Result<Self, ValidationError> {
        Ok(match &filter.kind {
            FilterKind::LogLevel { levels } => Matcher::Levels(levels.clone()),
            FilterKind::Source { sources } => Matcher::Sources(sources.clone()),
            FilterKind::Timestamp { range } => Matcher::Range(*range),
            FilterKind::Text {
                text,
                case_sensitive,
                fields,
            } => Matcher::Text {
                needle: if *case_sensitive {
                    text.clone()
                } else {
                    text.to_lowercase()
                },
                case_sensitive: *case_sensitive,
                fields: fields.clone(),
            },
            FilterKind::Regex {
                pattern,
                flags,
                fields,
            } => Matcher::Regex {
                re: compile_regex(&filter.id, pattern, flags)?,
                fields: fields.clone(),
            },
            FilterKind::Saved { filters, combine } => Matcher::Group {
                combine: *combine,
                children: compile_enabled(filters)?,
            },
        })
    }

    fn matches(&self, entry: &LogEntry) -> bool {
        match self {
            Matcher::Levels(levels) => entry.level.is_some_and(|l| levels.contains(&l)),
            Matcher::Sources(sources) => entry
                .source
                .as_ref()
                .is_some_and(|s| sources.contains(s)),
            Matcher::Range(range) => entry.timestamp.is_some_and(|ts| range.contains(ts)),
            Matcher::Text {
                needle,
                case_sensitive,
                fields,
            } => fields.iter().any(|field| {
                field_text(entry, *field).is_some_and(|hay| {
                    if *case_sensitive {
                        hay.contains(needle.as_str())
                    } else {
                        hay.to_lowercase().contains(needle.as_str())
                    }
                })
            }),
            Matcher::Regex { re, fields } => fields
                .iter()
                .any(|field| field_text(entry, *field).is_some_and(|hay| re.is_match(hay))),
            Matcher::Group { combine, children } => {
                // A group with no enabled children filters nothing.
                if children.is_empty() {
                    return true;
                }
                match combine {
                    CombineMode::All => children.iter().all(|c| c.matches(entry)),
                    CombineMode::Any => children.iter().any(|c| c.matches(entry)),
                }
            }
        }
    }
}

fn field_text(entry: &LogEntry, field: SearchField) -> Option<&str> {
    match field {
        SearchField::Message => Some(entry.message.as_str()),
        SearchField::Raw => Some(entry.raw.as_str()),
        SearchField::Source => entry.source.as_deref(),
        SearchField::Level => entry.level.map(|l| l.label()),
    }
}

fn compile_enabled(filters: &[Filter]) -> Result<Vec<Matcher>, ValidationError> {
    filters
        .iter()
        .filter(|f| f.enabled)
        .map(Matcher::compile)
        .collect()
}

/// Enabled filters compiled for repeated evaluation.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    matchers: Vec<Matcher>,
}

impl CompiledFilters {
    /// Compile the enabled filters of `filters`. Disabled filters, at any
    /// depth, are dropped here and never evaluated.
    pub fn compile(filters: &[Filter]) -> Result<Self, ValidationError> {
        for filter in filters {
            filter.validate()?;
        }
        Ok(Self {
            matchers: compile_enabled(filters)?,
        })
    }

    /// True when no enabled filter remains; everything passes.
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.matchers.iter().all(|m| m.matches(entry))
    }

    /// Ids of matching entries, in input order.
    pub fn apply(&self, entries: &[LogEntry]) -> Vec<EntryId> {
        if self.is_empty() {
            return entries.iter().map(|e| e.id).collect();
        }
        if entries.len() >= constants::PARALLEL_FILTER_THRESHOLD {
            entries
                .par_iter()
                .filter(|e| self.matches(e))
                .map(|e| e.id)
                .collect()
        } else {
            entries
                .iter()
                .filter(|e| self.matches(e))
                .map(|e| e.id)
                .collect()
        }
    }

    /// Filter a subset of ids, in input order. Unknown ids are skipped.
    pub fn apply_ids<L: EntryLookup + ?Sized>(&self, lookup: &L, ids: &[EntryId]) -> Vec<EntryId> {
        let keep = |id: &EntryId| lookup.entry(*id).is_some_and(|e| self.matches(e));
        if ids.len() >= constants::PARALLEL_FILTER_THRESHOLD {
            ids.par_iter().copied().filter(|id| keep(id)).collect()
        } else {
            ids.iter().copied().filter(|id| keep(id)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn make_entry(seq: u64, level: Option<Severity>, source: Option<&str>, message: &str) -> LogEntry {
        let mut e = LogEntry::raw_only(EntryId::new(1, seq), seq + 1, format!("raw {message}"));
        e.timestamp = Some(Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap());
        e.level = level;
        e.source = source.map(str::to_string);
        e.message = message.to_string();
        e
    }

    fn msg_fields() -> Vec<SearchField> {
        vec![SearchField::Message]
    }

    #[test]
    fn test_empty_enabled_set_passes_everything() {
        let entries = vec![
            make_entry(0, Some(Severity::Error), None, "Error 1"),
            make_entry(1, None, None, "Info 1"),
        ];
        let compiled = CompiledFilters::compile(&[]).unwrap();
        assert_eq!(compiled.apply(&entries).len(), 2);

        let disabled = Filter::errors_only("e").unwrap().with_enabled(false);
        let compiled = CompiledFilters::compile(&[disabled]).unwrap();
        assert!(compiled.is_empty());
        assert_eq!(compiled.apply(&entries).len(), 2);
    }

    #[test]
    fn test_and_combination_of_level_source_and_text() {
        // 10 entries satisfy all three filters, 5 miss only the text, and 3
        // miss only the source.
        let mut entries = Vec::new();
        let mut seq = 0;
        let mut push = |level, source, message: &str| {
            entries.push(make_entry(seq, Some(level), Some(source), message));
            seq += 1;
        };
        for _ in 0..10 {
            push(Severity::Error, "auth", "login failed for user");
        }
        for _ in 0..5 {
            push(Severity::Error, "auth", "session expired");
        }
        for _ in 0..3 {
            push(Severity::Error, "db", "login failed for user");
        }

        let filters = vec![
            Filter::log_level("lvl", "Errors", [Severity::Error]).unwrap(),
            Filter::source("src", "Auth", ["auth"]).unwrap(),
            Filter::text("txt", "Login", "LOGIN", false, msg_fields()).unwrap(),
        ];
        let compiled = CompiledFilters::compile(&filters).unwrap();
        let ids = compiled.apply(&entries);
        assert_eq!(ids.len(), 10);
        assert!(ids.iter().all(|id| id.seq < 10));
    }

    #[test]
    fn test_timestamp_filter_excludes_untimestamped() {
        let mut untimed = make_entry(0, None, None, "x");
        untimed.timestamp = None;
        let timed = make_entry(1, None, None, "y");
        let range = TimeSelection::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            Utc.timestamp_opt(1_700_000_001, 0).unwrap(),
        )
        .unwrap();
        let compiled =
            CompiledFilters::compile(&[Filter::timestamp("t", "Range", range).unwrap()]).unwrap();
        assert!(!compiled.matches(&untimed));
        assert!(compiled.matches(&timed));
    }

    #[test]
    fn test_text_case_sensitivity_and_fields() {
        let e = make_entry(0, Some(Severity::Warning), Some("Net"), "Connection FAILED");
        let insensitive = Filter::text("a", "", "failed", false, msg_fields()).unwrap();
        let sensitive = Filter::text("b", "", "failed", true, msg_fields()).unwrap();
        let by_source = Filter::text("c", "", "net", false, vec![SearchField::Source]).unwrap();
        let by_level = Filter::text("d", "", "warning", false, vec![SearchField::Level]).unwrap();
        let by_raw = Filter::text("e", "", "raw connection", false, vec![SearchField::Raw]).unwrap();

        let check = |f: Filter| CompiledFilters::compile(&[f]).unwrap().matches(&e);
        assert!(check(insensitive));
        assert!(!check(sensitive));
        assert!(check(by_source));
        assert!(check(by_level));
        assert!(check(by_raw));
    }

    #[test]
    fn test_regex_filter_with_flags() {
        let entries = vec![
            make_entry(0, None, None, "Error code: 404"),
            make_entry(1, None, None, "Error CODE: 500"),
            make_entry(2, None, None, "Status OK"),
        ];
        let flags = RegexFlags {
            case_insensitive: true,
            ..RegexFlags::default()
        };
        let f = Filter::regex("r", "5xx", r"code:\s*5\d{2}", flags, msg_fields()).unwrap();
        let ids = CompiledFilters::compile(&[f]).unwrap().apply(&entries);
        assert_eq!(ids, vec![EntryId::new(1, 1)]);
    }

    #[test]
    fn test_creation_rejects_malformed_definitions() {
        assert!(matches!(
            Filter::log_level("x", "", []),
            Err(ValidationError::EmptyValueSet { field: "levels", .. })
        ));
        assert!(matches!(
            Filter::source::<String>("x", "", []),
            Err(ValidationError::EmptyValueSet { field: "sources", .. })
        ));
        assert!(matches!(
            Filter::text("x", "", "", false, msg_fields()),
            Err(ValidationError::EmptyText { .. })
        ));
        assert!(matches!(
            Filter::text("x", "", "a", false, vec![]),
            Err(ValidationError::NoSearchFields { .. })
        ));
        assert!(matches!(
            Filter::regex("x", "", "[invalid", RegexFlags::default(), msg_fields()),
            Err(ValidationError::InvalidRegex { .. })
        ));
        let long = "a".repeat(constants::MAX_REGEX_PATTERN_LENGTH + 1);
        assert!(matches!(
            Filter::regex("x", "", &long, RegexFlags::default(), msg_fields()),
            Err(ValidationError::RegexTooLong { .. })
        ));
    }

    #[test]
    fn test_saved_filter_cycle_detected() {
        let self_ref = Filter {
            id: "outer".into(),
            enabled: true,
            name: String::new(),
            kind: FilterKind::Saved {
                filters: vec![],
                combine: CombineMode::All,
            },
        };
        let err = Filter::saved("outer", "Outer", vec![self_ref], CombineMode::All).unwrap_err();
        assert!(matches!(err, ValidationError::CyclicSavedFilter { .. }));

        // Cycle two levels down, hand-built to bypass the constructors.
        let leaf = Filter::errors_only("leaf").unwrap();
        let mid = Filter {
            id: "mid".into(),
            enabled: true,
            name: String::new(),
            kind: FilterKind::Saved {
                filters: vec![
                    leaf,
                    Filter {
                        id: "top".into(),
                        enabled: true,
                        name: String::new(),
                        kind: FilterKind::Saved {
                            filters: vec![],
                            combine: CombineMode::All,
                        },
                    },
                ],
                combine: CombineMode::All,
            },
        };
        let err = Filter::saved("top", "Top", vec![mid], CombineMode::All).unwrap_err();
        assert!(matches!(err, ValidationError::CyclicSavedFilter { .. }));
    }

    #[test]
    fn test_leaf_sharing_ancestor_id_is_not_a_cycle() {
        let leaf = Filter::errors_only("outer").unwrap();
        let nested = Filter::saved(
            "mid",
            "Mid",
            vec![Filter::source("outer", "Auth", ["auth"]).unwrap()],
            CombineMode::Any,
        )
        .unwrap();
        let outer = Filter::saved("outer", "Outer", vec![leaf, nested], CombineMode::All);
        assert!(outer.is_ok(), "{outer:?}");
    }

    #[test]
    fn test_saved_filter_nesting_limit() {
        let mut f = Filter::errors_only("leaf").unwrap();
        for depth in 0..constants::MAX_SAVED_FILTER_DEPTH {
            f = Filter {
                id: format!("g{depth}"),
                enabled: true,
                name: String::new(),
                kind: FilterKind::Saved {
                    filters: vec![f],
                    combine: CombineMode::All,
                },
            };
        }
        assert!(f.validate().is_ok());
        let too_deep = Filter {
            id: "root".into(),
            enabled: true,
            name: String::new(),
            kind: FilterKind::Saved {
                filters: vec![f],
                combine: CombineMode::All,
            },
        };
        assert!(matches!(
            too_deep.validate(),
            Err(ValidationError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn test_saved_any_combination_and_disabled_children() {
        let entries = vec![
            make_entry(0, Some(Severity::Error), Some("a"), "one"),
            make_entry(1, Some(Severity::Info), Some("b"), "two"),
            make_entry(2, Some(Severity::Debug), Some("c"), "three"),
        ];
        let group = Filter::saved(
            "g",
            "Errors or source b",
            vec![
                Filter::errors_only("e").unwrap(),
                Filter::source("s", "", ["b"]).unwrap(),
                Filter::source("off", "", ["c"]).unwrap().with_enabled(false),
            ],
            CombineMode::Any,
        )
        .unwrap();
        let ids = CompiledFilters::compile(&[group]).unwrap().apply(&entries);
        assert_eq!(ids, vec![EntryId::new(1, 0), EntryId::new(1, 1)]);
    }

    #[test]
    fn test_filter_set_mutations_are_atomic() {
        let mut set = FilterSet::new();
        set.add(Filter::errors_only("e").unwrap()).unwrap();
        assert!(matches!(
            set.add(Filter::errors_only("e").unwrap()),
            Err(ValidationError::DuplicateFilterId { .. })
        ));

        // An invalid replacement leaves the original in place.
        let mut bad = Filter::errors_only("e").unwrap();
        bad.kind = FilterKind::LogLevel {
            levels: BTreeSet::new(),
        };
        assert!(set.replace(bad).is_err());
        assert_eq!(set.get("e"), Some(&Filter::errors_only("e").unwrap()));

        set.set_enabled("e", false).unwrap();
        assert!(!set.filters()[0].enabled);
        assert!(set.set_enabled("missing", true).is_err());
        assert!(set.remove("missing").is_err());
        assert_eq!(set.remove("e").unwrap().id, "e");
        assert!(set.is_empty());
    }

    #[test]
    fn test_apply_ids_uses_lookup() {
        struct Map(HashMap<EntryId, LogEntry>);
        impl EntryLookup for Map {
            fn entry(&self, id: EntryId) -> Option<&LogEntry> {
                self.0.get(&id)
            }
        }
        let entries = [
            make_entry(0, Some(Severity::Error), None, "a"),
            make_entry(1, Some(Severity::Info), None, "b"),
        ];
        let map = Map(entries.iter().map(|e| (e.id, e.clone())).collect());
        let compiled = CompiledFilters::compile(&[Filter::errors_only("e").unwrap()]).unwrap();
        let ids = compiled.apply_ids(&map, &[EntryId::new(1, 1), EntryId::new(1, 0), EntryId::new(9, 9)]);
        assert_eq!(ids, vec![EntryId::new(1, 0)]);
    }

    #[test]
    fn test_serde_shape_is_tagged() {
        let f = Filter::text("t", "Text", "boom", true, msg_fields()).unwrap();
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "TEXT");
        assert_eq!(json["caseSensitive"], true);
        assert_eq!(json["fields"][0], "message");
        let back: Filter = serde_json::from_value(json).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn test_parallel_path_preserves_order() {
        let entries: Vec<_> = (0..constants::PARALLEL_FILTER_THRESHOLD as u64 + 10)
            .map(|i| {
                let level = if i % 2 == 0 { Severity::Error } else { Severity::Info };
                make_entry(i, Some(level), None, "m")
            })
            .collect();
        let compiled = CompiledFilters::compile(&[Filter::errors_only("e").unwrap()]).unwrap();
        let ids = compiled.apply(&entries);
        assert_eq!(ids.len(), entries.len().div_ceil(2));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
