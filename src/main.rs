// LogScope - main.rs
//
// Command-line entry point:
// 1. CLI argument parsing
// 2. Configuration and logging initialisation
// 3. Profile loading and file discovery
// 4. Ingest, then filter, timeline and anomaly queries over the snapshot
// 5. Text or JSON report, optional export

use chrono::{DateTime, Utc};
use clap::Parser;
use logscope::app::analysis::AnalysisManager;
use logscope::app::coordinator::IngestCoordinator;
use logscope::app::ingest::IngestSettings;
use logscope::app::presets::PresetStore;
use logscope::app::profile_mgr::ProfileRegistry;
use logscope::app::store::{FileStatus, StoreSnapshot};
use logscope::core::anomaly::{self, Anomaly};
use logscope::core::export;
use logscope::core::filter::{Filter, FilterSet, RegexFlags, SearchField};
use logscope::core::model::{LogEntry, Severity, TimeSelection};
use logscope::core::parser;
use logscope::core::preset::FilterPreset;
use logscope::core::timeline::{AggregatedTimelineData, ZoomLevel};
use logscope::platform::config::{self, PlatformPaths};
use logscope::platform::fs;
use logscope::util::constants;
use logscope::util::error::{DetectionError, ExportError, LogScopeError, ValidationError};
use logscope::util::logging;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// LogScope - streaming log analyser.
///
/// Ingests log files and directories, then reports a filtered view, a
/// severity timeline and detected anomalies.
#[derive(Parser, Debug)]
#[command(name = "logscope", version, about)]
struct Cli {
    /// Log files or directories to analyse.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Additional directory containing user-defined format profiles.
    #[arg(short = 'p', long = "profile-dir")]
    profile_dir: Option<PathBuf>,

    /// Directory holding config.toml and presets.json instead of the
    /// platform default.
    #[arg(long = "config-dir")]
    config_dir: Option<PathBuf>,

    /// Use this profile id for every file instead of auto-detection.
    #[arg(long = "profile")]
    profile: Option<String>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Timeline bucket width: second, minute, hour or day.
    #[arg(short = 'z', long = "zoom", conflicts_with = "auto_zoom")]
    zoom: Option<ZoomLevel>,

    /// Pick the finest zoom that keeps the timeline to a readable size.
    #[arg(long = "auto-zoom")]
    auto_zoom: bool,

    /// Keep entries with these levels (comma separated).
    #[arg(short = 'l', long = "level", value_delimiter = ',', value_parser = parse_severity)]
    levels: Vec<Severity>,

    /// Keep entries from these sources (comma separated).
    #[arg(short = 's', long = "source", value_delimiter = ',')]
    sources: Vec<String>,

    /// Keep entries whose message or raw line contains this text.
    #[arg(short = 't', long = "text")]
    text: Option<String>,

    /// Keep entries whose message or raw line matches this regex.
    #[arg(short = 'r', long = "regex")]
    regex: Option<String>,

    /// Make --text and --regex case sensitive.
    #[arg(long = "case-sensitive")]
    case_sensitive: bool,

    /// Keep entries at or after this time.
    #[arg(long = "from", value_parser = parse_time)]
    from: Option<DateTime<Utc>>,

    /// Keep entries at or before this time.
    #[arg(long = "to", value_parser = parse_time)]
    to: Option<DateTime<Utc>>,

    /// Save the filters given on the command line as a named preset.
    #[arg(long = "save-preset")]
    save_preset: Option<String>,

    /// Apply a saved preset by name, in addition to any other filters.
    #[arg(long = "preset")]
    preset: Option<String>,

    /// Run anomaly detection.
    #[arg(short = 'a', long = "anomalies")]
    anomalies: bool,

    /// Write matching entries to a CSV file.
    #[arg(long = "export-csv")]
    export_csv: Option<PathBuf>,

    /// Write matching entries to a JSON file.
    #[arg(long = "export-json")]
    export_json: Option<PathBuf>,

    /// Print the report as JSON on stdout.
    #[arg(long = "json")]
    json: bool,

    /// Number of matching entries to print in the text report.
    #[arg(long = "limit", default_value_t = 20)]
    limit: usize,

    /// Give up waiting for ingest after this many seconds.
    #[arg(long = "timeout", default_value_t = 600)]
    timeout_secs: u64,
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    Severity::parse_name(s).ok_or_else(|| format!("unknown level '{s}'"))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| parser::sniff_timestamp(s))
        .ok_or_else(|| format!("unrecognised timestamp '{s}'"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = match &cli.config_dir {
        Some(dir) => PlatformPaths::rooted_at(dir),
        None => PlatformPaths::resolve(),
    };
    let (app_config, config_warnings) = config::load_config(&paths.config_dir);

    logging::init(cli.debug, app_config.log_level.as_deref());
    for warning in &config_warnings {
        tracing::warn!(%warning, "Configuration warning");
    }
    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        config = %paths.config_file().display(),
        "LogScope starting"
    );

    match run(&cli, &paths, &app_config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "LogScope failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    cli: &Cli,
    paths: &PlatformPaths,
    app_config: &config::AppConfig,
) -> Result<ExitCode, LogScopeError> {
    let profile_dir = cli
        .profile_dir
        .as_deref()
        .unwrap_or(&paths.user_profiles_dir);
    let (registry, profile_errors) = ProfileRegistry::load(Some(profile_dir));
    for err in &profile_errors {
        eprintln!("warning: {err}");
    }

    // -- Filters and presets --
    let mut filters = cli_filters(cli)?;
    let (mut presets, preset_error) = PresetStore::load(paths.presets_file());
    if let Some(e) = preset_error {
        eprintln!("warning: {e}; starting with no presets");
    }

    if let Some(name) = &cli.save_preset {
        if filters.is_empty() {
            eprintln!("Error: --save-preset needs at least one filter option");
            return Ok(ExitCode::from(2));
        }
        save_preset(&mut presets, name, filters.clone())?;
        eprintln!("Saved preset '{name}' to {}", presets.path().display());
    }
    if let Some(name) = &cli.preset {
        let Some(preset) = presets.get_by_name(name) else {
            eprintln!("Error: no preset named '{name}'");
            return Ok(ExitCode::from(2));
        };
        filters.push(preset.to_saved_filter()?);
        let id = preset.id.clone();
        presets.mark_used(&id, Utc::now());
        if let Err(e) = presets.save() {
            tracing::warn!(error = %e, "Could not record preset use");
        }
    }
    let compiled = FilterSet::from_filters(filters)?.compile()?;

    // -- Discovery and ingest --
    let (files, discovery_warnings) = fs::expand_paths(&cli.paths, &app_config.discovery());
    for warning in &discovery_warnings {
        eprintln!("warning: {warning}");
    }
    if files.is_empty() {
        eprintln!("No log files found");
        return Ok(ExitCode::from(2));
    }

    let mut coordinator =
        IngestCoordinator::new(registry, IngestSettings::from_config(app_config));
    for file in &files {
        if let Err(e) = coordinator.submit_with_profile(&file.path, cli.profile.as_deref()) {
            eprintln!("warning: {e}");
        }
    }
    if !coordinator.wait_idle(Duration::from_secs(cli.timeout_secs)) {
        eprintln!("warning: ingest timed out; reporting partial results");
        coordinator.cancel_all();
        coordinator.poll();
    }
    let snapshot = coordinator.snapshot();

    // -- Queries --
    let matched = snapshot.filter(&compiled);
    let zoom = match cli.zoom {
        Some(z) => z,
        None if cli.auto_zoom => TimeSelection::covering(snapshot.resolve(&matched))
            .map_or(app_config.default_zoom, |span| {
                ZoomLevel::for_span(&span, constants::DEFAULT_TARGET_BUCKETS)
            }),
        None => app_config.default_zoom,
    };
    let timeline = snapshot.timeline(
        zoom,
        None,
        app_config.max_buckets,
        (!compiled.is_empty()).then_some(matched.as_slice()),
    );
    let anomalies = if cli.anomalies {
        detect_anomalies(&snapshot, app_config)?
    } else {
        Vec::new()
    };

    let entries = snapshot.resolve(&matched);
    if let Some(path) = &cli.export_csv {
        let file = create_export(path)?;
        let n = export::export_csv(&entries, io::BufWriter::new(file), path)?;
        eprintln!("Exported {n} entries to {}", path.display());
    }
    if let Some(path) = &cli.export_json {
        let file = create_export(path)?;
        let n = export::export_json(&entries, io::BufWriter::new(file), path)?;
        eprintln!("Exported {n} entries to {}", path.display());
    }

    let report = Report::build(&snapshot, &entries, &timeline, &anomalies);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = if cli.json {
        serde_json::to_writer_pretty(&mut out, &report)
            .map_err(io::Error::from)
            .and_then(|_| writeln!(out))
    } else {
        print_text(&mut out, &report, &entries, &anomalies, cli.limit)
    };
    written.map_err(|source| LogScopeError::Io {
        path: PathBuf::from("<stdout>"),
        operation: "write report",
        source,
    })?;

    let failed = snapshot
        .files()
        .any(|r| matches!(r.status, FileStatus::Failed(_)));
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn cli_filters(cli: &Cli) -> Result<Vec<Filter>, ValidationError> {
    let mut filters = Vec::new();
    if !cli.levels.is_empty() {
        filters.push(Filter::log_level("cli-level", "Level", cli.levels.iter().copied())?);
    }
    if !cli.sources.is_empty() {
        filters.push(Filter::source("cli-source", "Source", cli.sources.iter().cloned())?);
    }
    if let Some(text) = &cli.text {
        filters.push(Filter::text(
            "cli-text",
            "Text",
            text,
            cli.case_sensitive,
            vec![SearchField::Message, SearchField::Raw],
        )?);
    }
    if let Some(pattern) = &cli.regex {
        let flags = RegexFlags {
            case_insensitive: !cli.case_sensitive,
            ..RegexFlags::default()
        };
        filters.push(Filter::regex(
            "cli-regex",
            "Regex",
            pattern,
            flags,
            vec![SearchField::Message, SearchField::Raw],
        )?);
    }
    if cli.from.is_some() || cli.to.is_some() {
        let range = TimeSelection::new(
            cli.from.unwrap_or(DateTime::<Utc>::MIN_UTC),
            cli.to.unwrap_or(DateTime::<Utc>::MAX_UTC),
        )?;
        filters.push(Filter::timestamp("cli-time", "Time range", range)?);
    }
    Ok(filters)
}

fn save_preset(
    presets: &mut PresetStore,
    name: &str,
    filters: Vec<Filter>,
) -> Result<(), LogScopeError> {
    let (id, created_at) = match presets.get_by_name(name) {
        Some(existing) => (existing.id.clone(), existing.created_at),
        None => (preset_id(name), Utc::now()),
    };
    let preset = FilterPreset::new(id, name, filters, created_at)?;
    presets.upsert(preset)?;
    presets.save()?;
    Ok(())
}

fn preset_id(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-{}", slug.trim_matches('-'), Utc::now().timestamp_millis())
}

fn create_export(path: &Path) -> Result<std::fs::File, ExportError> {
    std::fs::File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn detect_anomalies(
    snapshot: &StoreSnapshot,
    app_config: &config::AppConfig,
) -> Result<Vec<Anomaly>, LogScopeError> {
    let detector = app_config.anomaly.compile()?;
    let mut manager = AnalysisManager::new();
    manager
        .start(snapshot.clone(), detector)
        .map_err(|source| LogScopeError::Io {
            path: PathBuf::new(),
            operation: "spawn anomaly detection",
            source,
        })?;
    // Ingest is finished, so the generation cannot move while we wait.
    match manager.wait(snapshot.generation(), Duration::from_secs(3600)) {
        Some(result) => Ok(result?.anomalies),
        None => Err(DetectionError::Cancelled.into()),
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Serialize)]
struct FileReport {
    id: u64,
    name: String,
    path: PathBuf,
    status: String,
    profile_id: Option<String>,
    entries: usize,
    parse_errors: usize,
}

#[derive(Serialize)]
struct Report<'a> {
    files: Vec<FileReport>,
    total_entries: usize,
    matched_entries: usize,
    timeline: &'a AggregatedTimelineData,
    anomalies: &'a [Anomaly],
}

impl<'a> Report<'a> {
    fn build(
        snapshot: &StoreSnapshot,
        entries: &[&LogEntry],
        timeline: &'a AggregatedTimelineData,
        anomalies: &'a [Anomaly],
    ) -> Self {
        let files = snapshot
            .files()
            .map(|r| FileReport {
                id: r.metadata.id,
                name: r.metadata.name.clone(),
                path: r.metadata.path.clone(),
                status: r.status.to_string(),
                profile_id: r.metadata.profile_id.clone(),
                entries: r.entries,
                parse_errors: r.stats.as_ref().map_or(0, |s| s.error_count),
            })
            .collect();
        Self {
            files,
            total_entries: snapshot.len(),
            matched_entries: entries.len(),
            timeline,
            anomalies,
        }
    }
}

fn print_text(
    out: &mut impl Write,
    report: &Report<'_>,
    entries: &[&LogEntry],
    anomalies: &[Anomaly],
    limit: usize,
) -> io::Result<()> {
    writeln!(out, "Files")?;
    for f in &report.files {
        writeln!(
            out,
            "  [{}] {}  {}  profile={}  entries={}  parse_errors={}",
            f.id,
            f.name,
            f.status,
            f.profile_id.as_deref().unwrap_or("-"),
            f.entries,
            f.parse_errors
        )?;
    }
    writeln!(
        out,
        "\n{} of {} entries match",
        report.matched_entries, report.total_entries
    )?;

    let timeline = report.timeline;
    writeln!(out, "\nTimeline ({} buckets)", timeline.zoom.label())?;
    match timeline.condition {
        Some(condition) => writeln!(out, "  {condition}")?,
        None => {
            for point in &timeline.points {
                if point.total == 0 {
                    continue;
                }
                let errors: usize = Severity::all()
                    .iter()
                    .filter(|l| l.is_error_level())
                    .map(|l| point.counts.get(Some(*l)))
                    .sum();
                writeln!(
                    out,
                    "  {}  total={:<6} errors={}",
                    point.bucket_start.format("%Y-%m-%d %H:%M:%S"),
                    point.total,
                    errors
                )?;
            }
        }
    }
    if timeline.skipped_untimestamped > 0 {
        writeln!(
            out,
            "  ({} entries without timestamp not shown)",
            timeline.skipped_untimestamped
        )?;
    }

    if !anomalies.is_empty() {
        writeln!(out, "\nAnomalies")?;
        for a in anomalies {
            writeln!(
                out,
                "  #{} [{}] {:?}: {} ({} entries)",
                a.id,
                a.severity,
                a.strategy,
                a.title,
                a.entry_ids.len()
            )?;
        }
    }

    if limit > 0 && !entries.is_empty() {
        let flagged = anomaly::highest_by_entry(anomalies);
        writeln!(out, "\nEntries")?;
        for entry in entries.iter().take(limit) {
            writeln!(out, "  {}", format_entry(entry, flagged.get(&entry.id).copied()))?;
        }
        if entries.len() > limit {
            writeln!(out, "  ... {} more", entries.len() - limit)?;
        }
    }
    Ok(())
}

fn format_entry(entry: &LogEntry, anomaly: Option<&Anomaly>) -> String {
    let ts = entry
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".repeat(19));
    let level = entry.level.map_or("-", |l| l.short_label());
    let marker = anomaly.map(|a| format!(" !{}", a.severity)).unwrap_or_default();
    let text = if entry.is_raw_only() {
        entry.raw.as_str()
    } else {
        entry.message.as_str()
    };
    match &entry.source {
        Some(source) => format!("{ts} {level:<5} [{source}] {text}{marker}"),
        None => format!("{ts} {level:<5} {text}{marker}"),
    }
}

