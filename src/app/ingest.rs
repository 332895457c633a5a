// LogScope - app/ingest.rs
//
// Per-file ingest worker.
//
// Architecture:
//   - One `std::thread` per file, driven by a `WorkerHandle` owned by the
//     coordinator.
//   - Requests arrive over a private mpsc channel (`Process`, `Cancel`).
//   - Events leave over a channel shared by all workers, tagged with the
//     file id.
//   - An `Arc<AtomicBool>` cancel flag is checked between chunks. Once it is
//     set the worker sends nothing further.
//
// Every failure aborts this file only and becomes a single `Error` event,
// including a panic inside the parser.

use crate::app::profile_mgr::ProfileRegistry;
use crate::core::chunk;
use crate::core::model::{FileId, FileMetadata, FileSummary, FormatProfile, LogEntry};
use crate::core::parser::{FileParser, ParseConfig, ParseStats};
use crate::platform::config::AppConfig;
use crate::platform::fs;
use crate::util::constants;
use crate::util::error::ProcessingError;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

// =============================================================================
// Settings and job description
// =============================================================================

/// Tunables a worker needs, copied out of `AppConfig`.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub large_file_threshold: u64,
    pub entry_batch_size: usize,
    pub content_detection_lines: usize,
    pub parse: ParseConfig,
}

impl IngestSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            large_file_threshold: config.large_file_threshold,
            entry_batch_size: config.entry_batch_size,
            content_detection_lines: config.content_detection_lines,
            parse: ParseConfig {
                max_entry_size: config.max_entry_size,
                ..ParseConfig::default()
            },
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            large_file_threshold: constants::DEFAULT_LARGE_FILE_THRESHOLD,
            entry_batch_size: constants::DEFAULT_ENTRY_BATCH_SIZE,
            content_detection_lines: constants::DEFAULT_CONTENT_DETECTION_LINES,
            parse: ParseConfig::default(),
        }
    }
}

/// Everything a worker needs to process one file.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub metadata: FileMetadata,
    pub profiles: ProfileRegistry,
    /// Profile id to use instead of auto-detection.
    pub forced_profile: Option<String>,
    pub settings: IngestSettings,
}

// =============================================================================
// Channel messages
// =============================================================================

/// Request sent to a worker.
#[derive(Debug)]
pub enum WorkerRequest {
    Process(Box<FileJob>),
    Cancel,
}

/// Event produced by a worker.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Percentage of bytes consumed. Never reaches 100 before `Completed`.
    Progress(u8),

    /// A batch of finished entries.
    Entries(Vec<LogEntry>),

    /// The file is done. `entries` is the final batch.
    Completed {
        metadata: FileMetadata,
        entries: Vec<LogEntry>,
        stats: ParseStats,
    },

    /// Processing failed; no further events follow.
    Error { message: String },
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// An event tagged with the file it belongs to.
#[derive(Debug)]
pub struct WorkerMessage {
    pub file_id: FileId,
    pub event: WorkerEvent,
}

// =============================================================================
// WorkerHandle
// =============================================================================

/// Coordinator-side handle to one worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    file_id: FileId,
    requests: Sender<WorkerRequest>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start an idle worker for `file_id`. It waits for a `Process` request.
    pub fn spawn(file_id: FileId, events: Sender<WorkerMessage>) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name(format!("ingest-{file_id}"))
            .spawn(move || worker_main(file_id, rx, events, worker_cancel))?;

        Ok(Self {
            file_id,
            requests: tx,
            cancel,
            thread: Some(thread),
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn process(&self, job: FileJob) -> Result<(), ProcessingError> {
        self.requests
            .send(WorkerRequest::Process(Box::new(job)))
            .map_err(|_| ProcessingError::WorkerUnavailable {
                file_id: self.file_id,
            })
    }

    /// Ask the worker to stop. The flag is set first so an in-flight chunk
    /// loop sees it without draining the request channel.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        // The worker may already have exited.
        let _ = self.requests.send(WorkerRequest::Cancel);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the thread to exit. Returns `false` if it panicked outside
    /// the guarded job.
    pub fn join(&mut self) -> bool {
        match self.thread.take() {
            Some(t) => t.join().is_ok(),
            None => true,
        }
    }
}

// =============================================================================
// Worker thread
// =============================================================================

/// Event sender that goes silent once the file is cancelled.
struct EventSink<'a> {
    file_id: FileId,
    events: Sender<WorkerMessage>,
    cancel: &'a AtomicBool,
}

impl EventSink<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Returns `false` when the event was not delivered.
    fn send(&self, event: WorkerEvent) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.events
            .send(WorkerMessage {
                file_id: self.file_id,
                event,
            })
            .is_ok()
    }
}

enum JobOutcome {
    Completed,
    Stopped,
}

fn worker_main(
    file_id: FileId,
    requests: Receiver<WorkerRequest>,
    events: Sender<WorkerMessage>,
    cancel: Arc<AtomicBool>,
) {
    let job = match requests.recv() {
        Ok(WorkerRequest::Process(job)) => job,
        Ok(WorkerRequest::Cancel) | Err(_) => {
            tracing::debug!(file_id, "Worker stopped before receiving a job");
            return;
        }
    };

    let sink = EventSink {
        file_id,
        events,
        cancel: &cancel,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| run_job(*job, &requests, &sink))) {
        Ok(Ok(JobOutcome::Completed)) => {}
        Ok(Ok(JobOutcome::Stopped)) => {
            tracing::info!(file_id, "Ingest stopped");
        }
        Ok(Err(e)) => {
            tracing::warn!(file_id, error = %e, "Ingest failed");
            sink.send(WorkerEvent::Error {
                message: e.to_string(),
            });
        }
        Err(_) => {
            let e = ProcessingError::WorkerPanicked { file_id };
            tracing::error!(file_id, error = %e, "Ingest worker panicked");
            sink.send(WorkerEvent::Error {
                message: e.to_string(),
            });
        }
    }
}

/// True if a `Cancel` request is waiting. Other requests mid-job are ignored.
fn cancel_requested(requests: &Receiver<WorkerRequest>) -> bool {
    loop {
        match requests.try_recv() {
            Ok(WorkerRequest::Cancel) => return true,
            Ok(WorkerRequest::Process(_)) => {
                tracing::warn!("Worker already busy, extra job ignored");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return false,
        }
    }
}

fn progress_percent(consumed: u64, size: u64) -> u8 {
    if size == 0 {
        return 99;
    }
    (consumed.saturating_mul(100) / size).min(99) as u8
}

fn choose_profile<'r>(
    registry: &'r ProfileRegistry,
    forced: Option<&str>,
    metadata: &FileMetadata,
    sample_lines: usize,
) -> Option<&'r FormatProfile> {
    if let Some(id) = forced {
        match registry.get(id) {
            Some(p) => return Some(p),
            None => tracing::warn!(
                file = %metadata.name,
                profile_id = id,
                "Requested profile not found, falling back to auto-detection"
            ),
        }
    }

    let samples = fs::read_sample_lines(&metadata.path, sample_lines);
    let choice = registry.choose(&metadata.name, &samples)?;
    match &choice.detection {
        Some(d) => tracing::debug!(
            file = %metadata.name,
            profile_id = %d.profile_id,
            confidence = d.confidence,
            "Profile auto-detected"
        ),
        None => tracing::debug!(
            file = %metadata.name,
            profile_id = %choice.profile.id,
            "No profile matched, using fallback"
        ),
    }
    Some(choice.profile)
}

fn run_job(
    job: FileJob,
    requests: &Receiver<WorkerRequest>,
    sink: &EventSink<'_>,
) -> Result<JobOutcome, ProcessingError> {
    let FileJob {
        mut metadata,
        profiles,
        forced_profile,
        settings,
    } = job;
    let started = Instant::now();
    let path = metadata.path.clone();

    let (source, size) = fs::open_source(&path, settings.large_file_threshold)?;
    let profile = choose_profile(
        &profiles,
        forced_profile.as_deref(),
        &metadata,
        settings.content_detection_lines,
    )
    .ok_or_else(|| ProcessingError::NoProfile { path: path.clone() })?;

    tracing::info!(
        file_id = metadata.id,
        file = %metadata.name,
        size,
        profile_id = %profile.id,
        mapped = source.is_mapped(),
        "Ingest started"
    );

    let batch_size = settings.entry_batch_size.max(1);
    let mut parser = FileParser::new(profile, metadata.id, settings.parse.clone());
    let mut summary = FileSummary::default();
    let mut pending: Vec<LogEntry> = Vec::with_capacity(batch_size);
    let mut last_progress = 0u8;
    let mut chunk_index = 0u64;
    let mut stopped = false;

    let read = chunk::read_lines(source, metadata.id, settings.chunk_size, |lines, consumed| {
        if sink.is_cancelled() || cancel_requested(requests) {
            stopped = true;
            return false;
        }
        chunk_index += 1;
        parser.push_lines(&lines, &mut pending);

        if pending.len() >= batch_size {
            summary.extend(pending.iter());
            if !sink.send(WorkerEvent::Entries(std::mem::take(&mut pending))) {
                stopped = true;
                return false;
            }
        }

        let percent = progress_percent(consumed, size);
        if percent > last_progress {
            last_progress = percent;
            if !sink.send(WorkerEvent::Progress(percent)) {
                stopped = true;
                return false;
            }
        }
        true
    });

    read.map_err(|source| ProcessingError::Read {
        path: path.clone(),
        chunk_index,
        source,
    })?;
    if stopped {
        return Ok(JobOutcome::Stopped);
    }

    if let Some(last) = parser.finish() {
        pending.push(last);
    }
    summary.extend(pending.iter());
    let stats = parser.into_stats();

    metadata.profile_id = Some(profile.id.clone());
    metadata.size = size;
    metadata.total_chunks = chunk::total_chunks(size, settings.chunk_size);
    metadata.finalize(summary);

    tracing::info!(
        file_id = metadata.id,
        file = %metadata.name,
        entries = metadata.log_count.unwrap_or_default(),
        parse_errors = stats.error_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Ingest complete"
    );

    sink.send(WorkerEvent::Completed {
        metadata,
        entries: pending,
        stats,
    });
    Ok(JobOutcome::Completed)
}

/// Convenience used by the coordinator: metadata for a path before it is
/// processed.
pub fn describe_file(
    id: FileId,
    path: &Path,
    chunk_size: usize,
) -> Result<FileMetadata, ProcessingError> {
    let meta = std::fs::metadata(path).map_err(|source| ProcessingError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let modified = meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);
    Ok(FileMetadata::new(
        id,
        path.to_path_buf(),
        meta.len(),
        modified,
        chunk_size,
    ))
}
