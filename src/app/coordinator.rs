// LogScope - app/coordinator.rs
//
// Owns the entry store and is its only writer. Workers are spawned per
// submitted file; their events are drained by `poll` and applied in
// arrival order, so index updates never interleave.
//
// Replays are harmless: events for unknown or terminal files are dropped,
// progress only moves forward and a duplicate batch is rejected by the
// indexes.

use crate::app::ingest::{
    self, FileJob, IngestSettings, WorkerEvent, WorkerHandle, WorkerMessage,
};
use crate::app::profile_mgr::ProfileRegistry;
use crate::app::store::{EntryStore, FileStatus, StoreSnapshot};
use crate::core::model::{FileId, LogEntry};
use crate::util::constants;
use crate::util::error::{LogScopeError, ProcessingError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

/// Push notifications for consumers that do not want to poll the store.
///
/// Called on the coordinator's thread after the store has been updated.
pub trait StoreObserver: Send {
    fn on_entries(&mut self, _file_id: FileId, _added: usize, _generation: u64) {}
    fn on_status(&mut self, _file_id: FileId, _status: &FileStatus) {}
}

pub struct IngestCoordinator {
    store: EntryStore,
    registry: ProfileRegistry,
    settings: IngestSettings,
    events_tx: Sender<WorkerMessage>,
    events_rx: Receiver<WorkerMessage>,
    workers: HashMap<FileId, WorkerHandle>,
    next_file_id: FileId,
    observers: Vec<Box<dyn StoreObserver>>,
}

impl IngestCoordinator {
    pub fn new(registry: ProfileRegistry, settings: IngestSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            store: EntryStore::new(),
            registry,
            settings,
            events_tx,
            events_rx,
            workers: HashMap::new(),
            next_file_id: 1,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Queue a file with auto-detected profile.
    pub fn submit(&mut self, path: &Path) -> Result<FileId, LogScopeError> {
        self.submit_with_profile(path, None)
    }

    /// Queue a file, optionally forcing a profile id.
    ///
    /// The file is registered before its worker starts, so an id returned
    /// here is always visible in the store.
    pub fn submit_with_profile(
        &mut self,
        path: &Path,
        profile_id: Option<&str>,
    ) -> Result<FileId, LogScopeError> {
        let id = self.next_file_id;
        let metadata = ingest::describe_file(id, path, self.settings.chunk_size)?;
        self.next_file_id += 1;
        self.store.register_file(metadata.clone());

        let handle = match WorkerHandle::spawn(id, self.events_tx.clone()) {
            Ok(h) => h,
            Err(source) => {
                self.update_status(id, FileStatus::Failed(source.to_string()));
                return Err(LogScopeError::Io {
                    path: path.to_path_buf(),
                    operation: "spawn ingest worker",
                    source,
                });
            }
        };

        let job = FileJob {
            metadata,
            profiles: self.registry.clone(),
            forced_profile: profile_id.map(str::to_string),
            settings: self.settings.clone(),
        };
        if let Err(e) = handle.process(job) {
            self.update_status(id, FileStatus::Failed(e.to_string()));
            return Err(e.into());
        }

        self.workers.insert(id, handle);
        self.update_status(id, FileStatus::Processing);
        tracing::info!(file_id = id, file = %path.display(), "File submitted");
        Ok(id)
    }

    /// Stop a file. Entries already ingested stay in the store.
    ///
    /// Returns `false` if the file is unknown or already terminal.
    pub fn cancel(&mut self, id: FileId) -> bool {
        let Some(record) = self.store.file(id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        // Terminal first, so anything the worker sends in the meantime is
        // dropped by `apply`.
        self.update_status(id, FileStatus::Cancelled);
        if let Some(handle) = self.workers.get(&id) {
            handle.cancel();
        }
        tracing::info!(file_id = id, "File cancelled");
        true
    }

    pub fn cancel_all(&mut self) {
        let live: Vec<FileId> = self
            .store
            .files()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.metadata.id)
            .collect();
        for id in live {
            self.cancel(id);
        }
    }

    /// True when every submitted file has reached a terminal status.
    pub fn is_idle(&self) -> bool {
        self.store.files().all(|r| r.status.is_terminal())
    }

    /// Drain pending worker events without blocking and reap finished
    /// workers. Returns the number of events that changed the store.
    pub fn poll(&mut self) -> usize {
        // Collected before draining: every event a finished worker sent is
        // already in the channel.
        let finished: Vec<FileId> = self
            .workers
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| *id)
            .collect();

        let mut applied = 0;
        while let Ok(msg) = self.events_rx.try_recv() {
            if self.apply(msg) {
                applied += 1;
            }
        }

        for id in finished {
            if let Some(mut handle) = self.workers.remove(&id) {
                if !handle.join() {
                    tracing::error!(file_id = id, "Worker thread panicked");
                }
            }
            let silent = self
                .store
                .file(id)
                .is_some_and(|r| !r.status.is_terminal());
            if silent {
                let e = ProcessingError::WorkerUnavailable { file_id: id };
                tracing::warn!(file_id = id, error = %e, "Worker exited without a result");
                self.update_status(id, FileStatus::Failed(e.to_string()));
                applied += 1;
            }
        }
        applied
    }

    /// Poll until idle or until `timeout` elapses. Returns `true` if idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let started = Instant::now();
        let interval = Duration::from_millis(constants::COORDINATOR_WAIT_INTERVAL_MS);
        loop {
            self.poll();
            if self.is_idle() {
                return true;
            }
            if started.elapsed() >= timeout {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for ingest to finish"
                );
                return false;
            }
            std::thread::sleep(interval);
        }
    }

    fn apply(&mut self, msg: WorkerMessage) -> bool {
        let WorkerMessage { file_id, event } = msg;
        let Some(record) = self.store.file(file_id) else {
            tracing::debug!(file_id, "Event for unknown file dropped");
            return false;
        };
        if record.status.is_terminal() {
            tracing::debug!(file_id, status = %record.status, "Event for finished file dropped");
            return false;
        }

        match event {
            WorkerEvent::Progress(percent) => self.store.set_progress(file_id, percent),
            WorkerEvent::Entries(batch) => self.append(file_id, batch),
            WorkerEvent::Completed {
                mut metadata,
                entries,
                stats,
            } => {
                self.append(file_id, entries);
                metadata.id = file_id;
                self.store.complete_file(metadata, stats);
                self.notify_status(file_id, &FileStatus::Completed);
                true
            }
            WorkerEvent::Error { message } => {
                tracing::warn!(file_id, error = %message, "File failed");
                self.update_status(file_id, FileStatus::Failed(message));
                true
            }
        }
    }

    fn append(&mut self, file_id: FileId, batch: Vec<LogEntry>) -> bool {
        match self.store.append(file_id, batch) {
            Ok(0) => false,
            Ok(added) => {
                let generation = self.store.generation();
                for observer in &mut self.observers {
                    observer.on_entries(file_id, added, generation);
                }
                true
            }
            Err(e) => {
                tracing::warn!(file_id, error = %e, "Batch rejected");
                false
            }
        }
    }

    fn update_status(&mut self, file_id: FileId, status: FileStatus) {
        if self.store.set_status(file_id, status.clone()) {
            self.notify_status(file_id, &status);
        }
    }

    fn notify_status(&mut self, file_id: FileId, status: &FileStatus) {
        for observer in &mut self.observers {
            observer.on_status(file_id, status);
        }
    }
}
