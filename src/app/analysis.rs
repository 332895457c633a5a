// LogScope - app/analysis.rs
//
// Background anomaly detection runs against a store snapshot.
//
// One run at a time: starting a new run cancels the previous one and drops
// its channel, so a superseded result can never be observed. A finished
// result is checked against the store generation at poll time and
// discarded as stale when the store has moved on.

use crate::app::store::StoreSnapshot;
use crate::core::anomaly::{Anomaly, AnomalyDetector};
use crate::util::error::DetectionError;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A completed detection run.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub run_id: u64,
    /// Store generation the snapshot was taken at.
    pub generation: u64,
    pub anomalies: Vec<Anomaly>,
    pub elapsed: Duration,
}

struct RunMessage {
    run_id: u64,
    generation: u64,
    outcome: Result<Vec<Anomaly>, DetectionError>,
    elapsed: Duration,
}

#[derive(Default)]
pub struct AnalysisManager {
    rx: Option<mpsc::Receiver<RunMessage>>,
    cancel: Option<Arc<AtomicBool>>,
    /// Handle of the run in flight. Dropping it detaches the thread.
    handle: Option<JoinHandle<()>>,
    last_run_id: u64,
}

impl AnalysisManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start detection over `snapshot`, cancelling any run in flight.
    ///
    /// Returns the id of the new run.
    pub fn start(&mut self, snapshot: StoreSnapshot, detector: AnomalyDetector) -> io::Result<u64> {
        self.cancel();

        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let run_cancel = Arc::clone(&cancel);
        let run_id = self.last_run_id + 1;
        let generation = snapshot.generation();

        let handle = thread::Builder::new()
            .name(format!("anomaly-{run_id}"))
            .spawn(move || {
                let started = Instant::now();
                let entries = snapshot.entry_refs();
                let outcome = detector.detect(&entries, &run_cancel);
                // The receiver is gone when the run was superseded.
                let _ = tx.send(RunMessage {
                    run_id,
                    generation,
                    outcome,
                    elapsed: started.elapsed(),
                });
            })?;

        self.last_run_id = run_id;
        self.rx = Some(rx);
        self.cancel = Some(cancel);
        self.handle = Some(handle);
        tracing::info!(run_id, generation, "Anomaly detection started");
        Ok(run_id)
    }

    /// Cancel the run in flight, if any. Its result is never delivered.
    pub fn cancel(&mut self) {
        if let Some(flag) = self.cancel.take() {
            flag.store(true, Ordering::SeqCst);
            tracing::debug!(run_id = self.last_run_id, "Anomaly detection cancelled");
        }
        self.rx = None;
        self.handle = None;
    }

    pub fn is_running(&self) -> bool {
        self.rx.is_some()
    }

    /// Non-blocking check for the current run's result.
    pub fn poll(&mut self, current_generation: u64) -> Option<Result<AnalysisResult, DetectionError>> {
        match self.rx.as_ref()?.try_recv() {
            Ok(msg) => Some(self.finish(msg, current_generation)),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(self.lost())),
        }
    }

    /// Block until the current run finishes or `timeout` elapses.
    pub fn wait(
        &mut self,
        current_generation: u64,
        timeout: Duration,
    ) -> Option<Result<AnalysisResult, DetectionError>> {
        match self.rx.as_ref()?.recv_timeout(timeout) {
            Ok(msg) => Some(self.finish(msg, current_generation)),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(self.lost())),
        }
    }

    /// The run's sender was dropped without a result (the thread panicked).
    fn lost(&mut self) -> DetectionError {
        self.rx = None;
        self.cancel = None;
        self.handle = None;
        tracing::error!(run_id = self.last_run_id, "Anomaly detection thread ended without a result");
        DetectionError::WorkerLost {
            run_id: self.last_run_id,
        }
    }

    fn finish(
        &mut self,
        msg: RunMessage,
        current_generation: u64,
    ) -> Result<AnalysisResult, DetectionError> {
        self.rx = None;
        self.cancel = None;
        self.handle = None;

        let anomalies = msg.outcome?;
        if msg.generation != current_generation {
            tracing::info!(
                run_id = msg.run_id,
                run_generation = msg.generation,
                current_generation,
                "Stale anomaly results discarded"
            );
            return Err(DetectionError::Stale {
                run_generation: msg.generation,
                current_generation,
            });
        }

        tracing::info!(
            run_id = msg.run_id,
            anomalies = anomalies.len(),
            elapsed_ms = msg.elapsed.as_millis() as u64,
            "Anomaly detection complete"
        );
        Ok(AnalysisResult {
            run_id: msg.run_id,
            generation: msg.generation,
            anomalies,
            elapsed: msg.elapsed,
        })
    }
}
