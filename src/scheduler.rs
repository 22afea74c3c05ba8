//! Decides when scans run and keeps them strictly one at a time

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::LibraryError;
use crate::models::{ScanMode, ScanReport, ScanRequest};
use crate::reconciler::Reconciler;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning(ScanMode),
    /// Transient: a job just failed, the slot is about to return to `Idle`
    Failed,
}

struct Inner {
    reconciler: Reconciler,
    state: Mutex<SchedulerState>,
    interval: Duration,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Owns the single scan slot
///
/// A trigger that arrives while a scan is running is dropped, never queued.
#[derive(Clone)]
pub struct ScanScheduler {
    inner: Arc<Inner>,
}

/// Proof that the caller holds the scan slot; releases it on drop
pub struct ScanSlot {
    inner: Arc<Inner>,
    mode: ScanMode,
}

impl ScanSlot {
    pub fn mode(&self) -> ScanMode {
        self.mode
    }
}

impl Drop for ScanSlot {
    fn drop(&mut self) {
        *self.inner.state.lock() = SchedulerState::Idle;
    }
}

impl ScanScheduler {
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconciler,
                state: Mutex::new(SchedulerState::Idle),
                interval,
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.lock()
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.state(), SchedulerState::Scanning(_))
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Jobs that finished and published a snapshot
    pub fn completed_jobs(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Jobs that ended with a fatal error
    pub fn failed_jobs(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Move `Idle -> Scanning`, or return `None` if a scan is already live
    pub fn try_acquire(&self, mode: ScanMode) -> Option<ScanSlot> {
        let mut state = self.inner.state.lock();
        if *state != SchedulerState::Idle {
            return None;
        }
        *state = SchedulerState::Scanning(mode);
        Some(ScanSlot {
            inner: Arc::clone(&self.inner),
            mode,
        })
    }

    /// Run a scan on the calling thread; `None` if one is already running
    pub fn run_now(&self, request: ScanRequest) -> Option<Result<ScanReport, LibraryError>> {
        let slot = self.try_acquire(request.mode)?;
        Some(run_job(&self.inner, slot, &request))
    }

    /// Start a scan in the background; `None` if one is already running
    pub fn spawn(
        &self,
        request: ScanRequest,
    ) -> Option<JoinHandle<Result<ScanReport, LibraryError>>> {
        let slot = match self.try_acquire(request.mode) {
            Some(slot) => slot,
            None => {
                log::debug!("Scan already in progress, dropping {} request", request.mode);
                return None;
            }
        };

        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name("library-scan".to_string())
            .spawn(move || run_job(&inner, slot, &request))
            .map_err(|e| log::error!("Failed to spawn scan thread: {}", e))
            .ok()
    }

    /// Fire-and-forget trigger; returns whether a scan was started
    pub fn request(&self, request: ScanRequest) -> bool {
        self.spawn(request).is_some()
    }

    /// Start the periodic incremental rescan
    ///
    /// The timer waits a full interval after each run before firing again,
    /// whether that run succeeded, failed or panicked.
    pub fn start_timer(&self) -> Result<TimerHandle, LibraryError> {
        let (stop_tx, stop_rx) = channel::<()>();
        let scheduler = self.clone();

        let worker = std::thread::Builder::new()
            .name("library-rescan-timer".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(scheduler.inner.interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        match scheduler.try_acquire(ScanMode::Incremental) {
                            Some(slot) => {
                                let _ = run_job(&scheduler.inner, slot, &ScanRequest::incremental());
                            }
                            None => log::debug!("Periodic rescan skipped, scan in progress"),
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| LibraryError::worker(e.to_string()))?;

        Ok(TimerHandle {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }
}

fn run_job(
    inner: &Inner,
    slot: ScanSlot,
    request: &ScanRequest,
) -> Result<ScanReport, LibraryError> {
    let result = catch_unwind(AssertUnwindSafe(|| inner.reconciler.reconcile(request)))
        .unwrap_or_else(|payload| Err(LibraryError::panicked(None, payload.as_ref())));
    match &result {
        Ok(report) => {
            inner.completed.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "{} scan finished in {}ms: {} folders scanned, {} skipped, {} failed, {} tracks updated, {} removed, {} in library",
                report.mode,
                report.duration_ms,
                report.folders_scanned,
                report.folders_skipped,
                report.folders_failed,
                report.tracks_upserted,
                report.tracks_removed,
                report.library_size
            );
        }
        Err(e) => {
            *inner.state.lock() = SchedulerState::Failed;
            inner.failed.fetch_add(1, Ordering::Relaxed);
            log::error!("{} scan failed: {}", request.mode, e);
        }
    }
    drop(slot);
    result
}

/// Stops the periodic rescan when dropped
pub struct TimerHandle {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Stop the timer, waiting for a running periodic scan to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
