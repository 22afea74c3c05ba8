//! Scan lifecycle events and their delivery to subscribers
//!
//! Event names are the wire vocabulary shared with the UI process, e.g.
//! `{"type": "SCANNING_FILE", "payload": {"path": "/music/a.mp3"}}`.
//! Delivery is at-most-once: every subscriber owns a bounded queue and an
//! event that does not fit is dropped.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::debounce::Debouncer;
use crate::models::{Folder, LibraryEntry};

/// Outbound events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LibraryEvent {
    StoreFolders { folders: Vec<Folder> },
    StoreLibrary { library: Vec<LibraryEntry> },
    FoldersAddedToLibrary { folders: Vec<Folder> },
    TracksAddedToLibrary { tracks: Vec<LibraryEntry> },
    LibrarySize { count: u64 },
    ScanningFile { path: PathBuf },
    ScanningFolder { path: PathBuf },
    /// Library settled after a burst of `STORE_LIBRARY`
    AppLoaded,
}

impl LibraryEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            LibraryEvent::StoreFolders { .. } => "STORE_FOLDERS",
            LibraryEvent::StoreLibrary { .. } => "STORE_LIBRARY",
            LibraryEvent::FoldersAddedToLibrary { .. } => "FOLDERS_ADDED_TO_LIBRARY",
            LibraryEvent::TracksAddedToLibrary { .. } => "TRACKS_ADDED_TO_LIBRARY",
            LibraryEvent::LibrarySize { .. } => "LIBRARY_SIZE",
            LibraryEvent::ScanningFile { .. } => "SCANNING_FILE",
            LibraryEvent::ScanningFolder { .. } => "SCANNING_FOLDER",
            LibraryEvent::AppLoaded => "APP_LOADED",
        }
    }

    /// Per-file/per-folder traversal noise
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            LibraryEvent::ScanningFile { .. } | LibraryEvent::ScanningFolder { .. }
        )
    }
}

type Subscribers = Arc<Mutex<Vec<SyncSender<LibraryEvent>>>>;

/// Fire-and-forget publisher of [`LibraryEvent`]s
pub struct ProgressEmitter {
    subscribers: Subscribers,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    loaded: Option<Debouncer>,
}

impl ProgressEmitter {
    /// Create an emitter whose subscribers each buffer up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
            loaded: None,
        }
    }

    /// Derive `APP_LOADED` once `STORE_LIBRARY` has been quiet for `delay`
    pub fn with_loaded_debounce(mut self, delay: Duration) -> Self {
        let subscribers = Arc::clone(&self.subscribers);
        let dropped = Arc::clone(&self.dropped);
        self.loaded = Some(Debouncer::new(delay, move || {
            log::debug!("Library settled, announcing APP_LOADED");
            broadcast(&subscribers, &dropped, LibraryEvent::AppLoaded);
        }));
        self
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Receiver<LibraryEvent> {
        let (tx, rx) = sync_channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publish an event to every live subscriber without blocking
    pub fn publish(&self, event: LibraryEvent) {
        let settles = matches!(event, LibraryEvent::StoreLibrary { .. });
        broadcast(&self.subscribers, &self.dropped, event);
        if settles {
            if let Some(loaded) = &self.loaded {
                loaded.call();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Events discarded because a subscriber queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ProgressEmitter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}

fn broadcast(subscribers: &Subscribers, dropped: &AtomicU64, event: LibraryEvent) {
    let mut subscribers = subscribers.lock();
    subscribers.retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}

/// Writes events as JSON lines, one per event
///
/// `SCANNING_FILE`/`SCANNING_FOLDER` lines are throttled to one per interval;
/// every other event is written immediately.
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Minimum interval between traversal lines in milliseconds
    interval_ms: u64,
    /// Last traversal line time
    last_report: Option<Instant>,
    /// Sequence number for lines
    seq: AtomicU64,
    /// Start time of the reporter
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        Self {
            enabled,
            interval_ms,
            last_report: None,
            seq: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Check if enough time has passed since the last traversal line
    pub fn should_report(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_report {
            None => true,
            Some(last) => last.elapsed().as_millis() as u64 >= self.interval_ms,
        }
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Write one event; returns whether a line was written
    pub fn report<W: Write>(&mut self, out: &mut W, event: &LibraryEvent) -> bool {
        if !self.enabled {
            return false;
        }
        if event.is_progress() {
            if !self.should_report() {
                return false;
            }
            self.last_report = Some(Instant::now());
        }

        let mut line = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to serialize {}: {}", event.name(), e);
                return false;
            }
        };
        if let Some(object) = line.as_object_mut() {
            object.insert("seq".to_string(), self.next_seq().into());
            object.insert("ts".to_string(), self.current_timestamp().into());
        }

        writeln!(out, "{}", line).is_ok() && out.flush().is_ok()
    }

    /// Drain a subscription to stderr until the emitter goes away
    pub fn run(mut self, events: Receiver<LibraryEvent>) {
        let stderr = std::io::stderr();
        for event in events {
            let mut out = stderr.lock();
            self.report(&mut out, &event);
        }
    }

    /// Check if the reporter is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wire_names() {
        let event = LibraryEvent::ScanningFile {
            path: PathBuf::from("/music/a.mp3"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SCANNING_FILE");
        assert_eq!(json["payload"]["path"], "/music/a.mp3");
        assert_eq!(event.name(), "SCANNING_FILE");

        let size = serde_json::to_value(LibraryEvent::LibrarySize { count: 3 }).unwrap();
        assert_eq!(size["type"], "LIBRARY_SIZE");
        assert_eq!(size["payload"]["count"], 3);

        let loaded = serde_json::to_value(LibraryEvent::AppLoaded).unwrap();
        assert_eq!(loaded["type"], "APP_LOADED");

        let added = LibraryEvent::FoldersAddedToLibrary { folders: vec![] };
        assert_eq!(
            serde_json::to_value(&added).unwrap()["type"],
            added.name()
        );
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let emitter = ProgressEmitter::new(8);
        let a = emitter.subscribe();
        let b = emitter.subscribe();

        emitter.publish(LibraryEvent::LibrarySize { count: 1 });

        assert_eq!(a.try_recv().unwrap(), LibraryEvent::LibrarySize { count: 1 });
        assert_eq!(b.try_recv().unwrap(), LibraryEvent::LibrarySize { count: 1 });
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let emitter = ProgressEmitter::new(2);
        let rx = emitter.subscribe();
        for count in 0..5 {
            emitter.publish(LibraryEvent::LibrarySize { count });
        }

        assert_eq!(emitter.dropped_count(), 3);
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], LibraryEvent::LibrarySize { count: 0 });
    }

    #[test]
    fn test_disconnected_subscribers_are_pruned() {
        let emitter = ProgressEmitter::new(4);
        let rx = emitter.subscribe();
        drop(rx);
        emitter.publish(LibraryEvent::AppLoaded);
        assert_eq!(emitter.subscriber_count(), 0);

        // Publishing with nobody listening is a no-op.
        emitter.publish(LibraryEvent::AppLoaded);
    }

    #[test]
    fn test_store_library_burst_yields_one_app_loaded() {
        let delay = Duration::from_millis(200);
        let emitter = ProgressEmitter::new(64).with_loaded_debounce(delay);
        let rx = emitter.subscribe();
        for _ in 0..5 {
            emitter.publish(LibraryEvent::StoreLibrary { library: vec![] });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut loaded = 0;
        while loaded == 0 && Instant::now() < deadline {
            if let Ok(LibraryEvent::AppLoaded) = rx.recv_timeout(Duration::from_millis(50)) {
                loaded += 1;
            }
        }
        std::thread::sleep(delay * 2);
        loaded += rx
            .try_iter()
            .filter(|e| *e == LibraryEvent::AppLoaded)
            .count();
        assert_eq!(loaded, 1);
    }

    #[test]
    fn test_reporter_writes_json_lines_with_sequence() {
        let mut reporter = ProgressReporter::new(true, 0);
        let mut out = Vec::new();

        assert!(reporter.report(&mut out, &LibraryEvent::LibrarySize { count: 2 }));
        assert!(reporter.report(&mut out, &LibraryEvent::AppLoaded));

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "LIBRARY_SIZE");
        assert_eq!(lines[0]["seq"], 0);
        assert_eq!(lines[1]["seq"], 1);
    }

    #[test]
    fn test_reporter_throttles_traversal_events() {
        let mut reporter = ProgressReporter::new(true, 60_000);
        let mut out = Vec::new();
        let file = |p: &str| LibraryEvent::ScanningFile { path: PathBuf::from(p) };

        assert!(reporter.report(&mut out, &file("/m/a.mp3")));
        assert!(!reporter.report(&mut out, &file("/m/b.mp3")));
        assert!(reporter.report(&mut out, &LibraryEvent::LibrarySize { count: 1 }));
    }

    #[test]
    fn test_reporter_disabled() {
        let mut reporter = ProgressReporter::new(false, 0);
        let mut out = Vec::new();
        assert!(!reporter.report(&mut out, &LibraryEvent::AppLoaded));
        assert!(out.is_empty());
        assert!(!reporter.is_enabled());
        assert_eq!(reporter.next_seq(), 0);
    }
}
