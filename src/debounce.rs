//! Trailing-edge debounce on a dedicated thread

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct State {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

/// Runs an action once a burst of calls has been quiet for `delay`
///
/// Every [`Debouncer::call`] pushes the deadline out again; the action fires
/// at most once per quiet period, on the worker thread.
pub struct Debouncer {
    delay: Duration,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                deadline: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("debounce".to_string())
            .spawn(move || run(&worker_shared, action))
            .map_err(|e| log::error!("Failed to spawn debounce worker: {}", e))
            .ok();

        Self {
            delay,
            shared,
            worker,
        }
    }

    /// Arm or re-arm the timer
    pub fn call(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(Instant::now() + self.delay);
        self.shared.cond.notify_one();
    }

    /// Drop a pending action without running it
    pub fn cancel(&self) {
        self.shared.state.lock().deadline = None;
        self.shared.cond.notify_one();
    }

    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }
}

fn run<F: Fn()>(shared: &Shared, action: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => shared.cond.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                MutexGuard::unlocked(&mut state, &action);
            }
            Some(deadline) => {
                shared.cond.wait_until(&mut state, deadline);
            }
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.cond.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
