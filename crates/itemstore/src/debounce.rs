//! Debounced delayed actions.
//!
//! A `Debouncer` owns one worker thread parked on a condition variable. Each
//! `request` replaces the single pending slot and pushes its deadline out;
//! the worker runs the action once the deadline passes without another
//! request. `flush` takes the slot and runs it on the caller's thread. Both
//! paths `take()` the slot under the same lock, so a request cycle runs at
//! most once. `wait_idle` blocks until an action the worker already took has
//! finished.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

type Action = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    deadline: Instant,
    action: Action,
}

#[derive(Default)]
struct State {
    pending: Option<Pending>,
    /// The worker took an action and is running it.
    running: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    idle: Condvar,
}

/// Coalesces bursts of requests into one delayed action.
pub struct Debouncer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debouncer {
    /// Creates a debouncer and starts its worker thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let worker_shared = shared.clone();
        let worker = thread::spawn(move || run_worker(&worker_shared));
        let worker_id = worker.thread().id();
        Self {
            shared,
            worker: Some(worker),
            worker_id,
        }
    }

    /// Schedules `action` after `delay` of quiescence.
    ///
    /// Replaces any pending action; the latest request wins.
    pub fn request<F>(&self, action: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let replaced = {
            let mut state = self.shared.state.lock();
            let replaced = state.pending.replace(Pending {
                deadline: Instant::now() + delay,
                action: Box::new(action),
            });
            self.shared.wake.notify_one();
            replaced
        };
        // The superseded closure is dropped outside the lock.
        drop(replaced);
    }

    /// Runs the pending action now, on the calling thread.
    ///
    /// Returns true if an action was pending.
    pub fn flush(&self) -> bool {
        let pending = self.shared.state.lock().pending.take();
        match pending {
            Some(pending) => {
                (pending.action)();
                true
            }
            None => false,
        }
    }

    /// Discards the pending action without running it.
    pub fn cancel(&self) -> bool {
        let pending = self.shared.state.lock().pending.take();
        pending.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Blocks until the worker is not running an action.
    ///
    /// Returns immediately when called from the action itself.
    pub fn wait_idle(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let mut state = self.shared.state.lock();
        while state.running {
            self.shared.idle.wait(&mut state);
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.wake.notify_all();
        }
        // The last owner may be dropped by an action running on the worker.
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("debounce worker panicked");
            }
        }
    }
}

fn run_worker(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let deadline = state.pending.as_ref().map(|pending| pending.deadline);
        match deadline {
            None => shared.wake.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                if let Some(pending) = state.pending.take() {
                    state.running = true;
                    MutexGuard::unlocked(&mut state, || (pending.action)());
                    state.running = false;
                    shared.idle.notify_all();
                }
            }
            Some(deadline) => {
                shared.wake.wait_until(&mut state, deadline);
            }
        }
    }
}
