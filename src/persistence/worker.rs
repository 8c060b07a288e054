//! Background flushing of finalized rounds.
//!
//! One dedicated thread, one task at a time. The handshake:
//!
//! 1. [`PersistenceWorker::persist_async`] waits for the previous task,
//!    then hands over a round and returns immediately
//! 2. the thread flushes every market through that round
//! 3. [`PersistenceWorker::wait_for_async_task`] blocks until the thread
//!    is idle and reports the error of the last task, if any
//!
//! Shutdown is cooperative: dropping the worker lets the current task
//! finish, then joins the thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use crate::error::EngineError;
use crate::persistence::unit::UnitRegistry;

#[derive(Debug, Default)]
struct WorkerState {
    pending_round: Option<u64>,
    busy: bool,
    done: bool,
    last_error: Option<EngineError>,
}

struct Shared {
    state: Mutex<WorkerState>,
    cv: Condvar,
}

/// Flushes work-unit thunks on a background thread.
pub struct PersistenceWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl PersistenceWorker {
    /// Spawn the worker thread.
    pub fn spawn(registry: UnitRegistry) -> Result<Self, EngineError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::default()),
            cv: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("clearing-persist".to_string())
            .spawn(move || run(thread_shared, registry))
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Queue a flush through `round` after the in-flight task finishes.
    pub fn persist_async(&self, round: u64) {
        let mut state = self.shared.state.lock();
        while state.pending_round.is_some() || state.busy {
            self.shared.cv.wait(&mut state);
        }
        state.pending_round = Some(round);
        self.shared.cv.notify_all();
    }

    /// Block until no task is pending or running.
    ///
    /// # Errors
    ///
    /// The error of the most recent failed flush, once.
    pub fn wait_for_async_task(&self) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        while state.pending_round.is_some() || state.busy {
            self.shared.cv.wait(&mut state);
        }
        match state.last_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.done = true;
            self.shared.cv.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("persistence worker panicked");
            }
        }
    }
}

fn run(shared: Arc<Shared>, registry: UnitRegistry) {
    loop {
        let round = {
            let mut state = shared.state.lock();
            while state.pending_round.is_none() && !state.done {
                shared.cv.wait(&mut state);
            }
            match state.pending_round.take() {
                Some(round) => {
                    state.busy = true;
                    round
                }
                None => return,
            }
        };

        let result = registry.flush_all(round);

        let mut state = shared.state.lock();
        state.busy = false;
        match result {
            Ok(()) => info!(round, "persisted round"),
            Err(e) => {
                error!(round, error = %e, "persistence failed");
                state.last_error = Some(e);
            }
        }
        shared.cv.notify_all();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
