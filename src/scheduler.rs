//! Delayed command scheduler: a bounded, time-ordered queue drained by one worker thread.

use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A command line waiting for its time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedCommand {
    pub at: Instant,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// The queue already holds its maximum number of entries.
    QueueFull { capacity: usize },
    /// The worker has been shut down.
    ShutDown,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::QueueFull { capacity } => {
                write!(f, "delayed command queue is full ({} pending)", capacity)
            }
            SchedulerError::ShutDown => write!(f, "scheduler is shut down"),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[derive(Debug)]
struct State {
    /// Sorted by `at`; equal instants keep insertion order.
    queue: Vec<DelayedCommand>,
    capacity: usize,
    shutdown: bool,
}

type Shared = Arc<(Mutex<State>, Condvar)>;

fn lock(shared: &Shared) -> MutexGuard<'_, State> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable producer side of the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    shared: Shared,
}

impl SchedulerHandle {
    /// Queue `text` to run at or after `at` and wake the worker.
    pub fn schedule(&self, at: Instant, text: impl Into<String>) -> Result<(), SchedulerError> {
        let (_, cvar) = &*self.shared;
        let mut state = lock(&self.shared);
        if state.shutdown {
            return Err(SchedulerError::ShutDown);
        }
        if state.queue.len() >= state.capacity {
            return Err(SchedulerError::QueueFull {
                capacity: state.capacity,
            });
        }

        let pos = state.queue.partition_point(|c| c.at <= at);
        state.queue.insert(
            pos,
            DelayedCommand {
                at,
                text: text.into(),
            },
        );
        debug!("scheduled at position {} of {}", pos, state.queue.len());
        cvar.notify_one();
        Ok(())
    }

    /// Number of commands not yet handed to the worker.
    pub fn pending(&self) -> usize {
        lock(&self.shared).queue.len()
    }
}

/// Owns the queue and the worker thread.
///
/// Dropping the scheduler shuts it down: pending commands are discarded and the worker is
/// joined, so nothing queued starts after the drop returns.
#[derive(Debug)]
pub struct Scheduler {
    shared: Shared,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(capacity: usize) -> Self {
        let state = State {
            queue: Vec::with_capacity(capacity),
            capacity,
            shutdown: false,
        };
        Self {
            shared: Arc::new((Mutex::new(state), Condvar::new())),
            worker: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Start the worker. `runner` receives each command once its instant has passed, with
    /// the queue unlocked.
    pub fn start<F>(&mut self, runner: F) -> io::Result<()>
    where
        F: FnMut(DelayedCommand) + Send + 'static,
    {
        if self.worker.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("delayed-commands".into())
            .spawn(move || worker_loop(shared, runner))?;
        self.worker = Some(worker);
        info!("delayed command worker started");
        Ok(())
    }

    /// Stop the worker and wait for it. Commands still pending are dropped.
    pub fn shutdown(&mut self) {
        {
            let (_, cvar) = &*self.shared;
            let mut state = lock(&self.shared);
            state.shutdown = true;
            let dropped = state.queue.len();
            state.queue.clear();
            if dropped > 0 {
                info!("discarding {} pending delayed commands", dropped);
            }
            cvar.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("delayed command worker panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<F>(shared: Shared, mut runner: F)
where
    F: FnMut(DelayedCommand),
{
    let (_, cvar) = &*shared;
    loop {
        let mut state = lock(&shared);
        let due = loop {
            if state.shutdown {
                debug!("worker exiting");
                return;
            }
            // WAIT_FOR_WORK
            let Some(first) = state.queue.first() else {
                state = cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            // WAIT_FOR_DUE_TIME
            let now = Instant::now();
            if first.at > now {
                let timeout = first.at - now;
                state = cvar
                    .wait_timeout(state, timeout)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
                continue;
            }
            break state.queue.remove(0);
        };
        drop(state);

        // EXECUTE
        debug!("running delayed command {:?}", due.text);
        runner(due);
    }
}
