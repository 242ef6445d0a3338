// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result handles.

use std::any::Any;
use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{RelayError, TaskError};

enum Outcome<R> {
    Pending,
    Running,
    Finished(Result<R, TaskError>),
    Taken,
}

struct HandleState<R> {
    outcome: Mutex<Outcome<R>>,
    done: Condvar,
    cancelled: AtomicBool,
}

impl<R> HandleState<R> {
    fn lock(&self) -> MutexGuard<'_, Outcome<R>> {
        // no user code runs under this lock
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, result: Result<R, TaskError>) {
        let mut outcome = self.lock();
        if matches!(*outcome, Outcome::Pending | Outcome::Running) {
            if matches!(result, Err(TaskError::Cancelled)) {
                self.cancelled.store(true, Ordering::Release);
            }
            *outcome = Outcome::Finished(result);
        }
        drop(outcome);
        self.done.notify_all();
    }
}

/// The pending result of a submitted task.
///
/// Dropping a handle does not cancel the task.
pub struct TaskHandle<R> {
    state: Arc<HandleState<R>>,
}

/// The executor's end of a [`TaskHandle`].
pub(crate) struct Completer<R> {
    state: Arc<HandleState<R>>,
}

pub(crate) fn task_handle<R>() -> (TaskHandle<R>, Completer<R>) {
    let state = Arc::new(HandleState {
        outcome: Mutex::new(Outcome::Pending),
        done: Condvar::new(),
        cancelled: AtomicBool::new(false),
    });
    (
        TaskHandle {
            state: state.clone(),
        },
        Completer { state },
    )
}

impl<R> Completer<R> {
    /// Runs `f` unless the handle was cancelled first, and reports how it
    /// went.  A cancelled task is dropped without being called.
    pub(crate) fn run<F>(self, f: F)
    where
        F: FnOnce() -> R,
    {
        {
            let mut outcome = self.state.lock();
            if !matches!(*outcome, Outcome::Pending) {
                return;
            }
            *outcome = Outcome::Running;
        }
        let result = catch_unwind(AssertUnwindSafe(f)).map_err(task_error);
        self.state.settle(result);
    }
}

impl<R> Drop for Completer<R> {
    fn drop(&mut self) {
        // never ran, e.g. discarded by a shutdown
        self.state.settle(Err(TaskError::Cancelled));
    }
}

impl<R> TaskHandle<R> {
    /// Blocks until the task is finished and returns its result.
    pub fn join(self) -> Result<R, TaskError> {
        let mut outcome = self.state.lock();
        loop {
            match std::mem::replace(&mut *outcome, Outcome::Taken) {
                Outcome::Finished(result) => return result,
                Outcome::Taken => unreachable!("a handle's result is taken only by join"),
                waiting => {
                    *outcome = waiting;
                    outcome = self
                        .state
                        .done
                        .wait(outcome)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Blocks until the task is finished, leaving the result in place.
    pub fn wait(&self) {
        let mut outcome = self.state.lock();
        while matches!(*outcome, Outcome::Pending | Outcome::Running) {
            outcome = self
                .state
                .done
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks for at most `timeout`.  Returns whether the task is finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.state.lock();
        while matches!(*outcome, Outcome::Pending | Outcome::Running) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            outcome = self
                .state
                .done
                .wait_timeout(outcome, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Cancels the task if it has not started.  Returns whether it was
    /// cancelled by this call; a running or finished task is left alone.
    pub fn cancel(&self) -> bool {
        let mut outcome = self.state.lock();
        if !matches!(*outcome, Outcome::Pending) {
            return false;
        }
        *outcome = Outcome::Finished(Err(TaskError::Cancelled));
        self.state.cancelled.store(true, Ordering::Release);
        drop(outcome);
        self.state.done.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.state.lock(), Outcome::Finished(_) | Outcome::Taken)
    }

    /// Whether the task was cancelled before it ran.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

impl<R> Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock() {
            Outcome::Pending => "pending",
            Outcome::Running => "running",
            Outcome::Finished(Ok(_)) => "finished",
            Outcome::Finished(Err(_)) => "failed",
            Outcome::Taken => "taken",
        };
        f.debug_struct("TaskHandle").field("state", &state).finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(err) = payload.downcast_ref::<RelayError>() {
        err.to_string()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn task_error(payload: Box<dyn Any + Send>) -> TaskError {
    match payload.downcast::<RelayError>() {
        Ok(err) => TaskError::Fault(*err),
        Err(payload) => TaskError::Panicked(panic_message(&*payload)),
    }
}

struct PeriodicState {
    cancelled: AtomicBool,
    runs: AtomicU64,
}

/// Controls a task scheduled with
/// [`schedule_at_fixed_rate`](super::Executor::schedule_at_fixed_rate).
#[derive(Clone)]
pub struct PeriodicHandle {
    state: Arc<PeriodicState>,
}

impl PeriodicHandle {
    pub(crate) fn new() -> PeriodicHandle {
        PeriodicHandle {
            state: Arc::new(PeriodicState {
                cancelled: AtomicBool::new(false),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Stops future runs.  A run already in progress finishes.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Whether no further runs will happen, either because of [`cancel`]
    /// or because a run panicked.
    ///
    /// [`cancel`]: Self::cancel
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Number of runs that completed without panicking.
    pub fn run_count(&self) -> u64 {
        self.state.runs.load(Ordering::Acquire)
    }

    pub(crate) fn record_run(&self) {
        self.state.runs.fetch_add(1, Ordering::AcqRel);
    }
}

impl Debug for PeriodicHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicHandle")
            .field("cancelled", &self.is_cancelled())
            .field("runs", &self.run_count())
            .finish()
    }
}
