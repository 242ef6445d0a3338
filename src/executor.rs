// SPDX-License-Identifier: MIT OR Apache-2.0

//! Submitting work to pools, and pools that relay cells.
//!
//! [`Executor`] is the submission surface: fire-and-forget, result handles,
//! delayed and periodic scheduling, and bulk submission.  [`ThreadPool`] is a
//! plain implementation of it.  [`RelayExecutor`] decorates any executor so
//! that every task it accepts is wrapped on the submitting thread and runs with
//! the submitter's cells; obtain one with [`wrap_pool`].
//!
//! ```rust
//! use threadrelay::cell::RelayCell;
//! use threadrelay::executor::{self, Executor, ThreadPool};
//!
//! let request = RelayCell::new();
//! let pool = executor::wrap_pool(ThreadPool::new(2).unwrap());
//!
//! request.set("req-1".to_string());
//! let handle = {
//!     let request = request.clone();
//!     pool.submit(move || request.get()).unwrap()
//! };
//! assert_eq!(handle.join().unwrap().as_deref(), Some("req-1"));
//! ```

mod handle;
mod pool;
mod relay_executor;
mod timer;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wasm_safe_mutex::mpsc;

use crate::error::{InvokeAnyError, RejectedError};

pub use handle::{PeriodicHandle, TaskHandle};
pub use pool::{ThreadPool, ThreadPoolBuilder};
pub use relay_executor::{PlainExecutor, RelayExecutor, RelayPool, wrap_pool};

/// How long [`Executor::invoke_any`] blocks on its channel per wait.
const INVOKE_ANY_SLICE: Duration = Duration::from_secs(1);

/// A task-submission surface.
///
/// Every method fails with [`RejectedError`] when the executor refuses the
/// work.  Handles report how the task went: see [`TaskHandle`].
pub trait Executor: Send + Sync {
    /// Runs `f` at some point, without a handle.
    fn execute<F>(&self, f: F) -> Result<(), RejectedError>
    where
        F: FnOnce() + Send + 'static;

    /// Runs `f` at some point, with a handle to its result.
    fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static;

    /// Runs `f` once `delay` has passed.
    fn schedule<F, R>(&self, delay: Duration, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static;

    /// Runs `f` after `initial_delay` and then every `period`, measured from
    /// the previous deadline, until cancelled or until a run panics.
    ///
    /// At most one run is queued or running at a time: a tick that comes
    /// while the previous run is unfinished is skipped.  A zero `period` is
    /// refused with [`RejectedError::ZeroPeriod`].
    fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        f: F,
    ) -> Result<PeriodicHandle, RejectedError>
    where
        F: FnMut() + Send + 'static;

    /// Submits every task and waits until all are finished.  Handle *i*
    /// belongs to task *i*.
    ///
    /// If a submission is refused, the tasks already submitted are cancelled
    /// where they have not started.
    fn invoke_all<I, F, R>(&self, tasks: I) -> Result<Vec<TaskHandle<R>>, RejectedError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut handles = Vec::new();
        for task in tasks {
            match self.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Err(err);
                }
            }
        }
        for handle in &handles {
            handle.wait();
        }
        Ok(handles)
    }

    /// Submits every task and returns the result of the first one to finish
    /// without panicking.  The rest are cancelled where they have not started.
    fn invoke_any<I, F, R>(&self, tasks: I) -> Result<R, InvokeAnyError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Option<R>>();
        let mut handles = Vec::new();
        for task in tasks {
            let sender = sender.clone();
            let submitted = self.submit(move || {
                let outcome = catch_unwind(AssertUnwindSafe(task)).ok();
                let _ = sender.send_sync(outcome);
            });
            match submitted {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel();
                    }
                    return Err(err.into());
                }
            }
        }
        drop(sender);
        if handles.is_empty() {
            return Err(InvokeAnyError::Empty);
        }

        let total = handles.len();
        let mut failures = 0;
        let result = loop {
            match receiver.recv_sync_timeout(Instant::now() + INVOKE_ANY_SLICE) {
                Ok(Some(out)) => break Ok(out),
                Ok(None) => {
                    failures += 1;
                    if failures == total {
                        break Err(InvokeAnyError::AllFailed { failures });
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                // the remaining tasks were dropped without running
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break Err(InvokeAnyError::AllFailed { failures: total });
                }
            }
        };
        for handle in &handles {
            handle.cancel();
        }
        result
    }
}

impl<E> Executor for Arc<E>
where
    E: Executor,
{
    fn execute<F>(&self, f: F) -> Result<(), RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        (**self).execute(f)
    }

    fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        (**self).submit(f)
    }

    fn schedule<F, R>(&self, delay: Duration, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        (**self).schedule(delay, f)
    }

    fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        f: F,
    ) -> Result<PeriodicHandle, RejectedError>
    where
        F: FnMut() + Send + 'static,
    {
        (**self).schedule_at_fixed_rate(initial_delay, period, f)
    }

    fn invoke_all<I, F, R>(&self, tasks: I) -> Result<Vec<TaskHandle<R>>, RejectedError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        (**self).invoke_all(tasks)
    }

    fn invoke_any<I, F, R>(&self, tasks: I) -> Result<R, InvokeAnyError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        (**self).invoke_any(tasks)
    }
}
