// SPDX-License-Identifier: MIT OR Apache-2.0

//! The task wrapper.

use std::fmt::Debug;

use super::WrapOptions;
use crate::error::RelayError;
use crate::relay::{self, Snapshot, fault};

/// A task bound to the snapshot taken when it was wrapped.
///
/// Created by [`wrap`] or [`Relayed::new`].  The snapshot is taken on the
/// thread that creates the wrapper, so wrap on the submitting thread and run
/// wherever the work ends up.
pub struct Relayed<F> {
    snapshot: Option<Snapshot>,
    task: F,
    release_after_run: bool,
}

impl<F> Relayed<F> {
    /// Captures the calling thread's cells and binds them to `task`.
    pub fn new(task: F) -> Self {
        Self::with_options(task, WrapOptions::default())
    }

    pub fn with_options(task: F, options: WrapOptions) -> Self {
        Relayed {
            snapshot: Some(relay::capture()),
            task,
            release_after_run: options.releases_after_run(),
        }
    }

    /// Binds `task` to an existing snapshot instead of capturing.
    ///
    /// Several tasks may share one snapshot, but they must not run nested on
    /// the same thread: replaying a capture that is already active there is a
    /// protocol fault.
    pub fn from_snapshot(snapshot: Snapshot, task: F) -> Self {
        Relayed {
            snapshot: Some(snapshot),
            task,
            release_after_run: false,
        }
    }

    /// The snapshot this task will replay, unless it has been released.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Whether the snapshot was dropped after a run.
    pub fn is_released(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn inner(&self) -> &F {
        &self.task
    }

    /// Unwraps the original task.  The snapshot is discarded.
    pub fn into_inner(self) -> F {
        self.task
    }

    /// Replays the snapshot, runs the task and restores the thread.
    ///
    /// Restore happens even if the task panics; the panic then resumes.  A
    /// task that returns `Result` gets its own error back unchanged inside
    /// `Ok`.
    pub fn run<R>(self) -> Result<R, RelayError>
    where
        F: FnOnce() -> R,
    {
        let Relayed { snapshot, task, .. } = self;
        let snapshot = snapshot.ok_or_else(|| fault(RelayError::Released))?;
        relay::run_with(&snapshot, task)
    }

    /// Like [`run`](Self::run) for tasks that run repeatedly.
    ///
    /// With [`WrapOptions::release_after_run`] the first run drops the
    /// snapshot, and later runs fail with [`RelayError::Released`] without
    /// calling the task.
    pub fn run_mut<R>(&mut self) -> Result<R, RelayError>
    where
        F: FnMut() -> R,
    {
        let snapshot = if self.release_after_run {
            self.snapshot.take()
        } else {
            self.snapshot.clone()
        };
        let snapshot = snapshot.ok_or_else(|| fault(RelayError::Released))?;
        let task = &mut self.task;
        relay::run_with(&snapshot, || task())
    }

    /// Runs the task for an executor, which has no channel for a
    /// [`RelayError`]: a fault becomes a panic whose payload is the error.
    pub(crate) fn call<R>(self) -> R
    where
        F: FnOnce() -> R,
    {
        match self.run() {
            Ok(out) => out,
            Err(err) => std::panic::panic_any(err),
        }
    }

    pub(crate) fn call_mut<R>(&mut self) -> R
    where
        F: FnMut() -> R,
    {
        match self.run_mut() {
            Ok(out) => out,
            Err(err) => std::panic::panic_any(err),
        }
    }
}

impl<F> Debug for Relayed<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relayed")
            .field("snapshot", &self.snapshot)
            .field("release_after_run", &self.release_after_run)
            .finish_non_exhaustive()
    }
}

/// Anything [`wrap`] accepts: a plain closure, or a task that is already
/// wrapped.
pub trait IntoRelayed<F> {
    fn into_relayed(self, options: WrapOptions) -> Result<Relayed<F>, RelayError>;
}

impl<F, R> IntoRelayed<F> for F
where
    F: FnOnce() -> R,
{
    fn into_relayed(self, options: WrapOptions) -> Result<Relayed<F>, RelayError> {
        Ok(Relayed::with_options(self, options))
    }
}

impl<F> IntoRelayed<F> for Relayed<F> {
    fn into_relayed(self, options: WrapOptions) -> Result<Relayed<F>, RelayError> {
        if options.is_idempotent() {
            // keeps the original snapshot; nothing is captured again
            Ok(self)
        } else {
            Err(fault(RelayError::AlreadyWrapped))
        }
    }
}

/// Captures the calling thread's cells and binds them to `task`.
///
/// ```rust
/// use threadrelay::task::{self, WrapOptions};
///
/// let once = task::wrap(|| 1 + 1, WrapOptions::default()).unwrap();
/// // wrapping twice is refused unless the options allow it
/// let twice = task::wrap(once, WrapOptions::default().idempotent(true)).unwrap();
/// assert_eq!(twice.run().unwrap(), 2);
/// ```
pub fn wrap<T, F>(task: T, options: WrapOptions) -> Result<Relayed<F>, RelayError>
where
    T: IntoRelayed<F>,
{
    task.into_relayed(options)
}

/// Wraps every task, in order.  Fails on the first task that cannot be
/// wrapped.
pub fn wrap_all<I, T, F>(tasks: I, options: WrapOptions) -> Result<Vec<Relayed<F>>, RelayError>
where
    I: IntoIterator<Item = T>,
    T: IntoRelayed<F>,
{
    tasks
        .into_iter()
        .map(|task| task.into_relayed(options))
        .collect()
}

/// The task that was wrapped.
pub fn unwrap<F>(task: Relayed<F>) -> F {
    task.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::RelayCell;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn capture_happens_at_wrap_time() {
        let cell = RelayCell::new();
        cell.set("submitted");
        let relayed = {
            let cell = cell.clone();
            Relayed::new(move || cell.get())
        };
        cell.set("changed later");
        let seen = std::thread::spawn(move || relayed.run().unwrap())
            .join()
            .unwrap();
        assert_eq!(seen, Some("submitted"));
    }

    #[test]
    fn run_restores_the_running_thread() {
        let cell = RelayCell::new();
        cell.set(1u8);
        let relayed = {
            let cell = cell.clone();
            Relayed::new(move || cell.set(99))
        };
        cell.set(2);
        relayed.run().unwrap();
        assert_eq!(cell.get(), Some(2));
    }

    #[test]
    fn delegate_result_passes_through() {
        let relayed = Relayed::new(|| -> Result<u8, String> { Err("no".to_string()) });
        assert_eq!(relayed.run().unwrap(), Err("no".to_string()));
    }

    #[test]
    fn delegate_panic_resumes_after_restore() {
        let cell = RelayCell::new();
        cell.set(5u32);
        let relayed = {
            let cell = cell.clone();
            Relayed::new(move || -> u32 {
                cell.set(6);
                panic!("delegate");
            })
        };
        let result = catch_unwind(AssertUnwindSafe(|| relayed.run()));
        assert!(result.is_err());
        assert_eq!(cell.get(), Some(5));
        assert_eq!(relay::depth(), 0);
    }

    #[test]
    fn run_mut_replays_every_time() {
        let cell = RelayCell::new();
        cell.set(10u32);
        let mut relayed = {
            let cell = cell.clone();
            Relayed::new(move || {
                let seen = cell.get();
                cell.set(0);
                seen
            })
        };
        cell.remove();
        assert_eq!(relayed.run_mut().unwrap(), Some(10));
        assert_eq!(relayed.run_mut().unwrap(), Some(10));
        assert!(!cell.is_set());
    }

    #[test]
    fn release_after_run_refuses_a_second_run() {
        let mut relayed =
            Relayed::with_options(|| 3u8, WrapOptions::default().release_after_run(true));
        assert!(!relayed.is_released());
        assert_eq!(relayed.run_mut().unwrap(), 3);
        assert!(relayed.is_released());
        assert!(relayed.snapshot().is_none());
        assert_eq!(relayed.run_mut().unwrap_err(), RelayError::Released);
    }

    #[test]
    fn rewrap_is_refused_unless_idempotent() {
        let relayed = wrap(|| (), WrapOptions::default()).unwrap();
        let capture = relayed.snapshot().unwrap().capture_id();
        let err = wrap(relayed, WrapOptions::default()).unwrap_err();
        assert_eq!(err, RelayError::AlreadyWrapped);
        assert!(!err.is_protocol_fault());

        let relayed = wrap(|| (), WrapOptions::default()).unwrap();
        let capture_before = relayed.snapshot().unwrap().capture_id();
        assert_ne!(capture, capture_before);
        let again = wrap(relayed, WrapOptions::default().idempotent(true)).unwrap();
        assert_eq!(again.snapshot().unwrap().capture_id(), capture_before);
    }

    #[test]
    fn unwrap_returns_the_original_task() {
        let boxed = Box::new(5u8);
        let addr: *const u8 = &*boxed;
        let relayed = wrap(move || boxed, WrapOptions::default()).unwrap();
        let original = unwrap(relayed);
        let returned = original();
        assert_eq!(&*returned as *const u8, addr);
    }

    #[test]
    fn wrap_all_keeps_order_and_count() {
        let cell = RelayCell::new();
        cell.set(7u32);
        let tasks: Vec<_> = (0..5u32)
            .map(|i| {
                let cell = cell.clone();
                move || cell.get().map(|v| v + i)
            })
            .collect();
        let wrapped = wrap_all(tasks, WrapOptions::default()).unwrap();
        assert_eq!(wrapped.len(), 5);
        cell.remove();
        let results: Vec<_> = wrapped.into_iter().map(|t| t.run().unwrap()).collect();
        assert_eq!(results, vec![Some(7), Some(8), Some(9), Some(10), Some(11)]);
    }

    #[test]
    fn shared_snapshot_runs_sequentially() {
        let cell = RelayCell::new();
        cell.set('x');
        let snapshot = relay::capture();
        cell.remove();
        let a = {
            let cell = cell.clone();
            Relayed::from_snapshot(snapshot.clone(), move || cell.get())
        };
        let b = {
            let cell = cell.clone();
            Relayed::from_snapshot(snapshot, move || cell.get())
        };
        assert_eq!(a.run().unwrap(), Some('x'));
        assert_eq!(b.run().unwrap(), Some('x'));
    }
}
