// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.
//!
//! Faults fall into three classes:
//!
//! * **Protocol faults** ([`RelayError`]): the replay/restore stack discipline was
//!   violated, or a released task was run again.  These are logged at error level
//!   where they are detected and are never retried.
//! * **Hook faults**: a [`CellHooks`](crate::cell::CellHooks) method panicked.  The
//!   panic propagates to whoever called `capture` or `replay`, after the thread
//!   has been put back the way it was.
//! * **Delegate faults**: the wrapped work itself failed.  A returned `Err` is
//!   handed back untouched; a panic resumes once restore has run.

/// A violation of the capture/replay/restore protocol, or misuse of a wrapper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Wrapping a task that is already wrapped, outside idempotent mode.
    #[error("task is already wrapped for relay")]
    AlreadyWrapped,
    /// A task wrapped with `release_after_run` was run a second time.
    #[error("relayed task released its captured context after the first run")]
    Released,
    /// `restore` was called while no replay was active on this thread.
    #[error("restore called with no replay active on this thread")]
    RestoreWithoutReplay,
    /// `restore` was called for a replay that is not the innermost one.
    #[error("restore of replay frame {found} while frame {expected} is innermost")]
    OutOfOrderRestore {
        /// Innermost active frame on this thread.
        expected: u64,
        /// Frame the backup belongs to.
        found: u64,
    },
    /// A capture was replayed again before its previous replay was restored.
    #[error("capture {capture} is already replayed on this thread")]
    ReentrantReplay {
        /// The capture that was replayed twice.
        capture: u64,
    },
}

impl RelayError {
    /// Whether this error means the replay/restore stack discipline is broken.
    ///
    /// [`RelayError::AlreadyWrapped`] is a wrap-time mistake and leaves every
    /// thread untouched, so it is the only variant that is not a protocol fault.
    pub fn is_protocol_fault(&self) -> bool {
        !matches!(self, RelayError::AlreadyWrapped)
    }
}

/// The executor refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectedError {
    #[error("executor has been shut down")]
    Shutdown,
    /// A fixed-rate schedule was given a zero period.
    #[error("periodic task needs a non-zero period")]
    ZeroPeriod,
}

/// Why a [`TaskHandle`](crate::executor::TaskHandle) has no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Cancelled before it started, or discarded by a shutdown before it ran.
    #[error("task was cancelled before it ran")]
    Cancelled,
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The relay protocol failed around the task.
    #[error("relay fault: {0}")]
    Fault(RelayError),
}

/// Failure of [`Executor::invoke_any`](crate::executor::Executor::invoke_any).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeAnyError {
    #[error(transparent)]
    Rejected(#[from] RejectedError),
    #[error("invoke_any called with no tasks")]
    Empty,
    #[error("all {failures} tasks failed")]
    AllFailed { failures: usize },
}
