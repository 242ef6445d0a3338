// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wrapping units of work so they carry the submitter's cells.
//!
//! [`wrap`] captures the calling thread's cells and binds the snapshot to a
//! task.  Running the resulting [`Relayed`] on any thread replays the
//! snapshot, runs the task and restores the thread, whichever way the task
//! exits.
//!
//! ```rust
//! use threadrelay::cell::RelayCell;
//! use threadrelay::task::{self, WrapOptions};
//!
//! let trace_id = RelayCell::new();
//! trace_id.set(0xfeed_u64);
//! let relayed = {
//!     let trace_id = trace_id.clone();
//!     task::wrap(move || trace_id.get(), WrapOptions::default()).unwrap()
//! };
//! let seen = std::thread::spawn(move || relayed.run().unwrap())
//!     .join()
//!     .unwrap();
//! assert_eq!(seen, Some(0xfeed));
//! ```
//!
//! Besides closures there are wrappers for type-erased [`Job`]s, fork/join
//! style sub-units ([`fork`], [`join`]) and futures ([`RelayFuture`]).

mod fork;
mod job;
mod relay_future;
mod relayed;

pub use fork::{Forked, fork, join};
pub use job::{Job, unwrap_job, wrap_job};
pub use relay_future::{RelayFuture, relay_future};
pub use relayed::{IntoRelayed, Relayed, unwrap, wrap, wrap_all};

/// How [`wrap`] treats its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrapOptions {
    idempotent: bool,
    release_after_run: bool,
}

impl WrapOptions {
    /// Accept tasks that are already wrapped and hand them back unchanged.
    ///
    /// Without this, wrapping a [`Relayed`] fails with
    /// [`RelayError::AlreadyWrapped`](crate::error::RelayError::AlreadyWrapped).
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Drop the captured snapshot once the task has run, so the cell values it
    /// holds can be freed.  A released task refuses to run again.
    pub fn release_after_run(mut self, release: bool) -> Self {
        self.release_after_run = release;
        self
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn releases_after_run(&self) -> bool {
        self.release_after_run
    }
}
