// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capture/replay/restore protocol.
//!
//! Moving cell values onto a pooled worker takes three steps:
//!
//! 1. [`capture`] on the submitting thread collects a [`Snapshot`] of every
//!    cell set there, as transformed by
//!    [`copy_for_execution`](crate::cell::CellHooks::copy_for_execution).
//! 2. [`replay`] on the worker applies the snapshot and returns a [`Backup`] of
//!    what it displaced.  Cells that the snapshot does not mention but the
//!    worker still holds (left over from an earlier, unrelated task) are cleared
//!    and backed up too, so nothing bleeds from one task into the next.
//! 3. [`restore`] on the worker consumes the backup and returns the thread to
//!    exactly the state it had before the replay, dropping anything the task
//!    set along the way.
//!
//! ```rust
//! use threadrelay::cell::RelayCell;
//! use threadrelay::relay;
//!
//! let tenant = RelayCell::new();
//! tenant.set("acme".to_string());
//! let snapshot = relay::capture();
//!
//! let worker = {
//!     let tenant = tenant.clone();
//!     std::thread::spawn(move || {
//!         let backup = relay::replay(&snapshot).unwrap();
//!         let seen = tenant.get();
//!         relay::restore(backup).unwrap();
//!         (seen, tenant.get())
//!     })
//! };
//! let (during, after) = worker.join().unwrap();
//! assert_eq!(during.as_deref(), Some("acme"));
//! assert_eq!(after, None);
//! ```
//!
//! # Stack discipline
//!
//! Replays nest: a task may replay a sub-task's snapshot on the same thread,
//! and each [`restore`] brings back exactly the state from just before its own
//! [`replay`].  Every thread keeps a stack of active replays; restoring
//! anything but the innermost one, restoring with nothing active, or replaying
//! a capture that is already active on the thread is a protocol fault
//! ([`RelayError`](crate::error::RelayError)), logged and returned.  A
//! [`Backup`] cannot leave its thread and is consumed by [`restore`], so it can
//! never be restored twice.
//!
//! # Hook panics
//!
//! [`replay`] is all-or-nothing.  If an
//! [`on_replay`](crate::cell::CellHooks::on_replay) hook panics, every value the
//! replay already applied is put back before the panic continues, and the
//! replay frame is discarded.  [`restore`] puts all values back before it runs
//! any [`on_restore`](crate::cell::CellHooks::on_restore) hook, so a panicking
//! restore hook still leaves the thread clean.  A panic in
//! [`copy_for_execution`](crate::cell::CellHooks::copy_for_execution) reaches
//! the caller of [`capture`] before any thread state has changed.

mod engine;
mod snapshot;


pub use engine::{capture, clear, depth, replay, restore, run_cleared, run_with};
pub use snapshot::{Backup, CaptureId, Snapshot};

pub(crate) use engine::{ReplayScope, fault};
