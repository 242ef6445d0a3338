// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capture, replay and restore.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use super::snapshot::{BackedUp, Backup, CaptureId, Captured, Snapshot};
use crate::cell::{self, CellId, Value};
use crate::error::RelayError;
use crate::registry;

static FRAME_ID: AtomicU64 = AtomicU64::new(0);

struct Frame {
    id: u64,
    capture: CaptureId,
}

thread_local! {
    /// Active replays on this thread, innermost last.
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Logs a fault at the point it is detected and hands it back for returning.
pub(crate) fn fault(err: RelayError) -> RelayError {
    let message = err.to_string();
    logwise::error_sync!("threadrelay: relay fault: {message}", message = message);
    err
}

/// Takes a [`Snapshot`] of every live cell set on the calling thread.
///
/// Each value passes through its cell's
/// [`copy_for_execution`](crate::cell::CellHooks::copy_for_execution) hook.
/// Unset cells are left out.
pub fn capture() -> Snapshot {
    let entries: HashMap<CellId, Captured> = registry::live_cells()
        .into_iter()
        .filter_map(|cell| {
            let current = cell::slot_get(cell.id())?;
            let value = cell.copy_for_execution(&current);
            Some((cell.id(), Captured { cell, value }))
        })
        .collect();
    let snapshot = Snapshot::new(entries);
    let cells = snapshot.len() as u64;
    let capture = snapshot.capture_id().0;
    logwise::trace_sync!("captured {cells} cells as capture {capture}", cells = cells, capture = capture);
    snapshot
}

/// Applies `snapshot` to the calling thread.
///
/// Every live cell the snapshot does not mention is cleared on this thread, so
/// leftovers from earlier work on a reused thread are invisible while the
/// snapshot is applied.  The returned [`Backup`] must go to [`restore`] on this
/// thread once the work is done.
pub fn replay(snapshot: &Snapshot) -> Result<Backup, RelayError> {
    let capture = snapshot.capture_id();
    let frame = FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        if frames.iter().any(|frame| frame.capture == capture) {
            return None;
        }
        let id = FRAME_ID.fetch_add(1, Ordering::Relaxed);
        frames.push(Frame { id, capture });
        Some(id)
    });
    let Some(frame) = frame else {
        return Err(fault(RelayError::ReentrantReplay { capture: capture.0 }));
    };

    let mut pending = PendingReplay {
        frame,
        entries: Vec::with_capacity(snapshot.len()),
        committed: false,
    };

    let live = registry::live_cells();
    let live_ids: HashSet<CellId> = live.iter().map(|cell| cell.id()).collect();
    // values whose cell has been dropped since this thread last looked
    drop(cell::slot_retain(|id| live_ids.contains(&id)));

    for cell in live {
        if snapshot.inner.entries.contains_key(&cell.id()) {
            continue;
        }
        if let Some(previous) = cell::slot_take(cell.id()) {
            pending.entries.push(BackedUp {
                cell,
                previous: Some(previous),
                replayed: false,
            });
        }
    }
    for (id, captured) in &snapshot.inner.entries {
        let previous = cell::slot_put(*id, captured.value.clone());
        pending.entries.push(BackedUp {
            cell: captured.cell.clone(),
            previous,
            replayed: true,
        });
    }

    for entry in pending.entries.iter().filter(|entry| entry.replayed) {
        entry.cell.on_replay();
    }

    let backup = pending.commit();
    let cells = backup.entries.len() as u64;
    logwise::trace_sync!("replayed capture {capture} in frame {frame}, backed up {cells} cells",
        capture = capture.0, frame = frame, cells = cells);
    Ok(backup)
}

/// Undoes the replay that produced `backup`.
///
/// The thread ends up exactly as it was before that replay: values set during
/// the execution are dropped (including values of cells created during it),
/// displaced values come back, and cells that were unset are unset again.
pub fn restore(backup: Backup) -> Result<(), RelayError> {
    let popped = FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        match frames.last() {
            None => Err(RelayError::RestoreWithoutReplay),
            Some(top) if top.id != backup.frame => Err(RelayError::OutOfOrderRestore {
                expected: top.id,
                found: backup.frame,
            }),
            Some(_) => {
                frames.pop();
                Ok(())
            }
        }
    });
    popped.map_err(fault)?;

    let frame = backup.frame;
    let mut entries = backup.entries;
    drop(rewind(&mut entries));
    for entry in entries.iter().filter(|entry| entry.replayed) {
        entry.cell.on_restore();
    }
    logwise::trace_sync!("restored frame {frame}", frame = frame);
    Ok(())
}

/// Replays an empty snapshot: every cell reads as unset until the backup is
/// restored.
pub fn clear() -> Result<Backup, RelayError> {
    replay(&Snapshot::empty())
}

/// Runs `f` with `snapshot` applied, restoring afterwards.
///
/// Restore happens even if `f` panics; the panic then continues.
///
/// ```rust
/// use threadrelay::cell::RelayCell;
/// use threadrelay::relay;
///
/// let cell = RelayCell::new();
/// cell.set(1u32);
/// let snapshot = relay::capture();
/// cell.set(2);
/// let seen = relay::run_with(&snapshot, || cell.get()).unwrap();
/// assert_eq!(seen, Some(1));
/// assert_eq!(cell.get(), Some(2));
/// ```
pub fn run_with<F, R>(snapshot: &Snapshot, f: F) -> Result<R, RelayError>
where
    F: FnOnce() -> R,
{
    let scope = ReplayScope::enter(snapshot)?;
    let out = f();
    scope.exit()?;
    Ok(out)
}

/// Runs `f` with every cell unset, restoring afterwards.
pub fn run_cleared<F, R>(f: F) -> Result<R, RelayError>
where
    F: FnOnce() -> R,
{
    run_with(&Snapshot::empty(), f)
}

/// Number of replays active on the calling thread.
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

#[cfg(test)]
pub(crate) fn abandon_frames() {
    FRAMES.with(|frames| frames.borrow_mut().clear());
}

/// Puts every entry back and drops whatever was set in between.  Returns the
/// displaced values so the caller drops them outside the slot borrow.
fn rewind(entries: &mut [BackedUp]) -> Vec<Value> {
    let known: HashSet<CellId> = entries.iter().map(|entry| entry.cell.id()).collect();
    let mut displaced = cell::slot_retain(|id| known.contains(&id));
    for entry in entries.iter_mut().rev() {
        let id = entry.cell.id();
        let current = match entry.previous.take() {
            Some(previous) => cell::slot_put(id, previous),
            None => cell::slot_take(id),
        };
        displaced.extend(current);
    }
    displaced
}

/// A replay in progress.  Dropped without [`commit`](Self::commit) (a hook
/// panicked), it rolls the thread back and discards its frame.
struct PendingReplay {
    frame: u64,
    entries: Vec<BackedUp>,
    committed: bool,
}

impl PendingReplay {
    fn commit(mut self) -> Backup {
        self.committed = true;
        Backup {
            frame: self.frame,
            entries: std::mem::take(&mut self.entries),
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for PendingReplay {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(rewind(&mut self.entries));
        let frame = self.frame;
        FRAMES.with(|frames| frames.borrow_mut().retain(|f| f.id != frame));
        logwise::warn_sync!("threadrelay: replay in frame {frame} rolled back after a hook panicked",
            frame = frame);
    }
}

/// Replay held open for the duration of a call; restores on drop, so an
/// unwinding delegate still leaves its thread clean.
pub(crate) struct ReplayScope {
    backup: Option<Backup>,
}

impl ReplayScope {
    pub(crate) fn enter(snapshot: &Snapshot) -> Result<ReplayScope, RelayError> {
        Ok(ReplayScope {
            backup: Some(replay(snapshot)?),
        })
    }

    pub(crate) fn exit(mut self) -> Result<(), RelayError> {
        match self.backup.take() {
            Some(backup) => restore(backup),
            None => Ok(()),
        }
    }
}

impl Drop for ReplayScope {
    fn drop(&mut self) {
        if let Some(backup) = self.backup.take() {
            // a failed restore has already been logged
            let _ = restore(backup);
        }
    }
}
