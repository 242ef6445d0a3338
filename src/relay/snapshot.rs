// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snapshot and backup types.

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cell::{CellId, ErasedCell, RelayCell, Value};

static CAPTURE_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies one call to [`capture`](super::capture).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CaptureId(pub(crate) u64);

impl CaptureId {
    pub(crate) fn next() -> CaptureId {
        CaptureId(CAPTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for CaptureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Captured {
    pub(crate) cell: Arc<dyn ErasedCell>,
    pub(crate) value: Value,
}

pub(crate) struct SnapshotInner {
    pub(crate) capture_id: CaptureId,
    pub(crate) entries: HashMap<CellId, Captured>,
}

/// The cell values of one thread at one moment, ready to be replayed elsewhere.
///
/// A snapshot is immutable.  Clones share the same capture, so handing one to
/// several tasks costs a reference count.  A cell missing from the snapshot
/// was unset when it was taken, which is different from a cell holding an
/// empty value such as `None`.
///
/// A snapshot keeps the cells it captured alive until it is dropped.
#[derive(Clone)]
pub struct Snapshot {
    pub(crate) inner: Arc<SnapshotInner>,
}

impl Snapshot {
    pub(crate) fn new(entries: HashMap<CellId, Captured>) -> Snapshot {
        Snapshot {
            inner: Arc::new(SnapshotInner {
                capture_id: CaptureId::next(),
                entries,
            }),
        }
    }

    /// A snapshot in which every cell is unset.  Replaying it isolates the
    /// thread from all cell values until the matching restore.
    pub fn empty() -> Snapshot {
        Snapshot::new(HashMap::new())
    }

    pub fn capture_id(&self) -> CaptureId {
        self.inner.capture_id
    }

    /// Number of cells captured.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Whether `cell` had a value when this snapshot was taken.
    pub fn contains<T>(&self, cell: &RelayCell<T>) -> bool {
        self.inner.entries.contains_key(&cell.id())
    }

    /// The captured value of `cell`, if it had one.
    pub fn get<T>(&self, cell: &RelayCell<T>) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.inner
            .entries
            .get(&cell.id())
            .and_then(|captured| captured.value.downcast_ref::<T>())
            .cloned()
    }

    pub(crate) fn cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.inner.entries.keys().copied()
    }
}

impl Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut cells: Vec<CellId> = self.cell_ids().collect();
        cells.sort();
        f.debug_struct("Snapshot")
            .field("capture_id", &self.inner.capture_id)
            .field("cells", &cells)
            .finish()
    }
}

/// What one replay displaced on its thread.
pub(crate) struct BackedUp {
    pub(crate) cell: Arc<dyn ErasedCell>,
    /// `None` when the cell was unset before the replay.
    pub(crate) previous: Option<Value>,
    /// Applied from the snapshot, as opposed to cleared as a leftover.
    pub(crate) replayed: bool,
}

/// The state a [`replay`](super::replay) displaced, to be handed to
/// [`restore`](super::restore) on the same thread.
///
/// Not `Send`: a backup belongs to the thread that made it.
#[must_use = "a replay must be restored, or the worker keeps the replayed values"]
pub struct Backup {
    pub(crate) frame: u64,
    pub(crate) entries: Vec<BackedUp>,
    pub(crate) _thread_bound: PhantomData<*const ()>,
}

impl Backup {
    /// Number of cells this backup will put back or clear.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Debug for Backup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backup")
            .field("frame", &self.frame)
            .field("cells", &self.entries.len())
            .finish()
    }
}
