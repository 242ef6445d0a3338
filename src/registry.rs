// SPDX-License-Identifier: MIT OR Apache-2.0

//! The process-wide set of live cells.
//!
//! Capture has to find every cell without callers listing them, so each
//! [`RelayCell`](crate::cell::RelayCell) registers itself on construction.  The
//! registry holds weak references only: it never keeps a cell alive, and stale
//! entries are pruned lazily by whoever enumerates next.
//!
//! # Locking
//!
//! The registry sits behind a reader/writer spinlock.  Registration is a push,
//! enumeration is a scan that upgrades weak pointers, and pruning is a
//! `retain`.  A cell registered while another thread is enumerating may or may
//! not appear in that enumeration; it cannot have a value on the enumerating
//! thread yet, so nothing is lost.
//!
//! ```rust
//! use threadrelay::cell::RelayCell;
//! use threadrelay::registry;
//!
//! let cell: RelayCell<u8> = RelayCell::new();
//! let id = cell.id();
//! assert!(registry::is_live(id));
//! drop(cell);
//! assert!(!registry::is_live(id));
//! ```

use std::sync::{Arc, OnceLock, Weak};

use crate::cell::{CellId, ErasedCell};
use crate::spinlock::Spinlock;

static REGISTRY: OnceLock<Spinlock<Vec<Weak<dyn ErasedCell>>>> = OnceLock::new();

fn registry() -> &'static Spinlock<Vec<Weak<dyn ErasedCell>>> {
    REGISTRY.get_or_init(|| Spinlock::new(Vec::new()))
}

pub(crate) fn register(cell: Weak<dyn ErasedCell>) {
    registry().with_mut(|cells| cells.push(cell));
}

/// Point-in-time list of live cells.  Dead entries seen along the way are
/// pruned before returning.
pub(crate) fn live_cells() -> Vec<Arc<dyn ErasedCell>> {
    let mut stale = 0usize;
    let live: Vec<Arc<dyn ErasedCell>> = registry().with(|cells| {
        cells
            .iter()
            .filter_map(|weak| {
                let cell = weak.upgrade();
                if cell.is_none() {
                    stale += 1;
                }
                cell
            })
            .collect()
    });
    if stale > 0 {
        prune();
    }
    live
}

fn prune() {
    registry().with_mut(|cells| cells.retain(|weak| weak.strong_count() > 0));
}

/// Number of cells currently alive.
pub fn live_count() -> usize {
    live_cells().len()
}

/// Number of entries the registry holds, including dead ones not yet pruned.
pub fn registered_count() -> usize {
    registry().with(|cells| cells.len())
}

/// Whether the cell with this identity is still alive.
pub fn is_live(id: CellId) -> bool {
    // upgraded cells are dropped after the lock is released
    live_cells().iter().any(|cell| cell.id() == id)
}
