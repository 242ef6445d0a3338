// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thread-scoped value slots that know how to travel.
//!
//! A [`RelayCell`] behaves like a `thread_local!` whose value can be carried to
//! another thread: each thread sees its own value, and [`relay::capture`]
//! collects the values set on the current thread so they can be replayed on a
//! worker later.
//!
//! ```rust
//! use threadrelay::cell::RelayCell;
//!
//! let request_id: RelayCell<u64> = RelayCell::new();
//! assert_eq!(request_id.get(), None);
//! request_id.set(7);
//! assert_eq!(request_id.get(), Some(7));
//!
//! // other threads have their own slot
//! let seen = {
//!     let request_id = request_id.clone();
//!     std::thread::spawn(move || request_id.get()).join().unwrap()
//! };
//! assert_eq!(seen, None);
//! ```
//!
//! # Hooks
//!
//! [`CellHooks`] customizes what a value looks like on the other side:
//! [`copy_for_execution`](CellHooks::copy_for_execution) runs at capture time,
//! [`copy_for_spawn`](CellHooks::copy_for_spawn) runs only for threads started
//! with [`spawn`].  The two are independent.
//!
//! Hooks never run while the per-thread storage is borrowed, so a hook may read
//! and write other cells.
//!
//! [`relay::capture`]: crate::relay::capture

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crate::registry;

static CELL_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a [`RelayCell`].
///
/// Identity is what snapshots and backups are keyed by; cell values are never
/// compared.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub(crate) u64);

impl Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// A stored value.  Shared rather than cloned when it moves between a snapshot
/// and a thread slot; `set` always installs a fresh one.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

thread_local! {
    static SLOTS: RefCell<HashMap<CellId, Value>> = RefCell::new(HashMap::new());
}

pub(crate) fn slot_get(id: CellId) -> Option<Value> {
    SLOTS.with(|slots| slots.borrow().get(&id).cloned())
}

pub(crate) fn slot_is_set(id: CellId) -> bool {
    SLOTS.with(|slots| slots.borrow().contains_key(&id))
}

/// Installs `value`, handing back whatever was there.  The caller drops the
/// previous value after the borrow has ended.
pub(crate) fn slot_put(id: CellId, value: Value) -> Option<Value> {
    SLOTS.with(|slots| slots.borrow_mut().insert(id, value))
}

pub(crate) fn slot_take(id: CellId) -> Option<Value> {
    SLOTS.with(|slots| slots.borrow_mut().remove(&id))
}

/// Removes every slot whose id fails `keep`, returning the removed values.
pub(crate) fn slot_retain(mut keep: impl FnMut(CellId) -> bool) -> Vec<Value> {
    SLOTS.with(|slots| {
        let mut slots = slots.borrow_mut();
        let doomed: Vec<CellId> = slots.keys().copied().filter(|id| !keep(*id)).collect();
        doomed
            .into_iter()
            .filter_map(|id| slots.remove(&id))
            .collect()
    })
}

#[cfg(test)]
pub(crate) fn slot_count() -> usize {
    SLOTS
        .try_with(|slots| slots.borrow().len())
        .unwrap_or(0)
}

/// Overridable behavior of a [`RelayCell`].
///
/// Every method has a default, so an implementation only overrides what it
/// needs.
///
/// ```rust
/// use threadrelay::cell::{CellHooks, RelayCell};
///
/// struct Depth;
/// impl CellHooks<u32> for Depth {
///     fn initial_value(&self) -> Option<u32> {
///         Some(0)
///     }
///     // a worker sees one level deeper than the submitter
///     fn copy_for_execution(&self, parent: &u32) -> u32 {
///         parent + 1
///     }
/// }
///
/// let depth = RelayCell::with_hooks(Depth);
/// assert_eq!(depth.get(), Some(0));
/// ```
pub trait CellHooks<T>: Send + Sync + 'static {
    /// Value returned by [`RelayCell::get`] on a thread that never set one.
    ///
    /// When this returns `Some`, the value is stored, so it is captured like an
    /// explicitly set one.
    fn initial_value(&self) -> Option<T> {
        None
    }

    /// What a relayed execution observes, computed on the submitting thread at
    /// capture time.  Identity by default.
    fn copy_for_execution(&self, parent: &T) -> T
    where
        T: Clone,
    {
        parent.clone()
    }

    /// What a thread started with [`spawn`] observes, computed on the parent.
    /// Identity by default.
    fn copy_for_spawn(&self, parent: &T) -> T
    where
        T: Clone,
    {
        parent.clone()
    }

    /// Runs on the worker after the captured values have been applied.
    fn on_replay(&self) {}

    /// Runs on the worker after its previous values have been put back.
    fn on_restore(&self) {}
}

/// [`CellHooks`] with every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl<T> CellHooks<T> for DefaultHooks {}

/// [`CellHooks`] whose initial value comes from a closure.
pub struct InitialWith<F>(F);

impl<T, F> CellHooks<T> for InitialWith<F>
where
    F: Fn() -> T + Send + Sync + 'static,
{
    fn initial_value(&self) -> Option<T> {
        Some((self.0)())
    }
}

struct CellInner<T> {
    id: CellId,
    hooks: Box<dyn CellHooks<T>>,
}

/// Type-erased view of a cell, as the registry and the relay see it.
pub(crate) trait ErasedCell: Send + Sync {
    fn id(&self) -> CellId;
    fn copy_for_execution(&self, value: &Value) -> Value;
    fn copy_for_spawn(&self, value: &Value) -> Value;
    fn on_replay(&self);
    fn on_restore(&self);
}

impl<T> ErasedCell for CellInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> CellId {
        self.id
    }

    fn copy_for_execution(&self, value: &Value) -> Value {
        match value.downcast_ref::<T>() {
            Some(parent) => Arc::new(self.hooks.copy_for_execution(parent)),
            None => value.clone(),
        }
    }

    fn copy_for_spawn(&self, value: &Value) -> Value {
        match value.downcast_ref::<T>() {
            Some(parent) => Arc::new(self.hooks.copy_for_spawn(parent)),
            None => value.clone(),
        }
    }

    fn on_replay(&self) {
        self.hooks.on_replay();
    }

    fn on_restore(&self) {
        self.hooks.on_restore();
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        // Only this thread's slot is reachable from here; other threads drop
        // theirs the next time they replay.
        let released = SLOTS
            .try_with(|slots| {
                slots
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut slots| slots.remove(&self.id))
            })
            .ok()
            .flatten();
        drop(released);
    }
}

/// A thread-scoped value slot that is carried into relayed executions.
///
/// Cloning a `RelayCell` clones the handle; both handles name the same cell.
/// The cell is registered for capture for as long as any handle (or a
/// snapshot that captured it) is alive.
pub struct RelayCell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for RelayCell<T> {
    fn clone(&self) -> Self {
        RelayCell {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for RelayCell<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for RelayCell<T> {}

impl<T> std::hash::Hash for RelayCell<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T> Debug for RelayCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayCell")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

impl<T> Default for RelayCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RelayCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a cell with [`DefaultHooks`].
    pub fn new() -> Self {
        Self::with_hooks(DefaultHooks)
    }

    /// Creates a cell whose unset value is produced by `initial`.
    ///
    /// ```rust
    /// use threadrelay::cell::RelayCell;
    ///
    /// let locale = RelayCell::with_initial(|| "en_US".to_string());
    /// assert_eq!(locale.get().as_deref(), Some("en_US"));
    /// ```
    pub fn with_initial<F>(initial: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_hooks(InitialWith(initial))
    }

    /// Creates a cell driven by `hooks`.
    pub fn with_hooks<H>(hooks: H) -> Self
    where
        H: CellHooks<T>,
    {
        let inner = Arc::new(CellInner {
            id: CellId(CELL_ID.fetch_add(1, Ordering::Relaxed)),
            hooks: Box::new(hooks),
        });
        let weak: Weak<dyn ErasedCell> = Arc::downgrade(&inner) as Weak<dyn ErasedCell>;
        registry::register(weak);
        RelayCell { inner }
    }

    /// The calling thread's value.
    ///
    /// An unset cell asks [`CellHooks::initial_value`]; if that yields a value it
    /// is stored for this thread and returned.  Reading an unset cell never
    /// fails.
    pub fn get(&self) -> Option<T> {
        if let Some(value) = slot_get(self.inner.id) {
            return value.downcast_ref::<T>().cloned();
        }
        let initial = self.inner.hooks.initial_value()?;
        let previous = slot_put(self.inner.id, Arc::new(initial.clone()));
        drop(previous);
        Some(initial)
    }

    /// Stores `value` for the calling thread and marks the cell as set.
    pub fn set(&self, value: T) {
        let previous = slot_put(self.inner.id, Arc::new(value));
        drop(previous);
    }

    /// Clears the calling thread's value and mark.
    pub fn remove(&self) {
        let previous = slot_take(self.inner.id);
        drop(previous);
    }

    /// Whether the calling thread holds a value, without consulting
    /// [`CellHooks::initial_value`].
    pub fn is_set(&self) -> bool {
        slot_is_set(self.inner.id)
    }
}

impl<T> RelayCell<T> {
    /// This cell's identity.
    pub fn id(&self) -> CellId {
        self.inner.id
    }
}

/// Values a new thread starts with: [`CellHooks::copy_for_spawn`] of every
/// cell set on the calling thread.
fn inherit_for_spawn() -> Vec<(CellId, Value)> {
    registry::live_cells()
        .into_iter()
        .filter_map(|cell| {
            let parent = slot_get(cell.id())?;
            Some((cell.id(), cell.copy_for_spawn(&parent)))
        })
        .collect()
}

fn install(inherited: Vec<(CellId, Value)>) {
    for (id, value) in inherited {
        drop(slot_put(id, value));
    }
}

/// Spawns a thread that starts with the calling thread's cell values, as
/// transformed by [`CellHooks::copy_for_spawn`].
///
/// Threads started any other way, including pool workers, start with every
/// cell unset.
///
/// ```rust
/// use threadrelay::cell::{self, RelayCell};
///
/// let user = RelayCell::new();
/// user.set("alice".to_string());
/// let handle = {
///     let user = user.clone();
///     cell::spawn(move || user.get())
/// };
/// assert_eq!(handle.join().unwrap().as_deref(), Some("alice"));
/// ```
pub fn spawn<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let inherited = inherit_for_spawn();
    std::thread::spawn(move || {
        install(inherited);
        f()
    })
}

/// Like [`spawn`], with a thread name; reports spawn failure instead of
/// panicking.
pub fn spawn_named<F, R>(name: String, f: F) -> std::io::Result<JoinHandle<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let inherited = inherit_for_spawn();
    std::thread::Builder::new().name(name).spawn(move || {
        install(inherited);
        f()
    })
}
