// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fork/join sub-units.

use super::Relayed;
use crate::error::RelayError;

/// A sub-unit split off from the current one, carrying the cells as they were
/// at the fork point.
///
/// Join it on whichever thread picks it up, including the forking thread
/// itself.  Forked units can fork again; each join restores only what its own
/// replay displaced.
#[derive(Debug)]
#[must_use = "a forked unit does nothing until it is joined"]
pub struct Forked<F> {
    relayed: Relayed<F>,
}

impl<F> Forked<F> {
    /// Runs the sub-unit with the cells from the fork point.
    pub fn join<R>(self) -> Result<R, RelayError>
    where
        F: FnOnce() -> R,
    {
        self.relayed.run()
    }
}

/// Splits `f` off as a sub-unit.
pub fn fork<F, R>(f: F) -> Forked<F>
where
    F: FnOnce() -> R,
{
    Forked {
        relayed: Relayed::new(f),
    }
}

/// Forks `a` and `b` at the same point and runs them one after the other on
/// the calling thread.  Neither observes cell changes made by the other.
///
/// ```rust
/// use threadrelay::cell::RelayCell;
/// use threadrelay::task;
///
/// let depth = RelayCell::new();
/// depth.set(0u32);
/// let (left, right) = task::join(
///     || {
///         depth.set(1);
///         depth.get()
///     },
///     || depth.get(),
/// )
/// .unwrap();
/// assert_eq!((left, right), (Some(1), Some(0)));
/// assert_eq!(depth.get(), Some(0));
/// ```
pub fn join<A, B, RA, RB>(a: A, b: B) -> Result<(RA, RB), RelayError>
where
    A: FnOnce() -> RA,
    B: FnOnce() -> RB,
{
    let a = fork(a);
    let b = fork(b);
    let ra = a.join()?;
    let rb = b.join()?;
    Ok((ra, rb))
}
