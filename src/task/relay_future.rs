// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relaying cells into futures.

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use crate::relay::{self, ReplayScope, Snapshot};

/// A [`Future`] that sees the cells captured when it was created.
///
/// Executors poll futures on whatever thread is free, so a cell set around an
/// `async` block is usually gone by the time the block runs.  `RelayFuture`
/// replays its snapshot around every poll and restores the polling thread
/// afterwards.
///
/// # Panics
///
/// Polling panics with a [`RelayError`](crate::error::RelayError) payload if
/// the replay protocol fails, which only happens when the same snapshot is
/// already active on the polling thread.
///
/// ```rust
/// use threadrelay::cell::RelayCell;
/// use threadrelay::task::RelayFuture;
///
/// # async fn example() {
/// let user = RelayCell::new();
/// user.set("alice".to_string());
/// let future = {
///     let user = user.clone();
///     RelayFuture::new(async move { user.get() })
/// };
/// assert_eq!(future.await.as_deref(), Some("alice"));
/// # }
/// ```
pub struct RelayFuture<F> {
    snapshot: Snapshot,
    future: F,
}

impl<F> RelayFuture<F> {
    /// Wraps `future`, capturing the calling thread's cells.
    pub fn new(future: F) -> Self {
        RelayFuture {
            snapshot: relay::capture(),
            future,
        }
    }

    pub fn with_snapshot(snapshot: Snapshot, future: F) -> Self {
        RelayFuture { snapshot, future }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl<F> Future for RelayFuture<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let (snapshot, future) = unsafe {
            let d = self.get_unchecked_mut();
            (&d.snapshot, Pin::new_unchecked(&mut d.future))
        };
        let scope = match ReplayScope::enter(snapshot) {
            Ok(scope) => scope,
            Err(err) => std::panic::panic_any(err),
        };
        let r = future.poll(cx);
        if let Err(err) = scope.exit() {
            std::panic::panic_any(err);
        }
        r
    }
}

/// Shorthand for [`RelayFuture::new`].
pub fn relay_future<F>(future: F) -> RelayFuture<F>
where
    F: Future,
{
    RelayFuture::new(future)
}
