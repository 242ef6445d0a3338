// SPDX-License-Identifier: MIT OR Apache-2.0

//! The relaying decorator.

use std::sync::Arc;
use std::time::Duration;

use super::{Executor, PeriodicHandle, TaskHandle, ThreadPool};
use crate::error::{InvokeAnyError, RejectedError};
use crate::task::Relayed;

/// An [`Executor`] that wraps every task before handing it to `E`.
///
/// Each task captures the submitting thread's cells when it is submitted and
/// runs with them on whichever thread `E` picks.  Scheduling, queueing,
/// rejection and the handles themselves are `E`'s; only what runs changes.
/// A relay fault reaches the task's handle as
/// [`TaskError::Fault`](crate::error::TaskError::Fault).
#[derive(Debug)]
pub struct RelayExecutor<E> {
    inner: E,
}

impl<E> RelayExecutor<E> {
    /// Prefer [`wrap_pool`], which never stacks decorators.
    pub fn new(inner: E) -> Self {
        RelayExecutor { inner }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// The undecorated executor.
    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E> Executor for RelayExecutor<E>
where
    E: Executor,
{
    fn execute<F>(&self, f: F) -> Result<(), RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        let relayed = Relayed::new(f);
        self.inner.execute(move || relayed.call())
    }

    fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let relayed = Relayed::new(f);
        self.inner.submit(move || relayed.call())
    }

    fn schedule<F, R>(&self, delay: Duration, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let relayed = Relayed::new(f);
        self.inner.schedule(delay, move || relayed.call())
    }

    fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        f: F,
    ) -> Result<PeriodicHandle, RejectedError>
    where
        F: FnMut() + Send + 'static,
    {
        let mut relayed = Relayed::new(f);
        self.inner
            .schedule_at_fixed_rate(initial_delay, period, move || relayed.call_mut())
    }

    fn invoke_all<I, F, R>(&self, tasks: I) -> Result<Vec<TaskHandle<R>>, RejectedError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let relayed: Vec<Relayed<F>> = tasks.into_iter().map(Relayed::new).collect();
        self.inner
            .invoke_all(relayed.into_iter().map(|task| move || task.call()))
    }

    fn invoke_any<I, F, R>(&self, tasks: I) -> Result<R, InvokeAnyError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let relayed: Vec<Relayed<F>> = tasks.into_iter().map(Relayed::new).collect();
        self.inner
            .invoke_any(relayed.into_iter().map(|task| move || task.call()))
    }
}

/// Pools that [`wrap_pool`] knows how to decorate.
///
/// An undecorated pool becomes a [`RelayExecutor`]; a [`RelayExecutor`] is
/// returned as is, so wrapping twice never layers decorators.  `Option` maps
/// through: `None` stays `None`.
pub trait RelayPool {
    type Relaying;

    fn into_relaying(self) -> Self::Relaying;
}

/// An executor that does not relay cells by itself.
///
/// Implement it for your own [`Executor`] to make it accepted by
/// [`wrap_pool`].  [`RelayExecutor`] never implements it.
///
/// ```rust
/// use std::time::Duration;
/// use threadrelay::error::RejectedError;
/// use threadrelay::executor::{self, Executor, PeriodicHandle, PlainExecutor, TaskHandle, ThreadPool};
///
/// struct Named(ThreadPool);
///
/// impl Executor for Named {
///     fn execute<F: FnOnce() + Send + 'static>(&self, f: F) -> Result<(), RejectedError> {
///         self.0.execute(f)
///     }
///     fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, RejectedError>
///     where F: FnOnce() -> R + Send + 'static, R: Send + 'static {
///         self.0.submit(f)
///     }
///     fn schedule<F, R>(&self, delay: Duration, f: F) -> Result<TaskHandle<R>, RejectedError>
///     where F: FnOnce() -> R + Send + 'static, R: Send + 'static {
///         self.0.schedule(delay, f)
///     }
///     fn schedule_at_fixed_rate<F>(&self, initial: Duration, period: Duration, f: F)
///         -> Result<PeriodicHandle, RejectedError>
///     where F: FnMut() + Send + 'static {
///         self.0.schedule_at_fixed_rate(initial, period, f)
///     }
/// }
///
/// impl PlainExecutor for Named {}
///
/// let pool = executor::wrap_pool(Named(ThreadPool::new(1).unwrap()));
/// assert_eq!(pool.submit(|| 3).unwrap().join(), Ok(3));
/// ```
pub trait PlainExecutor: Executor {}

impl PlainExecutor for ThreadPool {}

impl<E> PlainExecutor for Arc<E> where E: PlainExecutor {}

impl<E> RelayPool for E
where
    E: PlainExecutor,
{
    type Relaying = RelayExecutor<E>;

    fn into_relaying(self) -> Self::Relaying {
        RelayExecutor::new(self)
    }
}

impl<E> RelayPool for RelayExecutor<E> {
    type Relaying = RelayExecutor<E>;

    fn into_relaying(self) -> Self::Relaying {
        self
    }
}

impl<E> RelayPool for Arc<RelayExecutor<E>> {
    type Relaying = Arc<RelayExecutor<E>>;

    fn into_relaying(self) -> Self::Relaying {
        self
    }
}

impl<P> RelayPool for Option<P>
where
    P: RelayPool,
{
    type Relaying = Option<P::Relaying>;

    fn into_relaying(self) -> Self::Relaying {
        self.map(RelayPool::into_relaying)
    }
}

/// Decorates `pool` so every task it runs carries the submitter's cells.
///
/// ```rust
/// use std::sync::Arc;
/// use threadrelay::executor::{self, ThreadPool};
///
/// let pool = Arc::new(executor::wrap_pool(ThreadPool::new(1).unwrap()));
/// let again = executor::wrap_pool(pool.clone());
/// assert!(Arc::ptr_eq(&pool, &again));
/// ```
pub fn wrap_pool<P>(pool: P) -> P::Relaying
where
    P: RelayPool,
{
    pool.into_relaying()
}
