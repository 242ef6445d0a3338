// SPDX-License-Identifier: MIT OR Apache-2.0

//! Type-erased jobs.

use std::fmt::Debug;

use super::{Relayed, WrapOptions};
use crate::error::RelayError;
use crate::relay::fault;

type BoxedJob = Box<dyn FnOnce() + Send + 'static>;

enum JobKind {
    Plain(BoxedJob),
    Relayed(Relayed<BoxedJob>),
}

/// A boxed unit of work that knows whether it has been wrapped.
///
/// Queues of heterogeneous work cannot name a [`Relayed`] type, so a `Job`
/// records the wrapping at runtime instead.  [`wrap_job`] and [`unwrap_job`]
/// are the type-erased counterparts of [`wrap`](super::wrap) and
/// [`unwrap`](super::unwrap).
pub struct Job {
    kind: JobKind,
}

impl Job {
    pub fn new<F>(f: F) -> Job
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            kind: JobKind::Plain(Box::new(f)),
        }
    }

    pub fn is_relayed(&self) -> bool {
        matches!(self.kind, JobKind::Relayed(_))
    }

    /// Runs the job on the calling thread.  Only a relayed job can fail.
    pub fn run(self) -> Result<(), RelayError> {
        match self.kind {
            JobKind::Plain(f) => {
                f();
                Ok(())
            }
            JobKind::Relayed(relayed) => relayed.run(),
        }
    }
}

impl Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            JobKind::Plain(_) => f.write_str("Job::Plain"),
            JobKind::Relayed(relayed) => f.debug_tuple("Job::Relayed").field(relayed).finish(),
        }
    }
}

/// Binds the calling thread's cells to `job`.
///
/// A job that is already relayed comes back unchanged in idempotent mode and
/// is refused with [`RelayError::AlreadyWrapped`] otherwise.
pub fn wrap_job(job: Job, options: WrapOptions) -> Result<Job, RelayError> {
    match job.kind {
        JobKind::Plain(f) => Ok(Job {
            kind: JobKind::Relayed(Relayed::with_options(f, options)),
        }),
        JobKind::Relayed(relayed) if options.is_idempotent() => Ok(Job {
            kind: JobKind::Relayed(relayed),
        }),
        JobKind::Relayed(_) => Err(fault(RelayError::AlreadyWrapped)),
    }
}

/// Strips the wrapping from `job`.  A plain job is returned as is.
pub fn unwrap_job(job: Job) -> Job {
    match job.kind {
        JobKind::Plain(f) => Job {
            kind: JobKind::Plain(f),
        },
        JobKind::Relayed(relayed) => Job {
            kind: JobKind::Plain(relayed.into_inner()),
        },
    }
}
