//SPDX-License-Identifier: MIT OR Apache-2.0
/*!
# threadrelay

threadrelay carries thread-scoped values into work that runs on pooled threads.

# The problem

A thread-local is a fine place for a request id, a tenant, a locale or a trace span.  Until the work moves
to a thread pool.  Then two things go wrong:

* The value is *missing*: the worker thread never saw it.
* The value is *stale*: the worker thread saw a value from the last task it ran, and still has it.
  This is "pool bleed", and it is the worse of the two because nothing fails.

Inheriting values when a thread is spawned does not help, because pool workers are spawned once and reused.

# The approach

threadrelay moves values at the moment work is *submitted*, not when a thread is created.  It does this in
three steps, capture, replay and restore:

| Step      | Runs on            | Does                                                                 |
|-----------|--------------------|----------------------------------------------------------------------|
| capture   | submitting thread  | Takes an immutable [`Snapshot`](relay::Snapshot) of every set cell   |
| replay    | worker thread      | Applies the snapshot, clears leftovers, remembers what it displaced |
| restore   | worker thread      | Puts the worker back exactly as it was before the replay             |

Restore always runs, so the next task on the same worker starts clean.  Replays nest with stack discipline,
so a task may run sub-tasks on its own thread.

# The API

Values live in [`RelayCell`](cell::RelayCell)s.  Work is wrapped with [`task::wrap`], or submitted to an
executor decorated with [`executor::wrap_pool`]:

```rust
use threadrelay::cell::RelayCell;
use threadrelay::executor::{self, Executor, ThreadPool};

let tenant = RelayCell::new();
let pool = executor::wrap_pool(ThreadPool::new(1).unwrap());

tenant.set("acme".to_string());
let seen = {
    let tenant = tenant.clone();
    pool.submit(move || tenant.get()).unwrap()
};
assert_eq!(seen.join().unwrap().as_deref(), Some("acme"));

// the worker kept nothing
let after = {
    let tenant = tenant.clone();
    pool.inner().submit(move || tenant.get()).unwrap()
};
assert_eq!(after.join().unwrap(), None);
```

Wrapping is explicit.  Nothing is rewritten behind your back, so a task that does not go through
[`task::wrap`] or a [`RelayExecutor`](executor::RelayExecutor) sees whatever the worker thread has, which for
a worker only ever touched by wrapped tasks is nothing at all.

Futures are covered by [`RelayFuture`](task::RelayFuture), which replays around every poll.

# Errors

Misusing the replay/restore protocol is a [`RelayError`](error::RelayError).  Faults are logged through
[logwise](https://crates.io/crates/logwise) at the point they are detected and then returned.  Panics in
tasks and in [`CellHooks`](cell::CellHooks) stay panics, and always unwind through a restore.

# Logging

threadrelay logs through logwise.  Per-operation detail is at trace level, recoverable oddities such as
panicking pool jobs are warnings, and protocol faults are errors.  Build with the `logwise_internal` feature
for the crate's own debug output.
*/

mod spinlock;
pub mod cell;
pub mod registry;
pub mod relay;
pub mod task;
pub mod executor;
pub mod error;

logwise::declare_logging_domain!();

pub use cell::{CellHooks, RelayCell};
pub use error::{InvokeAnyError, RejectedError, RelayError, TaskError};
pub use executor::{Executor, PlainExecutor, RelayExecutor, ThreadPool, wrap_pool};
pub use relay::{Backup, Snapshot};
pub use task::{Relayed, WrapOptions, wrap};
