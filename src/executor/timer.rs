// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delayed and periodic work for [`ThreadPool`](super::ThreadPool).
//!
//! One timer thread per pool keeps the pending entries and hands each one to
//! the pool's queue when its deadline passes.  The pool talks to it over a
//! channel; dropping the sender stops the thread, and entries that were not
//! yet due are dropped with it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use wasm_safe_mutex::mpsc;

use super::handle::{PeriodicHandle, panic_message};
use super::pool::Shared;
use crate::task::Job;

/// Longest the timer sleeps without checking for disconnection.
const IDLE_WAKEUP: Duration = Duration::from_millis(250);

pub(crate) enum Timed {
    Once(Job),
    Periodic(Arc<Periodic>),
}

pub(crate) struct Entry {
    pub(crate) deadline: Instant,
    pub(crate) timed: Timed,
}

/// A task scheduled at a fixed rate.
pub(crate) struct Periodic {
    period: Duration,
    task: Mutex<Box<dyn FnMut() + Send + 'static>>,
    handle: PeriodicHandle,
    /// Set from enqueue until the run finishes.
    in_flight: AtomicBool,
}

impl Periodic {
    pub(crate) fn new(
        period: Duration,
        task: Box<dyn FnMut() + Send + 'static>,
        handle: PeriodicHandle,
    ) -> Periodic {
        Periodic {
            period,
            task: Mutex::new(task),
            handle,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Claims the next run.  False while the previous one is queued or
    /// running, in which case the tick is skipped.
    fn begin_run(&self) -> bool {
        !self.in_flight.swap(true, Ordering::AcqRel)
    }

    /// One run on a worker.  A run that panics cancels the schedule.
    fn run_once(&self) {
        if !self.handle.is_cancelled() {
            let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            match catch_unwind(AssertUnwindSafe(|| (*task)())) {
                Ok(()) => self.handle.record_run(),
                Err(payload) => {
                    self.handle.cancel();
                    let message = panic_message(&*payload);
                    let runs = self.handle.run_count();
                    logwise::warn_sync!(
                        "threadrelay: periodic task panicked after {runs} runs and will not run again: {message}",
                        runs = runs,
                        message = message
                    );
                }
            }
        }
        self.in_flight.store(false, Ordering::Release);
    }
}

/// First tick strictly after `now` on the grid `last + k * period`.  Ticks
/// missed while a run was in flight or the timer was late are skipped.
/// `None` when the next tick is beyond what `Instant` can hold.
fn next_tick(last: Instant, period: Duration, now: Instant) -> Option<Instant> {
    let next = last.checked_add(period)?;
    if next > now {
        return Some(next);
    }
    let behind = now.duration_since(last).as_nanos();
    let ticks = behind / period.as_nanos().max(1) + 1;
    let ticks = u32::try_from(ticks).ok()?;
    last.checked_add(period.checked_mul(ticks)?)
}

pub(crate) fn spawn_timer(
    name: String,
    receiver: mpsc::Receiver<Entry>,
    shared: Arc<Shared>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || timer_loop(receiver, shared))
}

fn timer_loop(receiver: mpsc::Receiver<Entry>, shared: Arc<Shared>) {
    let mut pending: HashMap<u64, Entry> = HashMap::new();
    let mut next_id = 0u64;
    loop {
        let now = Instant::now();
        let idle = now + IDLE_WAKEUP;
        let next_deadline = pending
            .values()
            .map(|entry| entry.deadline)
            .min()
            .map_or(idle, |deadline| deadline.min(idle));

        match receiver.recv_sync_timeout(next_deadline) {
            Ok(entry) => {
                pending.insert(next_id, entry);
                next_id += 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => { /* fall through to deadline check */ }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let due: Vec<u64> = pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            let Some(entry) = pending.remove(&id) else {
                continue;
            };
            match entry.timed {
                Timed::Once(job) => {
                    // a rejected job is dropped, which cancels its handle
                    let _ = shared.enqueue(job);
                }
                Timed::Periodic(periodic) => {
                    if periodic.handle.is_cancelled() {
                        continue;
                    }
                    if periodic.begin_run() {
                        let run = periodic.clone();
                        if shared.enqueue(Job::new(move || run.run_once())).is_err() {
                            continue;
                        }
                    }
                    let Some(deadline) = next_tick(entry.deadline, periodic.period, now) else {
                        continue;
                    };
                    pending.insert(
                        id,
                        Entry {
                            deadline,
                            timed: Timed::Periodic(periodic),
                        },
                    );
                }
            }
        }
    }
    let dropped = pending.len() as u64;
    logwise::debuginternal_sync!("timer stopped, dropping {dropped} pending entries", dropped = dropped);
}
