// SPDX-License-Identifier: MIT OR Apache-2.0

//! Submission surface of a wrapped pool.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use threadrelay::cell::RelayCell;
use threadrelay::error::{InvokeAnyError, RejectedError, TaskError};
use threadrelay::executor::{
    self, Executor, PeriodicHandle, PlainExecutor, RelayExecutor, TaskHandle, ThreadPool,
};
use threadrelay::relay;

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn fail() -> u8 {
    panic!("fails")
}

fn one() -> u8 {
    1
}

#[test]
fn execute_carries_cells() {
    let c = RelayCell::new();
    c.set(8u16);
    let pool = executor::wrap_pool(ThreadPool::new(2).unwrap());
    let seen = Arc::new(Mutex::new(None));
    {
        let (c, seen) = (c.clone(), seen.clone());
        pool.execute(move || *seen.lock().unwrap() = c.get()).unwrap();
    }
    assert!(wait_until(|| seen.lock().unwrap().is_some()));
    assert_eq!(*seen.lock().unwrap(), Some(8));
}

#[test]
fn invoke_all_keeps_order() {
    let c = RelayCell::new();
    c.set(100u32);
    let pool = executor::wrap_pool(ThreadPool::new(3).unwrap());
    let tasks: Vec<_> = (0..20u32)
        .map(|i| {
            let c = c.clone();
            move || {
                // later tasks finish first
                std::thread::sleep(Duration::from_millis(u64::from(20 - i)));
                c.get().map(|v| v + i)
            }
        })
        .collect();
    let handles = pool.invoke_all(tasks).unwrap();
    assert_eq!(handles.len(), 20);
    assert!(handles.iter().all(|h| h.is_done()));
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), Some(100 + i as u32));
    }
}

#[test]
fn invoke_any_returns_a_success() {
    let c = RelayCell::new();
    c.set("ctx".to_string());
    let pool = executor::wrap_pool(ThreadPool::new(2).unwrap());
    let tasks: Vec<Box<dyn FnOnce() -> Option<String> + Send>> = vec![
        Box::new(|| -> Option<String> { panic!("first fails") }),
        {
            let c = c.clone();
            Box::new(move || c.get())
        },
    ];
    let out = pool.invoke_any(tasks).unwrap();
    assert_eq!(out.as_deref(), Some("ctx"));
}

#[test]
fn invoke_any_failures() {
    let pool = executor::wrap_pool(ThreadPool::new(2).unwrap());
    let none: Vec<fn() -> u8> = Vec::new();
    assert_eq!(pool.invoke_any(none), Err(InvokeAnyError::Empty));

    let failing: Vec<fn() -> u8> = vec![fail as fn() -> u8, fail];
    assert_eq!(
        pool.invoke_any(failing),
        Err(InvokeAnyError::AllFailed { failures: 2 })
    );
}

#[test]
fn schedule_waits_and_carries_cells() {
    let c = RelayCell::new();
    c.set(3u8);
    let pool = executor::wrap_pool(ThreadPool::new(1).unwrap());
    let start = Instant::now();
    let handle = {
        let c = c.clone();
        pool.schedule(Duration::from_millis(30), move || (c.get(), start.elapsed()))
            .unwrap()
    };
    let (seen, elapsed) = handle.join().unwrap();
    assert_eq!(seen, Some(3));
    assert!(elapsed >= Duration::from_millis(30));
}

#[test]
fn periodic_runs_until_cancelled() {
    let c = RelayCell::new();
    c.set(1u32);
    let pool = executor::wrap_pool(ThreadPool::new(2).unwrap());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let periodic = {
        let (c, observed) = (c.clone(), observed.clone());
        pool.schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), move || {
            let seen = c.get();
            // a write inside one run must not reach the next
            c.set(999);
            observed.lock().unwrap().push(seen);
        })
        .unwrap()
    };
    assert!(wait_until(|| periodic.run_count() >= 3));
    periodic.cancel();
    assert!(periodic.is_cancelled());
    let runs = observed.lock().unwrap().clone();
    assert!(runs.len() >= 3);
    assert!(runs.iter().all(|seen| *seen == Some(1)));
}

#[test]
fn periodic_stops_after_panic() {
    let pool = ThreadPool::new(1).unwrap();
    let count = Arc::new(AtomicU32::new(0));
    let periodic = {
        let count = count.clone();
        pool.schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(2), move || {
            if count.fetch_add(1, Ordering::SeqCst) == 2 {
                panic!("third run fails");
            }
        })
        .unwrap()
    };
    assert!(wait_until(|| periodic.is_cancelled()));
    assert_eq!(periodic.run_count(), 2);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn slow_periodic_task_leaves_room_for_other_work() {
    let pool = ThreadPool::new(2).unwrap();
    let start = Instant::now();
    let periodic = pool
        .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(1), || {
            std::thread::sleep(Duration::from_millis(20))
        })
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));
    let plain = pool.submit(|| 1u8).unwrap();
    assert!(plain.wait_timeout(Duration::from_secs(2)));
    assert_eq!(plain.join(), Ok(1));
    periodic.cancel();
    // runs never overlap, so each one costs its full 20ms
    let runs = u128::from(periodic.run_count());
    assert!(runs >= 1);
    assert!(runs <= start.elapsed().as_millis() / 20);
}

#[test]
fn zero_period_is_refused() {
    let pool = executor::wrap_pool(ThreadPool::new(1).unwrap());
    assert!(matches!(
        pool.schedule_at_fixed_rate(Duration::ZERO, Duration::ZERO, || ()),
        Err(RejectedError::ZeroPeriod)
    ));
    assert!(matches!(
        pool.inner()
            .schedule_at_fixed_rate(Duration::ZERO, Duration::ZERO, || ()),
        Err(RejectedError::ZeroPeriod)
    ));
}

#[test]
fn cancel_before_start() {
    let pool = executor::wrap_pool(ThreadPool::new(1).unwrap());
    let gate = Arc::new(Barrier::new(2));
    let blocker = {
        let gate = gate.clone();
        pool.submit(move || {
            gate.wait();
        })
        .unwrap()
    };
    let ran = Arc::new(AtomicU32::new(0));
    let queued = {
        let ran = ran.clone();
        pool.submit(move || ran.fetch_add(1, Ordering::SeqCst)).unwrap()
    };
    assert!(queued.cancel());
    assert!(queued.is_cancelled());
    gate.wait();
    blocker.join().unwrap();
    pool.inner().shutdown();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(queued.join(), Err(TaskError::Cancelled));
}

#[test]
fn running_task_cannot_be_cancelled() {
    let pool = executor::wrap_pool(ThreadPool::new(1).unwrap());
    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let handle = {
        let (started, release) = (started.clone(), release.clone());
        pool.submit(move || {
            started.wait();
            release.wait();
            7u8
        })
        .unwrap()
    };
    started.wait();
    assert!(!handle.cancel());
    assert!(!handle.wait_timeout(Duration::from_millis(10)));
    release.wait();
    assert_eq!(handle.join(), Ok(7));
}

#[test]
fn panics_reach_the_handle() {
    let pool = executor::wrap_pool(ThreadPool::new(1).unwrap());
    let handle = pool.submit(|| -> u8 { panic!("inside") }).unwrap();
    assert_eq!(
        handle.join(),
        Err(TaskError::Panicked("inside".to_string()))
    );
}

#[test]
fn shutdown_rejects_every_kind_of_submission() {
    let pool = executor::wrap_pool(ThreadPool::new(1).unwrap());
    pool.inner().shutdown();
    assert_eq!(pool.execute(|| ()), Err(RejectedError::Shutdown));
    assert!(matches!(pool.submit(|| ()), Err(RejectedError::Shutdown)));
    assert!(matches!(
        pool.schedule(Duration::ZERO, || ()),
        Err(RejectedError::Shutdown)
    ));
    assert!(matches!(
        pool.schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(1), || ()),
        Err(RejectedError::Shutdown)
    ));
    let tasks: Vec<fn() -> u8> = vec![one as fn() -> u8];
    assert!(matches!(pool.invoke_all(tasks), Err(RejectedError::Shutdown)));
    let tasks: Vec<fn() -> u8> = vec![one as fn() -> u8];
    assert_eq!(
        pool.invoke_any(tasks),
        Err(InvokeAnyError::Rejected(RejectedError::Shutdown))
    );
}

#[test]
fn shared_pool_behind_arc() {
    let pool = Arc::new(executor::wrap_pool(ThreadPool::new(2).unwrap()));
    let c = RelayCell::new();
    c.set('z');
    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let c = c.clone();
            threadrelay::cell::spawn(move || {
                let c2 = c.clone();
                pool.submit(move || c2.get()).unwrap().join().unwrap()
            })
        })
        .collect();
    for submitter in submitters {
        assert_eq!(submitter.join().unwrap(), Some('z'));
    }
}

/// An executor from outside the crate that counts what it is given.
struct Counting {
    pool: ThreadPool,
    submitted: AtomicU32,
}

impl Counting {
    fn new() -> Counting {
        Counting {
            pool: ThreadPool::new(1).unwrap(),
            submitted: AtomicU32::new(0),
        }
    }
}

impl Executor for Counting {
    fn execute<F>(&self, f: F) -> Result<(), RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.pool.execute(f)
    }

    fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.pool.submit(f)
    }

    fn schedule<F, R>(&self, delay: Duration, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.pool.schedule(delay, f)
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
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.pool.schedule_at_fixed_rate(initial_delay, period, f)
    }
}

impl PlainExecutor for Counting {}

#[test]
fn custom_executor_is_wrapped_once() {
    let c = RelayCell::new();
    c.set(5u8);
    let pool = executor::wrap_pool(Counting::new());
    let pool: RelayExecutor<Counting> = executor::wrap_pool(pool);
    let handle = {
        let c = c.clone();
        pool.submit(move || (c.get(), relay::depth())).unwrap()
    };
    // a single decorator replays exactly one frame
    assert_eq!(handle.join(), Ok((Some(5), 1)));
    assert_eq!(pool.inner().submitted.load(Ordering::SeqCst), 1);
}

#[test]
fn shared_custom_executor_keeps_its_identity() {
    let pool = Arc::new(executor::wrap_pool(Arc::new(Counting::new())));
    let again = executor::wrap_pool(pool.clone());
    assert!(Arc::ptr_eq(&pool, &again));
    let none: Option<Counting> = None;
    assert!(executor::wrap_pool(none).is_none());
}
