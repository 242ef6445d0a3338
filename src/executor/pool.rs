// SPDX-License-Identifier: MIT OR Apache-2.0

//! A plain FIFO thread pool.

use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use wasm_safe_mutex::mpsc;

use super::Executor;
use super::handle::{PeriodicHandle, TaskHandle, panic_message, task_handle};
use super::timer::{self, Entry, Periodic, Timed};
use crate::error::RejectedError;
use crate::task::Job;

static POOL_ID: AtomicUsize = AtomicUsize::new(0);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // user code never runs under the pool's locks
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between a pool, its workers and its timer.
pub(crate) struct Shared {
    jobs: SegQueue<Job>,
    shutdown: AtomicBool,
    /// Guards nothing; idle workers park on `available` under it.
    park: Mutex<()>,
    available: Condvar,
}

impl Shared {
    fn new() -> Shared {
        Shared {
            jobs: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            park: Mutex::new(()),
            available: Condvar::new(),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn enqueue(&self, job: Job) -> Result<(), RejectedError> {
        if self.is_shutdown() {
            return Err(RejectedError::Shutdown);
        }
        self.jobs.push(job);
        // a worker checks the queue under `park` before waiting
        let _park = lock(&self.park);
        self.available.notify_one();
        Ok(())
    }

    /// Next job, or `None` once the pool is shut down and the queue is empty.
    fn next_job(&self) -> Option<Job> {
        loop {
            if let Some(job) = self.jobs.pop() {
                return Some(job);
            }
            let park = lock(&self.park);
            if !self.jobs.is_empty() {
                continue;
            }
            if self.is_shutdown() {
                return None;
            }
            drop(
                self.available
                    .wait(park)
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }

    /// Marks the pool shut down.  False if it already was.
    fn begin_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _park = lock(&self.park);
        self.available.notify_all();
        true
    }

    /// Drops jobs that were pushed while the workers were exiting.  Their
    /// handles report [`Cancelled`](crate::error::TaskError::Cancelled).
    fn discard_stragglers(&self) -> u64 {
        let mut discarded = 0u64;
        while let Some(job) = self.jobs.pop() {
            drop(job);
            discarded += 1;
        }
        discarded
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while let Some(job) = shared.next_job() {
        match catch_unwind(AssertUnwindSafe(|| job.run())) {
            Ok(Ok(())) => {}
            // faults are logged where they are detected
            Ok(Err(_)) => {}
            Err(payload) => {
                let message = panic_message(&*payload);
                logwise::warn_sync!("threadrelay: worker caught a panicking job: {message}",
                    message = message);
            }
        }
    }
}

/// Configures a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolBuilder {
    workers: Option<usize>,
    thread_name: String,
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPoolBuilder {
    pub fn new() -> Self {
        ThreadPoolBuilder {
            workers: None,
            thread_name: "threadrelay-worker".to_string(),
        }
    }

    /// Number of worker threads.  Defaults to the available parallelism; zero
    /// is raised to one.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Prefix of the worker thread names.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn build(self) -> std::io::Result<ThreadPool> {
        let workers = self
            .workers
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1);
        let shared = Arc::new(Shared::new());
        let (sender, receiver) = mpsc::channel();
        let pool = ThreadPool {
            id: POOL_ID.fetch_add(1, Ordering::Relaxed),
            shared: shared.clone(),
            timer: Mutex::new(Some(sender)),
            threads: Mutex::new(Vec::with_capacity(workers + 1)),
            workers,
        };
        // on error the partly built pool is dropped, which shuts it down
        for index in 0..workers {
            let shared = shared.clone();
            let thread = std::thread::Builder::new()
                .name(format!("{}-{index}", self.thread_name))
                .spawn(move || worker_loop(shared))?;
            lock(&pool.threads).push(thread);
        }
        let timer = timer::spawn_timer(format!("{}-timer", self.thread_name), receiver, shared)?;
        lock(&pool.threads).push(timer);

        let pool_id = pool.id as u64;
        let worker_count = workers as u64;
        logwise::debuginternal_sync!("pool {pool} started with {workers} workers",
            pool = pool_id, workers = worker_count);
        Ok(pool)
    }
}

/// A fixed set of worker threads pulling jobs from one FIFO queue, plus a
/// timer thread for delayed and periodic work.
///
/// Workers are ordinary threads: they start with every cell unset and do
/// nothing to the cells on their own.  Wrap the pool with
/// [`wrap_pool`](super::wrap_pool) to carry cells into the jobs it runs.
///
/// ```rust
/// use threadrelay::executor::{Executor, ThreadPool};
///
/// let pool = ThreadPool::new(2).unwrap();
/// let handle = pool.submit(|| 6 * 7).unwrap();
/// assert_eq!(handle.join(), Ok(42));
/// pool.shutdown();
/// assert!(pool.submit(|| ()).is_err());
/// ```
pub struct ThreadPool {
    id: usize,
    shared: Arc<Shared>,
    timer: Mutex<Option<mpsc::Sender<Entry>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl ThreadPool {
    /// A pool of `workers` threads with default settings.
    pub fn new(workers: usize) -> std::io::Result<ThreadPool> {
        ThreadPoolBuilder::new().workers(workers).build()
    }

    pub fn builder() -> ThreadPoolBuilder {
        ThreadPoolBuilder::new()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Queues a prepared [`Job`], wrapped or not.
    pub fn execute_job(&self, job: Job) -> Result<(), RejectedError> {
        self.shared.enqueue(job)
    }

    fn schedule_entry(&self, delay: Duration, timed: Timed) -> Result<(), RejectedError> {
        let entry = Entry {
            deadline: Instant::now() + delay,
            timed,
        };
        match lock(&self.timer).as_ref() {
            Some(sender) => sender
                .send_sync(entry)
                .map_err(|_| RejectedError::Shutdown),
            None => Err(RejectedError::Shutdown),
        }
    }

    /// Stops accepting work, runs what is already queued and joins every
    /// thread.  Delayed work that is not yet due is cancelled.
    ///
    /// Called from one of the pool's own workers, that worker is not joined;
    /// it exits after its current job.  A job accepted concurrently with the
    /// shutdown is either run or discarded, and a discarded job's handle
    /// reports it as cancelled.
    pub fn shutdown(&self) {
        if !self.shared.begin_shutdown() {
            return;
        }
        drop(lock(&self.timer).take());

        let threads = std::mem::take(&mut *lock(&self.threads));
        let current = std::thread::current().id();
        for thread in threads {
            if thread.thread().id() == current {
                continue;
            }
            if thread.join().is_err() {
                logwise::warn_sync!("threadrelay: pool thread exited by panic");
            }
        }
        let discarded = self.shared.discard_stragglers();
        if discarded > 0 {
            logwise::debuginternal_sync!("discarded {discarded} jobs queued during shutdown",
                discarded = discarded);
        }
        let pool_id = self.id as u64;
        logwise::debuginternal_sync!("pool {pool} shut down", pool = pool_id);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.id)
            .field("workers", &self.workers)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Executor for ThreadPool {
    fn execute<F>(&self, f: F) -> Result<(), RejectedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Job::new(f))
    }

    fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (handle, completer) = task_handle();
        self.shared
            .enqueue(Job::new(move || completer.run(f)))?;
        Ok(handle)
    }

    fn schedule<F, R>(&self, delay: Duration, f: F) -> Result<TaskHandle<R>, RejectedError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (handle, completer) = task_handle();
        let job = Job::new(move || completer.run(f));
        self.schedule_entry(delay, Timed::Once(job))?;
        Ok(handle)
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
        if period.is_zero() {
            return Err(RejectedError::ZeroPeriod);
        }
        let handle = PeriodicHandle::new();
        let periodic = Arc::new(Periodic::new(period, Box::new(f), handle.clone()));
        self.schedule_entry(initial_delay, Timed::Periodic(periodic))?;
        Ok(handle)
    }
}
