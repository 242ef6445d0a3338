// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end propagation through a wrapped pool.

use std::sync::Arc;
use std::time::Duration;

use threadrelay::cell::RelayCell;
use threadrelay::executor::{self, Executor, ThreadPool};
use threadrelay::relay;
use threadrelay::task::{self, WrapOptions};

fn single_worker() -> threadrelay::RelayExecutor<ThreadPool> {
    executor::wrap_pool(ThreadPool::new(1).unwrap())
}

#[test]
fn no_outward_leakage() {
    let a = RelayCell::new();
    let b = RelayCell::new();
    a.set(1u32);
    b.set("b".to_string());
    let pool = single_worker();
    let handle = {
        let (a, b) = (a.clone(), b.clone());
        pool.submit(move || {
            a.set(2);
            b.remove();
            let c = RelayCell::new();
            c.set(3u8);
        })
        .unwrap()
    };
    handle.join().unwrap();
    assert_eq!(a.get(), Some(1));
    assert_eq!(b.get().as_deref(), Some("b"));
}

#[test]
fn pool_reuse_isolation() {
    let c = RelayCell::new();
    let pool = single_worker();

    let t1 = {
        let c = c.clone();
        pool.submit(move || c.set("x".to_string())).unwrap()
    };
    t1.join().unwrap();

    // t2 is submitted from a thread where c is unset, and never touches it
    let t2 = {
        let c = c.clone();
        pool.submit(move || c.get()).unwrap()
    };
    assert_eq!(t2.join().unwrap(), None);

    c.set("own".to_string());
    let t3 = {
        let c = c.clone();
        pool.submit(move || c.get()).unwrap()
    };
    assert_eq!(t3.join().unwrap().as_deref(), Some("own"));
}

#[test]
fn plain_work_after_wrapped_work_sees_nothing() {
    let c = RelayCell::new();
    c.set("0".to_string());
    let pool = single_worker();
    let t1 = {
        let c = c.clone();
        pool.submit(move || c.set("1".to_string())).unwrap()
    };
    t1.join().unwrap();

    let plain = {
        let c = c.clone();
        pool.inner().submit(move || (c.is_set(), c.get())).unwrap()
    };
    assert_eq!(plain.join().unwrap(), (false, None));
}

#[test]
fn parent_child_scenario() {
    let p = RelayCell::new();
    p.set("parent".to_string());
    let pool = single_worker();

    let handle = {
        let p = p.clone();
        pool.submit(move || {
            let observed_p = p.get();
            p.set("parent-1".to_string());
            let q = RelayCell::new();
            q.set("child".to_string());
            let observed_q = q.get();
            (observed_p, observed_q, q)
        })
        .unwrap()
    };
    let (observed_p, observed_q, q) = handle.join().unwrap();
    assert_eq!(observed_p.as_deref(), Some("parent"));
    assert_eq!(observed_q.as_deref(), Some("child"));
    assert_eq!(p.get().as_deref(), Some("parent"));
    assert_eq!(q.get(), None);

    // nor is Q left behind on the worker
    let on_worker = pool.inner().submit(move || q.is_set()).unwrap();
    assert_eq!(on_worker.join(), Ok(false));
}

#[test]
fn capture_reflects_submission_time() {
    let c = RelayCell::new();
    let pool = single_worker();
    let gate = Arc::new(std::sync::Barrier::new(2));
    let blocker = {
        let gate = gate.clone();
        pool.submit(move || {
            gate.wait();
        })
        .unwrap()
    };
    c.set(1u32);
    let queued = {
        let c = c.clone();
        pool.submit(move || c.get()).unwrap()
    };
    c.set(2);
    gate.wait();
    blocker.join().unwrap();
    assert_eq!(queued.join().unwrap(), Some(1));
}

#[test]
fn unwrap_identity() {
    let marker = Arc::new(());
    let original = {
        let marker = marker.clone();
        move || Arc::strong_count(&marker)
    };
    let wrapped = task::wrap(original, WrapOptions::default()).unwrap();
    let unwrapped = task::unwrap(wrapped);
    assert_eq!(unwrapped(), 2);

    let plain = task::Job::new(|| ());
    assert!(!task::unwrap_job(plain).is_relayed());
}

#[test]
fn idempotent_rewrap_captures_once() {
    let c = RelayCell::new();
    c.set(1u8);
    let first = {
        let c = c.clone();
        task::wrap(move || c.get(), WrapOptions::default().idempotent(true)).unwrap()
    };
    let capture = first.snapshot().unwrap().capture_id();
    c.set(2);
    let second = task::wrap(first, WrapOptions::default().idempotent(true)).unwrap();
    assert_eq!(second.snapshot().unwrap().capture_id(), capture);
    assert_eq!(second.run().unwrap(), Some(1));

    let third = task::wrap(|| (), WrapOptions::default()).unwrap();
    assert_eq!(
        task::wrap(third, WrapOptions::default()).unwrap_err(),
        threadrelay::RelayError::AlreadyWrapped
    );
}

#[test]
fn forked_subtasks_on_one_worker() {
    let left_cell = RelayCell::new();
    let right_cell = RelayCell::new();
    let pool = single_worker();
    left_cell.set(0u32);
    right_cell.set(0u32);

    let handle = {
        let (l, r) = (left_cell.clone(), right_cell.clone());
        pool.submit(move || {
            l.set(10);
            r.set(20);
            let (left_view, right_view) = task::join(
                || {
                    l.set(11);
                    (l.get(), r.get())
                },
                || {
                    r.set(21);
                    (l.get(), r.get())
                },
            )
            .unwrap();
            (left_view, right_view, l.get(), r.get(), relay::depth())
        })
        .unwrap()
    };
    let (left_view, right_view, l_after, r_after, depth) = handle.join().unwrap();
    assert_eq!(left_view, (Some(11), Some(20)));
    assert_eq!(right_view, (Some(10), Some(21)));
    assert_eq!((l_after, r_after), (Some(10), Some(20)));
    // only the task's own replay is active once both sub-tasks are done
    assert_eq!(depth, 1);
    assert_eq!(left_cell.get(), Some(0));
}

#[test]
fn copy_for_spawn_does_not_reach_pool_workers() {
    let c = RelayCell::new();
    c.set(5u8);
    let pool = ThreadPool::new(1).unwrap();
    let seen = {
        let c = c.clone();
        pool.submit(move || c.get()).unwrap()
    };
    assert_eq!(seen.join().unwrap(), None);

    let spawned = {
        let c = c.clone();
        threadrelay::cell::spawn(move || c.get())
    };
    assert_eq!(spawned.join().unwrap(), Some(5));
}

#[test]
fn many_tasks_many_workers() {
    let c = RelayCell::new();
    let pool = executor::wrap_pool(ThreadPool::new(4).unwrap());
    let handles: Vec<_> = (0..200u32)
        .map(|i| {
            c.set(i);
            let c = c.clone();
            pool.submit(move || {
                let seen = c.get();
                c.set(u32::MAX);
                seen
            })
            .unwrap()
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), Some(i as u32));
    }
    let leftovers: Vec<_> = (0..8)
        .map(|_| {
            let c = c.clone();
            pool.inner().submit(move || c.is_set()).unwrap()
        })
        .collect();
    for handle in leftovers {
        assert!(handle.wait_timeout(Duration::from_secs(10)));
        assert_eq!(handle.join(), Ok(false));
    }
}
