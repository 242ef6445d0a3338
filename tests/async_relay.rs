// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cells carried into futures.

use threadrelay::cell::RelayCell;
use threadrelay::relay;
use threadrelay::task::{RelayFuture, relay_future};
use test_executors::async_test;

async fn read(cell: RelayCell<String>) -> Option<String> {
    cell.get()
}

#[async_test]
async fn future_sees_cells_from_construction() {
    let cell = RelayCell::new();
    cell.set("outer".to_string());
    let future = relay_future(read(cell.clone()));
    cell.set("changed".to_string());
    assert_eq!(future.await.as_deref(), Some("outer"));
    assert_eq!(cell.get().as_deref(), Some("changed"));
}

#[async_test]
async fn nested_relay_futures() {
    let cell = RelayCell::new();
    cell.set(1u32);
    let outer = {
        let cell = cell.clone();
        RelayFuture::new(async move {
            cell.set(2);
            let inner = {
                let cell = cell.clone();
                RelayFuture::new(async move { (cell.get(), relay::depth()) })
            };
            cell.set(3);
            let (inner_seen, inner_depth) = inner.await;
            (inner_seen, inner_depth, cell.get())
        })
    };
    let (inner_seen, inner_depth, outer_after) = outer.await;
    assert_eq!(inner_seen, Some(2));
    assert_eq!(inner_depth, 2);
    assert_eq!(outer_after, Some(3));
    assert_eq!(cell.get(), Some(1));
    assert_eq!(relay::depth(), 0);
}

#[async_test]
async fn future_sent_to_another_thread() {
    let cell = RelayCell::new();
    cell.set("submitter".to_string());
    let future = relay_future(read(cell.clone()));
    let seen = std::thread::spawn(move || test_executors::spin_on(future))
        .join()
        .unwrap();
    assert_eq!(seen.as_deref(), Some("submitter"));
}
