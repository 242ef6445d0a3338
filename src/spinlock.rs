// SPDX-License-Identifier: MIT OR Apache-2.0
/*!
Reader/writer spinlock guarding the process-wide cell registry.

Registration and enumeration happen on any thread.  Every critical section is a `Vec` push, a scan or a
`retain`, so spinning beats parking.
*/

use std::cell::UnsafeCell;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

const UNLOCKED: u8 = 0;
// up to 254 concurrent readers; 255 marks the single writer
const WRITER: u8 = u8::MAX;

pub(crate) struct Spinlock<T> {
    data: UnsafeCell<T>,
    state: AtomicU8,
}

unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send + Sync> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub(crate) const fn new(data: T) -> Self {
        Spinlock {
            data: UnsafeCell::new(data),
            state: AtomicU8::new(UNLOCKED),
        }
    }

    fn acquire_exclusive(&self) {
        while self
            .state
            .compare_exchange_weak(UNLOCKED, WRITER, Acquire, Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn acquire_shared(&self) {
        while self
            .state
            .fetch_update(Acquire, Relaxed, |readers| {
                (readers < WRITER - 1).then_some(readers + 1)
            })
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Runs `f` with exclusive access.
    pub(crate) fn with_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        self.acquire_exclusive();
        let unlock = Unlock(&self.state);
        // SAFETY: the writer bit excludes every reader and writer
        let result = unsafe { f(&mut *self.data.get()) };
        drop(unlock);
        result
    }

    /// Runs `f` with shared access.
    pub(crate) fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.acquire_shared();
        let unlock = UnlockShared(&self.state);
        // SAFETY: no writer can enter while our reader count is held
        let result = unsafe { f(&*self.data.get()) };
        drop(unlock);
        result
    }
}

// Unlocks on drop, so a panicking closure cannot wedge the registry.
struct Unlock<'a>(&'a AtomicU8);

impl Drop for Unlock<'_> {
    fn drop(&mut self) {
        self.0.store(UNLOCKED, Release);
    }
}

struct UnlockShared<'a>(&'a AtomicU8);

impl Drop for UnlockShared<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Release);
    }
}
