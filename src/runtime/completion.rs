//! One-shot delivery primitives.
//!
//! - [`Completion`]: a callback that fires at most once, whichever of several
//!   racing parties claims it first
//! - [`Latch`]: a blocking slot a thread can wait on, with an optional bound
//! - [`Promise`]: a memoized result fanned out to any number of listeners

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

type Callback<T> = Box<dyn FnOnce(T) + Send>;

/// A callback guarded so that it runs at most once.
///
/// Several producers may race to [`complete`](Self::complete) it; exactly
/// one wins and the rest observe `false`.
pub struct Completion<T> {
    delivered: AtomicBool,
    callback: Mutex<Option<Callback<T>>>,
}

impl<T> Completion<T> {
    /// Wraps `callback`.
    pub fn new(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            delivered: AtomicBool::new(false),
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// Delivers `value` if nobody has yet. Returns `true` for the winner.
    pub fn complete(&self, value: T) -> bool {
        if self
            .delivered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(value);
        }
        true
    }

    /// Returns true once some producer has claimed the completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("delivered", &self.is_completed())
            .finish()
    }
}

/// A single-value slot a thread can block on.
pub(crate) struct Latch<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Latch<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Stores `value` unless a value is already present.
    pub(crate) fn set(&self, value: T) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
            self.ready.notify_all();
        }
    }

    pub(crate) fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Waits at most `timeout`; `None` if nothing arrived in time.
    pub(crate) fn wait_for(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return Some(value);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        return slot.take();
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
    }
}

enum PromiseState<T> {
    Pending(Vec<Callback<T>>),
    Done(T),
}

/// A write-once value shared by many listeners.
pub(crate) struct Promise<T> {
    state: Mutex<PromiseState<T>>,
}

impl<T: Clone> Promise<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PromiseState::Pending(Vec::new())),
        }
    }

    /// Stores the value and notifies listeners. Later calls are ignored.
    pub(crate) fn fulfil(&self, value: T) {
        let waiters = {
            let mut state = self.state.lock();
            match &mut *state {
                PromiseState::Done(_) => return,
                PromiseState::Pending(waiters) => {
                    let waiters = std::mem::take(waiters);
                    *state = PromiseState::Done(value.clone());
                    waiters
                }
            }
        };
        for waiter in waiters {
            waiter(value.clone());
        }
    }

    /// Runs `callback` with the value, now if available or on fulfilment.
    pub(crate) fn listen(&self, callback: impl FnOnce(T) + Send + 'static) {
        let ready = {
            let mut state = self.state.lock();
            match &mut *state {
                PromiseState::Pending(waiters) => {
                    waiters.push(Box::new(callback));
                    return;
                }
                PromiseState::Done(value) => value.clone(),
            }
        };
        callback(ready);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn completion_fires_exactly_once_under_contention() {
        init_test_logging();
        crate::test_phase!("completion_fires_exactly_once_under_contention");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let completion = Arc::new(Completion::new(move |_: usize| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let winners: usize = (0..8)
            .map(|n| {
                let completion = Arc::clone(&completion);
                thread::spawn(move || usize::from(completion.complete(n)))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .sum();
        assert_eq!(winners, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(completion.is_completed());
        crate::test_complete!("completion_fires_exactly_once_under_contention");
    }

    #[test]
    fn latch_wait_for_times_out_then_receives() {
        init_test_logging();
        let latch = Arc::new(Latch::new());
        assert_eq!(latch.wait_for(Duration::from_millis(10)), None::<u8>);
        let setter = Arc::clone(&latch);
        let handle = thread::spawn(move || setter.set(9));
        assert_eq!(latch.wait(), 9);
        handle.join().expect("thread");
    }

    #[test]
    fn latch_keeps_first_value() {
        let latch = Latch::new();
        latch.set(1);
        latch.set(2);
        assert_eq!(latch.wait_for(Duration::ZERO), Some(1));
    }

    #[test]
    fn promise_serves_early_and_late_listeners() {
        init_test_logging();
        let promise = Promise::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let early = Arc::clone(&seen);
        promise.listen(move |v: u32| early.lock().push(("early", v)));
        promise.fulfil(5);
        promise.fulfil(6);
        let late = Arc::clone(&seen);
        promise.listen(move |v| late.lock().push(("late", v)));
        assert_eq!(*seen.lock(), vec![("early", 5), ("late", 5)]);
    }
}
