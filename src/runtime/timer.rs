//! Timer heap and timer thread for scheduled delays.
//!
//! This module provides a small min-heap of `(deadline, payload)` pairs and a
//! single timer thread that fires jobs once their deadline passes. Jobs run on
//! the timer thread itself, so callers hand real work off to the worker pool.
//!
//! Cancelling a [`TimerHandle`] drops its job immediately. The emptied heap
//! entry is discarded once cancelled entries outnumber live ones.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::tracing_compat::trace;

/// Cancelled entries tolerated before the heap is compacted.
const PURGE_THRESHOLD: usize = 64;

struct TimerEntry<T> {
    deadline: Instant,
    generation: u64,
    payload: T,
}

impl<T> Ord for TimerEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl<T> Eq for TimerEntry<T> {}

/// A min-heap of timers ordered by deadline, then by insertion order.
pub struct TimerHeap<T> {
    heap: BinaryHeap<TimerEntry<T>>,
    next_generation: u64,
}

impl<T> Default for TimerHeap<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_generation: 0,
        }
    }
}

impl<T> fmt::Debug for TimerHeap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHeap")
            .field("len", &self.heap.len())
            .field("next_deadline", &self.peek_deadline())
            .finish()
    }
}

impl<T> TimerHeap<T> {
    /// Creates a new empty timer heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of timers in the heap.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if the heap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a timer with the given deadline.
    pub fn insert(&mut self, payload: T, deadline: Instant) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
            payload,
        });
    }

    /// Returns the earliest deadline, if any.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops all payloads whose deadline is `<= now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<T> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push(entry.payload);
            }
        }
        expired
    }

    /// Keeps only the timers whose payload satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.heap.retain(|entry| keep(&entry.payload));
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Slot shared by a heap entry and its handle. Empty once fired or cancelled.
type JobSlot = Arc<Mutex<Option<Job>>>;

/// Handle to a scheduled job; cancelling it drops the job.
#[derive(Clone)]
pub struct TimerHandle {
    slot: JobSlot,
    shared: Weak<TimerShared>,
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl TimerHandle {
    /// Cancels the job if it has not fired yet.
    ///
    /// Returns `true` if this call removed the job.
    pub fn cancel(&self) -> bool {
        let job = self.slot.lock().take();
        let Some(job) = job else {
            return false;
        };
        drop(job);
        if let Some(shared) = self.shared.upgrade() {
            shared.note_cancelled();
        }
        true
    }

    /// Returns true while the job has neither fired nor been cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

struct TimerState {
    heap: TimerHeap<JobSlot>,
    cancelled: usize,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

impl TimerShared {
    fn note_cancelled(&self) {
        let mut state = self.state.lock();
        state.cancelled += 1;
        if state.cancelled >= PURGE_THRESHOLD && state.cancelled * 2 >= state.heap.len() {
            let _before = state.heap.len();
            state.heap.retain(|slot| slot.lock().is_some());
            state.cancelled = 0;
            trace!(
                removed = _before - state.heap.len(),
                remaining = state.heap.len(),
                "timer heap compacted"
            );
        }
    }
}

/// A dedicated thread firing jobs at their deadlines.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Timer")
            .field("pending", &state.heap.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl Timer {
    /// Starts the timer thread.
    pub fn start(thread_name: String) -> std::io::Result<Self> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: TimerHeap::new(),
                cancelled: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || timer_loop(&worker))?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Schedules `job` to run on the timer thread after `delay`.
    pub fn schedule(&self, delay: Duration, job: impl FnOnce() + Send + 'static) -> TimerHandle {
        let slot: JobSlot = Arc::new(Mutex::new(Some(Box::new(job))));
        let deadline = Instant::now() + delay;
        self.shared.state.lock().heap.insert(Arc::clone(&slot), deadline);
        self.shared.condvar.notify_one();
        TimerHandle {
            slot,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Returns the number of heap entries, counting cancelled ones that have
    /// not been compacted away yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stops the timer thread. Jobs that have not fired are dropped.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.cancelled = 0;
            std::mem::take(&mut state.heap)
        };
        drop(dropped);
        self.shared.condvar.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            // The last runtime reference can be released by a job on this very thread.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &TimerShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let due = state.heap.pop_expired(Instant::now());
        if !due.is_empty() {
            drop(state);
            for slot in due {
                let job = slot.lock().take();
                if let Some(job) = job {
                    trace!("timer fired");
                    job();
                }
            }
            state = shared.state.lock();
            continue;
        }
        match state.heap.peek_deadline() {
            Some(deadline) => {
                let _ = shared.condvar.wait_until(&mut state, deadline);
            }
            None => shared.condvar.wait(&mut state),
        }
    }
}
