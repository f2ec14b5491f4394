//! Worker pool that forked evaluations run on.
//!
//! The pool manages a set of OS threads pulling jobs from a shared lock-free
//! queue. It supports:
//!
//! - **Lazy growth**: Threads are spawned on demand up to `max_threads`
//! - **Idle retirement**: Threads above `min_threads` exit after `idle_timeout`
//! - **Panic isolation**: A panicking job is logged; its worker keeps running
//! - **Caller-runs on shutdown**: Jobs submitted after shutdown run inline, so
//!   a registered callback is never silently lost
//!
//! # Example
//!
//! ```ignore
//! use asupertask::runtime::pool::{PoolOptions, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolOptions::default());
//! pool.execute(|| println!("on a worker"));
//! ```

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{DEFAULT_IDLE_TIMEOUT, RuntimeConfig};
use crate::tracing_compat::{trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration options for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Minimum number of threads to keep alive.
    pub min_threads: usize,
    /// Maximum number of threads allowed.
    pub max_threads: usize,
    /// Idle timeout before retiring excess threads.
    pub idle_timeout: Duration,
    /// Thread name prefix.
    pub thread_name_prefix: String,
    /// Stack size per worker thread.
    pub thread_stack_size: Option<usize>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for PoolOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            min_threads: config.min_threads,
            max_threads: config.worker_threads.max(1),
            idle_timeout: config.idle_timeout,
            thread_name_prefix: config.thread_name_prefix.clone(),
            thread_stack_size: config.thread_stack_size,
        }
    }
}

struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    /// Current number of live threads (including ones being spawned).
    active_threads: AtomicUsize,
    /// Number of threads currently executing a job.
    busy_threads: AtomicUsize,
    /// Number of jobs waiting in the queue.
    pending_count: AtomicUsize,
    next_thread_id: AtomicUsize,
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    idle_timeout: Duration,
    thread_name_prefix: String,
    thread_stack_size: Option<usize>,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// A growable pool of worker threads.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("pending_jobs", &self.pending_count())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a pool, eagerly spawning `min_threads` workers.
    #[must_use]
    pub fn new(options: PoolOptions) -> Self {
        let max_threads = options.max_threads.max(1);
        let min_threads = options.min_threads.min(max_threads);
        let inner = Arc::new(PoolInner {
            min_threads,
            max_threads,
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            next_thread_id: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            idle_timeout: if options.idle_timeout.is_zero() {
                DEFAULT_IDLE_TIMEOUT
            } else {
                options.idle_timeout
            },
            thread_name_prefix: options.thread_name_prefix,
            thread_stack_size: options.thread_stack_size,
            thread_handles: Mutex::new(Vec::with_capacity(max_threads)),
        });

        for _ in 0..min_threads {
            if inner.reserve_thread() {
                spawn_thread_on_inner(&inner);
            }
        }

        Self { inner }
    }

    /// Submits a job.
    ///
    /// After [`shutdown`](Self::shutdown), the job runs on the calling thread.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if self.is_shutdown() {
            warn!("worker pool is shut down; running job on the caller thread");
            job();
            return;
        }
        self.inner.queue.push(Box::new(job));
        self.inner.pending_count.fetch_add(1, Ordering::AcqRel);

        maybe_spawn_thread_on_inner(&self.inner);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_one();
    }

    /// Returns the number of pending jobs in the queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns the number of live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool is shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Initiates shutdown. Queued jobs still run; new jobs run inline.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }

    /// Shuts down and waits for all threads to exit.
    ///
    /// Returns `true` if all threads exited before `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = Instant::now() + timeout;
        let current = thread::current().id();
        let own_worker = self
            .inner
            .thread_handles
            .lock()
            .iter()
            .any(|h| h.thread().id() == current);
        let floor = usize::from(own_worker);

        while self.inner.active_threads.load(Ordering::Acquire) > floor {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = self.inner.mutex.lock();
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }

        let handles: Vec<_> = self.inner.thread_handles.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl PoolInner {
    /// Claims a thread slot if below `max_threads`.
    fn reserve_thread(&self) -> bool {
        self.active_threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max_threads).then_some(active + 1)
            })
            .is_ok()
    }

    /// Gives back a thread slot if the pool stays at or above `min_threads`.
    fn try_retire(&self) -> bool {
        self.active_threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active > self.min_threads).then(|| active - 1)
            })
            .is_ok()
    }
}

fn spawn_thread_on_inner(inner: &Arc<PoolInner>) {
    let worker = Arc::clone(inner);
    let thread_id = inner.next_thread_id.fetch_add(1, Ordering::Relaxed);
    let mut builder =
        thread::Builder::new().name(format!("{}-worker-{}", inner.thread_name_prefix, thread_id));
    if let Some(size) = inner.thread_stack_size {
        builder = builder.stack_size(size);
    }

    match builder.spawn(move || {
        trace!(thread_id, "worker started");
        worker_loop(&worker);
        trace!(thread_id, "worker stopped");
    }) {
        Ok(handle) => {
            let mut handles = inner.thread_handles.lock();
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
        Err(_err) => {
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            warn!(error = %_err, "failed to spawn worker thread");
        }
    }
}

fn maybe_spawn_thread_on_inner(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Acquire);
    let busy = inner.busy_threads.load(Ordering::Acquire);
    let pending = inner.pending_count.load(Ordering::Acquire);

    // Spawn a new thread if every live thread is busy and work is waiting.
    if busy >= active && pending > 0 && inner.reserve_thread() {
        spawn_thread_on_inner(inner);
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending_count.fetch_sub(1, Ordering::AcqRel);
            inner.busy_threads.fetch_add(1, Ordering::AcqRel);
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                warn!("worker pool job panicked");
            }
            inner.busy_threads.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let timed_out = {
            let mut guard = inner.mutex.lock();
            if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
                continue;
            }
            inner
                .condvar
                .wait_for(&mut guard, inner.idle_timeout)
                .timed_out()
        };

        if timed_out && inner.queue.is_empty() && inner.try_retire() {
            trace!("idle worker retired");
            return;
        }
    }
}
