//! Execution entry points.
//!
//! Every entry point evaluates the task afresh on [`Runtime::global`]. The
//! blocking forms return the outcome; the callback forms run the task's
//! synchronous prefix on the calling thread and return at the first
//! asynchronous boundary.
//!
//! | Entry point | Completion |
//! |---|---|
//! | [`Task::run`] | blocks until done |
//! | [`Task::run_for`] | blocks at most `timeout`, then `Err(Timeout)` |
//! | [`Task::run_async`] | callback, exactly once |
//! | [`Task::run_async_interruptibly`] | callback at most once; silent after interrupt |
//! | [`Task::run_async_cancellable`] | callback exactly once, natural or `Interrupted` |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::Task;
use crate::error::{Error, Result};
use crate::runtime::{Completion, Runtime};
use crate::tracing_compat::debug;
use crate::types::{CancelReason, Interrupt};

impl<A: Send + 'static> Task<A> {
    /// Runs the task, blocking the calling thread until it completes.
    pub fn run(&self) -> Result<A> {
        Runtime::global().block_on(self)
    }

    /// Runs the task, blocking for at most `timeout`.
    ///
    /// On expiry the run is interrupted and `Err(Timeout)` is returned
    /// without waiting for it; a late outcome is discarded.
    pub fn run_for(&self, timeout: Duration) -> Result<A> {
        let interrupt = Interrupt::new();
        match self.eval().run_for(Runtime::global(), timeout, &interrupt) {
            Some(result) => result,
            None => {
                debug!(?timeout, "blocking run timed out");
                Err(Error::timeout(timeout))
            }
        }
    }

    /// Runs the task and delivers its outcome to `callback`.
    pub fn run_async(&self, callback: impl FnOnce(Result<A>) + Send + 'static) {
        self.eval().run_async(Runtime::global(), callback);
    }

    /// Runs the task until it completes or `interrupt` is requested.
    ///
    /// Once `interrupt` is requested the run stops at its next step and
    /// `callback` is never invoked.
    pub fn run_async_interruptibly(
        &self,
        callback: impl FnOnce(Result<A>) + Send + 'static,
        interrupt: &Interrupt,
    ) {
        self.eval()
            .run_async_interruptibly(Runtime::global(), callback, interrupt);
    }

    /// Runs the task and returns a handle that can cancel it.
    ///
    /// `callback` is invoked exactly once: with the natural outcome, or with
    /// an [`Interrupted`](crate::ErrorKind::Interrupted) failure if
    /// [`CancelHandle::cancel`] won the race. The interrupted outcome is
    /// delivered directly and never passes through the task's own recovery
    /// combinators.
    pub fn run_async_cancellable(
        &self,
        callback: impl FnOnce(Result<A>) + Send + 'static,
    ) -> CancelHandle {
        let interrupt = Interrupt::new();
        let completion = Arc::new(Completion::new(callback));
        let handle = CancelHandle::new(interrupt.clone(), {
            let completion = Arc::clone(&completion);
            move |reason| completion.complete(Err(Error::interrupted(reason)))
        });
        self.eval().run_async_interruptibly(
            Runtime::global(),
            move |result| {
                completion.complete(result);
            },
            &interrupt,
        );
        handle
    }
}

type Claim = dyn Fn(CancelReason) -> bool + Send + Sync;

/// Cancels a run started with [`Task::run_async_cancellable`].
#[derive(Clone)]
pub struct CancelHandle {
    interrupt: Interrupt,
    claim: Arc<Claim>,
}

impl CancelHandle {
    fn new(interrupt: Interrupt, claim: impl Fn(CancelReason) -> bool + Send + Sync + 'static) -> Self {
        Self {
            interrupt,
            claim: Arc::new(claim),
        }
    }

    /// Requests cancellation.
    ///
    /// Returns `true` if this call delivered the interrupted outcome; `false`
    /// if the run had already completed or was already cancelled.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::user("cancelled by handle"))
    }

    /// Requests cancellation with a specific reason.
    ///
    /// The interrupt is raised before the outcome is claimed, so once this
    /// returns `true` the run takes no further steps.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.interrupt.request(reason.clone());
        (self.claim)(reason)
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.interrupt.is_requested()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("interrupt", &self.interrupt)
            .finish()
    }
}
