//! Deadlines for tasks.
//!
//! [`Task::timed`] races a task against a timer. If the timer fires first
//! the task fails with [`ErrorKind::Timeout`](crate::ErrorKind::Timeout)
//! and the underlying run is interrupted; an outcome that arrives after the
//! deadline is discarded. The underlying run starts on a worker thread, so
//! the deadline holds even if the task blocks.
//!
//! The expiry is claimed on the timer thread rather than a worker, so a
//! saturated pool cannot delay it. Steps that follow an expired `timed`
//! begin on the timer thread; put a [`Task::fork`] after it if they block.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::runtime::{Completion, Eval};
use crate::task::Task;
use crate::tracing_compat::debug;
use crate::types::CancelReason;

impl<A: Send + 'static> Task<A> {
    /// Fails with a timeout if this task does not complete within `timeout`.
    pub fn timed(self, timeout: Duration) -> Self {
        Self::from_eval(move || {
            let source = self.clone();
            Eval::listen(move |resume, ctx| {
                let interrupt = ctx.interrupt().child();
                let completion = Arc::new(Completion::new(resume));

                let timer = {
                    let completion = Arc::clone(&completion);
                    let interrupt = interrupt.clone();
                    ctx.runtime().schedule_inline(timeout, move || {
                        if completion.is_completed() {
                            return;
                        }
                        debug!(?timeout, "timed task expired");
                        interrupt.request(CancelReason::timeout());
                        completion.complete(Err(Error::timeout(timeout)));
                    })
                };

                let inner = ctx.with_interrupt(interrupt);
                ctx.runtime().execute(move || {
                    source.eval().run_with(inner, move |result| {
                        timer.cancel();
                        completion.complete(result);
                    });
                });
            })
        })
    }
}
