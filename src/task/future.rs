//! Awaiting tasks from `async` code.
//!
//! `Task<A>` implements [`IntoFuture`], so `task.await` runs it on the
//! global runtime. The run starts at the first poll; dropping the future
//! before it resolves cancels the run.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use super::{CancelHandle, Task};
use crate::error::Result;
use crate::types::CancelReason;

struct Shared<A> {
    result: Option<Result<A>>,
    waker: Option<Waker>,
}

/// Future returned by `Task::into_future`.
#[must_use = "futures do nothing unless polled"]
pub struct TaskFuture<A> {
    task: Option<Task<A>>,
    shared: Arc<Mutex<Shared<A>>>,
    handle: Option<CancelHandle>,
    done: bool,
}

impl<A: Send + 'static> IntoFuture for Task<A> {
    type Output = Result<A>;
    type IntoFuture = TaskFuture<A>;

    fn into_future(self) -> Self::IntoFuture {
        TaskFuture {
            task: Some(self),
            shared: Arc::new(Mutex::new(Shared {
                result: None,
                waker: None,
            })),
            handle: None,
            done: false,
        }
    }
}

impl<A: Send + 'static> Future for TaskFuture<A> {
    type Output = Result<A>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(task) = this.task.take() {
            this.shared.lock().waker = Some(cx.waker().clone());
            let shared = Arc::clone(&this.shared);
            this.handle = Some(task.run_async_cancellable(move |result| {
                let waker = {
                    let mut state = shared.lock();
                    state.result = Some(result);
                    state.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            }));
        }

        let mut state = this.shared.lock();
        if let Some(result) = state.result.take() {
            this.done = true;
            return Poll::Ready(result);
        }
        match &state.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<A> Drop for TaskFuture<A> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(handle) = &self.handle {
                handle.cancel_with(CancelReason::user("task future dropped"));
            }
        }
    }
}

impl<A> fmt::Debug for TaskFuture<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("started", &self.handle.is_some())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_utils::init_test_logging;
    use std::time::Duration;

    #[test]
    fn await_task_outcome() {
        init_test_logging();
        crate::test_phase!("await_task_outcome");
        let value = futures_lite::future::block_on(async {
            let a = Task::now(20).await?;
            let b = Task::now(1).after(Duration::from_millis(10)).await?;
            Ok::<_, Error>(a * 2 + b + 1)
        });
        assert_eq!(value.ok(), Some(42));
        crate::test_complete!("await_task_outcome");
    }

    #[test]
    fn dropping_future_cancels_run() {
        init_test_logging();
        let mut future = Task::<u8>::never().into_future();
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert!(Pin::new(&mut future).poll(&mut cx).is_pending());
        let handle = future.handle.clone().expect("started");
        drop(future);
        assert!(handle.is_cancelled());
    }
}
