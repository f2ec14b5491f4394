//! Unordered parallel reduction.
//!
//! [`reduce_unordered`] starts every task on the worker pool and folds their
//! results with a [`Reducer`] in completion order. [`gather_unordered`] is
//! the same with [`VecReducer`].
//!
//! # Coordination
//!
//! Shared state is a countdown of outstanding tasks and a lock-free queue of
//! partial accumulators:
//!
//! - A success pops a partial (or starts from `unit`), adds its value, pushes
//!   the partial back and decrements the countdown. The task whose decrement
//!   reaches zero folds the queue and delivers the result.
//! - With `cancel_on_error`, a failure races to swap the countdown to zero.
//!   The single winner interrupts every sibling and delivers the failure;
//!   later arrivals see a non-positive countdown and do nothing.
//! - Without `cancel_on_error`, every task runs to completion and the first
//!   failure observed is delivered once the countdown reaches zero.
//!
//! Zero tasks produce [`Reducer::zero`]; a single task is mapped through
//! [`Reducer::unit`] without any of the above.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_queue::SegQueue;

use super::reducer::{Reducer, VecReducer};
use crate::error::{Error, Result, catch};
use crate::runtime::{Completion, Eval, Resume};
use crate::task::Task;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, Interrupt};

/// Runs `tasks` concurrently and collects their values in completion order.
pub fn gather_unordered<A: Send + 'static>(
    tasks: impl IntoIterator<Item = Task<A>>,
    cancel_on_error: bool,
) -> Task<Vec<A>> {
    reduce_unordered(tasks, VecReducer, cancel_on_error)
}

/// Runs `tasks` concurrently and folds their values with `reducer`.
pub fn reduce_unordered<A, R>(
    tasks: impl IntoIterator<Item = Task<A>>,
    reducer: R,
    cancel_on_error: bool,
) -> Task<R::Output>
where
    A: Send + 'static,
    R: Reducer<A>,
{
    let tasks: Arc<[Task<A>]> = tasks.into_iter().collect();
    let reducer = Arc::new(reducer);
    match tasks.len() {
        0 => Task::from_eval(move || {
            let reducer = Arc::clone(&reducer);
            Eval::delay(move || catch(|| reducer.zero()))
        }),
        1 => tasks[0].clone().map(move |value| reducer.unit(value)),
        _ => Task::from_eval(move || {
            let tasks = Arc::clone(&tasks);
            let reducer = Arc::clone(&reducer);
            Eval::listen(move |resume, ctx| {
                let reduction = Arc::new(Reduction::new(
                    tasks.len(),
                    reducer,
                    cancel_on_error,
                    ctx.interrupt().child(),
                    resume,
                ));
                for task in tasks.iter() {
                    let task = task.clone();
                    let reduction = Arc::clone(&reduction);
                    let inner = ctx.with_interrupt(reduction.interrupt.clone());
                    ctx.runtime().execute(move || {
                        task.eval()
                            .run_with(inner, move |result| reduction.settle(result));
                    });
                }
            })
        }),
    }
}

struct Reduction<A, R: Reducer<A>> {
    remaining: AtomicIsize,
    partials: SegQueue<R::Output>,
    first_failure: OnceLock<Error>,
    reducer: Arc<R>,
    cancel_on_error: bool,
    interrupt: Interrupt,
    completion: Completion<Result<R::Output>>,
    marker: PhantomData<fn(A)>,
}

impl<A, R: Reducer<A>> Reduction<A, R> {
    fn new(
        count: usize,
        reducer: Arc<R>,
        cancel_on_error: bool,
        interrupt: Interrupt,
        resume: Resume<Result<R::Output>>,
    ) -> Self {
        Self {
            remaining: AtomicIsize::new(isize::try_from(count).unwrap_or(isize::MAX)),
            partials: SegQueue::new(),
            first_failure: OnceLock::new(),
            reducer,
            cancel_on_error,
            interrupt,
            completion: Completion::new(resume),
            marker: PhantomData,
        }
    }

    fn settle(&self, result: Result<A>) {
        let combined = result.and_then(|value| {
            catch(|| match self.partials.pop() {
                Some(acc) => self.reducer.cons(value, acc),
                None => self.reducer.unit(value),
            })
        });
        match combined {
            Ok(acc) => {
                self.partials.push(acc);
                self.count_down();
            }
            Err(error) if self.cancel_on_error => self.claim_failure(error),
            Err(error) => {
                let _ = self.first_failure.set(error);
                self.count_down();
            }
        }
    }

    fn count_down(&self) {
        let before = self.remaining.fetch_sub(1, Ordering::AcqRel);
        trace!(remaining = before - 1, "reduction task settled");
        if before == 1 {
            self.finish();
        }
    }

    fn claim_failure(&self, error: Error) {
        let mut current = self.remaining.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return;
            }
            match self.remaining.compare_exchange_weak(
                current,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        debug!(outstanding = current, error = %error, "reduction failed fast");
        self.interrupt.request(CancelReason::sibling_failed());
        self.completion.complete(Err(error));
    }

    fn finish(&self) {
        let outcome = match self.first_failure.get() {
            Some(error) => Err(error.clone()),
            None => catch(|| {
                let mut acc = self.reducer.zero();
                while let Some(partial) = self.partials.pop() {
                    acc = self.reducer.append(acc, partial);
                }
                acc
            }),
        };
        self.completion.complete(outcome);
    }
}
