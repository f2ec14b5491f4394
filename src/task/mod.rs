//! Tasks: reusable descriptions of asynchronous computations.
//!
//! A [`Task<A>`] describes a computation that produces a [`Result<A>`]. It
//! is a value: building one runs nothing, and every execution entry point
//! ([`Task::run`], [`Task::run_async`], ...) evaluates it afresh. Tasks are
//! cheap to clone and are not memoized.
//!
//! # Composition
//!
//! Failures short-circuit: once a step produces `Err`, later `map` and
//! `flat_map` steps are skipped and the error is forwarded unchanged until a
//! recovery combinator ([`attempt`](Task::attempt), [`handle`](Task::handle),
//! [`handle_with`](Task::handle_with), [`or`](Task::or)) intercepts it.
//! Panics in user closures are captured and become
//! [`ErrorKind::Panicked`](crate::ErrorKind::Panicked) failures.
//!
//! Interruption failures are never passed to `handle`, `handle_with` or
//! `or`: they describe an external event, not a domain failure.
//!
//! # Example
//!
//! ```
//! use asupertask::{Error, Task};
//!
//! let parsed = Task::delay(|| "42")
//!     .flat_map(|s| Task::from_result(s.parse::<u32>().map_err(Error::from_source)))
//!     .handle(|_| Some(0));
//! assert_eq!(parsed.run().ok(), Some(42));
//! ```

pub mod future;
pub mod run;

pub use future::TaskFuture;
pub use run::CancelHandle;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result, catch};
use crate::runtime::completion::Promise;
use crate::runtime::eval::{Value, cast};
use crate::runtime::{Eval, Resume, Runtime};

/// Callback receiving the outcome of an asynchronous registration.
pub type Callback<A> = Box<dyn FnOnce(Result<A>) + Send>;

type Outcome = Result<Value>;
type Build = Arc<dyn Fn() -> Eval<Outcome> + Send + Sync>;
type Next = Arc<dyn Fn(Outcome) -> Eval<Outcome> + Send + Sync>;

/// One link of a task description.
///
/// Combinators that only react to their source's outcome are `Then` links
/// pointing at the source, so chains are plain linked lists: instantiating
/// one is lazy per link and dropping one is iterative.
enum Step {
    Leaf(Build),
    Then {
        // `None` only while the link is being dropped.
        source: Option<Arc<Step>>,
        next: Next,
    },
}

impl Drop for Step {
    fn drop(&mut self) {
        let mut next = match self {
            Self::Then { source, .. } => source.take(),
            Self::Leaf(_) => None,
        };
        while let Some(step) = next {
            next = match Arc::into_inner(step) {
                Some(mut owned) => match &mut owned {
                    Self::Then { source, .. } => source.take(),
                    Self::Leaf(_) => None,
                },
                None => None,
            };
        }
    }
}

fn eval_step(step: &Arc<Step>) -> Eval<Outcome> {
    match &**step {
        Step::Leaf(build) => {
            let build = Arc::clone(build);
            Eval::suspend(move || build())
        }
        Step::Then {
            source: Some(source),
            next,
        } => {
            let source = Arc::clone(source);
            let next = Arc::clone(next);
            Eval::suspend(move || eval_step(&source)).flat_map(move |outcome| next(outcome))
        }
        Step::Then { source: None, .. } => unreachable!("task link evaluated while dropping"),
    }
}

fn erase<B: Send + 'static>(result: Result<B>) -> Outcome {
    result.map(|value| Box::new(value) as Value)
}

/// A lazily evaluated, re-runnable asynchronous computation.
#[must_use = "a Task does nothing until it is run"]
pub struct Task<A> {
    step: Arc<Step>,
    marker: PhantomData<fn() -> A>,
}

impl<A> Clone for Task<A> {
    fn clone(&self) -> Self {
        Self {
            step: Arc::clone(&self.step),
            marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match &*self.step {
            Step::Leaf(_) => "leaf",
            Step::Then { .. } => "then",
        };
        f.debug_struct("Task")
            .field("type", &std::any::type_name::<A>())
            .field("shape", &shape)
            .finish()
    }
}

impl<A: Send + 'static> Task<A> {
    fn from_step(step: Step) -> Self {
        Self {
            step: Arc::new(step),
            marker: PhantomData,
        }
    }

    /// Builds a task from a factory of one-shot evaluations.
    ///
    /// The factory is called once per run.
    pub fn from_eval(build: impl Fn() -> Eval<Result<A>> + Send + Sync + 'static) -> Self {
        Self::from_step(Step::Leaf(Arc::new(move || build().map(erase))))
    }

    /// Continues with `next` once this task's outcome is known.
    pub(crate) fn then<B: Send + 'static>(
        self,
        next: impl Fn(Result<A>) -> Eval<Result<B>> + Send + Sync + 'static,
    ) -> Task<B> {
        Task::from_step(Step::Then {
            source: Some(self.step),
            next: Arc::new(move |outcome: Outcome| next(outcome.map(cast::<A>)).map(erase)),
        })
    }

    /// A fresh one-shot evaluation of this task.
    pub fn eval(&self) -> Eval<Result<A>> {
        eval_step(&self.step).map(|outcome| outcome.map(cast::<A>))
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// A task already completed with `value`.
    pub fn now(value: A) -> Self
    where
        A: Clone + Sync,
    {
        Self::from_eval(move || Eval::now(Ok(value.clone())))
    }

    /// A task already failed with `error`.
    pub fn fail(error: impl Into<Error>) -> Self {
        let error = error.into();
        Self::from_eval(move || Eval::now(Err(error.clone())))
    }

    /// A task already completed with `result`.
    pub fn from_result(result: Result<A>) -> Self
    where
        A: Clone + Sync,
    {
        match result {
            Ok(value) => Self::now(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Evaluates `f` each time the task runs.
    pub fn delay(f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        let f = Arc::new(f);
        Self::from_eval(move || {
            let f = Arc::clone(&f);
            Eval::delay(move || catch(|| f()))
        })
    }

    /// Evaluates a fallible `f` each time the task runs.
    pub fn try_delay<E: Into<Error>>(
        f: impl Fn() -> std::result::Result<A, E> + Send + Sync + 'static,
    ) -> Self {
        let f = Arc::new(f);
        Self::from_eval(move || {
            let f = Arc::clone(&f);
            Eval::delay(move || catch(|| f()).and_then(|result| result.map_err(Into::into)))
        })
    }

    /// Builds the task to run each time this one runs.
    pub fn suspend(f: impl Fn() -> Self + Send + Sync + 'static) -> Self {
        let f = Arc::new(f);
        Self::from_eval(move || {
            let f = Arc::clone(&f);
            Eval::suspend(move || match catch(|| f()) {
                Ok(task) => task.eval(),
                Err(error) => Eval::now(Err(error)),
            })
        })
    }

    /// A task completed by a callback-based API.
    ///
    /// `register` is called on every run with a callback it must invoke,
    /// from any thread, with the outcome. The first invocation wins. A panic
    /// in `register` fails the task unless the callback already fired.
    pub fn from_callback(register: impl Fn(Callback<A>) + Send + Sync + 'static) -> Self {
        let register = Arc::new(register);
        Self::from_eval(move || {
            let register = Arc::clone(&register);
            Eval::from_callback(move |resume: Resume<Result<A>>| {
                let slot = Arc::new(Mutex::new(Some(resume)));
                let shared = Arc::clone(&slot);
                let callback: Callback<A> = Box::new(move |result| {
                    let resume = shared.lock().take();
                    if let Some(resume) = resume {
                        resume(result);
                    }
                });
                if let Err(error) = catch(|| register(callback)) {
                    let resume = slot.lock().take();
                    if let Some(resume) = resume {
                        resume(Err(error));
                    }
                }
            })
        })
    }

    /// A task that never completes.
    pub fn never() -> Self {
        Self::from_eval(Eval::never)
    }

    /// Evaluates `f` after at least `delay`, without holding a thread.
    pub fn schedule(delay: Duration, f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self::delay(f).after(delay)
    }

    /// Evaluates `f` on a worker thread each time the task runs.
    pub fn spawn(f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self::delay(f).fork()
    }

    /// Starts `f` on `runtime` immediately.
    ///
    /// The outcome is computed once; every run of the returned task observes
    /// that same outcome.
    pub fn start_on(runtime: &Runtime, f: impl FnOnce() -> A + Send + 'static) -> Self
    where
        A: Clone + Sync,
    {
        let promise: Arc<Promise<Result<A>>> = Arc::new(Promise::new());
        let sink = Arc::clone(&promise);
        runtime.execute(move || sink.fulfil(catch(f)));
        Self::from_eval(move || {
            let promise = Arc::clone(&promise);
            Eval::from_callback(move |resume| promise.listen(resume))
        })
    }

    // =========================================================================
    // Combinators
    // =========================================================================

    /// Transforms the success value.
    pub fn map<B: Send + 'static>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Task<B> {
        self.then(move |result| Eval::now(result.and_then(|value| catch(|| f(value)))))
    }

    /// Sequences a dependent task.
    pub fn flat_map<B: Send + 'static>(
        self,
        f: impl Fn(A) -> Task<B> + Send + Sync + 'static,
    ) -> Task<B> {
        self.then(move |result| match result {
            Ok(value) => match catch(|| f(value)) {
                Ok(task) => task.eval(),
                Err(error) => Eval::now(Err(error)),
            },
            Err(error) => Eval::now(Err(error)),
        })
    }

    /// Exposes the outcome as a value; the returned task never fails.
    pub fn attempt(self) -> Task<Result<A>> {
        self.then(|result| Eval::now(Ok(result)))
    }

    /// Recovers from the failures `f` maps to `Some`.
    pub fn handle(self, f: impl Fn(&Error) -> Option<A> + Send + Sync + 'static) -> Self {
        self.then(move |result| {
            Eval::now(match result {
                Err(error) if !error.is_interrupted() => match catch(|| f(&error)) {
                    Ok(Some(value)) => Ok(value),
                    Ok(None) => Err(error),
                    Err(panic) => Err(panic),
                },
                other => other,
            })
        })
    }

    /// Recovers from the failures `f` maps to `Some` with another task.
    pub fn handle_with(
        self,
        f: impl Fn(&Error) -> Option<Self> + Send + Sync + 'static,
    ) -> Self {
        self.then(move |result| match result {
            Err(error) if !error.is_interrupted() => match catch(|| f(&error)) {
                Ok(Some(task)) => task.eval(),
                Ok(None) => Eval::now(Err(error)),
                Err(panic) => Eval::now(Err(panic)),
            },
            other => Eval::now(other),
        })
    }

    /// Runs `alternative` if this task fails.
    pub fn or(self, alternative: Self) -> Self {
        self.then(move |result| match result {
            Err(error) if !error.is_interrupted() => alternative.eval(),
            other => Eval::now(other),
        })
    }

    /// Runs the finalizer `f` after this task, whatever its outcome.
    ///
    /// `f` receives the failure, if any. The original outcome is kept
    /// unless the finalizer itself fails.
    pub fn on_finish(
        self,
        f: impl Fn(Option<&Error>) -> Task<()> + Send + Sync + 'static,
    ) -> Self {
        self.then(move |result| match catch(|| f(result.as_ref().err())) {
            Ok(finalizer) => finalizer.eval().map(move |finished| match finished {
                Ok(()) => result,
                Err(error) => Err(error),
            }),
            Err(panic) => Eval::now(Err(panic)),
        })
    }

    /// Fails with `failure()` when the success value does not satisfy `predicate`.
    pub fn ensure(
        self,
        failure: impl Fn() -> Error + Send + Sync + 'static,
        predicate: impl Fn(&A) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.then(move |result| {
            Eval::now(result.and_then(|value| match catch(|| predicate(&value)) {
                Ok(true) => Ok(value),
                Ok(false) => Err(catch(&failure).unwrap_or_else(|panic| panic)),
                Err(panic) => Err(panic),
            }))
        })
    }

    /// Delays the start of this task by `delay`.
    pub fn after(self, delay: Duration) -> Self {
        Self::from_eval(move || self.eval().after(delay))
    }

    /// Moves the start of this task onto a worker thread.
    pub fn fork(self) -> Self {
        Self::from_eval(move || self.eval().fork())
    }
}

impl Task<()> {
    /// Completes after `delay` without holding a thread.
    pub fn sleep(delay: Duration) -> Self {
        Self::from_eval(move || Eval::<()>::sleep(delay).map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn now_and_fail() {
        init_test("now_and_fail");
        assert_eq!(Task::now(7).run().ok(), Some(7));
        let err = Task::<u8>::fail(Error::user("nope")).run().expect_err("fails");
        assert_eq!(err.message(), Some("nope"));
        crate::test_complete!("now_and_fail");
    }

    #[test]
    fn delay_reruns_side_effects() {
        init_test("delay_reruns_side_effects");
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let task = Task::delay(move || seen.fetch_add(1, Ordering::SeqCst));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(task.run().ok(), Some(0));
        assert_eq!(task.run().ok(), Some(1));
        crate::assert_with_log!(
            counter.load(Ordering::SeqCst) == 2,
            "each run re-evaluates",
            2,
            counter.load(Ordering::SeqCst)
        );
        crate::test_complete!("delay_reruns_side_effects");
    }

    #[test]
    fn panics_become_failures() {
        init_test("panics_become_failures");
        let thunk = Task::<u8>::delay(|| panic!("thunk"));
        assert_eq!(thunk.run().map_err(|e| e.kind()), Err(ErrorKind::Panicked));

        let mapped = Task::now(1).map(|_: i32| -> i32 { panic!("map") });
        assert_eq!(mapped.run().map_err(|e| e.kind()), Err(ErrorKind::Panicked));

        let bound = Task::now(1).flat_map(|_: i32| -> Task<i32> { panic!("flat_map") });
        assert_eq!(bound.run().map_err(|e| e.kind()), Err(ErrorKind::Panicked));

        let suspended = Task::<u8>::suspend(|| panic!("suspend"));
        assert_eq!(suspended.run().map_err(|e| e.kind()), Err(ErrorKind::Panicked));
        crate::test_complete!("panics_become_failures");
    }

    #[test]
    fn failure_short_circuits() {
        init_test("failure_short_circuits");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let task = Task::<i32>::fail(Error::user("first"))
            .map(move |x| {
                seen.fetch_add(1, Ordering::SeqCst);
                x + 1
            })
            .flat_map(|x| Task::now(x * 2));
        let err = task.run().expect_err("failure forwarded");
        assert_eq!(err.message(), Some("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        crate::test_complete!("failure_short_circuits");
    }

    #[test]
    fn try_delay_maps_error_type() {
        init_test("try_delay_maps_error_type");
        let task = Task::try_delay(|| "x1".parse::<u32>().map_err(Error::from_source));
        let err = task.run().expect_err("parse fails");
        assert_eq!(err.kind(), ErrorKind::User);
        assert!(std::error::Error::source(&err).is_some());
        crate::test_complete!("try_delay_maps_error_type");
    }

    #[test]
    fn attempt_never_fails() {
        init_test("attempt_never_fails");
        let inner = Task::<u8>::fail(Error::user("boom")).attempt().run();
        let inner = inner.expect("attempt succeeds");
        assert_eq!(inner.map_err(|e| e.message().map(str::to_string)), Err(Some("boom".into())));
        crate::test_complete!("attempt_never_fails");
    }

    #[test]
    fn handle_recovers_matching_failures_only() {
        init_test("handle_recovers_matching_failures_only");
        let recover = |e: &Error| (e.message() == Some("retryable")).then_some(10);
        let handled = Task::fail(Error::user("retryable")).handle(recover);
        assert_eq!(handled.run().ok(), Some(10));

        let unmatched = Task::fail(Error::user("fatal")).handle(recover);
        assert_eq!(
            unmatched.run().expect_err("propagates").message(),
            Some("fatal")
        );
        crate::test_complete!("handle_recovers_matching_failures_only");
    }

    #[test]
    fn recovery_skips_interruption() {
        init_test("recovery_skips_interruption");
        let interrupted = || Task::<u8>::fail(Error::interrupted(CancelReason::user("stop")));
        assert!(
            interrupted()
                .handle(|_| Some(1))
                .run()
                .expect_err("not recovered")
                .is_interrupted()
        );
        assert!(
            interrupted()
                .handle_with(|_| Some(Task::now(1)))
                .run()
                .expect_err("not recovered")
                .is_interrupted()
        );
        assert!(
            interrupted()
                .or(Task::now(1))
                .run()
                .expect_err("not recovered")
                .is_interrupted()
        );
        crate::test_complete!("recovery_skips_interruption");
    }

    #[test]
    fn handle_with_and_or() {
        init_test("handle_with_and_or");
        let fallback = Task::<u8>::fail(Error::user("a")).handle_with(|_| Some(Task::now(3)));
        assert_eq!(fallback.run().ok(), Some(3));
        let alt = Task::<u8>::fail(Error::user("a")).or(Task::now(4));
        assert_eq!(alt.run().ok(), Some(4));
        let primary = Task::now(5_u8).or(Task::fail(Error::user("unused")));
        assert_eq!(primary.run().ok(), Some(5));
        crate::test_complete!("handle_with_and_or");
    }

    #[test]
    fn on_finish_sees_outcome_and_can_supersede() {
        init_test("on_finish_sees_outcome_and_can_supersede");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let task = Task::<u8>::fail(Error::user("original")).on_finish(move |err| {
            log.lock().push(err.and_then(Error::message).map(str::to_string));
            Task::now(())
        });
        assert_eq!(
            task.run().expect_err("original kept").message(),
            Some("original")
        );
        assert_eq!(*seen.lock(), vec![Some("original".to_string())]);

        let superseded = Task::now(1_u8).on_finish(|_| Task::fail(Error::user("cleanup")));
        assert_eq!(
            superseded.run().expect_err("finalizer wins").message(),
            Some("cleanup")
        );
        crate::test_complete!("on_finish_sees_outcome_and_can_supersede");
    }

    #[test]
    fn ensure_downgrades_on_false() {
        init_test("ensure_downgrades_on_false");
        let even = |n: &u32| n % 2 == 0;
        let ok = Task::now(4_u32).ensure(|| Error::user("odd"), even);
        assert_eq!(ok.run().ok(), Some(4));
        let bad = Task::now(5_u32).ensure(|| Error::user("odd"), even);
        assert_eq!(bad.run().expect_err("odd").message(), Some("odd"));
        crate::test_complete!("ensure_downgrades_on_false");
    }

    #[test]
    fn after_delays_start() {
        init_test("after_delays_start");
        let started = std::time::Instant::now();
        let task = Task::delay(std::time::Instant::now).after(Duration::from_millis(30));
        let ran_at = task.run().expect("runs");
        assert!(ran_at.duration_since(started) >= Duration::from_millis(30));
        crate::test_complete!("after_delays_start");
    }

    #[test]
    fn from_callback_first_invocation_wins() {
        init_test("from_callback_first_invocation_wins");
        let task = Task::from_callback(|cb: Callback<u8>| {
            std::thread::spawn(move || cb(Ok(1)));
        });
        assert_eq!(task.run().ok(), Some(1));

        let panicking = Task::<u8>::from_callback(|_| panic!("register"));
        assert_eq!(
            panicking.run().map_err(|e| e.kind()),
            Err(ErrorKind::Panicked)
        );
        crate::test_complete!("from_callback_first_invocation_wins");
    }

    #[test]
    fn start_on_is_eager_and_memoized() {
        init_test("start_on_is_eager_and_memoized");
        let runtime = crate::test_utils::test_runtime();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let task = Task::start_on(&runtime, move || seen.fetch_add(1, Ordering::SeqCst) + 100);
        assert_eq!(runtime.block_on(&task).ok(), Some(100));
        assert_eq!(runtime.block_on(&task).ok(), Some(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        crate::test_complete!("start_on_is_eager_and_memoized");
    }

    #[test]
    fn long_map_chain_builds_runs_and_drops() {
        init_test("long_map_chain_builds_runs_and_drops");
        let mut task = Task::now(0_u64);
        for _ in 0..100_000 {
            task = task.map(|n| n + 1);
        }
        assert_eq!(task.run().ok(), Some(100_000));
        drop(task);
        crate::test_complete!("long_map_chain_builds_runs_and_drops");
    }

    #[test]
    fn recursive_flat_map_is_stack_safe() {
        init_test("recursive_flat_map_is_stack_safe");
        fn countdown(n: u64) -> Task<u64> {
            if n == 0 {
                Task::now(0)
            } else {
                Task::now(n).flat_map(|n| countdown(n - 1).map(|m| m + 1))
            }
        }
        assert_eq!(countdown(100_000).run().ok(), Some(100_000));
        crate::test_complete!("recursive_flat_map_is_stack_safe");
    }
}
