//! First-to-complete race over several tasks.
//!
//! [`race`] starts every task on the worker pool. The first outcome, success
//! or failure, is delivered; every other run is interrupted with
//! [`CancelKind::RaceLost`](crate::CancelKind::RaceLost) and its outcome is
//! discarded. Racing no tasks never completes.

use std::sync::Arc;

use crate::runtime::{Completion, Eval};
use crate::task::Task;
use crate::tracing_compat::trace;
use crate::types::CancelReason;

/// Runs `tasks` concurrently and completes with whichever finishes first.
pub fn race<A: Send + 'static>(tasks: impl IntoIterator<Item = Task<A>>) -> Task<A> {
    let tasks: Arc<[Task<A>]> = tasks.into_iter().collect();
    if tasks.is_empty() {
        return Task::never();
    }
    Task::from_eval(move || {
        let tasks = Arc::clone(&tasks);
        Eval::listen(move |resume, ctx| {
            let interrupt = ctx.interrupt().child();
            let completion = Arc::new(Completion::new(resume));
            for (index, task) in tasks.iter().enumerate() {
                let task = task.clone();
                let completion = Arc::clone(&completion);
                let losers = interrupt.clone();
                let inner = ctx.with_interrupt(interrupt.clone());
                ctx.runtime().execute(move || {
                    task.eval().run_with(inner, move |result| {
                        if completion.complete(result) {
                            trace!(winner = index, "race decided");
                            losers.request(CancelReason::race_lost());
                        }
                    });
                });
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fastest_task_wins() {
        init_test_logging();
        crate::test_phase!("fastest_task_wins");
        let loser_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&loser_ran);
        let slow = Task::sleep(Duration::from_millis(200)).map(move |()| {
            flag.store(true, Ordering::SeqCst);
            "slow"
        });
        let fast = Task::now("fast").after(Duration::from_millis(5));
        assert_eq!(race(vec![slow, fast]).run().ok(), Some("fast"));

        thread::sleep(Duration::from_millis(300));
        assert!(!loser_ran.load(Ordering::SeqCst));
        crate::test_complete!("fastest_task_wins");
    }

    #[test]
    fn first_failure_also_wins() {
        init_test_logging();
        let failing = Task::<u8>::fail(Error::user("first"));
        let slow = Task::now(1_u8).after(Duration::from_millis(200));
        let err = race(vec![failing, slow]).run().expect_err("failure first");
        assert_eq!(err.message(), Some("first"));
    }

    #[test]
    fn empty_race_never_completes() {
        init_test_logging();
        let err = race(Vec::<Task<u8>>::new())
            .run_for(Duration::from_millis(20))
            .expect_err("never completes");
        assert!(err.is_timeout());
    }
}
