//! Unordered parallel reduction and races.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use asupertask::test_utils::init_test_logging;
use asupertask::{
    CancelKind, Error, ErrorKind, Eval, MonoidReducer, Reducer, Task, gather_unordered, race,
    reduce_unordered,
};

/// Collects distinct values into a set.
struct SetReducer;

impl Reducer<u32> for SetReducer {
    type Output = HashSet<u32>;

    fn zero(&self) -> HashSet<u32> {
        HashSet::new()
    }

    fn unit(&self, value: u32) -> HashSet<u32> {
        HashSet::from([value])
    }

    fn append(&self, mut left: HashSet<u32>, right: HashSet<u32>) -> HashSet<u32> {
        left.extend(right);
        left
    }
}

#[test]
fn gather_runs_tasks_in_parallel() {
    init_test_logging();
    asupertask::test_phase!("gather_runs_tasks_in_parallel");
    let tasks = (0..4).map(|n| Task::sleep(Duration::from_millis(100)).map(move |()| n));
    let started = Instant::now();
    let values = gather_unordered(tasks, true).run().expect("all succeed");
    let elapsed = started.elapsed();

    let set: HashSet<_> = values.into_iter().collect();
    assert_eq!(set, HashSet::from([0, 1, 2, 3]));
    asupertask::assert_with_log!(
        elapsed < Duration::from_millis(350),
        "sleeps overlap",
        "< 350ms",
        elapsed
    );
    asupertask::test_complete!("gather_runs_tasks_in_parallel");
}

#[test]
fn custom_reducer_folds_completion_order() {
    init_test_logging();
    let tasks = (0..50_u32).map(|n| Task::spawn(move || n % 10));
    let distinct = reduce_unordered(tasks, SetReducer, true).run().expect("all succeed");
    assert_eq!(distinct, (0..10).collect());
}

#[test]
fn reduction_is_rerunnable() {
    init_test_logging();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let task = Task::delay(move || counter.fetch_add(1, Ordering::SeqCst));
    let sum = reduce_unordered(
        vec![task.clone(), task],
        MonoidReducer::new(|| 0_usize, |a: usize, b: usize| a + b),
        true,
    );
    assert_eq!(sum.run().ok(), Some(1));
    assert_eq!(sum.run().ok(), Some(5));
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}

#[test]
fn fail_fast_returns_before_slow_siblings() {
    init_test_logging();
    let slow = Task::sleep(Duration::from_secs(2)).map(|()| 0_u8);
    let failing = Task::sleep(Duration::from_millis(10))
        .flat_map(|()| Task::<u8>::fail(Error::user("boom")));
    let started = Instant::now();
    let err = gather_unordered(vec![slow.clone(), failing, slow], true)
        .run()
        .expect_err("fails fast");
    assert_eq!(err.message(), Some("boom"));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn siblings_observe_sibling_failed_reason() {
    init_test_logging();
    let (tx, rx) = std::sync::mpsc::channel();
    let tx = Arc::new(parking_lot::Mutex::new(tx));
    let watcher = Task::from_eval(move || {
        let tx = Arc::clone(&tx);
        Eval::listen(move |resume, ctx| {
            let interrupt = ctx.interrupt().clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                let _ = tx.lock().send(interrupt.reason().map(|reason| reason.kind()));
                resume(Ok(0_u8));
            });
        })
    });
    let failing = Task::<u8>::fail(Error::user("boom"));
    let err = gather_unordered(vec![failing, watcher], true)
        .run()
        .expect_err("fails fast");
    assert_eq!(err.message(), Some("boom"));
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)),
        Ok(Some(CancelKind::FailFast))
    );
}

#[test]
fn race_interrupts_losers() {
    init_test_logging();
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    let slow = Task::sleep(Duration::from_millis(100)).map(move |()| {
        counter.fetch_add(1, Ordering::SeqCst);
        "slow"
    });
    let winner = race(vec![slow.clone(), Task::now("fast"), slow]).run();
    assert_eq!(winner.ok(), Some("fast"));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[test]
fn timed_reduction_reports_timeout() {
    init_test_logging();
    let slow = Task::sleep(Duration::from_secs(2)).map(|()| 1_u8);
    let err = gather_unordered(vec![slow.clone(), slow], true)
        .timed(Duration::from_millis(20))
        .run()
        .expect_err("deadline");
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
