//! Algebraic laws of task composition, checked with proptest.

use asupertask::test_utils::init_test_logging;
use asupertask::{Error, ErrorKind, Task};
use proptest::prelude::*;

fn arb_task() -> impl Strategy<Value = Task<i64>> {
    prop_oneof![
        any::<i64>().prop_map(Task::now),
        "[a-z]{1,8}".prop_map(|msg| Task::fail(Error::user(msg))),
        any::<i64>().prop_map(|n| Task::delay(move || n)),
    ]
}

fn outcome(task: &Task<i64>) -> Result<i64, (ErrorKind, Option<String>)> {
    task.run()
        .map_err(|err| (err.kind(), err.message().map(str::to_string)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn map_identity(task in arb_task()) {
        init_test_logging();
        let mapped = task.clone().map(|n| n);
        prop_assert_eq!(outcome(&mapped), outcome(&task));
    }

    #[test]
    fn map_composition(task in arb_task(), a in -1000_i64..1000, b in -1000_i64..1000) {
        init_test_logging();
        let chained = task.clone().map(move |n| n.wrapping_add(a)).map(move |n| n.wrapping_mul(b));
        let fused = task.map(move |n| n.wrapping_add(a).wrapping_mul(b));
        prop_assert_eq!(outcome(&chained), outcome(&fused));
    }

    #[test]
    fn flat_map_left_identity(n in any::<i64>(), k in 1_i64..100) {
        init_test_logging();
        let f = move |x: i64| Task::now(x.wrapping_mul(k));
        prop_assert_eq!(outcome(&Task::now(n).flat_map(f)), outcome(&f(n)));
    }

    #[test]
    fn flat_map_right_identity(task in arb_task()) {
        init_test_logging();
        prop_assert_eq!(outcome(&task.clone().flat_map(Task::now)), outcome(&task));
    }

    #[test]
    fn flat_map_associativity(task in arb_task(), a in -100_i64..100, b in -100_i64..100) {
        init_test_logging();
        let f = move |x: i64| Task::now(x.wrapping_add(a));
        let g = move |x: i64| {
            if x % 2 == 0 {
                Task::now(x.wrapping_mul(b))
            } else {
                Task::fail(Error::user("odd"))
            }
        };
        let left = task.clone().flat_map(f).flat_map(g);
        let right = task.flat_map(move |x| f(x).flat_map(g));
        prop_assert_eq!(outcome(&left), outcome(&right));
    }

    #[test]
    fn attempt_never_fails(task in arb_task()) {
        init_test_logging();
        let attempted = task.clone().attempt().run();
        prop_assert!(attempted.is_ok());
        let inner = attempted.unwrap_or_else(|_| unreachable!());
        prop_assert_eq!(
            inner.map_err(|err| (err.kind(), err.message().map(str::to_string))),
            outcome(&task)
        );
    }

    #[test]
    fn handle_all_recovers(task in arb_task(), fallback in any::<i64>()) {
        init_test_logging();
        let recovered = task.clone().handle(move |_| Some(fallback)).run();
        let expected = outcome(&task).unwrap_or(fallback);
        prop_assert_eq!(recovered.ok(), Some(expected));
    }
}

#[test]
fn tasks_are_rerunnable_and_not_memoized() {
    init_test_logging();
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = std::sync::Arc::clone(&counter);
    let task = Task::delay(move || seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
    assert_eq!(task.run().ok(), Some(0));
    assert_eq!(task.run().ok(), Some(1));
    assert_eq!(task.clone().run().ok(), Some(2));
}

#[test]
fn deep_flat_map_chain_is_stack_safe() {
    init_test_logging();
    let mut task = Task::now(0_u64);
    for _ in 0..50_000 {
        task = task.flat_map(|n| Task::now(n + 1));
    }
    assert_eq!(task.run().ok(), Some(50_000));
}
