//! Retry with an explicit delay schedule.
//!
//! [`Task::retry`] and [`Task::retry_accumulating`] take the schedule as a
//! finite sequence of delays: after a retriable failure the next delay is
//! consumed, then the task is run again. The run stops at the first success,
//! at a failure the predicate rejects, or when the schedule is exhausted, so
//! a task runs at most `1 + delays.len()` times.
//!
//! Interruption failures are never retried. A predicate that panics counts
//! as a rejection.
//!
//! Each retry is a new step of the evaluation driver rather than a nested
//! call, so schedules of any length are stack-safe.
//!
//! [`RetryPolicy`] builds common schedules (exponential backoff with a cap,
//! fixed delay, immediate).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use asupertask::{Error, RetryPolicy, Task};
//!
//! let policy = RetryPolicy::fixed_delay(Duration::from_millis(1), 3);
//! let task = Task::<u8>::fail(Error::user("down")).retry(policy.delays(), Error::is_recoverable);
//! assert!(task.run().is_err());
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result, catch};
use crate::runtime::Eval;
use crate::task::Task;
use crate::tracing_compat::debug;

type Retriable = dyn Fn(&Error) -> bool + Send + Sync;

/// Policy describing a retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first attempt).
    /// Must be at least 1.
    pub max_attempts: u32,
    /// Initial delay before the first retry (after first failure).
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (typically 2.0).
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Creates a new retry policy with default settings.
    ///
    /// Defaults:
    /// - 3 attempts
    /// - 100ms initial delay
    /// - 30s max delay
    /// - 2.0 multiplier
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Sets the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the initial delay for the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Creates a policy with fixed delays (no exponential backoff).
    #[must_use]
    pub fn fixed_delay(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Creates a policy for immediate retries (no delay).
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed_delay(Duration::ZERO, max_attempts)
    }

    /// Validates the policy returns Ok if valid, or an error message.
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1");
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be at least 1.0");
        }
        Ok(())
    }

    /// The delay schedule: one entry per retry, `max_attempts - 1` in total.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .map(|attempt| calculate_delay(self, attempt))
            .collect()
    }

    /// Sum of all delays in the schedule.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.delays().into_iter().sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculates the delay before retry number `attempt` (1-indexed).
///
/// ```text
/// base_delay = initial_delay * multiplier^(attempt - 1)
/// delay      = min(base_delay, max_delay)
/// ```
#[must_use]
#[allow(
    clippy::cast_possible_wrap,  // exponent is bounded by practical max_attempts values
    clippy::cast_precision_loss, // acceptable for duration calculations in millisecond-second range
    clippy::cast_sign_loss,      // capped_nanos is the min() of two non-negative values
)]
pub fn calculate_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = attempt.saturating_sub(1);
    let multiplier_factor = policy.multiplier.powi(exponent as i32);
    let base_nanos = policy.initial_delay.as_nanos() as f64 * multiplier_factor;

    let max_nanos = policy.max_delay.as_nanos() as f64;
    let capped_nanos = base_nanos.min(max_nanos);

    Duration::from_nanos(capped_nanos as u64)
}

impl<A: Send + 'static> Task<A> {
    /// Re-runs this task after each retriable failure, waiting the next
    /// delay of `delays` first.
    pub fn retry(
        self,
        delays: impl IntoIterator<Item = Duration>,
        retriable: impl Fn(&Error) -> bool + Send + Sync + 'static,
    ) -> Self {
        let schedule = Schedule::new(delays, retriable, false);
        Self::from_eval(move || {
            retry_loop(self.clone(), schedule.clone(), 0, Vec::new())
                .map(|result| result.map(|(value, _)| value))
        })
    }

    /// Like [`retry`](Self::retry), also reporting the failures that were
    /// retried, oldest first.
    ///
    /// When the task finally fails, the earlier failures are available from
    /// [`Error::retry_history`] on the returned error.
    pub fn retry_accumulating(
        self,
        delays: impl IntoIterator<Item = Duration>,
        retriable: impl Fn(&Error) -> bool + Send + Sync + 'static,
    ) -> Task<(A, Vec<Error>)> {
        let schedule = Schedule::new(delays, retriable, true);
        Task::from_eval(move || retry_loop(self.clone(), schedule.clone(), 0, Vec::new()))
    }
}

#[derive(Clone)]
struct Schedule {
    delays: Arc<[Duration]>,
    retriable: Arc<Retriable>,
    accumulate: bool,
}

impl Schedule {
    fn new(
        delays: impl IntoIterator<Item = Duration>,
        retriable: impl Fn(&Error) -> bool + Send + Sync + 'static,
        accumulate: bool,
    ) -> Self {
        Self {
            delays: delays.into_iter().collect(),
            retriable: Arc::new(retriable),
            accumulate,
        }
    }

    fn should_retry(&self, error: &Error) -> bool {
        !error.is_interrupted() && catch(|| (self.retriable)(error)).unwrap_or(false)
    }
}

fn retry_loop<A: Send + 'static>(
    task: Task<A>,
    schedule: Schedule,
    attempt: usize,
    mut history: Vec<Error>,
) -> Eval<Result<(A, Vec<Error>)>> {
    task.eval().flat_map(move |result| match result {
        Ok(value) => Eval::now(Ok((value, history))),
        Err(error) => {
            if !schedule.should_retry(&error) {
                debug!(attempt, error = %error, "failure not retriable");
                return Eval::now(Err(error.with_retry_history(history)));
            }
            let Some(&delay) = schedule.delays.get(attempt) else {
                debug!(attempts = attempt + 1, error = %error, "retry schedule exhausted");
                return Eval::now(Err(error.with_retry_history(history)));
            };
            debug!(attempt = attempt + 1, ?delay, error = %error, "retry scheduled");
            if schedule.accumulate {
                history.push(error);
            }
            if delay.is_zero() {
                return Eval::suspend(move || retry_loop(task, schedule, attempt + 1, history));
            }
            Eval::<()>::sleep(delay).flat_map(move |()| retry_loop(task, schedule, attempt + 1, history))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{flaky_task, init_test_logging};
    use crate::types::CancelReason;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn policy_defaults() {
        init_test("policy_defaults");
        let policy = RetryPolicy::new();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        crate::test_complete!("policy_defaults");
    }

    #[test]
    fn policy_validation() {
        init_test("policy_validation");
        assert!(RetryPolicy::new().validate().is_ok());
        let mut invalid = RetryPolicy::new();
        invalid.max_attempts = 0;
        assert!(invalid.validate().is_err());
        invalid = RetryPolicy::new();
        invalid.multiplier = 0.5;
        assert!(invalid.validate().is_err());
        crate::test_complete!("policy_validation");
    }

    #[test]
    fn exponential_schedule_is_capped() {
        init_test("exponential_schedule_is_capped");
        let policy = RetryPolicy::new()
            .with_max_attempts(6)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        let expected: Vec<Duration> = [100, 200, 400, 500, 500]
            .into_iter()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(policy.delays(), expected);
        assert_eq!(policy.total_delay(), Duration::from_millis(1700));
        assert_eq!(calculate_delay(&policy, 0), Duration::ZERO);
        crate::test_complete!("exponential_schedule_is_capped");
    }

    #[test]
    fn fixed_and_immediate_schedules() {
        init_test("fixed_and_immediate_schedules");
        let fixed = RetryPolicy::fixed_delay(Duration::from_millis(10), 3);
        assert_eq!(fixed.delays(), vec![Duration::from_millis(10); 2]);
        assert_eq!(RetryPolicy::immediate(4).delays(), vec![Duration::ZERO; 3]);
        assert!(RetryPolicy::immediate(1).delays().is_empty());
        crate::test_complete!("fixed_and_immediate_schedules");
    }

    #[test]
    fn succeeds_after_transient_failures() {
        init_test("succeeds_after_transient_failures");
        let (task, attempts) = flaky_task(2);
        let delays = [Duration::from_millis(10), Duration::from_millis(20)];
        let started = Instant::now();
        let (value, history) = task
            .retry_accumulating(delays, |_| true)
            .run()
            .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let messages: Vec<_> = history.iter().filter_map(Error::message).collect();
        assert_eq!(messages, vec!["attempt 1 failed", "attempt 2 failed"]);
        assert!(started.elapsed() >= Duration::from_millis(30));
        crate::test_complete!("succeeds_after_transient_failures");
    }

    #[test]
    fn empty_schedule_never_retries() {
        init_test("empty_schedule_never_retries");
        let (task, attempts) = flaky_task(1);
        let err = task.retry([], |_| true).run().expect_err("no retries");
        assert_eq!(err.message(), Some("attempt 1 failed"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        crate::test_complete!("empty_schedule_never_retries");
    }

    #[test]
    fn rejected_failure_stops_immediately() {
        init_test("rejected_failure_stops_immediately");
        let (task, attempts) = flaky_task(5);
        let err = task
            .retry_accumulating(vec![Duration::ZERO; 5], |e| {
                e.message() != Some("attempt 2 failed")
            })
            .run()
            .expect_err("predicate rejects second failure");
        assert_eq!(err.message(), Some("attempt 2 failed"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let history: Vec<_> = err.retry_history().iter().filter_map(Error::message).collect();
        assert_eq!(history, vec!["attempt 1 failed"]);
        crate::test_complete!("rejected_failure_stops_immediately");
    }

    #[test]
    fn exhausted_schedule_reports_last_failure() {
        init_test("exhausted_schedule_reports_last_failure");
        let (task, attempts) = flaky_task(10);
        let err = task
            .retry(vec![Duration::ZERO; 3], |_| true)
            .run()
            .expect_err("exhausted");
        assert_eq!(err.message(), Some("attempt 4 failed"));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(err.retry_history().is_empty());
        crate::test_complete!("exhausted_schedule_reports_last_failure");
    }

    #[test]
    fn interruption_is_never_retried() {
        init_test("interruption_is_never_retried");
        let err = Task::<u8>::fail(Error::interrupted(CancelReason::user("stop")))
            .retry(vec![Duration::ZERO; 3], |_| true)
            .run()
            .expect_err("not retried");
        assert!(err.is_interrupted());
        crate::test_complete!("interruption_is_never_retried");
    }

    #[test]
    fn panicking_predicate_rejects() {
        init_test("panicking_predicate_rejects");
        let (task, attempts) = flaky_task(3);
        let err = task
            .retry(vec![Duration::ZERO; 3], |_| panic!("predicate"))
            .run()
            .expect_err("rejected");
        assert_eq!(err.message(), Some("attempt 1 failed"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        crate::test_complete!("panicking_predicate_rejects");
    }

    #[test]
    fn long_schedule_is_stack_safe() {
        init_test("long_schedule_is_stack_safe");
        let (task, attempts) = flaky_task(20_000);
        let (value, history) = task
            .retry_accumulating(vec![Duration::ZERO; 20_000], |_| true)
            .run()
            .expect("last attempt succeeds");
        assert_eq!(value, 20_001);
        assert_eq!(history.len(), 20_000);
        assert_eq!(attempts.load(Ordering::SeqCst), 20_001);
        crate::test_complete!("long_schedule_is_stack_safe");
    }
}
