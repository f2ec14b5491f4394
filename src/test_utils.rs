//! Test utilities for asupertask.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Small-runtime constructors
//! - Deterministic flaky tasks for retry tests
//!
//! # Example
//! ```
//! use asupertask::test_utils::{init_test_logging, test_runtime};
//! use asupertask::Task;
//!
//! init_test_logging();
//! let runtime = test_runtime();
//! assert_eq!(runtime.block_on(&Task::now(1)).ok(), Some(1));
//! ```

use crate::error::Error;
use crate::runtime::Runtime;
use crate::task::Task;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Worker count used by [`test_runtime`].
pub const TEST_WORKER_THREADS: usize = 4;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Create a small dedicated runtime for a test.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn test_runtime() -> Runtime {
    Runtime::builder()
        .worker_threads(TEST_WORKER_THREADS)
        .min_threads(1)
        .idle_timeout(Duration::from_secs(1))
        .thread_name_prefix("asupertask-test")
        .build()
        .expect("failed to build test runtime")
}

/// A task that fails `failures` times, then succeeds with the attempt count.
///
/// Returns the task and a counter of how many times it has been evaluated.
#[must_use]
pub fn flaky_task(failures: usize) -> (Task<usize>, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let task = Task::try_delay(move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= failures {
            Err(Error::user(format!("attempt {attempt} failed")))
        } else {
            Ok(attempt)
        }
    });
    (task, attempts)
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
