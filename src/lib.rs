//! Asupertask: cancel-correct, stack-safe asynchronous tasks.
//!
//! # Overview
//!
//! A [`Task<A>`] is a lazy, re-runnable description of a computation that
//! completes with a [`Result<A>`]. Tasks compose with `map`, `flat_map` and
//! recovery combinators, and are executed by a small [`Runtime`] made of an
//! elastic worker pool and a timer thread. Asynchronous boundaries are
//! callback registrations, so no executor or `Future` machinery is required;
//! [`Task`] still implements [`IntoFuture`](std::future::IntoFuture) for use
//! inside other async code.
//!
//! # Core Guarantees
//!
//! - **Exactly-once completion**: every run delivers at most one outcome,
//!   whatever races between completion, deadlines and cancellation
//! - **Stack safety**: arbitrarily long `map`/`flat_map` chains and recursive
//!   task definitions are evaluated iteratively
//! - **Cancel-correctness**: interruption stops a run at its next step and
//!   its outcome is discarded; recovery combinators never swallow it
//! - **No lost panics**: a panic in user code becomes an
//!   [`ErrorKind::Panicked`] failure
//!
//! # Module Structure
//!
//! - [`task`]: The [`Task`] type, its constructors, combinators and runners
//! - [`combinator`]: Retry, deadlines, races and unordered reduction
//! - [`runtime`]: Worker pool, timer, and the evaluation engine
//! - [`types`]: Interruption flags and cancellation reasons
//! - [`config`]: Runtime configuration and environment overrides
//! - [`error`](mod@error): Error types
//! - [`tracing_compat`]: Optional tracing integration (requires `tracing-integration` feature)
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use asupertask::{gather_unordered, Task};
//!
//! let squares = (1..=4_u32).map(|n| Task::spawn(move || n * n));
//! let total = gather_unordered(squares, true)
//!     .map(|values| values.into_iter().sum::<u32>())
//!     .timed(Duration::from_secs(5));
//! assert_eq!(total.run().ok(), Some(30));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod combinator;
pub mod config;
pub mod error;
pub mod runtime;
pub mod task;
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;
pub mod tracing_compat;
pub mod types;

pub use combinator::{
    MonoidReducer, Reducer, RetryPolicy, VecReducer, gather_unordered, race, reduce_unordered,
};
pub use config::{ConfigError, RuntimeConfig};
pub use error::{Error, ErrorKind, Recoverability, Result, ResultExt};
pub use runtime::{Context, Eval, Runtime, RuntimeBuilder};
pub use task::{Callback, CancelHandle, Task, TaskFuture};
pub use types::{CancelKind, CancelReason, Interrupt};
