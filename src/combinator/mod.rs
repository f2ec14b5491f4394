//! Combinators over tasks.
//!
//! - [`retry`]: Retry over an explicit delay schedule, plus [`RetryPolicy`]
//! - [`timeout`]: Deadlines ([`Task::timed`](crate::Task::timed))
//! - [`reduce`]: Unordered parallel reduction with optional fail-fast
//! - [`reducer`]: Combination operations for [`reduce`]
//! - [`race`](mod@race): First to complete wins, losers are interrupted

pub mod race;
pub mod reduce;
pub mod reducer;
pub mod retry;
pub mod timeout;

pub use race::race;
pub use reduce::{gather_unordered, reduce_unordered};
pub use reducer::{MonoidReducer, Reducer, VecReducer};
pub use retry::{RetryPolicy, calculate_delay};
