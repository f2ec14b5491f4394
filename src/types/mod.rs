//! Core types shared by the runtime and the task layer.
//!
//! - [`cancel`]: Cancellation reason and kind types
//! - [`interrupt`]: Shared, hierarchical interruption signal

pub mod cancel;
pub mod interrupt;

pub use cancel::{CancelKind, CancelReason};
pub use interrupt::Interrupt;
