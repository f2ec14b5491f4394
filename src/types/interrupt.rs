//! Shared interruption signal.
//!
//! An [`Interrupt`] is a cloneable handle to an atomic flag. The evaluation
//! driver checks it before every step; setting it asks the computation to
//! stop producing further steps. Nothing is forcibly killed: an in-flight
//! callback registration still completes on its own schedule and its result
//! is dropped.
//!
//! Interrupts form a tree. A child created with [`Interrupt::child`] reports
//! itself requested when it or any ancestor is, so cancelling a combinator
//! also cancels everything it started.

use super::cancel::CancelReason;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between a runner and its caller.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Default)]
struct InterruptInner {
    requested: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    parent: Option<Interrupt>,
}

impl Interrupt {
    /// Creates a fresh, unrequested interrupt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a child that observes this interrupt as well as its own flag.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(InterruptInner {
                requested: AtomicBool::new(false),
                reason: Mutex::new(None),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Requests interruption.
    ///
    /// Repeated requests strengthen the recorded reason but are otherwise
    /// no-ops. Returns `true` if this call set a previously clear flag.
    pub fn request(&self, reason: CancelReason) -> bool {
        {
            let mut slot = self.inner.reason.lock();
            match slot.as_mut() {
                Some(current) => {
                    current.strengthen(&reason);
                }
                None => *slot = Some(reason),
            }
        }
        let first = !self.inner.requested.swap(true, Ordering::AcqRel);
        if first {
            crate::tracing_compat::debug!(
                reason = ?self.inner.reason.lock().as_ref(),
                "interrupt requested"
            );
        }
        first
    }

    /// Returns true if this interrupt or any ancestor has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        let mut current = Some(self);
        while let Some(interrupt) = current {
            if interrupt.inner.requested.load(Ordering::Acquire) {
                return true;
            }
            current = interrupt.inner.parent.as_ref();
        }
        false
    }

    /// Returns the reason of the nearest requested interrupt in the chain.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        let mut current = Some(self);
        while let Some(interrupt) = current {
            if interrupt.inner.requested.load(Ordering::Acquire) {
                return interrupt.inner.reason.lock().clone();
            }
            current = interrupt.inner.parent.as_ref();
        }
        None
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("requested", &self.is_requested())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}
