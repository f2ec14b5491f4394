//! The one-shot asynchronous evaluation primitive.
//!
//! An [`Eval<T>`] describes a computation that eventually produces a `T`.
//! It is a small free structure of four shapes: an immediate value, a
//! suspended thunk, a callback registration, and a bind of a computation to
//! its continuation. Nothing runs until the value is handed to one of the
//! entry points ([`Eval::run_with`], [`Eval::run`], ...).
//!
//! # Driver
//!
//! Evaluation is performed by an iterative loop holding an explicit,
//! heap-allocated continuation stack. Binding pushes a continuation; a value
//! pops one. Neither nesting direction of `flat_map` consumes call-stack
//! frames, so arbitrarily long chains are safe. Dropping a chain that never
//! ran, or one abandoned midway, unlinks it iteratively as well.
//!
//! A callback registration *parks* the loop. If the callback fires while the
//! registration is still in progress (a synchronous callback), the same loop
//! picks the value up and continues; otherwise the loop returns and whichever
//! thread invokes the callback resumes it. The callback is consumed on first
//! use, so a registration can never resume an evaluation twice.
//!
//! # Interruption
//!
//! The driver checks the context's [`Interrupt`](crate::Interrupt) before
//! every step. Once it is requested the evaluation is abandoned silently: no
//! further steps run and the final callback is never invoked. Observing the
//! interruption as a failure is the job of the layer above.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::completion::Latch;
use super::{Context, Runtime};
use crate::tracing_compat::trace;
use crate::types::Interrupt;

/// An erased value flowing through the driver.
pub(crate) type Value = Box<dyn Any + Send>;

/// Callback handed to a registration; invoking it resumes the evaluation.
pub type Resume<T> = Box<dyn FnOnce(T) + Send>;

type Cont = Box<dyn FnOnce(Value) -> Node + Send>;
type Register = Box<dyn FnOnce(Resume<Value>, &Context) + Send>;
type Done = Box<dyn FnOnce(Value) + Send>;

enum Node {
    Now(Value),
    Suspend(Box<dyn FnOnce() -> Node + Send>),
    Async(Register),
    Bind(Link, Cont),
}

/// The computation a continuation is bound to.
///
/// Only empty after [`Link::into_node`]. Dropping a link walks nested binds
/// in a loop instead of recursing through them.
struct Link(Option<Box<Node>>);

impl Link {
    fn new(node: Node) -> Self {
        Self(Some(Box::new(node)))
    }

    fn into_node(mut self) -> Node {
        self.0
            .take()
            .map_or_else(|| Node::Now(Box::new(())), |node| *node)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(mut node) = next {
            next = match node.as_mut() {
                Node::Bind(link, _) => link.0.take(),
                _ => None,
            };
        }
    }
}

/// A one-shot, stack-safe asynchronous computation producing a `T`.
#[must_use = "an Eval does nothing until it is run"]
pub struct Eval<T> {
    node: Node,
    marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Eval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.node {
            Node::Now(_) => "now",
            Node::Suspend(_) => "suspend",
            Node::Async(_) => "async",
            Node::Bind(..) => "bind",
        };
        f.debug_struct("Eval").field("shape", &shape).finish()
    }
}

pub(crate) fn cast<T: 'static>(value: Value) -> T {
    match value.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => unreachable!("evaluation produced a value of the wrong type"),
    }
}

impl<T: Send + 'static> Eval<T> {
    const fn from_node(node: Node) -> Self {
        Self {
            node,
            marker: PhantomData,
        }
    }

    /// An already-available value.
    pub fn now(value: T) -> Self {
        Self::from_node(Node::Now(Box::new(value)))
    }

    /// A value computed when the evaluation reaches this step.
    pub fn delay(f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self::from_node(Node::Suspend(Box::new(move || Node::Now(Box::new(f())))))
    }

    /// Defers construction of the computation itself.
    pub fn suspend(f: impl FnOnce() -> Self + Send + 'static) -> Self {
        Self::from_node(Node::Suspend(Box::new(move || f().node)))
    }

    /// A computation completed by an external callback.
    ///
    /// `register` receives the resume callback and the evaluation context.
    /// It may invoke the callback synchronously, later from any thread, or
    /// never; dropping the callback abandons the evaluation.
    pub fn listen(register: impl FnOnce(Resume<T>, &Context) + Send + 'static) -> Self {
        Self::from_node(Node::Async(Box::new(
            move |resume: Resume<Value>, ctx: &Context| {
                register(Box::new(move |value: T| resume(Box::new(value))), ctx);
            },
        )))
    }

    /// A computation completed by an external callback, ignoring the context.
    pub fn from_callback(register: impl FnOnce(Resume<T>) + Send + 'static) -> Self {
        Self::listen(move |resume, _| register(resume))
    }

    /// A computation that never produces a value.
    pub fn never() -> Self {
        Self::listen(|resume, _| drop(resume))
    }

    /// Transforms the produced value.
    pub fn map<U: Send + 'static>(self, f: impl FnOnce(T) -> U + Send + 'static) -> Eval<U> {
        Eval::from_node(Node::Bind(
            Link::new(self.node),
            Box::new(move |value| Node::Now(Box::new(f(cast::<T>(value))))),
        ))
    }

    /// Sequences a dependent computation.
    pub fn flat_map<U: Send + 'static>(
        self,
        f: impl FnOnce(T) -> Eval<U> + Send + 'static,
    ) -> Eval<U> {
        Eval::from_node(Node::Bind(
            Link::new(self.node),
            Box::new(move |value| f(cast::<T>(value)).node),
        ))
    }

    /// Continues this computation on a worker thread of the context runtime.
    pub fn fork(self) -> Self {
        Eval::<()>::listen(|resume, ctx| ctx.runtime().execute(move || resume(())))
            .flat_map(move |()| self)
    }

    /// Starts this computation after `delay`.
    pub fn after(self, delay: Duration) -> Self {
        Eval::<()>::sleep(delay).flat_map(move |()| self)
    }

    /// Drives the evaluation under `ctx`, invoking `done` with the value.
    ///
    /// Runs on the calling thread up to the first asynchronous boundary.
    /// `done` is invoked at most once, and never if `ctx`'s interrupt is
    /// requested before the evaluation finishes.
    pub fn run_with(self, ctx: Context, done: impl FnOnce(T) + Send + 'static) {
        let frame = Frame {
            stack: Vec::new(),
            ctx,
            done: Box::new(move |value| done(cast::<T>(value))),
        };
        drive(self.node, frame);
    }

    /// Runs on `runtime` and delivers the value to `callback`.
    pub fn run_async(self, runtime: &Runtime, callback: impl FnOnce(T) + Send + 'static) {
        self.run_with(Context::new(runtime.clone(), Interrupt::new()), callback);
    }

    /// Runs on `runtime`, abandoning the evaluation once `interrupt` is requested.
    pub fn run_async_interruptibly(
        self,
        runtime: &Runtime,
        callback: impl FnOnce(T) + Send + 'static,
        interrupt: &Interrupt,
    ) {
        self.run_with(Context::new(runtime.clone(), interrupt.clone()), callback);
    }

    /// Blocks the calling thread until the value is available.
    pub fn run(self, runtime: &Runtime) -> T {
        let latch = Arc::new(Latch::new());
        let sink = Arc::clone(&latch);
        self.run_async(runtime, move |value| sink.set(value));
        latch.wait()
    }

    /// Blocks for at most `timeout`.
    ///
    /// The evaluation is started on a worker thread so that the bound holds
    /// even when a step blocks. On expiry `interrupt` is requested and `None`
    /// is returned; a value that arrives later is discarded.
    pub fn run_for(self, runtime: &Runtime, timeout: Duration, interrupt: &Interrupt) -> Option<T> {
        let latch = Arc::new(Latch::new());
        let sink = Arc::clone(&latch);
        let ctx = Context::new(runtime.clone(), interrupt.clone());
        runtime.execute(move || self.run_with(ctx, move |value| sink.set(value)));
        let value = latch.wait_for(timeout);
        if value.is_none() {
            interrupt.request(crate::types::CancelReason::timeout());
        }
        value
    }
}

impl Eval<()> {
    /// Completes with `()` after `delay`, without occupying a thread.
    pub fn sleep(delay: Duration) -> Self {
        Self::listen(move |resume, ctx| {
            let _ = ctx.runtime().schedule(delay, move || resume(()));
        })
    }
}

impl Eval<Context> {
    /// Produces the context the evaluation is running under.
    pub fn context() -> Self {
        Self::listen(|resume, ctx| resume(ctx.clone()))
    }
}

struct Frame {
    stack: Vec<Cont>,
    ctx: Context,
    done: Done,
}

enum Handoff {
    Registering,
    Ready(Value),
    Parked(Frame),
    Resumed,
}

fn drive(mut node: Node, mut frame: Frame) {
    loop {
        if frame.ctx.interrupt().is_requested() {
            trace!(depth = frame.stack.len(), "evaluation abandoned after interrupt");
            return;
        }
        node = match node {
            Node::Now(value) => match frame.stack.pop() {
                Some(cont) => cont(value),
                None => {
                    (frame.done)(value);
                    return;
                }
            },
            Node::Suspend(thunk) => thunk(),
            Node::Bind(inner, cont) => {
                frame.stack.push(cont);
                inner.into_node()
            }
            Node::Async(register) => match park(register, frame) {
                Some((value, resumed)) => {
                    frame = resumed;
                    Node::Now(value)
                }
                None => return,
            },
        };
    }
}

/// Runs a registration. Returns the value if it arrived synchronously;
/// otherwise stores the frame for the callback to resume and returns `None`.
fn park(register: Register, frame: Frame) -> Option<(Value, Frame)> {
    let handoff = Arc::new(Mutex::new(Handoff::Registering));
    let slot = Arc::clone(&handoff);
    let resume: Resume<Value> = Box::new(move |value| {
        let parked = {
            let mut state = slot.lock();
            match std::mem::replace(&mut *state, Handoff::Resumed) {
                Handoff::Registering => {
                    *state = Handoff::Ready(value);
                    return;
                }
                Handoff::Parked(frame) => frame,
                other => {
                    *state = other;
                    return;
                }
            }
        };
        drive(Node::Now(value), parked);
    });

    register(resume, &frame.ctx);

    let mut state = handoff.lock();
    match std::mem::replace(&mut *state, Handoff::Resumed) {
        Handoff::Ready(value) => Some((value, frame)),
        Handoff::Registering => {
            *state = Handoff::Parked(frame);
            None
        }
        Handoff::Parked(_) | Handoff::Resumed => unreachable!("registration parked twice"),
    }
}
