//! Combination operations for unordered reduction.
//!
//! A [`Reducer`] folds values of type `A` into an accumulator with an
//! identity ([`zero`](Reducer::zero)), an injection ([`unit`](Reducer::unit)),
//! and an associative [`append`](Reducer::append). Values arrive in
//! completion order, so `append` must give the same observable result
//! whichever way partial accumulators are grouped or ordered.

use std::fmt;
use std::marker::PhantomData;

/// A monoid-shaped combination of `A` values into `Self::Output`.
pub trait Reducer<A>: Send + Sync + 'static {
    /// The accumulated result.
    type Output: Send + 'static;

    /// The identity accumulator.
    fn zero(&self) -> Self::Output;

    /// An accumulator holding exactly `value`.
    fn unit(&self, value: A) -> Self::Output;

    /// Adds `value` to an existing accumulator.
    fn cons(&self, value: A, acc: Self::Output) -> Self::Output {
        self.append(self.unit(value), acc)
    }

    /// Combines two accumulators. Must be associative.
    fn append(&self, left: Self::Output, right: Self::Output) -> Self::Output;
}

/// Collects values into a `Vec` in completion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct VecReducer;

impl<A: Send + 'static> Reducer<A> for VecReducer {
    type Output = Vec<A>;

    fn zero(&self) -> Vec<A> {
        Vec::new()
    }

    fn unit(&self, value: A) -> Vec<A> {
        vec![value]
    }

    fn cons(&self, value: A, mut acc: Vec<A>) -> Vec<A> {
        acc.push(value);
        acc
    }

    fn append(&self, mut left: Vec<A>, right: Vec<A>) -> Vec<A> {
        left.extend(right);
        left
    }
}

/// A reducer defined by an identity and an associative combine.
pub struct MonoidReducer<M, Z, C> {
    zero: Z,
    combine: C,
    marker: PhantomData<fn() -> M>,
}

impl<M, Z, C> MonoidReducer<M, Z, C>
where
    Z: Fn() -> M,
    C: Fn(M, M) -> M,
{
    /// Creates a reducer from `zero` and `combine`.
    pub const fn new(zero: Z, combine: C) -> Self {
        Self {
            zero,
            combine,
            marker: PhantomData,
        }
    }
}

impl<M, Z, C> fmt::Debug for MonoidReducer<M, Z, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonoidReducer")
            .field("output", &std::any::type_name::<M>())
            .finish()
    }
}

impl<M, Z, C> Reducer<M> for MonoidReducer<M, Z, C>
where
    M: Send + 'static,
    Z: Fn() -> M + Send + Sync + 'static,
    C: Fn(M, M) -> M + Send + Sync + 'static,
{
    type Output = M;

    fn zero(&self) -> M {
        (self.zero)()
    }

    fn unit(&self, value: M) -> M {
        value
    }

    fn cons(&self, value: M, acc: M) -> M {
        (self.combine)(value, acc)
    }

    fn append(&self, left: M, right: M) -> M {
        (self.combine)(left, right)
    }
}
