//! # Select: Ordered Race over Dynamic Sources
//!
//! A node waits on a set of sources whose size changes every render pass:
//! its own sink, each live child, each running worker. [`poll_first`] polls
//! them in a fixed order and yields the first one that is ready.
//!
//! ## Guarantees
//!
//! * **Deterministic priority**: when several sources are ready, the lowest
//!   index wins.
//! * **Nothing lost**: sources after the winner are not polled, and sources
//!   polled before it were pending, so no value is taken and discarded.
//! * **Empty is idle**: racing zero sources never resolves.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A source that can be polled for its next value.
pub trait Contender {
    type Output;

    fn poll_contend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output>;
}

impl<C: Contender + ?Sized> Contender for &mut C {
    type Output = C::Output;

    fn poll_contend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output> {
        (**self).poll_contend(cx)
    }
}

impl<C: Contender + ?Sized> Contender for Box<C> {
    type Output = C::Output;

    fn poll_contend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output> {
        (**self).poll_contend(cx)
    }
}

/// Contender backed by a polling closure.
pub struct FromFn<F>(F);

pub fn from_fn<T, F>(poll: F) -> FromFn<F>
where
    F: FnMut(&mut Context<'_>) -> Poll<T>,
{
    FromFn(poll)
}

impl<T, F> Contender for FromFn<F>
where
    F: FnMut(&mut Context<'_>) -> Poll<T>,
{
    type Output = T;

    fn poll_contend(&mut self, cx: &mut Context<'_>) -> Poll<T> {
        (self.0)(cx)
    }
}

/// Polls `contenders` in iteration order and returns the index and value of
/// the first ready one.
pub fn poll_first<I>(
    contenders: I,
    cx: &mut Context<'_>,
) -> Poll<(usize, <I::Item as Contender>::Output)>
where
    I: IntoIterator,
    I::Item: Contender,
{
    for (index, mut contender) in contenders.into_iter().enumerate() {
        if let Poll::Ready(value) = contender.poll_contend(cx) {
            return Poll::Ready((index, value));
        }
    }
    Poll::Pending
}

/// Future resolving to the first ready contender of a fixed list.
pub struct Race<C> {
    contenders: Vec<C>,
}

pub fn race<C: Contender>(contenders: Vec<C>) -> Race<C> {
    Race { contenders }
}

impl<C> Race<C> {
    pub fn into_inner(self) -> Vec<C> {
        self.contenders
    }
}

impl<C: Contender + Unpin> Future for Race<C> {
    type Output = (usize, C::Output);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        poll_first(this.contenders.iter_mut(), cx)
    }
}
