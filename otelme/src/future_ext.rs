//! Task-scoped spans for futures and streams.
//!
//! A guard from [`Tell::enter`](crate::Tell::enter) is thread-bound, so in
//! async code the span is carried by the [`Told`] adapter instead: the scope
//! is attached for exactly the duration of each poll and detached before the
//! task suspends, which keeps it from leaking into unrelated tasks that share
//! the thread.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures_core::Stream;
use opentelemetry::trace::{Status, TraceContextExt};
use opentelemetry::Context;
use pin_project::{pin_project, pinned_drop};

use crate::scope;
use crate::Tell;

/// A future or stream scoped by a span.
///
/// The span starts when the adapter is constructed, is current while the
/// inner value is being polled, and ends when the inner value completes or
/// the adapter is dropped, so cancellation still releases the span. A panic
/// inside `poll` ends the span with an error status.
#[pin_project(PinnedDrop)]
#[derive(Debug)]
pub struct Told<T> {
    #[pin]
    inner: T,
    scope: Option<Context>,
}

impl<T> Told<T> {
    fn new(inner: T, receiver: Tell) -> Self {
        Told {
            inner,
            scope: Some(scope::new_scope_context(receiver.name)),
        }
    }
}

impl<T: Future> Future for Told<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let Some(cx) = this.scope.as_ref() else {
            return this.inner.poll(task_cx);
        };
        let poll = {
            let _frame = scope::attach(cx.clone());
            this.inner.poll(task_cx)
        };
        if poll.is_ready() {
            if let Some(cx) = this.scope.take() {
                cx.span().end();
            }
        }
        poll
    }
}

impl<T: Stream> Stream for Told<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let Some(cx) = this.scope.as_ref() else {
            return this.inner.poll_next(task_cx);
        };
        let poll = {
            let _frame = scope::attach(cx.clone());
            this.inner.poll_next(task_cx)
        };
        if matches!(poll, Poll::Ready(None)) {
            if let Some(cx) = this.scope.take() {
                cx.span().end();
            }
        }
        poll
    }
}

#[pinned_drop]
impl<T> PinnedDrop for Told<T> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(cx) = this.scope.take() {
            let span = cx.span();
            if std::thread::panicking() {
                span.set_status(Status::error(scope::PANIC_DESCRIPTION));
            }
            span.end();
        }
    }
}

impl<F: Future> FutureTellExt for F {}

/// Extension trait scoping futures with a span.
pub trait FutureTellExt: Sized {
    /// Wraps this future so it runs inside a span named after `receiver`.
    ///
    /// # Examples
    ///
    /// ```
    /// use otelme::{tell, FutureTellExt};
    ///
    /// async fn lookup(user: &str) -> usize {
    ///     otelme::tell("user.len") | user.len()
    /// }
    ///
    /// # let _ =
    /// lookup("ada").told(tell("lookup"));
    /// ```
    fn told(self, receiver: Tell) -> Told<Self> {
        Told::new(self, receiver)
    }
}

impl<S: Stream> StreamTellExt for S {}

/// Extension trait scoping streams with a span.
///
/// The span covers the whole life of the stream and ends when the stream
/// finishes or is dropped.
pub trait StreamTellExt: Sized {
    /// Wraps this stream so it is polled inside a span named after
    /// `receiver`.
    fn told(self, receiver: Tell) -> Told<Self> {
        Told::new(self, receiver)
    }
}
