use crate::Activity;
use futures_core::Stream;
use futures_sink::Sink;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

pin_project! {
    /// A future, stream, or sink that carries its own current-activity slot.
    ///
    /// The slot value is swapped into the executing thread before the inner
    /// type is polled and captured back out afterwards, so activity starts
    /// and stops inside the wrapped work travel with the logical path, and
    /// the worker thread's own slot is left exactly as it was found.
    #[derive(Debug)]
    pub struct WithActivity<T> {
        #[pin]
        inner: T,
        slot: Option<Activity>,
    }
}

impl<T> WithActivity<T> {
    fn in_scope<R>(slot: &mut Option<Activity>, f: impl FnOnce() -> R) -> R {
        let outer = crate::context::swap(slot.take());
        let result = f();
        *slot = crate::context::swap(outer);
        result
    }
}

impl<T: std::future::Future> std::future::Future for WithActivity<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let inner = this.inner;
        Self::in_scope(this.slot, || inner.poll(task_cx))
    }
}

impl<T: Stream> Stream for WithActivity<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let inner = this.inner;
        Self::in_scope(this.slot, || T::poll_next(inner, task_cx))
    }
}

impl<I, T: Sink<I>> Sink<I> for WithActivity<T> {
    type Error = T::Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let inner = this.inner;
        Self::in_scope(this.slot, || T::poll_ready(inner, task_cx))
    }

    fn start_send(self: Pin<&mut Self>, item: I) -> Result<(), Self::Error> {
        let this = self.project();
        let inner = this.inner;
        Self::in_scope(this.slot, || T::start_send(inner, item))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let inner = this.inner;
        Self::in_scope(this.slot, || T::poll_flush(inner, task_cx))
    }

    fn poll_close(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let inner = this.inner;
        Self::in_scope(this.slot, || T::poll_close(inner, task_cx))
    }
}

impl<F: std::future::Future> FutureContextExt for F {}

/// Extension trait allowing futures to carry a current-activity slot.
pub trait FutureContextExt: Sized {
    /// Gives this future its own current-activity slot, seeded with
    /// `activity`.
    ///
    /// While the returned future is being polled, the wrapped work observes
    /// `activity` (or whatever it has since started or stopped) as the
    /// ambient current value, independent of any other task sharing the
    /// worker thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use correlation::{context::FutureContextExt, Activity};
    ///
    /// async fn handle() {
    ///     // The seeded activity is ambient here, across every await point.
    ///     assert_eq!(Activity::current().unwrap().operation_name(), "Http_In");
    /// }
    ///
    /// let activity = Activity::new("Http_In").start();
    /// let _detached = correlation::context::swap_out();
    /// futures_executor::block_on(handle().with_activity(activity));
    /// ```
    fn with_activity(self, activity: impl Into<Option<Activity>>) -> WithActivity<Self> {
        WithActivity {
            inner: self,
            slot: activity.into(),
        }
    }

    /// Gives this future its own current-activity slot, seeded with the
    /// caller's current activity.
    fn with_current_activity(self) -> WithActivity<Self> {
        let slot = crate::context::current();
        self.with_activity(slot)
    }
}

// The following two extension traits are _almost_ identical to the one
// above, but need to be separate to avoid overlapping implementation errors.

impl<S: Stream> StreamContextExt for S {}

/// Extension trait allowing streams to carry a current-activity slot.
pub trait StreamContextExt: Sized {
    /// Gives this stream its own current-activity slot, seeded with
    /// `activity`.
    fn with_activity(self, activity: impl Into<Option<Activity>>) -> WithActivity<Self> {
        WithActivity {
            inner: self,
            slot: activity.into(),
        }
    }

    /// Gives this stream its own current-activity slot, seeded with the
    /// caller's current activity.
    fn with_current_activity(self) -> WithActivity<Self> {
        let slot = crate::context::current();
        self.with_activity(slot)
    }
}

impl<S: Sink<I>, I> SinkContextExt<I> for S {}

/// Extension trait allowing sinks to carry a current-activity slot.
pub trait SinkContextExt<I>: Sized {
    /// Gives this sink its own current-activity slot, seeded with
    /// `activity`.
    fn with_activity(self, activity: impl Into<Option<Activity>>) -> WithActivity<Self> {
        WithActivity {
            inner: self,
            slot: activity.into(),
        }
    }

    /// Gives this sink its own current-activity slot, seeded with the
    /// caller's current activity.
    fn with_current_activity(self) -> WithActivity<Self> {
        let slot = crate::context::current();
        self.with_activity(slot)
    }
}
