//! Ambient current-activity propagation.
//!
//! The ambient context is a per-logical-path slot holding "the currently
//! active [`Activity`]". It is stored in a thread local, but it models the
//! *logical* execution path rather than the worker thread: asynchronous
//! code carries the slot across suspension points by wrapping futures with
//! [`FutureContextExt::with_activity`], which swaps the path's slot value in
//! before every poll and captures it back out afterwards. Two concurrent
//! paths therefore never observe each other's current activity, even when
//! they share worker threads.
//!
//! Synchronous code scopes the slot with [`attach`], whose guard restores
//! the previous value on drop. [`Activity::start`] and [`Activity::stop`]
//! update the slot directly: start publishes the activity and retains the
//! prior value, stop restores it.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::Activity;


#[cfg(feature = "futures")]
mod future_ext;

#[cfg(feature = "futures")]
pub use future_ext::{FutureContextExt, SinkContextExt, StreamContextExt, WithActivity};

thread_local! {
    static CURRENT_ACTIVITY: RefCell<Option<Activity>> = const { RefCell::new(None) };
}

/// Returns a handle to the current activity of this logical path, if any.
///
/// # Examples
///
/// ```
/// use correlation::{context, Activity};
///
/// assert!(context::current().is_none());
///
/// let activity = Activity::new("Http_In").start();
/// assert!(context::current().unwrap().same_record(&activity));
/// activity.stop();
///
/// assert!(context::current().is_none());
/// ```
pub fn current() -> Option<Activity> {
    CURRENT_ACTIVITY.with(|slot| slot.borrow().clone())
}

/// Replaces the slot with `value`, returning the previous value.
pub(crate) fn swap(value: Option<Activity>) -> Option<Activity> {
    CURRENT_ACTIVITY.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), value))
}

/// Overwrites the slot, discarding the previous value.
pub(crate) fn set(value: Option<Activity>) {
    let _ = swap(value);
}

/// Makes `activity` the current ambient value until the returned guard is
/// dropped, at which point the previous value is restored.
///
/// This is a plain slot assignment, not a lifecycle transition: no start or
/// stop happens and nothing is published to any diagnostics source. It is
/// the mechanism inbound boundary adapters use to seed a request's context.
///
/// The guard is not `Send`; asynchronous code should prefer
/// [`FutureContextExt::with_activity`], which survives task migration
/// between worker threads.
///
/// # Examples
///
/// ```
/// use correlation::{context, Activity};
///
/// let activity = Activity::new("Http_In").start();
/// let detached = context::swap_out();
/// assert!(context::current().is_none());
///
/// {
///     let _guard = context::attach(activity.clone());
///     assert!(context::current().unwrap().same_record(&activity));
/// }
///
/// assert!(context::current().is_none());
/// context::restore(detached);
/// activity.stop();
/// ```
pub fn attach(activity: Activity) -> AmbientGuard {
    AmbientGuard {
        prior: Some(swap(Some(activity))),
        _marker: PhantomData,
    }
}

/// Takes the current slot value, leaving the slot empty.
///
/// Paired with [`restore`], this lets callers suspend a path's ambient
/// state around work that must not observe it.
pub fn swap_out() -> Option<Activity> {
    swap(None)
}

/// Puts back a slot value previously taken with [`swap_out`].
pub fn restore(value: Option<Activity>) {
    set(value);
}

/// A guard that restores the previous ambient value when dropped.
#[derive(Debug)]
pub struct AmbientGuard {
    prior: Option<Option<Activity>>,
    // Ensure this type is !Send as it relies on thread locals.
    _marker: PhantomData<*const ()>,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            set(prior);
        }
    }
}
