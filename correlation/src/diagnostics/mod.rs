//! Named-source publish/subscribe for instrumentation events.
//!
//! A [`DiagnosticRegistry`] owns a set of named [`DiagnosticSource`]s.
//! Producers (an instrumented HTTP client, an inbound pipeline stage) look
//! up a source by name and publish [`DiagnosticEvent`]s through it;
//! consumers subscribe [`DiagnosticObserver`]s without being statically
//! coupled to the producers. Before constructing a payload, producers call
//! [`DiagnosticSource::is_enabled`], which is cheap when nobody listens.
//!
//! The registry is an explicit object with process-scoped lifetime: create
//! one at startup and hand it to every component that publishes or
//! subscribes, rather than reaching through global state.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use correlation::diagnostics::{
//!     DiagnosticEvent, DiagnosticObserver, DiagnosticRegistry,
//! };
//!
//! struct Printer;
//!
//! impl DiagnosticObserver for Printer {
//!     fn on_event(&self, event: &mut DiagnosticEvent<'_>) {
//!         if let DiagnosticEvent::ActivityStarted { activity, .. } = event {
//!             println!("{activity}");
//!         }
//!     }
//! }
//!
//! let registry = DiagnosticRegistry::new();
//! let source = registry.source("http.client");
//! let subscription = source.subscribe(Arc::new(Printer));
//!
//! let activity = source.start_activity(correlation::Activity::new("Http_Out"));
//! source.stop_activity(&activity);
//! drop(subscription);
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::SystemTime;

use crate::corr_error;
use crate::Activity;

mod event;

pub use event::{
    DiagnosticEvent, ACTIVITY_STARTED, ACTIVITY_STOPPED, REQUEST_SENT, RESPONSE_RECEIVED,
};

/// A consumer of diagnostics events.
///
/// Observers are shared across threads and invoked synchronously during
/// [`DiagnosticSource::publish`], in subscription order. A panicking
/// observer is isolated: the fault is logged and the remaining observers
/// still receive the event.
pub trait DiagnosticObserver: Send + Sync {
    /// Whether this observer wants the named event.
    ///
    /// Called during enablement probes and before each delivery; must be
    /// cheap and side-effect free. Defaults to wanting everything.
    fn enabled(&self, event: &str) -> bool {
        let _ = event;
        true
    }

    /// Delivers an event.
    fn on_event(&self, event: &mut DiagnosticEvent<'_>);
}

/// The process-scoped set of named diagnostics sources.
///
/// Cloning is cheap and clones observe the same registry.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sources: RwLock<HashMap<String, DiagnosticSource>>,
}

impl DiagnosticRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        DiagnosticRegistry::default()
    }

    /// Returns the source with the given name, creating it on first use.
    pub fn source(&self, name: impl Into<String>) -> DiagnosticSource {
        let name = name.into();
        {
            let sources = self
                .inner
                .sources
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(source) = sources.get(&name) {
                return source.clone();
            }
        }
        let mut sources = self
            .inner
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sources
            .entry(name.clone())
            .or_insert_with(|| DiagnosticSource::new(name))
            .clone()
    }
}

#[derive(Clone)]
struct RegisteredObserver {
    id: u64,
    observer: Arc<dyn DiagnosticObserver>,
}

struct SourceInner {
    name: String,
    next_observer_id: AtomicU64,
    // Snapshot-on-write: publishers clone the Arc under a brief read lock,
    // so delivery never holds the lock and never blocks subscription.
    observers: RwLock<Arc<Vec<RegisteredObserver>>>,
}

/// One named event source.
///
/// Cloning is cheap and clones observe the same subscriber set.
#[derive(Clone)]
pub struct DiagnosticSource {
    inner: Arc<SourceInner>,
}

impl DiagnosticSource {
    fn new(name: String) -> Self {
        DiagnosticSource {
            inner: Arc::new(SourceInner {
                name,
                next_observer_id: AtomicU64::new(0),
                observers: RwLock::new(Arc::new(Vec::new())),
            }),
        }
    }

    /// The source's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registers an observer, returning a [`Subscription`] that removes it
    /// again when dropped.
    ///
    /// An observer added while a publish is in flight is not guaranteed to
    /// see that event, but sees all subsequent ones.
    pub fn subscribe(&self, observer: Arc<dyn DiagnosticObserver>) -> Subscription {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(observers.len() + 1);
        next.extend(observers.iter().cloned());
        next.push(RegisteredObserver { id, observer });
        *observers = Arc::new(next);
        Subscription {
            source: Arc::downgrade(&self.inner),
            id,
            detached: false,
        }
    }

    /// Whether any current observer wants the named event.
    ///
    /// Probe this before constructing a payload; with no observers it is a
    /// lock acquisition and nothing more.
    pub fn is_enabled(&self, event: &str) -> bool {
        let observers = self.snapshot();
        observers
            .iter()
            .any(|registered| registered.observer.enabled(event))
    }

    /// Delivers `event` synchronously to every current observer that wants
    /// it, in subscription order.
    ///
    /// A panicking observer does not prevent delivery to the remaining
    /// observers and does not corrupt the source; the fault is logged.
    pub fn publish(&self, event: &mut DiagnosticEvent<'_>) {
        let name = event.name();
        let observers = self.snapshot();
        for registered in observers.iter() {
            if !registered.observer.enabled(name) {
                continue;
            }
            let delivery = panic::catch_unwind(AssertUnwindSafe(|| {
                registered.observer.on_event(&mut *event);
            }));
            if delivery.is_err() {
                corr_error!(
                    name: "DiagnosticSource.ObserverPanicked",
                    source = self.name(),
                    event = name
                );
            }
        }
    }

    /// Starts `activity` and publishes [`ACTIVITY_STARTED`] for it.
    pub fn start_activity(&self, activity: Activity) -> Activity {
        let activity = activity.start();
        if self.is_enabled(ACTIVITY_STARTED) {
            self.publish(&mut DiagnosticEvent::ActivityStarted {
                activity: &activity,
                timestamp: SystemTime::now(),
            });
        }
        activity
    }

    /// Publishes [`ACTIVITY_STOPPED`] for `activity`, then stops it.
    ///
    /// Because stopping is idempotent this is also how an already-stopped
    /// activity's closing event is published.
    pub fn stop_activity(&self, activity: &Activity) {
        if self.is_enabled(ACTIVITY_STOPPED) {
            self.publish(&mut DiagnosticEvent::ActivityStopped {
                activity,
                timestamp: SystemTime::now(),
            });
        }
        activity.stop();
    }

    fn snapshot(&self) -> Arc<Vec<RegisteredObserver>> {
        self.inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn unsubscribe(inner: &SourceInner, id: u64) {
        let mut observers = inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let next: Vec<_> = observers
            .iter()
            .filter(|registered| registered.id != id)
            .cloned()
            .collect();
        *observers = Arc::new(next);
    }
}

impl std::fmt::Debug for DiagnosticSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticSource")
            .field("name", &self.inner.name)
            .field("observers", &self.snapshot().len())
            .finish()
    }
}

/// Removes its observer from the source when dropped.
///
/// Call [`detach`](Subscription::detach) to keep the observer subscribed
/// for the life of the source instead.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes its observer"]
pub struct Subscription {
    source: Weak<SourceInner>,
    id: u64,
    detached: bool,
}

impl Subscription {
    /// Leaves the observer subscribed for the life of the source.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// Removes the observer now. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(inner) = self.source.upgrade() {
            DiagnosticSource::unsubscribe(&inner, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        only: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl DiagnosticObserver for Recorder {
        fn enabled(&self, event: &str) -> bool {
            self.only.map_or(true, |only| only == event)
        }

        fn on_event(&self, event: &mut DiagnosticEvent<'_>) {
            self.seen.lock().unwrap().push(event.name().to_owned());
        }
    }

    struct Panicking;

    impl DiagnosticObserver for Panicking {
        fn on_event(&self, _event: &mut DiagnosticEvent<'_>) {
            panic!("observer failure");
        }
    }

    #[test]
    fn source_lookup_is_idempotent() {
        let registry = DiagnosticRegistry::new();
        let first = registry.source("http.client");
        let second = registry.source("http.client");
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
    }

    #[test]
    fn is_enabled_reflects_observer_interest() {
        let registry = DiagnosticRegistry::new();
        let source = registry.source("http.client");
        assert!(!source.is_enabled(ACTIVITY_STARTED));

        let recorder = Arc::new(Recorder {
            only: Some(ACTIVITY_STARTED),
            ..Recorder::default()
        });
        let subscription = source.subscribe(recorder);
        assert!(source.is_enabled(ACTIVITY_STARTED));
        assert!(!source.is_enabled(ACTIVITY_STOPPED));

        drop(subscription);
        assert!(!source.is_enabled(ACTIVITY_STARTED));
    }

    #[test]
    fn events_are_delivered_in_subscription_order() {
        let registry = DiagnosticRegistry::new();
        let source = registry.source("http.client");
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagged(Arc<Mutex<Vec<u8>>>, u8);
        impl DiagnosticObserver for Tagged {
            fn on_event(&self, _event: &mut DiagnosticEvent<'_>) {
                self.0.lock().unwrap().push(self.1);
            }
        }

        let first = source.subscribe(Arc::new(Tagged(Arc::clone(&order), 1)));
        let second = source.subscribe(Arc::new(Tagged(Arc::clone(&order), 2)));

        let activity = Activity::new("Http_Out").start();
        source.publish(&mut DiagnosticEvent::ActivityStarted {
            activity: &activity,
            timestamp: SystemTime::now(),
        });
        activity.stop();

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        drop(first);
        drop(second);
    }

    #[test]
    fn panicking_observer_does_not_block_the_rest() {
        let registry = DiagnosticRegistry::new();
        let source = registry.source("http.client");

        let _poison = source.subscribe(Arc::new(Panicking));
        let recorder = Arc::new(Recorder::default());
        let _subscription = source.subscribe(recorder.clone());

        let activity = Activity::new("Http_Out").start();
        source.publish(&mut DiagnosticEvent::ActivityStarted {
            activity: &activity,
            timestamp: SystemTime::now(),
        });
        // The source stays usable after the fault.
        source.publish(&mut DiagnosticEvent::ActivityStopped {
            activity: &activity,
            timestamp: SystemTime::now(),
        });
        activity.stop();

        assert_eq!(
            recorder.events(),
            vec![ACTIVITY_STARTED.to_owned(), ACTIVITY_STOPPED.to_owned()]
        );
    }

    #[test]
    fn bracketing_helpers_publish_paired_events() {
        let registry = DiagnosticRegistry::new();
        let source = registry.source("http.client");
        let recorder = Arc::new(Recorder::default());
        let _subscription = source.subscribe(recorder.clone());

        let activity = source.start_activity(Activity::new("Http_Out"));
        assert!(activity.id().is_some());
        source.stop_activity(&activity);

        assert_eq!(
            recorder.events(),
            vec![ACTIVITY_STARTED.to_owned(), ACTIVITY_STOPPED.to_owned()]
        );
    }

    #[test]
    fn detached_subscription_outlives_its_guard() {
        let registry = DiagnosticRegistry::new();
        let source = registry.source("http.client");
        let recorder = Arc::new(Recorder::default());
        source.subscribe(recorder.clone()).detach();

        let activity = Activity::new("Http_Out").start();
        source.publish(&mut DiagnosticEvent::ActivityStarted {
            activity: &activity,
            timestamp: SystemTime::now(),
        });
        activity.stop();

        assert_eq!(recorder.events(), vec![ACTIVITY_STARTED.to_owned()]);
    }
}
