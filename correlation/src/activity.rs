//! The activity entity: one causally-scoped logical operation.
//!
//! An [`Activity`] is built inert, enriched with tags and baggage, then
//! started. Starting assigns the identifier, links the ambient parent, and
//! publishes the activity as the current ambient value; stopping restores
//! the ambient value captured at start. Handles are cheaply cloneable and
//! share one underlying record, so the same activity can be observed from
//! the ambient slot, an event payload, and the starting call site at once.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

use crate::context;
use crate::corr_warn;
use crate::id::{self, ActivityId};

/// A string key/value pair attached to an activity as a tag or baggage entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    /// The entry key.
    pub key: String,
    /// The entry value.
    pub value: String,
}

impl KeyValue {
    /// Creates a new key/value pair.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The lifecycle of an [`Activity`].
///
/// `Created` transitions to `Started` exactly once, and `Started` to
/// `Stopped` exactly once; `Stopped` is terminal. The id is defined if and
/// only if the state is no longer `Created`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built but not yet started; tags and baggage may still be added.
    Created,
    /// Started: the id is assigned and the activity is (or was) ambient.
    Started,
    /// Stopped: terminal.
    Stopped,
}

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

fn state_from_u8(state: u8) -> LifecycleState {
    match state {
        CREATED => LifecycleState::Created,
        STARTED => LifecycleState::Started,
        _ => LifecycleState::Stopped,
    }
}

#[derive(Default)]
struct Entries {
    tags: Vec<KeyValue>,
    baggage: Vec<KeyValue>,
}

struct ActivityInner {
    operation_name: Cow<'static, str>,
    id: OnceLock<ActivityId>,
    parent: OnceLock<Activity>,
    parent_id: OnceLock<String>,
    state: AtomicU8,
    next_child: AtomicU64,
    entries: RwLock<Entries>,
    started_at: OnceLock<(SystemTime, Instant)>,
    duration: OnceLock<Duration>,
    // Ambient value replaced at start, restored by stop.
    prior: Mutex<Option<Option<Activity>>>,
}

/// One logical operation in the causal tree.
///
/// The operation name is the *coarsest* useful grouping (a fixed string per
/// call site, such as `"Http_Out"`); request-specific data belongs in tags
/// or baggage instead. Tags stay local to this activity; baggage is
/// observed by every descendant and is eligible for cross-boundary
/// propagation.
///
/// # Examples
///
/// ```
/// use correlation::Activity;
///
/// let activity = Activity::new("Http_In")
///     .with_baggage("user", "42")
///     .with_tag("route", "/orders")
///     .start();
///
/// assert!(activity.id().is_some());
/// assert_eq!(activity.get_baggage_item("user").as_deref(), Some("42"));
///
/// activity.stop();
/// ```
#[derive(Clone)]
pub struct Activity {
    inner: Arc<ActivityInner>,
}

impl Activity {
    /// Creates an inert activity with the given operation name.
    ///
    /// The activity has no id and is invisible to the ambient context until
    /// [`start`](Activity::start) is called.
    pub fn new(operation_name: impl Into<Cow<'static, str>>) -> Self {
        Activity {
            inner: Arc::new(ActivityInner {
                operation_name: operation_name.into(),
                id: OnceLock::new(),
                parent: OnceLock::new(),
                parent_id: OnceLock::new(),
                state: AtomicU8::new(CREATED),
                next_child: AtomicU64::new(0),
                entries: RwLock::new(Entries::default()),
                started_at: OnceLock::new(),
                duration: OnceLock::new(),
                prior: Mutex::new(None),
            }),
        }
    }

    /// Returns the current ambient activity of this logical execution path,
    /// if any.
    pub fn current() -> Option<Activity> {
        context::current()
    }

    /// Adds a tag, returning the same activity for chaining.
    ///
    /// Tags are local to this activity only: they are never observed by
    /// descendants and never cross a process boundary. Once the activity is
    /// started the record is immutable and the call is a logged no-op.
    pub fn with_tag(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if self.lifecycle_state() != LifecycleState::Created {
            corr_warn!(
                name: "Activity.TagAfterStart",
                operation_name = self.operation_name()
            );
            return self;
        }
        self.write_entries(|entries| entries.tags.push(KeyValue::new(key, value)));
        self
    }

    /// Adds a baggage entry, returning the same activity for chaining.
    ///
    /// Baggage is observed by every descendant activity and is eligible for
    /// cross-boundary propagation. Entries keep insertion order and are
    /// enumerated most-recent first, so a later entry shadows an earlier one
    /// with the same key without removing it. Once the activity is started
    /// the record is immutable and the call is a logged no-op.
    pub fn with_baggage(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if self.lifecycle_state() != LifecycleState::Created {
            corr_warn!(
                name: "Activity.BaggageAfterStart",
                operation_name = self.operation_name()
            );
            return self;
        }
        self.write_entries(|entries| entries.baggage.push(KeyValue::new(key, value)));
        self
    }

    /// Records that the activity with id `parent_id`, from outside this
    /// process, caused this activity.
    ///
    /// Intended for boundary scenarios only; with a parent id present,
    /// [`start`](Activity::start) skips ambient-parent adoption and mints a
    /// cross-boundary child id.
    pub fn with_parent_id(self, parent_id: impl Into<String>) -> Self {
        if self.inner.parent_id.set(parent_id.into()).is_err() {
            corr_warn!(
                name: "Activity.ParentIdAlreadySet",
                operation_name = self.operation_name()
            );
        }
        self
    }

    /// Starts the activity.
    ///
    /// If no parent id was supplied and an ambient activity is current, that
    /// activity is adopted as the in-process parent and its id becomes this
    /// activity's parent id. The id is then allocated, the start time
    /// recorded, and the activity published as the ambient current value;
    /// the previous ambient value is retained and restored by
    /// [`stop`](Activity::stop).
    ///
    /// Starting twice is a logged no-op that leaves the first start intact.
    pub fn start(self) -> Self {
        if self
            .inner
            .state
            .compare_exchange(CREATED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            corr_warn!(
                name: "Activity.StartCalledTwice",
                operation_name = self.operation_name()
            );
            return self;
        }

        if self.inner.parent_id.get().is_none() {
            if let Some(parent) = context::current() {
                if let Some(parent_id) = parent.id() {
                    let _ = self.inner.parent_id.set(parent_id.as_str().to_owned());
                    let _ = self.inner.parent.set(parent.clone());
                }
            }
        }

        let id = id::allocate(self.inner.parent.get(), self.inner.parent_id.get().map(String::as_str));
        let _ = self.inner.id.set(id);
        let _ = self.inner.started_at.set((SystemTime::now(), Instant::now()));

        let prior = context::swap(Some(self.clone()));
        *self
            .inner
            .prior
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(prior);

        self
    }

    /// Stops the activity.
    ///
    /// Records the duration, transitions to `Stopped`, and restores the
    /// ambient value captured at start. Stopping an already stopped activity
    /// is a no-op; stopping one that was never started is a logged no-op
    /// that leaves the ambient context untouched.
    pub fn stop(&self) {
        match self
            .inner
            .state
            .compare_exchange(STARTED, STOPPED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if let Some((_, started)) = self.inner.started_at.get() {
                    let _ = self.inner.duration.set(started.elapsed());
                }
                let prior = self
                    .inner
                    .prior
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(prior) = prior {
                    context::set(prior);
                }
            }
            Err(CREATED) => {
                corr_warn!(
                    name: "Activity.StopBeforeStart",
                    operation_name = self.operation_name()
                );
            }
            Err(_) => {} // Already stopped.
        }
    }

    /// The operation name this activity was created with.
    pub fn operation_name(&self) -> &str {
        &self.inner.operation_name
    }

    /// The assigned id, present once the activity has been started.
    pub fn id(&self) -> Option<&ActivityId> {
        self.inner.id.get()
    }

    /// The in-process parent activity, if this activity was started under an
    /// ambient parent.
    pub fn parent(&self) -> Option<&Activity> {
        self.inner.parent.get()
    }

    /// The id of the causal predecessor: either the in-process parent's id
    /// or the externally supplied one. `None` for a root activity.
    pub fn parent_id(&self) -> Option<&str> {
        self.inner.parent_id.get().map(String::as_str)
    }

    /// The current lifecycle state.
    pub fn lifecycle_state(&self) -> LifecycleState {
        state_from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// The wall-clock time at which the activity was started.
    pub fn start_time(&self) -> Option<SystemTime> {
        self.inner.started_at.get().map(|(wall, _)| *wall)
    }

    /// The elapsed time between start and stop, present once stopped.
    pub fn duration(&self) -> Option<Duration> {
        self.inner.duration.get().copied()
    }

    /// This activity's own tags, most recently added first.
    pub fn tags(&self) -> Vec<KeyValue> {
        self.read_entries(|entries| entries.tags.iter().rev().cloned().collect())
    }

    /// The effective baggage: this activity's own entries (most recently
    /// added first) followed by every ancestor's, walking the in-process
    /// parent chain.
    ///
    /// Duplicate keys coexist; a front-to-back scan sees the most recently
    /// added entry first, which is why it wins lookups.
    pub fn baggage(&self) -> Vec<KeyValue> {
        let mut items = Vec::new();
        self.collect_baggage(&mut items);
        items
    }

    /// Returns the value of the first (most recently added) baggage entry
    /// with the given key, searching ancestors after this activity's own
    /// entries.
    pub fn get_baggage_item(&self, key: &str) -> Option<String> {
        let own = self.read_entries(|entries| {
            entries
                .baggage
                .iter()
                .rev()
                .find(|kv| kv.key == key)
                .map(|kv| kv.value.clone())
        });
        match own {
            Some(value) => Some(value),
            None => self
                .inner
                .parent
                .get()
                .and_then(|parent| parent.get_baggage_item(key)),
        }
    }

    /// Whether two handles refer to the same underlying activity record.
    pub fn same_record(&self, other: &Activity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reserves the next child index under this activity. Safe for many
    /// concurrent children of the same parent.
    pub(crate) fn next_child_index(&self) -> u64 {
        self.inner.next_child.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn collect_baggage(&self, items: &mut Vec<KeyValue>) {
        self.read_entries(|entries| items.extend(entries.baggage.iter().rev().cloned()));
        if let Some(parent) = self.inner.parent.get() {
            parent.collect_baggage(items);
        }
    }

    fn read_entries<T>(&self, f: impl FnOnce(&Entries) -> T) -> T {
        f(&self
            .inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn write_entries(&self, f: impl FnOnce(&mut Entries)) {
        f(&mut self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner))
    }
}

impl fmt::Display for Activity {
    /// Formats as `operation:<name>, id:<id>, baggage:{k=v,k=v}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation:{}, id:{}, baggage:{{",
            self.operation_name(),
            self.id().map(ActivityId::as_str).unwrap_or_default()
        )?;
        for (i, kv) in self.baggage().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", kv.key, kv.value)?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("operation_name", &self.operation_name())
            .field("id", &self.id())
            .field("parent_id", &self.parent_id())
            .field("lifecycle_state", &self.lifecycle_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inert_until_started() {
        let activity = Activity::new("Http_In").with_baggage("user", "42");
        assert_eq!(activity.lifecycle_state(), LifecycleState::Created);
        assert!(activity.id().is_none());
        assert!(Activity::current().is_none());
    }

    #[test]
    fn start_assigns_root_id_without_parent() {
        let activity = Activity::new("Http_In").start();
        let id = activity.id().expect("started activity has an id");
        assert!(id.as_str().starts_with("//"), "got {id}");
        assert!(activity.parent_id().is_none());
        activity.stop();
    }

    #[test]
    fn start_adopts_ambient_parent() {
        let parent = Activity::new("Http_In").start();
        let child = Activity::new("Http_Out").start();

        let parent_id = parent.id().unwrap().as_str();
        assert_eq!(child.parent_id(), Some(parent_id));
        assert!(child.parent().unwrap().same_record(&parent));
        assert_eq!(
            child.id().unwrap().as_str(),
            format!("{parent_id}/1"),
            "first child gets index 1"
        );

        child.stop();
        parent.stop();
    }

    #[test]
    fn external_parent_id_mints_boundary_child() {
        let activity = Activity::new("Http_In").with_parent_id("abc").start();
        assert_eq!(activity.parent_id(), Some("abc"));
        assert!(activity.parent().is_none());
        assert!(activity.id().unwrap().as_str().starts_with("abc/I_"));
        activity.stop();
    }

    #[test]
    fn sibling_indices_increase() {
        let parent = Activity::new("Http_In").start();
        let parent_id = parent.id().unwrap().as_str().to_owned();

        let mut previous = 0u64;
        for _ in 0..5 {
            let child = Activity::new("Http_Out").start();
            let id = child.id().unwrap().as_str().to_owned();
            child.stop();
            let index: u64 = id
                .strip_prefix(&format!("{parent_id}/"))
                .expect("child id extends the parent id")
                .parse()
                .expect("index segment is numeric");
            assert!(index > previous);
            previous = index;
        }

        parent.stop();
    }

    #[test]
    fn double_start_keeps_first_start() {
        let activity = Activity::new("Http_In").start();
        let id = activity.id().unwrap().clone();
        let activity = activity.start();
        assert_eq!(activity.id(), Some(&id));
        activity.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let outer = Activity::new("Outer").start();
        let inner = Activity::new("Inner").start();

        inner.stop();
        assert!(Activity::current().unwrap().same_record(&outer));
        // A second stop must not restore again and clobber the ambient slot.
        inner.stop();
        assert!(Activity::current().unwrap().same_record(&outer));

        outer.stop();
    }

    #[test]
    fn stop_before_start_leaves_ambient_untouched() {
        let outer = Activity::new("Outer").start();
        let unstarted = Activity::new("Inner");
        unstarted.stop();
        assert_eq!(unstarted.lifecycle_state(), LifecycleState::Created);
        assert!(Activity::current().unwrap().same_record(&outer));
        outer.stop();
    }

    #[test]
    fn nested_start_stop_restores_ambient_exactly() {
        assert!(Activity::current().is_none());
        let a = Activity::new("A").start();
        let b = Activity::new("B").start();
        let c = Activity::new("C").start();

        assert!(Activity::current().unwrap().same_record(&c));
        c.stop();
        assert!(Activity::current().unwrap().same_record(&b));
        b.stop();
        assert!(Activity::current().unwrap().same_record(&a));
        a.stop();
        assert!(Activity::current().is_none());
    }

    #[test]
    fn mutation_after_start_is_ignored() {
        let activity = Activity::new("Http_In").start();
        let activity = activity.with_baggage("late", "1").with_tag("late", "1");
        assert!(activity.get_baggage_item("late").is_none());
        assert!(activity.tags().is_empty());
        activity.stop();
    }

    #[test]
    fn baggage_is_inherited_and_shadowed() {
        let parent = Activity::new("Http_In")
            .with_baggage("user", "42")
            .with_baggage("tenant", "acme")
            .start();
        let child = Activity::new("Http_Out").with_baggage("user", "7").start();

        // The child's own entry wins the scan; the parent's still coexists.
        assert_eq!(child.get_baggage_item("user").as_deref(), Some("7"));
        assert_eq!(child.get_baggage_item("tenant").as_deref(), Some("acme"));
        let keys: Vec<_> = child.baggage().into_iter().map(|kv| kv.value).collect();
        assert_eq!(keys, vec!["7", "acme", "42"]);

        child.stop();
        parent.stop();
    }

    #[test]
    fn tags_are_not_inherited() {
        let parent = Activity::new("Http_In").with_tag("route", "/orders").start();
        let child = Activity::new("Http_Out").start();
        assert!(child.tags().is_empty());
        child.stop();
        parent.stop();
    }

    #[test]
    fn duration_recorded_on_stop() {
        let activity = Activity::new("Http_In").start();
        assert!(activity.duration().is_none());
        activity.stop();
        assert!(activity.duration().is_some());
    }

    #[test]
    fn display_format() {
        let activity = Activity::new("Http_In")
            .with_baggage("user", "42")
            .with_baggage("tenant", "acme")
            .start();
        let rendered = activity.to_string();
        let id = activity.id().unwrap().as_str();
        assert_eq!(
            rendered,
            format!("operation:Http_In, id:{id}, baggage:{{tenant=acme,user=42}}")
        );
        activity.stop();
    }
}
