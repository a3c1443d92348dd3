//! Hierarchical activity identifier allocation.
//!
//! Identifiers encode lineage: a child's id is its parent's id plus a
//! per-parent counter segment, so the causal tree can be reconstructed from
//! the ids alone, without a central coordinator.
//!
//! Three forms are produced:
//!
//! - root: `//<host>_<ticks>_<n>` where the prefix is derived once per
//!   process,
//! - in-process child: `<parent-id>/<n>` with `n` from the parent's own
//!   counter,
//! - cross-boundary child: `<parent-id>/I_<n>`, the `I` marking that the
//!   causal link passed through serialization.

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::activity::Activity;

/// A globally-unambiguous, hierarchical activity identifier.
///
/// Ids are assigned exactly once, when an [`Activity`] is started, and are
/// ordered and collision-free among siblings within a process lifetime.
/// Cross-process uniqueness relies on the process-unique root prefix rather
/// than on coordination.
///
/// [`Activity`]: crate::Activity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActivityId(Box<str>);

impl ActivityId {
    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ActivityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

static PROCESS_PREFIX: OnceLock<String> = OnceLock::new();
static NEXT_ROOT: AtomicU64 = AtomicU64::new(0);
static NEXT_INBOUND: AtomicU64 = AtomicU64::new(0);

/// Returns the process-unique root prefix, computing it on first use.
///
/// Concurrent first uses race through the [`OnceLock`]; losers discard their
/// redundant computation.
fn process_prefix() -> &'static str {
    PROCESS_PREFIX.get_or_init(|| {
        let host = env::var("HOSTNAME")
            .or_else(|_| env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_owned());
        // Low timer bits distinguish processes that share a host name.
        let ticks = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u32)
            .unwrap_or_default();
        format!("//{host}_{ticks:x}_")
    })
}

/// Allocates the id for an activity being started.
///
/// An in-process parent takes precedence over an externally supplied parent
/// id; with neither, a root id is minted under the process prefix.
pub(crate) fn allocate(parent: Option<&Activity>, parent_id: Option<&str>) -> ActivityId {
    let id = match (parent.and_then(|p| p.id().map(|id| (p, id))), parent_id) {
        (Some((parent, parent_activity_id)), _) => {
            format!("{}/{}", parent_activity_id, parent.next_child_index())
        }
        (None, Some(parent_id)) => {
            format!("{}/I_{}", parent_id, NEXT_INBOUND.fetch_add(1, Ordering::Relaxed) + 1)
        }
        (None, None) => {
            format!(
                "{}{}",
                process_prefix(),
                NEXT_ROOT.fetch_add(1, Ordering::Relaxed) + 1
            )
        }
    };

    ActivityId(id.into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_prefix_is_stable_and_root_shaped() {
        let first = process_prefix();
        let second = process_prefix();
        assert!(std::ptr::eq(first, second));
        assert!(first.starts_with("//"));
        assert!(first.ends_with('_'));
    }

    #[test]
    fn root_ids_are_distinct() {
        let first = allocate(None, None);
        let second = allocate(None, None);
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("//"));
    }

    #[test]
    fn cross_boundary_ids_mark_the_crossing() {
        let id = allocate(None, Some("abc"));
        assert!(id.as_str().starts_with("abc/I_"), "got {id}");
    }
}
