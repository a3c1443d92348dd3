//! Causally-ordered activity tracking with ambient context propagation.
//!
//! The `correlation` crate is the core of a distributed-trace context
//! propagation system. It tracks a tree of logical operations
//! ([`Activity`]s) spanning one or more processes, mints hierarchical,
//! collision-free identifiers for them, carries caller-supplied
//! [baggage](Activity::with_baggage) down through child operations, and
//! exposes a publish/subscribe [diagnostics bus](diagnostics) so
//! instrumentation producers and consumers can observe operations without
//! being statically coupled.
//!
//! Transport boundaries (encoding identity and baggage into request
//! headers, and back) live in companion crates such as `correlation-http`.
//!
//! # Getting started
//!
//! ```
//! use correlation::Activity;
//!
//! // An inbound request seeded this operation from another process.
//! let inbound = Activity::new("Http_In")
//!     .with_parent_id("//caller_a1_5")
//!     .with_baggage("user", "42")
//!     .start();
//!
//! // Work started underneath it becomes a child in the causal tree.
//! let step = Activity::new("LoadProfile").start();
//! assert!(step
//!     .id()
//!     .unwrap()
//!     .as_str()
//!     .starts_with(inbound.id().unwrap().as_str()));
//! assert_eq!(step.get_baggage_item("user").as_deref(), Some("42"));
//!
//! step.stop();
//! inbound.stop();
//! ```
//!
//! # Ambient context
//!
//! The current activity is an ambient value scoped to the logical execution
//! path, not the worker thread: see the [`context`] module, and
//! [`context::FutureContextExt`] for carrying it across `await` points.
//!
//! # Feature flags
//!
//! - `futures`: future/stream/sink combinators for ambient flow through
//!   async code (enabled by default).
//! - `internal-logs`: internal diagnostics via `tracing` (enabled by
//!   default).

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod activity;
pub mod context;
pub mod diagnostics;
mod id;
mod internal_logging;
pub mod propagation;

pub use activity::{Activity, KeyValue, LifecycleState};
pub use id::ActivityId;

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
