//! Typed event payloads for the diagnostics bus.
//!
//! Each event name corresponds to exactly one payload shape, so observers
//! match on a closed set of variants instead of fetching named properties
//! from an opaque payload at runtime.

use std::fmt;
use std::time::SystemTime;

use crate::propagation::Injector;
use crate::Activity;

/// Event name published when an activity has been started.
pub const ACTIVITY_STARTED: &str = "ActivityStarted";
/// Event name published when an activity is being stopped.
pub const ACTIVITY_STOPPED: &str = "ActivityStopped";
/// Event name published by an instrumented client just before a request
/// leaves the process.
pub const REQUEST_SENT: &str = "RequestSent";
/// Event name published by an instrumented client when a response arrives.
pub const RESPONSE_RECEIVED: &str = "ResponseReceived";

/// A diagnostics event and its payload.
///
/// Producers probe [`DiagnosticSource::is_enabled`] with the event's name
/// before constructing a payload, so unobserved events cost nothing.
///
/// [`DiagnosticSource::is_enabled`]: crate::diagnostics::DiagnosticSource::is_enabled
pub enum DiagnosticEvent<'a> {
    /// An activity has been started. Paired with [`ActivityStopped`] events
    /// carrying the same activity, the timestamps bracket the operation's
    /// duration.
    ///
    /// [`ActivityStopped`]: DiagnosticEvent::ActivityStopped
    ActivityStarted {
        /// The activity that was started.
        activity: &'a Activity,
        /// When the event was published.
        timestamp: SystemTime,
    },
    /// An activity is being stopped.
    ActivityStopped {
        /// The activity being stopped.
        activity: &'a Activity,
        /// When the event was published.
        timestamp: SystemTime,
    },
    /// An outbound request is about to be sent.
    ///
    /// Observers may write headers into the carrier and deposit the
    /// activity they minted for the call into `activity`; the producer
    /// keeps it and hands it back with the matching
    /// [`ResponseReceived`](DiagnosticEvent::ResponseReceived) event.
    RequestSent {
        /// The target endpoint of the call.
        endpoint: &'a str,
        /// The outgoing request's header carrier.
        headers: &'a mut dyn Injector,
        /// Slot for the activity minted for this call.
        activity: &'a mut Option<Activity>,
        /// When the event was published.
        timestamp: SystemTime,
    },
    /// The response to a previously announced request has arrived.
    ResponseReceived {
        /// The target endpoint of the call.
        endpoint: &'a str,
        /// The activity deposited at
        /// [`RequestSent`](DiagnosticEvent::RequestSent) time, if any
        /// observer claimed the call.
        activity: Option<&'a Activity>,
        /// When the event was published.
        timestamp: SystemTime,
    },
}

impl DiagnosticEvent<'_> {
    /// The event's name, as used for enablement probes.
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticEvent::ActivityStarted { .. } => ACTIVITY_STARTED,
            DiagnosticEvent::ActivityStopped { .. } => ACTIVITY_STOPPED,
            DiagnosticEvent::RequestSent { .. } => REQUEST_SENT,
            DiagnosticEvent::ResponseReceived { .. } => RESPONSE_RECEIVED,
        }
    }
}

impl fmt::Debug for DiagnosticEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("DiagnosticEvent");
        dbg.field("name", &self.name());
        match self {
            DiagnosticEvent::ActivityStarted { activity, .. }
            | DiagnosticEvent::ActivityStopped { activity, .. } => {
                dbg.field("activity", activity);
            }
            DiagnosticEvent::RequestSent { endpoint, .. } => {
                dbg.field("endpoint", endpoint);
            }
            DiagnosticEvent::ResponseReceived {
                endpoint, activity, ..
            } => {
                dbg.field("endpoint", endpoint).field("activity", activity);
            }
        }
        dbg.finish_non_exhaustive()
    }
}
