//! Outbound call instrumentation.
//!
//! Two halves meet on the diagnostics bus:
//!
//! - [`OutboundCall`] is the producer side, called by whatever client
//!   integration sends the request: it announces the request (offering a
//!   mutable header carrier) and, later, the response.
//! - [`HttpOutboundObserver`] is the consumer side, wired up by
//!   [`CorrelationHttpInstrumentation`]: for each eligible request it mints
//!   a child activity under the ambient parent, stamps the headers, and
//!   immediately stops the activity again so that nothing is left attached
//!   to the ambient slot across the call's suspension point. The bus-level
//!   started/stopped event pair still brackets the call's real duration.
//!
//! [`CorrelationHttpInstrumentation`]: crate::CorrelationHttpInstrumentation

use std::time::SystemTime;

use correlation::diagnostics::{
    DiagnosticEvent, DiagnosticObserver, DiagnosticSource, REQUEST_SENT, RESPONSE_RECEIVED,
};
use correlation::propagation::Injector;
use correlation::Activity;

use crate::filter::EndpointFilter;
use crate::propagator::CorrelationPropagator;

/// Operation name of the activity minted for an outbound call.
pub const OUTBOUND_OPERATION: &str = "Http_Out";

/// An outbound call being announced on a diagnostics source.
///
/// Construct one just before sending a request; the observers of the source
/// may stamp correlation headers into the carrier during
/// [`begin`](OutboundCall::begin). Call [`complete`](OutboundCall::complete)
/// when the response arrives so latency consumers see the closing event.
/// Dropping the call without completing it simply means "duration unknown"
/// to consumers; it is not an error.
///
/// # Examples
///
/// ```
/// use correlation::diagnostics::DiagnosticRegistry;
/// use correlation_http::{CorrelationConfig, CorrelationHttpInstrumentation, OutboundCall};
/// use correlation_http::HTTP_CLIENT_SOURCE;
/// use std::collections::HashMap;
///
/// let registry = DiagnosticRegistry::new();
/// let _instrumentation =
///     CorrelationHttpInstrumentation::enable(&registry, CorrelationConfig::default());
///
/// let source = registry.source(HTTP_CLIENT_SOURCE);
/// let mut headers: HashMap<String, String> = HashMap::new();
/// let call = OutboundCall::begin(&source, "api.internal.example", &mut headers);
/// assert!(headers.contains_key("request-id"));
/// // ... send the request, await the response ...
/// call.complete();
/// ```
#[derive(Debug)]
pub struct OutboundCall {
    source: DiagnosticSource,
    endpoint: String,
    activity: Option<Activity>,
}

impl OutboundCall {
    /// Announces a request about to be sent to `endpoint`, letting the
    /// source's observers write headers into the carrier.
    pub fn begin(
        source: &DiagnosticSource,
        endpoint: impl Into<String>,
        headers: &mut dyn Injector,
    ) -> Self {
        let endpoint = endpoint.into();
        let mut activity = None;
        if source.is_enabled(REQUEST_SENT) {
            source.publish(&mut DiagnosticEvent::RequestSent {
                endpoint: &endpoint,
                headers,
                activity: &mut activity,
                timestamp: SystemTime::now(),
            });
        }
        OutboundCall {
            source: source.clone(),
            endpoint,
            activity,
        }
    }

    /// The activity minted for this call, if any observer claimed it.
    pub fn activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    /// Announces that the response for this call has arrived.
    pub fn complete(self) {
        if self.source.is_enabled(RESPONSE_RECEIVED) {
            self.source.publish(&mut DiagnosticEvent::ResponseReceived {
                endpoint: &self.endpoint,
                activity: self.activity.as_ref(),
                timestamp: SystemTime::now(),
            });
        }
    }
}

/// Observer that correlates outbound calls announced on a source.
///
/// On a request notification for an eligible endpoint it starts a child
/// [`Activity`] (publishing the started event), injects the identifier and
/// baggage headers, then immediately stops the activity, restoring the
/// ambient value; holding the activity open across the caller's suspension
/// point could leak it into unrelated concurrent continuations. On the
/// response notification no ambient mutation occurs; only the stopped event
/// is published, closing the latency bracket.
///
/// Endpoints rejected by the filter are invisible to tracing: no activity,
/// no headers, no events.
pub(crate) struct HttpOutboundObserver {
    filter: EndpointFilter,
    propagator: CorrelationPropagator,
    source: DiagnosticSource,
}

impl HttpOutboundObserver {
    pub(crate) fn new(
        filter: EndpointFilter,
        propagator: CorrelationPropagator,
        source: DiagnosticSource,
    ) -> Self {
        HttpOutboundObserver {
            filter,
            propagator,
            source,
        }
    }
}

impl DiagnosticObserver for HttpOutboundObserver {
    fn enabled(&self, event: &str) -> bool {
        event == REQUEST_SENT || event == RESPONSE_RECEIVED
    }

    fn on_event(&self, event: &mut DiagnosticEvent<'_>) {
        match event {
            DiagnosticEvent::RequestSent {
                endpoint,
                headers,
                activity: slot,
                ..
            } => {
                if !self.filter.validate(endpoint) {
                    return;
                }
                let activity = self.source.start_activity(Activity::new(OUTBOUND_OPERATION));
                self.propagator.inject(&activity, &mut **headers);
                activity.stop();
                **slot = Some(activity);
            }
            DiagnosticEvent::ResponseReceived {
                endpoint, activity, ..
            } => {
                if !self.filter.validate(endpoint) {
                    return;
                }
                // The activity was already stopped at request time; this
                // publishes the closing event without touching ambient
                // state, stop being idempotent.
                if let Some(activity) = activity {
                    self.source.stop_activity(activity);
                }
            }
            _ => {}
        }
    }
}
