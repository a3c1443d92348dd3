//! Inbound request adaptation.

use std::borrow::Cow;

use correlation::propagation::Extractor;
use correlation::Activity;

use crate::propagator::CorrelationPropagator;

/// Operation name of the activity seeded for an inbound request.
pub const INBOUND_OPERATION: &str = "Http_In";

/// Seeds the ambient context from an inbound request's headers.
///
/// Reads the identifier header (absent means this process roots a new
/// causal tree) and any marked baggage headers, starts the resulting
/// activity, and returns it; starting publishes it as the ambient current
/// value, so work performed underneath parents onto it. No event bracket is
/// published for the seed itself: the true start of causality happened in
/// the calling process, this process merely continues it.
///
/// Missing or malformed headers degrade to "no parent"; they are never an
/// error.
///
/// In asynchronous servers, call this *inside* the request task (wrapped
/// with [`FutureContextExt::with_activity`]) so the seeded value flows with
/// that task alone.
///
/// [`FutureContextExt::with_activity`]: correlation::context::FutureContextExt::with_activity
///
/// # Examples
///
/// ```
/// use correlation::Activity;
/// use correlation_http::{on_inbound_request, CorrelationPropagator, INBOUND_OPERATION};
/// use std::collections::HashMap;
///
/// let mut headers: HashMap<String, String> = HashMap::new();
/// headers.insert("request-id".into(), "abc".into());
/// headers.insert("x-v".into(), "1".into());
/// headers.insert("x-v-user".into(), "42".into());
///
/// let propagator = CorrelationPropagator::new();
/// let inbound = on_inbound_request(&propagator, INBOUND_OPERATION, &headers);
///
/// assert_eq!(inbound.parent_id(), Some("abc"));
/// assert!(Activity::current().unwrap().same_record(&inbound));
/// inbound.stop();
/// ```
pub fn on_inbound_request(
    propagator: &CorrelationPropagator,
    operation_name: impl Into<Cow<'static, str>>,
    headers: &dyn Extractor,
) -> Activity {
    propagator.extract(operation_name, headers).start()
}
