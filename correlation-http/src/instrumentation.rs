//! Configuration and wiring for outbound HTTP instrumentation.

use std::sync::Arc;

use correlation::corr_debug;
use correlation::diagnostics::{DiagnosticRegistry, Subscription};

use crate::filter::{EndpointFilter, FilterMode};
use crate::outbound::HttpOutboundObserver;
use crate::propagator::{CorrelationPropagator, HeaderMapping};

/// Name of the diagnostics source on which outbound HTTP calls are
/// announced.
pub const HTTP_CLIENT_SOURCE: &str = "http.client";

/// Configuration surface for [`CorrelationHttpInstrumentation`].
///
/// Supplied by the surrounding application; the defaults instrument every
/// outbound request with the default header names.
///
/// # Examples
///
/// ```
/// use correlation_http::{CorrelationConfig, FilterMode};
///
/// let config = CorrelationConfig::default()
///     .with_endpoint_filter(["api\\.internal\\..*"], FilterMode::Allow);
/// ```
#[derive(Clone, Debug)]
pub struct CorrelationConfig {
    instrument_outgoing_requests: bool,
    endpoint_filter: EndpointFilter,
    headers: HeaderMapping,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            instrument_outgoing_requests: true,
            endpoint_filter: EndpointFilter::default(),
            headers: HeaderMapping::default(),
        }
    }
}

impl CorrelationConfig {
    /// Master enable for outbound instrumentation. Defaults to `true`.
    pub fn with_instrument_outgoing_requests(mut self, enabled: bool) -> Self {
        self.instrument_outgoing_requests = enabled;
        self
    }

    /// Restricts which outbound targets are instrumented.
    pub fn with_endpoint_filter<I, S>(mut self, patterns: I, mode: FilterMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.endpoint_filter = EndpointFilter::new(patterns, mode);
        self
    }

    /// Overrides the wire header names.
    pub fn with_headers(mut self, headers: HeaderMapping) -> Self {
        self.headers = headers;
        self
    }
}

/// Entry point wiring outbound HTTP correlation onto a diagnostics
/// registry.
#[derive(Debug)]
pub struct CorrelationHttpInstrumentation {
    _private: (),
}

impl CorrelationHttpInstrumentation {
    /// Subscribes the outbound observer to the [`HTTP_CLIENT_SOURCE`]
    /// source of `registry`.
    ///
    /// Returns the observer's [`Subscription`]: keep it (or
    /// [`detach`](Subscription::detach) it) for as long as instrumentation
    /// should stay active. Returns `None` when outbound instrumentation is
    /// disabled in `config`.
    pub fn enable(registry: &DiagnosticRegistry, config: CorrelationConfig) -> Option<Subscription> {
        if !config.instrument_outgoing_requests {
            return None;
        }
        let source = registry.source(HTTP_CLIENT_SOURCE);
        let observer = HttpOutboundObserver::new(
            config.endpoint_filter,
            CorrelationPropagator::with_mapping(config.headers),
            source.clone(),
        );
        corr_debug!(name: "CorrelationHttpInstrumentation.Enabled", source = HTTP_CLIENT_SOURCE);
        Some(source.subscribe(Arc::new(observer)))
    }
}
