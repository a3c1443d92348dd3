//! HTTP boundary propagation for the `correlation` crate.
//!
//! This crate carries activity identity and baggage across an HTTP hop:
//!
//! - [`CorrelationPropagator`] encodes an [`Activity`]'s id and baggage
//!   into request headers on egress and decodes them back into a seed
//!   activity on ingress, per the [`HeaderMapping`] configuration;
//! - [`EndpointFilter`] decides which outbound targets are instrumented at
//!   all;
//! - [`CorrelationHttpInstrumentation`] wires an observer onto the
//!   diagnostics bus that mints a child activity and stamps headers for
//!   every instrumented outbound call;
//! - [`on_inbound_request`] seeds the ambient context from an inbound
//!   request's headers;
//! - [`HeaderInjector`] and [`HeaderExtractor`] adapt `http::HeaderMap` to
//!   the carrier traits.
//!
//! [`Activity`]: correlation::Activity

#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use correlation::propagation::{Extractor, Injector};

mod filter;
mod inbound;
mod instrumentation;
mod outbound;
mod propagator;

pub use filter::{EndpointFilter, FilterMode};
pub use inbound::{on_inbound_request, INBOUND_OPERATION};
pub use instrumentation::{
    CorrelationConfig, CorrelationHttpInstrumentation, HTTP_CLIENT_SOURCE,
};
pub use outbound::{OutboundCall, OUTBOUND_OPERATION};
pub use propagator::{CorrelationPropagator, HeaderMapping};

/// Helper for injecting headers into HTTP requests. This is used for
/// correlation context propagation over HTTP.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    /// Set a key and value in the HeaderMap. Does nothing if the key or
    /// value are not valid inputs.
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

impl std::fmt::Debug for HeaderInjector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HeaderInjector").field(self.0).finish()
    }
}

/// Helper for extracting headers from HTTP requests. This is used for
/// correlation context propagation over HTTP.
#[derive(Debug)]
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    /// Get a value for a key from the HeaderMap. If the value is not valid
    /// ASCII, returns None.
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    /// Collect all the keys from the HeaderMap.
    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|value| value.as_str())
            .collect::<Vec<_>>()
    }
}
