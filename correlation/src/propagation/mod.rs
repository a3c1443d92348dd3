//! Carrier interfaces for boundary codecs.
//!
//! Boundary codecs read and write activity identity and baggage as string
//! key/value pairs on whatever carrier travels with a request, usually an
//! HTTP header map. [`Injector`] and [`Extractor`] decouple the codec from
//! the carrier's concrete type; each transport integration provides its own
//! implementations.

use std::collections::HashMap;

use thiserror::Error;

/// Injector provides an interface for adding fields to an underlying
/// struct like `HashMap`.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for reading fields from an underlying
/// struct like `HashMap`.
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<&str>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect::<Vec<_>>()
    }
}

/// Error when injecting or extracting context data at a boundary.
#[derive(Error, Debug)]
#[error("Cannot {ops} from {propagator_name}: {message}")]
pub struct PropagationError {
    message: &'static str,
    // which propagator does this error comes from
    propagator_name: &'static str,
    // are we extracting or injecting information across boundaries
    ops: &'static str,
}

impl PropagationError {
    /// Error happens when extracting information.
    pub fn extract(message: &'static str, propagator_name: &'static str) -> Self {
        PropagationError {
            message,
            propagator_name,
            ops: "extract",
        }
    }

    /// Error happens when injecting information.
    pub fn inject(message: &'static str, propagator_name: &'static str) -> Self {
        PropagationError {
            message,
            propagator_name,
            ops: "inject",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_get() {
        let mut carrier = HashMap::new();
        carrier.set("headerName", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "HEADERNAME"),
            Some("value"),
            "case insensitive extraction"
        );
    }

    #[test]
    fn hash_map_keys() {
        let mut carrier = HashMap::new();
        carrier.set("headerName1", "value1".to_string());
        carrier.set("headerName2", "value2".to_string());

        let got = Extractor::keys(&carrier);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&"headername1"));
        assert!(got.contains(&"headername2"));
    }

    #[test]
    fn propagation_error_mentions_the_codec() {
        let err = PropagationError::extract("missing identifier", "CorrelationPropagator");
        let rendered = err.to_string();
        assert!(rendered.contains("extract"));
        assert!(rendered.contains("CorrelationPropagator"));
    }
}
